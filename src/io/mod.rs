//! NES controller ports
//!
//! ## I/O Port Addresses
//!
//! | Address | Access | Description                          |
//! |:--------|:-------|:-------------------------------------|
//! | $4016   | write  | Strobe (bit 0) for both controllers  |
//! | $4016   | read   | Controller 1 serial data (bit 0)     |
//! | $4017   | read   | Controller 2 serial data (bit 0)     |
//!
//! Buttons shift out in the order A, B, Select, Start, Up, Down, Left, Right.
//! After eight reads the standard controller returns 1.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Button state for a standard NES controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl ControllerState {
    /// Create a new controller state with no buttons pressed
    pub fn new() -> Self {
        Self::default()
    }

    /// Set button state by name (for scripting/testing)
    pub fn set_button(&mut self, button: &str, pressed: bool) {
        match button.to_lowercase().as_str() {
            "a" => self.a = pressed,
            "b" => self.b = pressed,
            "select" => self.select = pressed,
            "start" => self.start = pressed,
            "up" => self.up = pressed,
            "down" => self.down = pressed,
            "left" => self.left = pressed,
            "right" => self.right = pressed,
            _ => {}
        }
    }

    /// Pack into shift order: bit 0 = A ... bit 7 = Right
    pub fn to_byte(&self) -> u8 {
        [
            self.a,
            self.b,
            self.select,
            self.start,
            self.up,
            self.down,
            self.left,
            self.right,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |acc, (bit, &pressed)| acc | ((pressed as u8) << bit))
    }

    pub fn from_byte(value: u8) -> Self {
        let bit = |n: u8| value & (1 << n) != 0;
        Self {
            a: bit(0),
            b: bit(1),
            select: bit(2),
            start: bit(3),
            up: bit(4),
            down: bit(5),
            left: bit(6),
            right: bit(7),
        }
    }

    /// Clear all buttons
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = ['A', 'B', 's', 'S', 'U', 'D', 'L', 'R'];
        let byte = self.to_byte();
        for (bit, label) in labels.iter().enumerate() {
            if byte & (1 << bit) != 0 {
                write!(f, "{}", label)?;
            } else {
                write!(f, ".")?;
            }
        }
        Ok(())
    }
}

/// A controller port with its serial shift register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerPort {
    /// Current button state
    pub state: ControllerState,
    shift: u8,
    reads: u8,
}

impl ControllerPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.shift = 0;
        self.reads = 0;
    }

    /// Latch the current buttons into the shift register
    pub fn latch(&mut self) {
        self.shift = self.state.to_byte();
        self.reads = 0;
    }

    /// Shift out one bit. With the strobe held high the A button is returned
    /// continuously.
    pub fn read_serial(&mut self, strobe: bool) -> u8 {
        if strobe {
            return self.state.a as u8;
        }
        if self.reads >= 8 {
            return 1;
        }
        let bit = self.shift & 1;
        self.shift >>= 1;
        self.reads += 1;
        bit
    }

    /// Side-effect-free view of the next serial bit
    pub fn peek_serial(&self, strobe: bool) -> u8 {
        if strobe {
            self.state.a as u8
        } else if self.reads >= 8 {
            1
        } else {
            self.shift & 1
        }
    }
}

/// I/O subsystem managing both controller ports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Io {
    pub port1: ControllerPort,
    pub port2: ControllerPort,
    strobe: bool,
    #[serde(skip)]
    polled: bool,
}

impl Io {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.port1.reset();
        self.port2.reset();
        self.strobe = false;
        self.polled = false;
    }

    /// Read from $4016/$4017. Open-bus upper bits read as $40.
    pub fn read(&mut self, address: u16) -> u8 {
        let strobe = self.strobe;
        let bit = match address {
            0x4016 => self.port1.read_serial(strobe),
            0x4017 => self.port2.read_serial(strobe),
            _ => 0,
        };
        0x40 | bit
    }

    pub fn peek(&self, address: u16) -> u8 {
        let bit = match address {
            0x4016 => self.port1.peek_serial(self.strobe),
            0x4017 => self.port2.peek_serial(self.strobe),
            _ => 0,
        };
        0x40 | bit
    }

    /// Write the strobe register. A falling edge latches both controllers
    /// and counts as an input poll.
    pub fn write(&mut self, value: u8) {
        let new_strobe = value & 0x01 != 0;
        if self.strobe && !new_strobe {
            self.port1.latch();
            self.port2.latch();
            self.polled = true;
        }
        self.strobe = new_strobe;
    }

    pub fn take_poll(&mut self) -> bool {
        std::mem::take(&mut self.polled)
    }

    /// Replace a port's buttons. Until the first serial read after a latch
    /// the new buttons are latched too, so input set while handling a poll
    /// is what the game reads.
    pub fn set_controller(&mut self, port: u8, state: ControllerState) -> bool {
        let strobe = self.strobe;
        let port = match port {
            0 => &mut self.port1,
            1 => &mut self.port2,
            _ => return false,
        };
        port.state = state;
        if !strobe && port.reads == 0 {
            port.latch();
        }
        true
    }

    pub fn controller_state(&self, port: u8) -> Option<ControllerState> {
        match port {
            0 => Some(self.port1.state),
            1 => Some(self.port2.state),
            _ => None,
        }
    }
}
