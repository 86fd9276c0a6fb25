//! Memory address spaces and the bus seam the interceptor sits on.
//!
//! ## Script-visible memory types
//!
//! | Type           | Range            | Side effects | Callbacks |
//! |:---------------|:-----------------|:-------------|:----------|
//! | `Cpu`          | $0000-$FFFF      | yes          | yes       |
//! | `Ppu`          | $0000-$3FFF      | yes          | yes       |
//! | `Palette`      | $00-$3F          | no           | no        |
//! | `Oam`          | $00-$FF          | no           | no        |
//! | `SecondaryOam` | $00-$1F          | no           | no        |
//! | `PrgRom`       | cartridge sized  | no           | no        |
//! | `ChrRom`       | cartridge sized  | no           | no        |
//! | `ChrRam`       | cartridge sized  | no           | no        |
//! | `WorkRam`      | cartridge sized  | no           | no        |
//! | `SaveRam`      | cartridge sized  | no           | no        |
//! | `CpuDebug`     | $0000-$FFFF      | no           | no        |
//! | `PpuDebug`     | $0000-$3FFF      | no           | no        |

pub mod bus;
pub mod byte_utils;
pub mod counters;
pub mod interceptor;

#[cfg(test)]
mod tests_debug;

use crate::debugger::Debuggable;
use crate::io::ControllerState;
use crate::state::{ApuState, CartridgeState, PpuState};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use bus::{Cartridge, NesBus};
pub use counters::{AccessCounters, CounterKind};
pub use interceptor::MemoryInterceptor;

/// Highest valid CPU bus address.
pub const CPU_ADDRESS_MAX: u32 = 0xFFFF;
/// Highest valid PPU bus address (14-bit bus).
pub const PPU_ADDRESS_MAX: u32 = 0x3FFF;

/// Classifies a bus transaction for callback matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessKind {
    CpuRead,
    CpuWrite,
    CpuExec,
    PpuRead,
    PpuWrite,
}

impl AccessKind {
    pub const ALL: [AccessKind; 5] = [
        AccessKind::CpuRead,
        AccessKind::CpuWrite,
        AccessKind::CpuExec,
        AccessKind::PpuRead,
        AccessKind::PpuWrite,
    ];

    pub const COUNT: usize = 5;

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Highest address a registration of this kind may cover.
    pub fn address_max(self) -> u32 {
        match self {
            AccessKind::CpuRead | AccessKind::CpuWrite | AccessKind::CpuExec => CPU_ADDRESS_MAX,
            AccessKind::PpuRead | AccessKind::PpuWrite => PPU_ADDRESS_MAX,
        }
    }

    pub fn is_ppu(self) -> bool {
        matches!(self, AccessKind::PpuRead | AccessKind::PpuWrite)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessKind::CpuRead => "cpuRead",
            AccessKind::CpuWrite => "cpuWrite",
            AccessKind::CpuExec => "cpuExec",
            AccessKind::PpuRead => "ppuRead",
            AccessKind::PpuWrite => "ppuWrite",
        };
        f.write_str(name)
    }
}

/// Memory type selector used by the script memory API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    Cpu,
    Ppu,
    Palette,
    Oam,
    SecondaryOam,
    PrgRom,
    ChrRom,
    ChrRam,
    WorkRam,
    SaveRam,
    CpuDebug,
    PpuDebug,
}

impl MemoryType {
    /// Side-effecting types go through the interceptor; everything else is
    /// a direct, silent access to backing storage.
    pub fn has_side_effects(self) -> bool {
        matches!(self, MemoryType::Cpu | MemoryType::Ppu)
    }

    /// The side-effect-free mirror of a bus type.
    pub fn debug_mirror(self) -> MemoryType {
        match self {
            MemoryType::Cpu => MemoryType::CpuDebug,
            MemoryType::Ppu => MemoryType::PpuDebug,
            other => other,
        }
    }
}

/// Internal PPU bus transaction queued by a CPU access to the data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PpuTransfer {
    Read { address: u16 },
    Write { address: u16, value: u8 },
}

/// What happened on the PPU side while the bus was ticked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuSignals {
    pub sprite_zero_hit: Option<(u16, u16)>,
    pub frame_end: bool,
    pub nmi: bool,
    pub frame_start: bool,
    /// Level of the shared IRQ line after the tick.
    pub irq: bool,
}

/// The system bus as seen by the interceptor.
///
/// `cpu_read`/`cpu_write`/`ppu_read`/`ppu_write` carry hardware side effects.
/// `peek`/`poke` never do; they back the debug memory types.
pub trait BusBackend: Debuggable {
    fn cpu_read(&mut self, address: u16) -> u8;
    fn cpu_write(&mut self, address: u16, value: u8);
    fn ppu_read(&mut self, address: u16) -> u8;
    fn ppu_write(&mut self, address: u16, value: u8);

    /// Internal PPU transfer queued by the last CPU data-port access.
    fn take_ppu_transfer(&mut self) -> Option<PpuTransfer>;
    /// Latch the (possibly overridden) result of a queued PPU read.
    fn finish_ppu_read(&mut self, value: u8);
    /// True once after the controller strobe falls.
    fn take_input_poll(&mut self) -> bool;

    fn peek(&self, space: MemoryType, address: u32) -> Option<u8>;
    fn poke(&mut self, space: MemoryType, address: u32, value: u8) -> bool;
    fn size_of(&self, space: MemoryType) -> usize;

    /// Advance PPU timing by the given number of CPU cycles.
    fn tick(&mut self, cpu_cycles: u32) -> PpuSignals;
    fn reset(&mut self);

    /// Controller state latched for the next poll; `None` for a bad port.
    fn input(&self, port: u8) -> Option<ControllerState>;
    fn set_input(&mut self, port: u8, state: ControllerState) -> bool;

    fn ppu_state(&self) -> PpuState;
    fn set_ppu_state(&mut self, state: &PpuState);
    fn apu_state(&self) -> ApuState;
    fn cartridge_state(&self) -> CartridgeState;
}
