//! A small 6502 subset: enough opcodes to drive the bus, the interrupt
//! lines and the hook points from test programs and demos.
//!
//! Unimplemented opcodes execute as two-cycle NOPs.

use super::{CoreHooks, ExecutionCore, InstructionStep, IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};
use crate::debugger::Debuggable;
use crate::error::{HookError, Result};
use crate::memory::byte_utils::join_u16;
use crate::state::CpuState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_IRQ_DISABLE: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

const INTERRUPT_CYCLES: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniCpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
    pub cycles: u64,
    nmi_pending: bool,
    irq_line: bool,
}

impl Default for MiniCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniCpu {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            pc: 0,
            status: FLAG_UNUSED | FLAG_IRQ_DISABLE,
            cycles: 0,
            nmi_pending: false,
            irq_line: false,
        }
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    fn set_zn(&mut self, value: u8) {
        self.status &= !(FLAG_ZERO | FLAG_NEGATIVE);
        if value == 0 {
            self.status |= FLAG_ZERO;
        }
        self.status |= value & FLAG_NEGATIVE;
    }

    fn next_byte(&mut self, hooks: &mut dyn CoreHooks) -> u8 {
        let value = hooks.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn next_word(&mut self, hooks: &mut dyn CoreHooks) -> u16 {
        let low = self.next_byte(hooks);
        let high = self.next_byte(hooks);
        join_u16(low, high)
    }

    fn read_vector(hooks: &mut dyn CoreHooks, vector: u16) -> u16 {
        let low = hooks.read(vector);
        let high = hooks.read(vector.wrapping_add(1));
        join_u16(low, high)
    }

    fn push(&mut self, hooks: &mut dyn CoreHooks, value: u8) {
        hooks.write(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull(&mut self, hooks: &mut dyn CoreHooks) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        hooks.read(0x0100 | self.sp as u16)
    }

    fn enter_interrupt(&mut self, hooks: &mut dyn CoreHooks, vector: u16) {
        let [low, high] = self.pc.to_le_bytes();
        self.push(hooks, high);
        self.push(hooks, low);
        self.push(hooks, (self.status | FLAG_UNUSED) & !FLAG_BREAK);
        self.status |= FLAG_IRQ_DISABLE;
        self.pc = Self::read_vector(hooks, vector);
    }

    fn branch(&mut self, hooks: &mut dyn CoreHooks, taken: bool) -> u32 {
        let offset = self.next_byte(hooks) as i8;
        if !taken {
            return 2;
        }
        self.pc = self.pc.wrapping_add(offset as i16 as u16);
        3
    }

    fn execute(&mut self, hooks: &mut dyn CoreHooks, opcode: u8) -> u32 {
        match opcode {
            // LDA #imm
            0xA9 => {
                self.a = self.next_byte(hooks);
                self.set_zn(self.a);
                2
            }
            // LDA abs
            0xAD => {
                let address = self.next_word(hooks);
                self.a = hooks.read(address);
                self.set_zn(self.a);
                4
            }
            // LDX #imm
            0xA2 => {
                self.x = self.next_byte(hooks);
                self.set_zn(self.x);
                2
            }
            // LDY #imm
            0xA0 => {
                self.y = self.next_byte(hooks);
                self.set_zn(self.y);
                2
            }
            // STA abs
            0x8D => {
                let address = self.next_word(hooks);
                hooks.write(address, self.a);
                4
            }
            // STX abs
            0x8E => {
                let address = self.next_word(hooks);
                hooks.write(address, self.x);
                4
            }
            // INC abs, with the read-modify-write dummy write
            0xEE => {
                let address = self.next_word(hooks);
                let value = hooks.read(address);
                hooks.write(address, value);
                let value = value.wrapping_add(1);
                hooks.write(address, value);
                self.set_zn(value);
                6
            }
            // INX
            0xE8 => {
                self.x = self.x.wrapping_add(1);
                self.set_zn(self.x);
                2
            }
            // DEX
            0xCA => {
                self.x = self.x.wrapping_sub(1);
                self.set_zn(self.x);
                2
            }
            // INY
            0xC8 => {
                self.y = self.y.wrapping_add(1);
                self.set_zn(self.y);
                2
            }
            // BNE / BEQ
            0xD0 => self.branch(hooks, self.status & FLAG_ZERO == 0),
            0xF0 => self.branch(hooks, self.status & FLAG_ZERO != 0),
            // JMP abs
            0x4C => {
                self.pc = self.next_word(hooks);
                3
            }
            // PHA / PLA
            0x48 => {
                self.push(hooks, self.a);
                3
            }
            0x68 => {
                self.a = self.pull(hooks);
                self.set_zn(self.a);
                4
            }
            // RTI
            0x40 => {
                self.status = (self.pull(hooks) | FLAG_UNUSED) & !FLAG_BREAK;
                let low = self.pull(hooks);
                let high = self.pull(hooks);
                self.pc = join_u16(low, high);
                6
            }
            // SEI / CLI / CLC / SEC
            0x78 => {
                self.status |= FLAG_IRQ_DISABLE;
                2
            }
            0x58 => {
                self.status &= !FLAG_IRQ_DISABLE;
                2
            }
            0x18 => {
                self.status &= !FLAG_CARRY;
                2
            }
            0x38 => {
                self.status |= FLAG_CARRY;
                2
            }
            // NOP
            0xEA => 2,
            _ => {
                log::trace!(
                    "opcode ${:02X} at ${:04X} not implemented, treated as NOP",
                    opcode,
                    self.pc.wrapping_sub(1)
                );
                2
            }
        }
    }
}

impl ExecutionCore for MiniCpu {
    fn identity(&self) -> &'static str {
        "mini6502"
    }

    fn reset(&mut self, hooks: &mut dyn CoreHooks) {
        self.sp = 0xFD;
        self.status |= FLAG_IRQ_DISABLE | FLAG_UNUSED;
        self.nmi_pending = false;
        self.pc = Self::read_vector(hooks, RESET_VECTOR);
        self.cycles += INTERRUPT_CYCLES as u64;
        hooks.notify_reset();
    }

    fn step(&mut self, hooks: &mut dyn CoreHooks) -> InstructionStep {
        let pc = self.pc;

        if self.nmi_pending {
            self.nmi_pending = false;
            self.enter_interrupt(hooks, NMI_VECTOR);
            self.cycles += INTERRUPT_CYCLES as u64;
            hooks.notify_nmi();
            return InstructionStep {
                pc,
                opcode: 0x00,
                cycles: INTERRUPT_CYCLES,
            };
        }

        if self.irq_line && self.status & FLAG_IRQ_DISABLE == 0 {
            self.enter_interrupt(hooks, IRQ_VECTOR);
            self.cycles += INTERRUPT_CYCLES as u64;
            hooks.notify_irq();
            return InstructionStep {
                pc,
                opcode: 0x00,
                cycles: INTERRUPT_CYCLES,
            };
        }

        let opcode = hooks.fetch(pc);
        self.pc = pc.wrapping_add(1);
        let cycles = self.execute(hooks, opcode);
        self.cycles += cycles as u64;
        InstructionStep { pc, opcode, cycles }
    }

    fn program_counter(&self) -> u16 {
        self.pc
    }

    fn cpu_state(&self) -> CpuState {
        CpuState {
            a: self.a,
            x: self.x,
            y: self.y,
            sp: self.sp,
            pc: self.pc,
            status: self.status,
            cycle_count: self.cycles,
            nmi_pending: self.nmi_pending,
            irq_line: self.irq_line,
        }
    }

    fn set_cpu_state(&mut self, state: &CpuState) {
        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.sp = state.sp;
        self.pc = state.pc;
        self.status = state.status | FLAG_UNUSED;
        self.cycles = state.cycle_count;
        self.nmi_pending = state.nmi_pending;
        self.irq_line = state.irq_line;
    }

    fn signal_nmi(&mut self) {
        self.nmi_pending = true;
    }

    fn set_irq_line(&mut self, level: bool) {
        self.irq_line = level;
    }
}

impl Debuggable for MiniCpu {
    fn read_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn write_state(&mut self, state: &Value) -> Result<()> {
        let restored: MiniCpu = serde_json::from_value(state.clone())
            .map_err(|e| HookError::CorruptSavestate(format!("cpu state: {}", e)))?;
        *self = restored;
        Ok(())
    }
}
