//! The CPU seam. A core drives the bus only through `CoreHooks`, which is
//! where every access gets intercepted.

pub mod mini6502;


use crate::debugger::Debuggable;
use crate::memory::BusBackend;
use crate::state::{CpuState, EmulationSnapshot};

pub use mini6502::MiniCpu;

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Bus access and signal notification points a core reports through.
pub trait CoreHooks {
    /// Data and operand reads.
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);
    /// Opcode fetch.
    fn fetch(&mut self, address: u16) -> u8;

    fn notify_reset(&mut self);
    fn notify_nmi(&mut self);
    fn notify_irq(&mut self);
}

/// Result of one `ExecutionCore::step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionStep {
    /// Address of the opcode, or the interrupted PC for an interrupt entry
    pub pc: u16,
    /// 0x00 for interrupt entries
    pub opcode: u8,
    pub cycles: u32,
}

pub trait ExecutionCore: Debuggable {
    /// Machine identity recorded in savestates.
    fn identity(&self) -> &'static str;

    fn reset(&mut self, hooks: &mut dyn CoreHooks);
    /// Execute one instruction, or enter a pending interrupt.
    fn step(&mut self, hooks: &mut dyn CoreHooks) -> InstructionStep;

    fn program_counter(&self) -> u16;
    fn cpu_state(&self) -> CpuState;
    fn set_cpu_state(&mut self, state: &CpuState);

    /// Edge-triggered; serviced before the next instruction.
    fn signal_nmi(&mut self);
    fn set_irq_line(&mut self, level: bool);
}

/// Structured snapshot of the whole machine.
pub fn snapshot(core: &dyn ExecutionCore, bus: &dyn BusBackend) -> EmulationSnapshot {
    EmulationSnapshot {
        cpu: core.cpu_state(),
        ppu: bus.ppu_state(),
        apu: bus.apu_state(),
        cartridge: bus.cartridge_state(),
    }
}
