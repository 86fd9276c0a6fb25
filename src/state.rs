//! Structured emulation state returned by state-inspection queries.
//!
//! CPU and PPU fields may be round-tripped through `Session::set_state`.
//! APU and cartridge substate are informational only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
    pub cycle_count: u64,
    pub nmi_pending: bool,
    pub irq_line: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuState {
    /// 0-239 visible, 240 post-render, 241-260 vblank, 261 pre-render.
    pub scanline: u16,
    /// 0-340
    pub dot: u16,
    pub frame_count: u64,
    pub control: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub vram_addr: u16,
    pub write_latch: bool,
    pub read_buffer: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApuState {
    /// Last values written to $4000-$4017.
    pub registers: Vec<u8>,
    pub frame_counter_mode: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeState {
    pub mapper: u8,
    pub prg_rom_size: usize,
    pub chr_rom_size: usize,
    pub chr_ram_size: usize,
    pub prg_ram_size: usize,
    pub battery: bool,
    pub prg_bank: u8,
    pub chr_bank: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulationSnapshot {
    pub cpu: CpuState,
    pub ppu: PpuState,
    pub apu: ApuState,
    pub cartridge: CartridgeState,
}
