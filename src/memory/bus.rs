//! Reference NES bus: NROM cartridge, 2KB work RAM, PPU registers and
//! address spaces, APU register file and controller ports.
//!
//! CPU memory map:
//!
//! | Range       | Target                                  |
//! |:------------|:----------------------------------------|
//! | $0000-$1FFF | 2KB internal RAM, mirrored              |
//! | $2000-$3FFF | PPU registers, mirrored every 8 bytes   |
//! | $4000-$4013 | APU registers                           |
//! | $4014       | OAM DMA                                 |
//! | $4015       | APU status                              |
//! | $4016-$4017 | controller ports                        |
//! | $6000-$7FFF | PRG RAM (work or battery-backed)        |
//! | $8000-$FFFF | PRG ROM, 16KB images mirrored           |

use super::{BusBackend, MemoryType, PpuSignals, PpuTransfer, CPU_ADDRESS_MAX, PPU_ADDRESS_MAX};
use crate::debugger::Debuggable;
use crate::error::{HookError, Result};
use crate::io::{ControllerState, Io};
use crate::state::{ApuState, CartridgeState, PpuState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INTERNAL_RAM_SIZE: usize = 0x800;
pub const NAMETABLE_RAM_SIZE: usize = 0x800;
pub const PALETTE_SIZE: usize = 0x20;
pub const OAM_SIZE: usize = 0x100;
pub const SECONDARY_OAM_SIZE: usize = 0x20;
pub const PRG_RAM_SIZE: usize = 0x2000;
pub const CHR_RAM_SIZE: usize = 0x2000;
const APU_REGISTER_COUNT: usize = 0x18;

pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;
pub const POST_RENDER_SCANLINE: u16 = 240;
pub const VBLANK_SCANLINE: u16 = 241;
pub const PRE_RENDER_SCANLINE: u16 = 261;

/// Power-on PPU position: one dot before the pre-render line.
const POWER_ON_SCANLINE: u16 = 260;
const POWER_ON_DOT: u16 = 340;

const STATUS_VBLANK: u8 = 0x80;
const STATUS_SPRITE_ZERO: u8 = 0x40;
const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_INCREMENT_32: u8 = 0x04;
const MASK_RENDERING: u8 = 0x18;

/// An NROM (mapper 0) cartridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cartridge {
    #[serde(skip)]
    pub prg_rom: Vec<u8>,
    #[serde(skip)]
    pub chr_rom: Vec<u8>,
    pub chr_ram: Vec<u8>,
    pub prg_ram: Vec<u8>,
    pub battery: bool,
    pub mapper: u8,
}

impl Cartridge {
    /// Without CHR ROM the cartridge carries 8KB of CHR RAM.
    pub fn nrom(prg_rom: Vec<u8>, chr_rom: Vec<u8>) -> Self {
        let chr_ram = if chr_rom.is_empty() {
            vec![0; CHR_RAM_SIZE]
        } else {
            Vec::new()
        };
        Self {
            prg_rom,
            chr_rom,
            chr_ram,
            prg_ram: vec![0; PRG_RAM_SIZE],
            battery: false,
            mapper: 0,
        }
    }

    pub fn with_battery(mut self, battery: bool) -> Self {
        self.battery = battery;
        self
    }

    /// Build a 32KB PRG image: `program` at $8000, `nmi_handler` at $9000
    /// followed by RTI, an RTI-only IRQ handler at $9800. Unused space is
    /// filled with NOPs.
    pub fn from_program(program: &[u8], nmi_handler: &[u8]) -> Result<Self> {
        const NMI_OFFSET: usize = 0x1000;
        const IRQ_OFFSET: usize = 0x1800;
        if program.len() > NMI_OFFSET {
            return Err(HookError::AddressOutOfRange {
                space: MemoryType::PrgRom,
                address: program.len() as u32,
            });
        }
        if nmi_handler.len() >= IRQ_OFFSET - NMI_OFFSET {
            return Err(HookError::AddressOutOfRange {
                space: MemoryType::PrgRom,
                address: (NMI_OFFSET + nmi_handler.len()) as u32,
            });
        }

        let mut prg = vec![0xEA; 0x8000];
        prg[..program.len()].copy_from_slice(program);
        prg[NMI_OFFSET..NMI_OFFSET + nmi_handler.len()].copy_from_slice(nmi_handler);
        prg[NMI_OFFSET + nmi_handler.len()] = 0x40;
        prg[IRQ_OFFSET] = 0x40;
        // NMI $9000, RESET $8000, IRQ $9800
        prg[0x7FFA..].copy_from_slice(&[0x00, 0x90, 0x00, 0x80, 0x00, 0x98]);
        Ok(Self::nrom(prg, Vec::new()))
    }

    fn chr(&self) -> &[u8] {
        if self.chr_rom.is_empty() {
            &self.chr_ram
        } else {
            &self.chr_rom
        }
    }

    fn read_prg_rom(&self, address: u16) -> u8 {
        if self.prg_rom.is_empty() {
            return 0xFF;
        }
        self.prg_rom[(address as usize - 0x8000) % self.prg_rom.len()]
    }

    fn prg_ram_index(&self, address: u16) -> Option<usize> {
        if self.prg_ram.is_empty() {
            return None;
        }
        Some((address as usize - 0x6000) % self.prg_ram.len())
    }
}

/// Reference NES system bus.
#[derive(Debug, Serialize, Deserialize)]
pub struct NesBus {
    pub cartridge: Cartridge,

    /// 2KB internal RAM
    pub ram: Box<[u8]>,
    /// 2KB nametable RAM, vertical mirroring
    pub vram: Box<[u8]>,
    pub palette: [u8; PALETTE_SIZE],
    pub oam: Box<[u8]>,
    pub secondary_oam: [u8; SECONDARY_OAM_SIZE],

    pub ppu: PpuState,
    pub apu_registers: [u8; APU_REGISTER_COUNT],
    pub io: Io,

    /// Cartridge IRQ line
    pub irq_line: bool,

    #[serde(skip)]
    pending_transfer: Option<PpuTransfer>,
}

impl Default for NesBus {
    fn default() -> Self {
        Self::new(Cartridge::default())
    }
}

impl NesBus {
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            cartridge,
            ram: vec![0; INTERNAL_RAM_SIZE].into_boxed_slice(),
            vram: vec![0; NAMETABLE_RAM_SIZE].into_boxed_slice(),
            palette: [0; PALETTE_SIZE],
            oam: vec![0; OAM_SIZE].into_boxed_slice(),
            secondary_oam: [0xFF; SECONDARY_OAM_SIZE],
            ppu: Self::power_on_ppu(),
            apu_registers: [0; APU_REGISTER_COUNT],
            io: Io::new(),
            irq_line: false,
            pending_transfer: None,
        }
    }

    fn power_on_ppu() -> PpuState {
        PpuState {
            scanline: POWER_ON_SCANLINE,
            dot: POWER_ON_DOT,
            ..PpuState::default()
        }
    }

    /// Swap in a new cartridge, keeping the rest of the machine.
    pub fn load_cartridge(&mut self, cartridge: Cartridge) {
        log::info!(
            "cartridge loaded: {} KB PRG, {} KB CHR",
            cartridge.prg_rom.len() / 1024,
            cartridge.chr().len() / 1024
        );
        self.cartridge = cartridge;
    }

    pub fn set_irq_line(&mut self, level: bool) {
        self.irq_line = level;
    }

    fn vram_increment(&self) -> u16 {
        if self.ppu.control & CTRL_INCREMENT_32 != 0 {
            32
        } else {
            1
        }
    }

    fn palette_index(address: u16) -> usize {
        let index = (address & 0x1F) as usize;
        // $3F10/$3F14/$3F18/$3F1C mirror the background entries
        if index & 0x13 == 0x10 {
            index & !0x10
        } else {
            index
        }
    }

    fn read_ppu_space(&self, address: u16) -> u8 {
        let address = address & PPU_ADDRESS_MAX as u16;
        match address {
            0x0000..=0x1FFF => self.cartridge.chr().get(address as usize).copied().unwrap_or(0),
            0x2000..=0x3EFF => self.vram[(address as usize - 0x2000) & (NAMETABLE_RAM_SIZE - 1)],
            _ => self.palette[Self::palette_index(address)],
        }
    }

    /// `allow_rom` lets debug writes patch CHR ROM.
    fn write_ppu_space(&mut self, address: u16, value: u8, allow_rom: bool) {
        let address = address & PPU_ADDRESS_MAX as u16;
        match address {
            0x0000..=0x1FFF => {
                let index = address as usize;
                if !self.cartridge.chr_rom.is_empty() {
                    if allow_rom {
                        if let Some(byte) = self.cartridge.chr_rom.get_mut(index) {
                            *byte = value;
                        }
                    }
                } else if let Some(byte) = self.cartridge.chr_ram.get_mut(index) {
                    *byte = value;
                }
            }
            0x2000..=0x3EFF => {
                self.vram[(address as usize - 0x2000) & (NAMETABLE_RAM_SIZE - 1)] = value;
            }
            _ => self.palette[Self::palette_index(address)] = value,
        }
    }

    fn read_ppu_register(&mut self, register: u16) -> u8 {
        match register {
            2 => {
                let value = self.ppu.status & 0xE0;
                self.ppu.status &= !STATUS_VBLANK;
                self.ppu.write_latch = false;
                value
            }
            4 => self.oam[self.ppu.oam_addr as usize],
            7 => {
                // Reads through the data port are always buffered
                let value = self.ppu.read_buffer;
                self.pending_transfer = Some(PpuTransfer::Read {
                    address: self.ppu.vram_addr & PPU_ADDRESS_MAX as u16,
                });
                self.ppu.vram_addr = self.ppu.vram_addr.wrapping_add(self.vram_increment());
                value
            }
            // Write-only registers
            _ => 0,
        }
    }

    fn peek_ppu_register(&self, register: u16) -> u8 {
        match register {
            0 => self.ppu.control,
            1 => self.ppu.mask,
            2 => self.ppu.status & 0xE0,
            3 => self.ppu.oam_addr,
            4 => self.oam[self.ppu.oam_addr as usize],
            7 => self.ppu.read_buffer,
            _ => 0,
        }
    }

    fn write_ppu_register(&mut self, register: u16, value: u8) {
        match register {
            0 => self.ppu.control = value,
            1 => self.ppu.mask = value,
            3 => self.ppu.oam_addr = value,
            4 => {
                self.oam[self.ppu.oam_addr as usize] = value;
                self.ppu.oam_addr = self.ppu.oam_addr.wrapping_add(1);
            }
            5 => self.ppu.write_latch = !self.ppu.write_latch,
            6 => {
                if !self.ppu.write_latch {
                    self.ppu.vram_addr = (self.ppu.vram_addr & 0x00FF) | (((value & 0x3F) as u16) << 8);
                } else {
                    self.ppu.vram_addr = (self.ppu.vram_addr & 0xFF00) | value as u16;
                }
                self.ppu.write_latch = !self.ppu.write_latch;
            }
            7 => {
                self.pending_transfer = Some(PpuTransfer::Write {
                    address: self.ppu.vram_addr & PPU_ADDRESS_MAX as u16,
                    value,
                });
                self.ppu.vram_addr = self.ppu.vram_addr.wrapping_add(self.vram_increment());
            }
            // PPUSTATUS is read-only
            _ => {}
        }
    }

    /// Side-effect-free CPU space read.
    fn peek_cpu(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize & (INTERNAL_RAM_SIZE - 1)],
            0x2000..=0x3FFF => self.peek_ppu_register(address & 7),
            0x4016 | 0x4017 => self.io.peek(address),
            0x4000..=0x5FFF => 0,
            0x6000..=0x7FFF => self
                .cartridge
                .prg_ram_index(address)
                .map(|i| self.cartridge.prg_ram[i])
                .unwrap_or(0),
            _ => self.cartridge.read_prg_rom(address),
        }
    }

    /// Copy a CPU page into OAM. The copy reads through `peek_cpu`, so it is
    /// invisible to memory callbacks and access counters, and the CPU is not
    /// stalled for the transfer.
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for offset in 0..OAM_SIZE as u16 {
            let value = self.peek_cpu(base | offset);
            let slot = self.ppu.oam_addr.wrapping_add(offset as u8);
            self.oam[slot as usize] = value;
        }
    }

    fn rendering_enabled(&self) -> bool {
        self.ppu.mask & MASK_RENDERING == MASK_RENDERING
    }

    fn advance_dot(&mut self, signals: &mut PpuSignals) {
        self.ppu.dot += 1;
        if self.ppu.dot >= DOTS_PER_SCANLINE {
            self.ppu.dot = 0;
            self.ppu.scanline += 1;
            if self.ppu.scanline >= SCANLINES_PER_FRAME {
                self.ppu.scanline = 0;
            }
        }

        match (self.ppu.scanline, self.ppu.dot) {
            (POST_RENDER_SCANLINE, 0) => signals.frame_end = true,
            (VBLANK_SCANLINE, 1) => {
                self.ppu.status |= STATUS_VBLANK;
                if self.ppu.control & CTRL_NMI_ENABLE != 0 {
                    signals.nmi = true;
                }
            }
            (PRE_RENDER_SCANLINE, 0) => {
                self.ppu.frame_count += 1;
                signals.frame_start = true;
            }
            (PRE_RENDER_SCANLINE, 1) => self.ppu.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO),
            _ => {}
        }

        if self.ppu.scanline < POST_RENDER_SCANLINE
            && self.ppu.status & STATUS_SPRITE_ZERO == 0
            && self.rendering_enabled()
            && self.ppu.scanline == self.oam[0] as u16 + 1
            && self.ppu.dot == self.oam[3] as u16 + 1
        {
            self.ppu.status |= STATUS_SPRITE_ZERO;
            signals.sprite_zero_hit = Some((self.ppu.scanline, self.ppu.dot));
        }
    }
}

impl BusBackend for NesBus {
    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            0x2000..=0x3FFF => self.read_ppu_register(address & 7),
            0x4016 | 0x4017 => self.io.read(address),
            _ => self.peek_cpu(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize & (INTERNAL_RAM_SIZE - 1)] = value,
            0x2000..=0x3FFF => self.write_ppu_register(address & 7, value),
            0x4014 => self.oam_dma(value),
            0x4016 => {
                self.apu_registers[0x16] = value;
                self.io.write(value);
            }
            0x4000..=0x4017 => self.apu_registers[(address - 0x4000) as usize] = value,
            0x4018..=0x5FFF => {}
            0x6000..=0x7FFF => {
                if let Some(index) = self.cartridge.prg_ram_index(address) {
                    self.cartridge.prg_ram[index] = value;
                }
            }
            _ => log::trace!("ignored write ${:02X} to PRG ROM ${:04X}", value, address),
        }
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        self.read_ppu_space(address)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        self.write_ppu_space(address, value, false);
    }

    fn take_ppu_transfer(&mut self) -> Option<PpuTransfer> {
        self.pending_transfer.take()
    }

    fn finish_ppu_read(&mut self, value: u8) {
        self.ppu.read_buffer = value;
    }

    fn take_input_poll(&mut self) -> bool {
        self.io.take_poll()
    }

    fn peek(&self, space: MemoryType, address: u32) -> Option<u8> {
        if address as usize >= self.size_of(space) {
            return None;
        }
        let value = match space {
            MemoryType::Cpu | MemoryType::CpuDebug => self.peek_cpu(address as u16),
            MemoryType::Ppu | MemoryType::PpuDebug => self.read_ppu_space(address as u16),
            MemoryType::Palette => self.palette[Self::palette_index(address as u16)],
            MemoryType::Oam => self.oam[address as usize],
            MemoryType::SecondaryOam => self.secondary_oam[address as usize],
            MemoryType::PrgRom => self.cartridge.prg_rom[address as usize],
            MemoryType::ChrRom => self.cartridge.chr_rom[address as usize],
            MemoryType::ChrRam => self.cartridge.chr_ram[address as usize],
            MemoryType::WorkRam | MemoryType::SaveRam => self.cartridge.prg_ram[address as usize],
        };
        Some(value)
    }

    fn poke(&mut self, space: MemoryType, address: u32, value: u8) -> bool {
        if address as usize >= self.size_of(space) {
            return false;
        }
        let index = address as usize;
        match space {
            MemoryType::Cpu | MemoryType::CpuDebug => {
                let address = address as u16;
                match address {
                    0x0000..=0x1FFF => self.ram[index & (INTERNAL_RAM_SIZE - 1)] = value,
                    0x2000..=0x3FFF => match address & 7 {
                        0 => self.ppu.control = value,
                        1 => self.ppu.mask = value,
                        2 => self.ppu.status = value & 0xE0,
                        3 => self.ppu.oam_addr = value,
                        4 => self.oam[self.ppu.oam_addr as usize] = value,
                        _ => return false,
                    },
                    0x4000..=0x4017 => self.apu_registers[(address - 0x4000) as usize] = value,
                    0x6000..=0x7FFF => match self.cartridge.prg_ram_index(address) {
                        Some(i) => self.cartridge.prg_ram[i] = value,
                        None => return false,
                    },
                    0x8000..=0xFFFF => {
                        if self.cartridge.prg_rom.is_empty() {
                            return false;
                        }
                        let len = self.cartridge.prg_rom.len();
                        self.cartridge.prg_rom[(index - 0x8000) % len] = value;
                    }
                    _ => return false,
                }
            }
            MemoryType::Ppu | MemoryType::PpuDebug => self.write_ppu_space(address as u16, value, true),
            MemoryType::Palette => self.palette[Self::palette_index(address as u16)] = value,
            MemoryType::Oam => self.oam[index] = value,
            MemoryType::SecondaryOam => self.secondary_oam[index] = value,
            MemoryType::PrgRom => self.cartridge.prg_rom[index] = value,
            MemoryType::ChrRom => self.cartridge.chr_rom[index] = value,
            MemoryType::ChrRam => self.cartridge.chr_ram[index] = value,
            MemoryType::WorkRam | MemoryType::SaveRam => self.cartridge.prg_ram[index] = value,
        }
        true
    }

    fn size_of(&self, space: MemoryType) -> usize {
        match space {
            MemoryType::Cpu | MemoryType::CpuDebug => CPU_ADDRESS_MAX as usize + 1,
            MemoryType::Ppu | MemoryType::PpuDebug => PPU_ADDRESS_MAX as usize + 1,
            // $20-$3F mirror the 32 palette bytes
            MemoryType::Palette => PALETTE_SIZE * 2,
            MemoryType::Oam => OAM_SIZE,
            MemoryType::SecondaryOam => SECONDARY_OAM_SIZE,
            MemoryType::PrgRom => self.cartridge.prg_rom.len(),
            MemoryType::ChrRom => self.cartridge.chr_rom.len(),
            MemoryType::ChrRam => self.cartridge.chr_ram.len(),
            MemoryType::WorkRam if !self.cartridge.battery => self.cartridge.prg_ram.len(),
            MemoryType::SaveRam if self.cartridge.battery => self.cartridge.prg_ram.len(),
            MemoryType::WorkRam | MemoryType::SaveRam => 0,
        }
    }

    fn tick(&mut self, cpu_cycles: u32) -> PpuSignals {
        let mut signals = PpuSignals::default();
        for _ in 0..cpu_cycles * 3 {
            self.advance_dot(&mut signals);
        }
        signals.irq = self.irq_line;
        signals
    }

    fn reset(&mut self) {
        let frame_count = self.ppu.frame_count;
        self.ppu = PpuState {
            frame_count,
            ..Self::power_on_ppu()
        };
        self.io.reset();
        self.apu_registers = [0; APU_REGISTER_COUNT];
        self.irq_line = false;
        self.pending_transfer = None;
    }

    fn input(&self, port: u8) -> Option<ControllerState> {
        self.io.controller_state(port)
    }

    fn set_input(&mut self, port: u8, state: ControllerState) -> bool {
        self.io.set_controller(port, state)
    }

    fn ppu_state(&self) -> PpuState {
        self.ppu.clone()
    }

    fn set_ppu_state(&mut self, state: &PpuState) {
        let mut state = state.clone();
        state.scanline %= SCANLINES_PER_FRAME;
        state.dot %= DOTS_PER_SCANLINE;
        state.vram_addr &= PPU_ADDRESS_MAX as u16;
        self.ppu = state;
    }

    fn apu_state(&self) -> ApuState {
        ApuState {
            registers: self.apu_registers.to_vec(),
            frame_counter_mode: (self.apu_registers[0x17] >> 7) & 1,
        }
    }

    fn cartridge_state(&self) -> CartridgeState {
        CartridgeState {
            mapper: self.cartridge.mapper,
            prg_rom_size: self.cartridge.prg_rom.len(),
            chr_rom_size: self.cartridge.chr_rom.len(),
            chr_ram_size: self.cartridge.chr_ram.len(),
            prg_ram_size: self.cartridge.prg_ram.len(),
            battery: self.cartridge.battery,
            prg_bank: 0,
            chr_bank: 0,
        }
    }
}

impl Debuggable for NesBus {
    fn read_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn write_state(&mut self, state: &Value) -> Result<()> {
        let mut restored: NesBus = serde_json::from_value(state.clone())
            .map_err(|e| HookError::CorruptSavestate(format!("bus state: {}", e)))?;

        let sizes_match = restored.ram.len() == INTERNAL_RAM_SIZE
            && restored.vram.len() == NAMETABLE_RAM_SIZE
            && restored.oam.len() == OAM_SIZE
            && restored.cartridge.chr_ram.len() == self.cartridge.chr_ram.len()
            && restored.cartridge.prg_ram.len() == self.cartridge.prg_ram.len();
        if !sizes_match {
            return Err(HookError::CorruptSavestate(
                "bus state does not fit this cartridge".to_string(),
            ));
        }

        let ppu = &restored.ppu;
        if ppu.scanline >= SCANLINES_PER_FRAME
            || ppu.dot >= DOTS_PER_SCANLINE
            || ppu.vram_addr as u32 > PPU_ADDRESS_MAX
        {
            return Err(HookError::CorruptSavestate(format!(
                "ppu position {}:{} (vram ${:04X}) is off the frame grid",
                ppu.scanline, ppu.dot, ppu.vram_addr
            )));
        }

        restored.cartridge.prg_rom = std::mem::take(&mut self.cartridge.prg_rom);
        restored.cartridge.chr_rom = std::mem::take(&mut self.cartridge.chr_rom);
        *self = restored;
        Ok(())
    }
}
