use super::bus::{NesBus, CHR_RAM_SIZE, PRG_RAM_SIZE};
use super::{BusBackend, Cartridge, MemoryType, PpuTransfer};
use crate::debugger::Debuggable;
use crate::error::HookError;

fn bus() -> NesBus {
    let mut prg = vec![0u8; 0x4000];
    prg[0] = 0xA9;
    prg[0x3FFF] = 0x80;
    NesBus::new(Cartridge::nrom(prg, vec![0x11; 0x2000]))
}

#[test]
fn test_bus_debuggable() {
    let mut original = bus();
    original.poke(MemoryType::CpuDebug, 0x0042, 0x99);
    original.poke(MemoryType::Oam, 0x10, 0x20);
    original.poke(MemoryType::Palette, 0x01, 0x30);
    original.ppu.control = 0x80;
    original.io.port1.state.start = true;

    let state = original.read_state();
    assert!(state.get("ram").is_some());
    assert!(state.get("ppu").is_some());
    assert!(state.get("io").is_some());
    // ROM images are not part of the state
    assert!(state["cartridge"].get("prg_rom").is_none());
    assert_eq!(state["ppu"]["control"], 0x80);

    let mut restored = bus();
    assert_ne!(restored.ppu.control, 0x80);
    restored.write_state(&state).unwrap();
    assert_eq!(restored.peek(MemoryType::CpuDebug, 0x0042), Some(0x99));
    assert_eq!(restored.peek(MemoryType::Oam, 0x10), Some(0x20));
    assert_eq!(restored.peek(MemoryType::Palette, 0x01), Some(0x30));
    assert_eq!(restored.ppu.control, 0x80);
    assert!(restored.io.port1.state.start);
    // The cartridge ROM is the one already loaded
    assert_eq!(restored.peek(MemoryType::PrgRom, 0), Some(0xA9));
    assert_eq!(restored.peek(MemoryType::ChrRom, 0), Some(0x11));
}

#[test]
fn test_write_state_rejects_mismatched_sizes() {
    let mut bus = bus();
    let mut state = bus.read_state();
    state["ram"] = serde_json::json!([0, 1, 2]);
    bus.poke(MemoryType::CpuDebug, 0x0001, 0x55);
    assert!(matches!(
        bus.write_state(&state),
        Err(HookError::CorruptSavestate(_))
    ));
    assert_eq!(bus.peek(MemoryType::CpuDebug, 0x0001), Some(0x55));

    assert!(bus.write_state(&serde_json::json!("nonsense")).is_err());
}

#[test]
fn test_debug_peek_has_no_side_effects() {
    let mut bus = bus();
    bus.ppu.status = 0xC0;
    bus.ppu.write_latch = true;
    bus.ppu.read_buffer = 0x5A;
    bus.io.port1.state.a = true;
    bus.cpu_write(0x4016, 1);
    bus.cpu_write(0x4016, 0);
    assert!(bus.take_input_poll());

    for _ in 0..3 {
        assert_eq!(bus.peek(MemoryType::CpuDebug, 0x2002), Some(0xC0));
        assert_eq!(bus.peek(MemoryType::CpuDebug, 0x2007), Some(0x5A));
        assert_eq!(bus.peek(MemoryType::CpuDebug, 0x4016), Some(0x41));
    }
    assert_eq!(bus.ppu.status, 0xC0);
    assert!(bus.ppu.write_latch);
    assert_eq!(bus.ppu.vram_addr, 0);
    assert_eq!(bus.take_ppu_transfer(), None);

    // The real reads change state
    assert_eq!(bus.cpu_read(0x2002), 0xC0);
    assert_eq!(bus.ppu.status & 0x80, 0);
    assert!(!bus.ppu.write_latch);
    assert_eq!(bus.cpu_read(0x4016), 0x41);
    assert_eq!(bus.cpu_read(0x4016), 0x40);
}

#[test]
fn test_data_port_queues_transfers() {
    let mut bus = bus();
    bus.cpu_write(0x2006, 0x23);
    bus.cpu_write(0x2006, 0xC0);
    bus.cpu_write(0x2007, 0x77);
    assert_eq!(
        bus.take_ppu_transfer(),
        Some(PpuTransfer::Write {
            address: 0x23C0,
            value: 0x77
        })
    );
    assert_eq!(bus.ppu.vram_addr, 0x23C1);

    // Increment of 32 with PPUCTRL bit 2
    bus.cpu_write(0x2000, 0x04);
    bus.cpu_read(0x2007);
    assert_eq!(
        bus.take_ppu_transfer(),
        Some(PpuTransfer::Read { address: 0x23C1 })
    );
    assert_eq!(bus.ppu.vram_addr, 0x23E1);
}

#[test]
fn test_read_buffer_lags_one_read() {
    let mut bus = bus();
    bus.poke(MemoryType::PpuDebug, 0x2000, 0xAB);
    bus.cpu_write(0x2006, 0x20);
    bus.cpu_write(0x2006, 0x00);

    assert_eq!(bus.cpu_read(0x2007), 0x00);
    let Some(PpuTransfer::Read { address }) = bus.take_ppu_transfer() else {
        panic!("expected a queued read");
    };
    let value = bus.ppu_read(address);
    bus.finish_ppu_read(value);
    assert_eq!(bus.cpu_read(0x2007), 0xAB);
}

#[test]
fn test_oam_dma_copies_page() {
    let mut bus = bus();
    for i in 0..0x100u32 {
        bus.poke(MemoryType::CpuDebug, 0x0300 + i, i as u8);
    }
    bus.cpu_write(0x4014, 0x03);
    assert_eq!(bus.peek(MemoryType::Oam, 0x00), Some(0x00));
    assert_eq!(bus.peek(MemoryType::Oam, 0xFF), Some(0xFF));
}

#[test]
fn test_prg_rom_mirrors_and_ignores_writes() {
    let mut bus = bus();
    // 16KB image appears at $8000 and $C000
    assert_eq!(bus.cpu_read(0x8000), 0xA9);
    assert_eq!(bus.cpu_read(0xC000), 0xA9);
    assert_eq!(bus.cpu_read(0xFFFF), 0x80);
    bus.cpu_write(0x8000, 0x00);
    assert_eq!(bus.cpu_read(0x8000), 0xA9);
    // Debug pokes may patch ROM
    assert!(bus.poke(MemoryType::CpuDebug, 0x8000, 0xEA));
    assert_eq!(bus.cpu_read(0xC000), 0xEA);
}

#[test]
fn test_memory_type_sizes() {
    let plain = bus();
    assert_eq!(plain.size_of(MemoryType::Cpu), 0x10000);
    assert_eq!(plain.size_of(MemoryType::PpuDebug), 0x4000);
    assert_eq!(plain.size_of(MemoryType::Palette), 0x40);
    assert_eq!(plain.size_of(MemoryType::Oam), 0x100);
    assert_eq!(plain.size_of(MemoryType::SecondaryOam), 0x20);
    assert_eq!(plain.size_of(MemoryType::PrgRom), 0x4000);
    assert_eq!(plain.size_of(MemoryType::ChrRom), 0x2000);
    assert_eq!(plain.size_of(MemoryType::ChrRam), 0);
    assert_eq!(plain.size_of(MemoryType::WorkRam), PRG_RAM_SIZE);
    assert_eq!(plain.size_of(MemoryType::SaveRam), 0);

    let battery = NesBus::new(Cartridge::nrom(vec![0; 0x8000], Vec::new()).with_battery(true));
    assert_eq!(battery.size_of(MemoryType::ChrRam), CHR_RAM_SIZE);
    assert_eq!(battery.size_of(MemoryType::WorkRam), 0);
    assert_eq!(battery.size_of(MemoryType::SaveRam), PRG_RAM_SIZE);
    assert_eq!(battery.peek(MemoryType::WorkRam, 0), None);
}

#[test]
fn test_vblank_and_frame_signals() {
    let mut bus = bus();
    bus.ppu.control = 0x80;
    let signals = bus.tick(1);
    assert!(signals.frame_start);
    assert_eq!(bus.ppu.frame_count, 1);

    let mut frame_end = false;
    let mut nmi = false;
    // Roughly one frame of CPU cycles
    for _ in 0..29_781 {
        let signals = bus.tick(1);
        frame_end |= signals.frame_end;
        if signals.nmi {
            nmi = true;
            assert!(frame_end);
            assert_eq!(bus.ppu.status & 0x80, 0x80);
        }
    }
    assert!(frame_end && nmi);
    assert_eq!(bus.ppu.frame_count, 2);
}

#[test]
fn test_reset_keeps_frame_count_and_memory() {
    let mut bus = bus();
    bus.tick(10);
    bus.poke(MemoryType::CpuDebug, 0x0000, 0x12);
    bus.reset();
    assert_eq!(bus.ppu.frame_count, 1);
    assert_eq!(bus.ppu.scanline, 260);
    assert_eq!(bus.peek(MemoryType::CpuDebug, 0x0000), Some(0x12));
}

#[test]
fn test_palette_type_shares_backdrop_entries_with_ppu_space() {
    let mut bus = bus();
    assert!(bus.poke(MemoryType::Palette, 0x10, 0x2A));
    assert_eq!(bus.peek(MemoryType::PpuDebug, 0x3F10), Some(0x2A));
    assert_eq!(bus.peek(MemoryType::PpuDebug, 0x3F00), Some(0x2A));
    assert_eq!(bus.peek(MemoryType::Palette, 0x00), Some(0x2A));

    assert!(bus.poke(MemoryType::Palette, 0x3C, 0x11));
    assert_eq!(bus.peek(MemoryType::PpuDebug, 0x3F0C), Some(0x11));
    assert_eq!(bus.peek(MemoryType::Palette, 0x1C), Some(0x11));
    // Non-backdrop sprite entries keep their own storage
    assert!(bus.poke(MemoryType::Palette, 0x11, 0x05));
    assert_eq!(bus.peek(MemoryType::PpuDebug, 0x3F11), Some(0x05));
    assert_ne!(bus.peek(MemoryType::Palette, 0x01), Some(0x05));
}

#[test]
fn test_write_state_rejects_off_grid_timing() {
    let mut bus = bus();
    bus.tick(10);
    let before = bus.read_state();

    for (field, value) in [("scanline", 300), ("dot", 341), ("vram_addr", 0x4000)] {
        let mut state = before.clone();
        state["ppu"][field] = serde_json::json!(value);
        assert!(matches!(
            bus.write_state(&state),
            Err(HookError::CorruptSavestate(_))
        ));
        assert_eq!(bus.read_state(), before);
    }
}
