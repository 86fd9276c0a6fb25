#![no_main]
use hookcore::{Cartridge, MemoryType, Session, SessionConfig};
use libfuzzer_sys::fuzz_target;

const SPACES: [MemoryType; 12] = [
    MemoryType::Cpu,
    MemoryType::CpuDebug,
    MemoryType::Ppu,
    MemoryType::PpuDebug,
    MemoryType::Palette,
    MemoryType::Oam,
    MemoryType::SecondaryOam,
    MemoryType::PrgRom,
    MemoryType::ChrRom,
    MemoryType::ChrRam,
    MemoryType::WorkRam,
    MemoryType::SaveRam,
];

fuzz_target!(|ops: Vec<(u8, u8, u32, u16)>| {
    let Ok(cart) = Cartridge::from_program(&[0xEA], &[]) else {
        return;
    };
    let mut session = Session::nes(cart, SessionConfig::default());

    for (op, space, address, value) in ops {
        let space = SPACES[space as usize % SPACES.len()];
        match op % 4 {
            0 => {
                let _ = session.read(address, space, op & 0x80 != 0);
            }
            1 => {
                let _ = session.write(address, value as u8, space);
            }
            2 => {
                let _ = session.read_word(address, space, op & 0x80 != 0);
            }
            3 => {
                let _ = session.write_word(address, value, space);
            }
            _ => unreachable!(),
        }
    }
});
