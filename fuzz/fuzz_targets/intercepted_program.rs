#![no_main]
use hookcore::{AccessKind, Cartridge, Session, SessionConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (Vec<u8>, Vec<(u8, u16, u16, u8)>)| {
    let (program, hooks) = input;
    let Ok(cart) = Cartridge::from_program(&program, &[]) else {
        return;
    };
    let mut session = Session::nes(cart, SessionConfig::default());
    if session.reset().is_err() {
        return;
    }

    for (kind, start, len, value) in hooks.into_iter().take(16) {
        let kind = AccessKind::ALL[kind as usize % AccessKind::COUNT];
        let start = start as u32;
        let end = start.saturating_add(len as u32 % 0x100);
        // Invalid ranges are rejected, valid ones must not break the run
        let _ = session.add_memory_callback(kind, start, Some(end), move |ctx, access| {
            if value & 1 == 1 {
                ctx.break_execution();
            }
            Some(access.value ^ value)
        });
    }

    for _ in 0..2_000 {
        match session.step() {
            Ok(hookcore::StepOutcome::Broken(_)) => {
                session.resume();
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
});
