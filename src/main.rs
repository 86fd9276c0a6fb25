//! Headless demo: runs a small built-in program under a scripted session.
//!
//! Usage: `hookcore [frames] [config.json]`

use hookcore::config::{SessionConfig, DEFAULT_CONFIG_FILE};
use hookcore::memory::CounterKind;
use hookcore::{
    AccessKind, Cartridge, ControllerState, Event, EventKind, NesSession, RunOutcome, Session,
};
use rand::Rng;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

const DEFAULT_FRAMES: u64 = 180;

/// Enable NMI and rendering, then bump $0200 forever.
const DEMO_PROGRAM: [u8; 16] = [
    0xA9, 0x80, // LDA #$80
    0x8D, 0x00, 0x20, // STA $2000
    0xA9, 0x18, // LDA #$18
    0x8D, 0x01, 0x20, // STA $2001
    0xEE, 0x00, 0x02, // INC $0200
    0x4C, 0x0A, 0x80, // JMP $800A
];

/// Strobe the pad, store the first button bit in $0201, count frames in X.
const DEMO_NMI: [u8; 17] = [
    0xA9, 0x01, // LDA #$01
    0x8D, 0x16, 0x40, // STA $4016
    0xA9, 0x00, // LDA #$00
    0x8D, 0x16, 0x40, // STA $4016
    0xAD, 0x16, 0x40, // LDA $4016
    0x8D, 0x01, 0x02, // STA $0201
    0xE8, // INX
];

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let frames = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = SessionConfig::load_or_default(&config_path);
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    if let Err(e) = run(frames, config) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(frames: u64, config: SessionConfig) -> hookcore::Result<()> {
    let cartridge = Cartridge::from_program(&DEMO_PROGRAM, &DEMO_NMI)?;
    let mut session = Session::nes(cartridge, config);
    install_script(&mut session)?;
    session.reset()?;

    let start = Instant::now();
    let mut completed = 0u64;
    while completed < frames {
        match session.run_frame()? {
            RunOutcome::FrameComplete(_) => completed += 1,
            RunOutcome::Broken(reason) => {
                log::info!("execution broken ({:?}), resuming", reason);
                session.resume();
            }
            RunOutcome::Stopped(code) => {
                log::info!("emulation stopped with exit code {}", code);
                return Ok(());
            }
        }
    }
    let elapsed = start.elapsed();

    let executed = session
        .access_counters()
        .counts(CounterKind::Exec)
        .iter()
        .filter(|&&count| count > 0)
        .count();
    log::info!(
        "{} frames in {:?} ({:.1} fps), {} distinct opcode addresses, frame counter at {}",
        completed,
        elapsed,
        completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        executed,
        session.frame_count()
    );
    session.stop(0);
    Ok(())
}

fn install_script(session: &mut NesSession) -> hookcore::Result<()> {
    let writes = Rc::new(Cell::new(0u64));
    let w = Rc::clone(&writes);
    session.add_memory_callback(AccessKind::CpuWrite, 0x0200, Some(0x02FF), move |_, _| {
        w.set(w.get() + 1);
        None
    })?;

    session.add_event_callback(EventKind::InputPolled, |ctx, _| {
        let buttons: u8 = rand::thread_rng().gen();
        ctx.set_input(0, ControllerState::from_byte(buttons));
    });

    let mut rewound = false;
    session.add_event_callback(EventKind::EndFrame, move |ctx, event| {
        let &Event::EndFrame { frame } = event else {
            return;
        };
        if frame % 60 == 0 {
            ctx.log(&format!("frame {}: {} writes to page 2", frame, writes.get()));
        }
        if frame == 30 {
            if let Err(e) = ctx.request_save(1) {
                ctx.log(&format!("save failed: {}", e));
            }
        }
        if frame == 90 && !rewound {
            rewound = true;
            ctx.request_load(1);
        }
    });

    session.add_event_callback(EventKind::StateLoaded, |ctx, event| {
        ctx.log(&format!("{:?}, back at frame {}", event, ctx.frame_count()));
    });
    session.add_event_callback(EventKind::ScriptEnded, |ctx, _| ctx.log("script ended"));
    Ok(())
}
