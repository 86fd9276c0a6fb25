use hookcore::{AccessKind, Cartridge, MemoryType, Session, SessionConfig};
use rand::Rng;
use std::time::Instant;

fn main() {
    let cart = match Cartridge::from_program(&[0xEA], &[]) {
        Ok(cart) => cart,
        Err(e) => {
            eprintln!("failed to build cartridge: {}", e);
            return;
        }
    };
    let mut session = Session::nes(cart, SessionConfig::default());

    // A realistic script: a few narrow watches and one that covers all of RAM
    for base in [0x0010u32, 0x0200, 0x0300] {
        let registered = session.add_memory_callback(
            AccessKind::CpuRead,
            base,
            Some(base + 0x0F),
            |_, access| Some(access.value.wrapping_add(1)),
        );
        if let Err(e) = registered {
            eprintln!("failed to register callback: {}", e);
            return;
        }
    }
    if let Err(e) =
        session.add_memory_callback(AccessKind::CpuRead, 0x0000, Some(0x07FF), |_, _| None)
    {
        eprintln!("failed to register callback: {}", e);
        return;
    }

    let mut rng = rand::thread_rng();
    let addresses: Vec<u32> = (0..4096).map(|_| rng.gen_range(0..0x0800)).collect();

    let iterations = 10_000_000;
    let mut accumulator: u64 = 0;
    let start = Instant::now();
    for i in 0..iterations {
        let address = addresses[i % addresses.len()];
        if let Ok(value) = session.read(address, MemoryType::Cpu, false) {
            accumulator = accumulator.wrapping_add(value as u64);
        }
    }
    let duration = start.elapsed();

    println!("Intercepted Read Benchmark");
    println!("Iterations: {}", iterations);
    println!("Time: {:?}", duration);
    println!(
        "M Ops/sec: {:.2}",
        (iterations as f64 / duration.as_secs_f64()) / 1_000_000.0
    );
    println!("Accumulator: {}", accumulator);
}
