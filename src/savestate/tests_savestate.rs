use super::*;
use crate::cpu::{ExecutionCore, MiniCpu};
use crate::memory::{BusBackend, Cartridge, MemoryType, NesBus};

fn machine() -> (MiniCpu, NesBus) {
    let cart = Cartridge::from_program(&[0xA9, 0x42, 0x4C, 0x00, 0x80], &[]).unwrap();
    let mut cpu = MiniCpu::new();
    cpu.a = 0x11;
    cpu.pc = 0x8002;
    let mut bus = NesBus::new(cart);
    bus.poke(MemoryType::CpuDebug, 0x0010, 0x5A);
    (cpu, bus)
}

#[test]
fn test_blob_header() {
    let (cpu, bus) = machine();
    let blob = encode(&cpu, &bus).unwrap();
    assert_eq!(&blob[0..4], b"HKST");
    assert_eq!(u16::from_le_bytes([blob[4], blob[5]]), SAVESTATE_VERSION);
    let length = u32::from_le_bytes([blob[6], blob[7], blob[8], blob[9]]) as usize;
    assert_eq!(length, blob.len() - 10);
    assert!(validate(&blob).is_ok());
}

#[test]
fn test_restore_brings_back_captured_machine() {
    let (mut cpu, mut bus) = machine();
    let blob = encode(&cpu, &bus).unwrap();
    let before = crate::cpu::snapshot(&cpu, &bus);

    cpu.a = 0xFF;
    cpu.pc = 0x9000;
    bus.poke(MemoryType::CpuDebug, 0x0010, 0x00);
    bus.poke(MemoryType::Palette, 0x03, 0x2C);

    restore(&mut cpu, &mut bus, &blob).unwrap();
    assert_eq!(crate::cpu::snapshot(&cpu, &bus), before);
    assert_eq!(bus.peek(MemoryType::CpuDebug, 0x0010), Some(0x5A));
    assert_eq!(bus.peek(MemoryType::Palette, 0x03), Some(0x00));
    // ROM is not part of the blob and survives the restore
    assert_eq!(bus.peek(MemoryType::PrgRom, 0), Some(0xA9));
}

#[test]
fn test_corrupt_blobs_are_rejected() {
    let (mut cpu, mut bus) = machine();
    let blob = encode(&cpu, &bus).unwrap();

    let mut bad_magic = blob.clone();
    bad_magic[0] = b'X';
    let mut bad_version = blob.clone();
    bad_version[4] = 9;
    let truncated = blob[..blob.len() - 1].to_vec();
    let mut bad_json = blob.clone();
    let last = bad_json.len() - 1;
    bad_json[last] = b'!';

    cpu.a = 0x77;
    for bad in [&bad_magic, &bad_version, &truncated, &bad_json, &blob[..4].to_vec()] {
        assert!(matches!(
            restore(&mut cpu, &mut bus, bad),
            Err(HookError::CorruptSavestate(_))
        ));
        assert_eq!(cpu.a, 0x77);
    }
}

#[test]
fn test_machine_identity_is_checked() {
    let (cpu, bus) = machine();
    let blob = encode(&cpu, &bus).unwrap();
    let mut payload: serde_json::Value = serde_json::from_slice(&blob[10..]).unwrap();
    payload["machine"] = serde_json::Value::from("other");
    let body = serde_json::to_vec(&payload).unwrap();
    let mut forged = blob[..6].to_vec();
    forged.extend_from_slice(&(body.len() as u32).to_le_bytes());
    forged.extend_from_slice(&body);

    let (mut cpu, mut bus) = machine();
    let err = restore(&mut cpu, &mut bus, &forged).unwrap_err();
    assert!(err.to_string().contains("other"));
}

#[test]
fn test_failed_bus_restore_rolls_back_cpu() {
    let (cpu, bus) = machine();
    let blob = encode(&cpu, &bus).unwrap();
    let mut payload: serde_json::Value = serde_json::from_slice(&blob[10..]).unwrap();
    payload["core"]["a"] = serde_json::Value::from(0x99);
    payload["bus"]["ram"] = serde_json::json!([1, 2, 3]);
    let body = serde_json::to_vec(&payload).unwrap();
    let mut forged = blob[..6].to_vec();
    forged.extend_from_slice(&(body.len() as u32).to_le_bytes());
    forged.extend_from_slice(&body);
    assert!(validate(&forged).is_ok());

    let (mut cpu, mut bus) = machine();
    assert!(restore(&mut cpu, &mut bus, &forged).is_err());
    assert_eq!(cpu.a, 0x11);
    assert_eq!(bus.peek(MemoryType::CpuDebug, 0x0010), Some(0x5A));
}

#[test]
fn test_sync_calls_need_boundary() {
    let (mut cpu, mut bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    let blob = coordinator.capture_sync(&cpu, &bus).unwrap();

    coordinator.set_boundary(false);
    assert!(matches!(
        coordinator.capture_sync(&cpu, &bus),
        Err(HookError::InvalidCallContext(_))
    ));
    assert!(matches!(
        coordinator.restore_sync(&mut cpu, &mut bus, &blob),
        Err(HookError::InvalidCallContext(_))
    ));
    coordinator.set_boundary(true);
    coordinator.restore_sync(&mut cpu, &mut bus, &blob).unwrap();
}

#[test]
fn test_save_at_boundary_is_immediate() {
    let (cpu, bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    assert!(coordinator.request_save_async(5, Some(&cpu as &dyn ExecutionCore), &bus).unwrap());
    assert!(coordinator.has_slot(5));
    assert_eq!(coordinator.pending_save(), None);
    assert!(validate(coordinator.slot_data(5).unwrap()).is_ok());
}

#[test]
fn test_requests_without_core_are_queued_and_replaced() {
    let (mut cpu, mut bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    coordinator.store(1, encode(&cpu, &bus).unwrap());
    coordinator.store(2, encode(&cpu, &bus).unwrap());

    assert!(!coordinator.request_save_async(3, None, &bus).unwrap());
    assert!(!coordinator.request_save_async(4, None, &bus).unwrap());
    assert_eq!(coordinator.pending_save(), Some(4));

    coordinator.set_boundary(false);
    let request = coordinator.request_load_async(1, Some(&mut cpu as &mut dyn ExecutionCore), &mut bus);
    assert_eq!(request, LoadRequest::Queued);
    assert_eq!(coordinator.request_load_async(2, None, &mut bus), LoadRequest::Queued);
    assert_eq!(coordinator.pending_load(), Some(2));

    assert_eq!(coordinator.take_pending(), (Some(4), Some(2)));
    assert_eq!(coordinator.take_pending(), (None, None));
}

#[test]
fn test_load_from_empty_slot_is_rejected() {
    let (mut cpu, mut bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    let before = crate::cpu::snapshot(&cpu, &bus);
    assert_eq!(
        coordinator.request_load_async(99, Some(&mut cpu as &mut dyn ExecutionCore), &mut bus),
        LoadRequest::Rejected
    );
    assert_eq!(coordinator.pending_load(), None);
    assert_eq!(crate::cpu::snapshot(&cpu, &bus), before);
    assert!(matches!(coordinator.slot_data(99), Err(HookError::SlotNotFound(99))));
}

#[test]
fn test_immediate_load() {
    let (mut cpu, mut bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    coordinator.store(7, encode(&cpu, &bus).unwrap());
    cpu.x = 0x33;
    assert_eq!(
        coordinator.request_load_async(7, Some(&mut cpu as &mut dyn ExecutionCore), &mut bus),
        LoadRequest::Loaded
    );
    assert_eq!(cpu.x, 0);
    assert_eq!(cpu.cpu_state().a, 0x11);
}

#[test]
fn test_clear_slot() {
    let (cpu, bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    coordinator.store(1, encode(&cpu, &bus).unwrap());
    assert_eq!(coordinator.slots().collect::<Vec<_>>(), vec![1]);
    assert!(coordinator.clear_slot(1));
    assert!(!coordinator.clear_slot(1));
    assert!(!coordinator.has_slot(1));
}

#[test]
fn test_export_import_slot() {
    let (cpu, bus) = machine();
    let mut coordinator = SavestateCoordinator::default();
    coordinator.store(1, encode(&cpu, &bus).unwrap());

    let path = std::env::temp_dir().join(format!("hookcore_slot_{}.zip", std::process::id()));
    coordinator.export_slot(1, &path).unwrap();
    coordinator.import_slot(8, &path).unwrap();
    assert_eq!(coordinator.slot_data(8).unwrap(), coordinator.slot_data(1).unwrap());

    let (metadata, _) = archive::import(&path, MAX_SAVESTATE_FILE_SIZE).unwrap();
    assert_eq!(metadata.slot, 1);
    assert_eq!(metadata.magic, archive::ARCHIVE_MAGIC);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_export_of_empty_slot_fails() {
    let coordinator = SavestateCoordinator::default();
    let path = std::env::temp_dir().join("hookcore_slot_never_written.zip");
    assert!(matches!(
        coordinator.export_slot(3, &path),
        Err(HookError::SlotNotFound(3))
    ));
    assert!(!path.exists());
}

#[test]
fn test_oversized_import_is_rejected() {
    let (cpu, bus) = machine();
    let mut big = SavestateCoordinator::default();
    big.store(1, encode(&cpu, &bus).unwrap());
    let path = std::env::temp_dir().join(format!("hookcore_slot_small_{}.zip", std::process::id()));
    big.export_slot(1, &path).unwrap();

    let mut small = SavestateCoordinator::new(16);
    assert!(small.import_slot(1, &path).is_err());
    assert!(!small.has_slot(1));
    std::fs::remove_file(&path).unwrap();
}
