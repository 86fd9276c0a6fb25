use super::registry::CallbackRegistry;
use super::{event_callback, memory_callback, validate_range, CallbackHandle};
use crate::error::HookError;
use crate::events::EventKind;
use crate::memory::AccessKind;

fn noop() -> Box<dyn super::MemoryCallback> {
    memory_callback(|_, _| None)
}

#[test]
fn test_handles_are_unique() {
    let a = CallbackHandle::allocate();
    let b = CallbackHandle::allocate();
    assert_ne!(a, b);
    assert!(b.id() > a.id());
    assert_eq!(format!("{}", a), format!("#{}", a.id()));
}

#[test]
fn test_validate_range() {
    assert_eq!(validate_range(AccessKind::CpuRead, 0x10, None).unwrap(), (0x10, 0x10));
    assert_eq!(
        validate_range(AccessKind::CpuRead, 0x0000, Some(0xFFFF)).unwrap(),
        (0x0000, 0xFFFF)
    );
    assert!(matches!(
        validate_range(AccessKind::CpuRead, 0x20, Some(0x10)),
        Err(HookError::InvalidRange { start: 0x20, end: 0x10, .. })
    ));
    assert!(validate_range(AccessKind::CpuWrite, 0x0000, Some(0x10000)).is_err());
    // PPU bus is 14 bits wide
    assert!(validate_range(AccessKind::PpuWrite, 0x3FFF, None).is_ok());
    assert!(validate_range(AccessKind::PpuWrite, 0x4000, None).is_err());
}

#[test]
fn test_invalid_range_registers_nothing() {
    let mut registry = CallbackRegistry::new(false);
    let err = registry
        .register_memory(AccessKind::PpuRead, 0x2000, Some(0x4000), noop())
        .unwrap_err();
    assert!(matches!(err, HookError::InvalidRange { .. }));
    assert_eq!(registry.memory_count(), 0);
    assert!(registry.index().is_empty(AccessKind::PpuRead));
}

#[test]
fn test_removal_requires_exact_tuple() {
    let mut registry = CallbackRegistry::new(false);
    let handle = registry
        .register_memory(AccessKind::CpuRead, 0x8000, Some(0x80FF), noop())
        .unwrap();

    // Wrong end, wrong kind, wrong start
    assert!(!registry
        .unregister_memory(handle, AccessKind::CpuRead, 0x8000, Some(0x8000))
        .unwrap());
    assert!(!registry
        .unregister_memory(handle, AccessKind::CpuWrite, 0x8000, Some(0x80FF))
        .unwrap());
    assert!(!registry
        .unregister_memory(handle, AccessKind::CpuRead, 0x8001, Some(0x80FF))
        .unwrap());
    assert_eq!(registry.lookup(AccessKind::CpuRead, 0x8010), vec![handle]);

    assert!(registry
        .unregister_memory(handle, AccessKind::CpuRead, 0x8000, Some(0x80FF))
        .unwrap());
    assert!(registry.lookup(AccessKind::CpuRead, 0x8010).is_empty());
}

#[test]
fn test_strict_mode_reports_unknown_handles() {
    let mut registry = CallbackRegistry::new(true);
    let stale = CallbackHandle::allocate();

    assert!(matches!(
        registry.unregister_event(stale, EventKind::EndFrame),
        Err(HookError::InvalidHandle(h)) if h == stale
    ));
    assert!(matches!(
        registry.unregister_memory(stale, AccessKind::CpuExec, 0, None),
        Err(HookError::InvalidHandle(_))
    ));

    registry.set_strict(false);
    assert!(!registry.unregister_event(stale, EventKind::EndFrame).unwrap());
}

#[test]
fn test_event_registrations_are_per_kind() {
    let mut registry = CallbackRegistry::new(false);
    let first = registry.register_event(EventKind::StartFrame, event_callback(|_, _| {}));
    let second = registry.register_event(EventKind::StartFrame, event_callback(|_, _| {}));
    registry.register_event(EventKind::Nmi, event_callback(|_, _| {}));

    assert_eq!(registry.event_count(EventKind::StartFrame), 2);
    assert_eq!(registry.event_count(EventKind::Nmi), 1);

    // Removing under the wrong kind is a miss
    assert!(!registry.unregister_event(first, EventKind::Nmi).unwrap());
    assert!(registry.unregister_event(first, EventKind::StartFrame).unwrap());
    assert_eq!(registry.event_count(EventKind::StartFrame), 1);

    assert!(registry.unregister(second));
    assert!(!registry.unregister(second));
    assert_eq!(registry.event_count(EventKind::StartFrame), 0);
}

#[test]
fn test_clear_drops_everything() {
    let mut registry = CallbackRegistry::new(false);
    registry.register_event(EventKind::Reset, event_callback(|_, _| {}));
    registry
        .register_memory(AccessKind::CpuExec, 0x8000, Some(0xFFFF), noop())
        .unwrap();
    assert!(!registry.is_empty());

    registry.clear();
    assert!(registry.is_empty());
    assert!(!registry.has_memory_callbacks(AccessKind::CpuExec));
}
