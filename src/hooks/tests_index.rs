use super::registry::CallbackRegistry;
use super::{memory_callback, CallbackHandle};
use crate::memory::AccessKind;
use proptest::prelude::*;

fn noop() -> Box<dyn super::MemoryCallback> {
    memory_callback(|_, _| None)
}

fn kind_strategy() -> impl Strategy<Value = AccessKind> {
    prop_oneof![
        Just(AccessKind::CpuRead),
        Just(AccessKind::CpuWrite),
        Just(AccessKind::CpuExec),
        Just(AccessKind::PpuRead),
        Just(AccessKind::PpuWrite),
    ]
}

#[test]
fn test_empty_index_matches_nothing() {
    let registry = CallbackRegistry::new(false);
    for kind in AccessKind::ALL {
        assert!(registry.index().is_empty(kind));
        assert!(registry.lookup(kind, 0x0000).is_empty());
        assert!(registry.lookup(kind, 0x3FFF).is_empty());
    }
}

#[test]
fn test_overlapping_ranges_keep_registration_order() {
    let mut registry = CallbackRegistry::new(false);
    let wide = registry
        .register_memory(AccessKind::CpuWrite, 0x0000, Some(0x07FF), noop())
        .unwrap();
    let narrow = registry
        .register_memory(AccessKind::CpuWrite, 0x0200, Some(0x02FF), noop())
        .unwrap();
    let single = registry
        .register_memory(AccessKind::CpuWrite, 0x0250, None, noop())
        .unwrap();

    assert_eq!(registry.lookup(AccessKind::CpuWrite, 0x0100), vec![wide]);
    assert_eq!(registry.lookup(AccessKind::CpuWrite, 0x0200), vec![wide, narrow]);
    assert_eq!(
        registry.lookup(AccessKind::CpuWrite, 0x0250),
        vec![wide, narrow, single]
    );
    assert_eq!(registry.lookup(AccessKind::CpuWrite, 0x0251), vec![wide, narrow]);
    assert_eq!(registry.lookup(AccessKind::CpuWrite, 0x02FF), vec![wide, narrow]);
    assert_eq!(registry.lookup(AccessKind::CpuWrite, 0x0300), vec![wide]);
    assert!(registry.lookup(AccessKind::CpuWrite, 0x0800).is_empty());
    // Other kinds stay untouched
    assert!(registry.lookup(AccessKind::CpuRead, 0x0250).is_empty());
}

#[test]
fn test_range_ending_at_top_of_space() {
    let mut registry = CallbackRegistry::new(false);
    let top = registry
        .register_memory(AccessKind::CpuExec, 0xFFF0, Some(0xFFFF), noop())
        .unwrap();
    assert_eq!(registry.lookup(AccessKind::CpuExec, 0xFFFF), vec![top]);
    assert!(registry.lookup(AccessKind::CpuExec, 0xFFEF).is_empty());
    assert_eq!(registry.index().segment_count(AccessKind::CpuExec), 2);
}

proptest! {
    #[test]
    fn prop_lookup_matches_linear_scan(
        ranges in prop::collection::vec((kind_strategy(), 0u32..0x4000, 0u32..0x200), 1..24),
        probes in prop::collection::vec((kind_strategy(), 0u16..0x4200), 1..64),
    ) {
        let mut registry = CallbackRegistry::new(false);
        let mut expected: Vec<(CallbackHandle, AccessKind, u16, u16)> = Vec::new();
        for (kind, start, len) in ranges {
            let end = (start + len).min(kind.address_max());
            let handle = registry.register_memory(kind, start, Some(end), noop()).unwrap();
            expected.push((handle, kind, start as u16, end as u16));
        }

        for (kind, address) in probes {
            let brute: Vec<CallbackHandle> = expected
                .iter()
                .filter(|&&(_, k, s, e)| k == kind && s <= address && address <= e)
                .map(|&(h, _, _, _)| h)
                .collect();
            prop_assert_eq!(registry.lookup(kind, address), brute);
        }
    }

    #[test]
    fn prop_unregister_restores_prior_lookup(
        start in 0u32..0x3000,
        len in 0u32..0x400,
        probe in 0u16..0x4000,
    ) {
        let mut registry = CallbackRegistry::new(true);
        let base = registry
            .register_memory(AccessKind::PpuRead, 0x1000, Some(0x2FFF), noop())
            .unwrap();
        let before = registry.lookup(AccessKind::PpuRead, probe);

        let end = start + len;
        let extra = registry
            .register_memory(AccessKind::PpuRead, start, Some(end), noop())
            .unwrap();
        prop_assert!(registry
            .unregister_memory(extra, AccessKind::PpuRead, start, Some(end))
            .unwrap());

        prop_assert_eq!(registry.lookup(AccessKind::PpuRead, probe), before);
        prop_assert_eq!(registry.memory_count(), 1);
        prop_assert!(registry.unregister(base));
        prop_assert!(registry.index().is_empty(AccessKind::PpuRead));
    }
}
