//! Address-range lookup for memory callbacks.
//!
//! Each access kind keeps the registered ranges cut into elementary
//! segments: the sorted set of every `start` and `end + 1` bound. Every
//! segment stores the registrations covering it, in registration order, so a
//! lookup is one binary search over the bounds. Rebuilding costs
//! O(segments * registrations) and only happens on add/remove.

use super::MemoryRegistration;
use crate::memory::AccessKind;

#[derive(Debug, Clone, Default)]
struct KindIndex {
    /// Sorted segment start addresses
    bounds: Vec<u32>,
    /// Registry positions covering `[bounds[i], bounds[i + 1])`
    segments: Vec<Vec<u32>>,
}

impl KindIndex {
    fn build(ranges: &[(u32, u16, u16)]) -> Self {
        let mut bounds: Vec<u32> = ranges
            .iter()
            .flat_map(|&(_, start, end)| [start as u32, end as u32 + 1])
            .collect();
        bounds.sort_unstable();
        bounds.dedup();

        let segments = bounds
            .iter()
            .map(|&point| {
                ranges
                    .iter()
                    .filter(|&&(_, start, end)| start as u32 <= point && point <= end as u32)
                    .map(|&(pos, _, _)| pos)
                    .collect()
            })
            .collect();

        Self { bounds, segments }
    }

    #[inline]
    fn lookup(&self, address: u16) -> &[u32] {
        let idx = self.bounds.partition_point(|&b| b <= address as u32);
        if idx == 0 {
            return &[];
        }
        &self.segments[idx - 1]
    }
}

/// Maps (access kind, address) to the registrations that cover it.
///
/// Positions returned by `lookup` index into the slice the index was last
/// rebuilt from; the index never owns a registration.
#[derive(Debug, Clone, Default)]
pub struct AddressRangeIndex {
    kinds: [KindIndex; AccessKind::COUNT],
}

impl AddressRangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, registrations: &[MemoryRegistration]) {
        for kind in AccessKind::ALL {
            let ranges: Vec<(u32, u16, u16)> = registrations
                .iter()
                .enumerate()
                .filter(|(_, reg)| reg.kind == kind)
                .map(|(pos, reg)| (pos as u32, reg.start, reg.end))
                .collect();
            self.kinds[kind.index()] = KindIndex::build(&ranges);
        }
    }

    /// Registry positions whose range contains `address`, in registration
    /// order.
    #[inline]
    pub fn lookup(&self, kind: AccessKind, address: u16) -> &[u32] {
        self.kinds[kind.index()].lookup(address)
    }

    #[inline]
    pub fn is_empty(&self, kind: AccessKind) -> bool {
        self.kinds[kind.index()].bounds.is_empty()
    }

    /// Number of elementary segments held for a kind.
    pub fn segment_count(&self, kind: AccessKind) -> usize {
        self.kinds[kind.index()].segments.len()
    }
}
