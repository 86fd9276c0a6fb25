//! Per-address access counters for the CPU bus.

use super::CPU_ADDRESS_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Read,
    Write,
    Exec,
}

/// Counts CPU-originated accesses. Script reads and debug peeks are not
/// counted.
#[derive(Debug, Clone)]
pub struct AccessCounters {
    enabled: bool,
    reads: Vec<u32>,
    writes: Vec<u32>,
    execs: Vec<u32>,
}

impl AccessCounters {
    pub fn new(enabled: bool) -> Self {
        let size = if enabled { CPU_ADDRESS_MAX as usize + 1 } else { 0 };
        Self {
            enabled,
            reads: vec![0; size],
            writes: vec![0; size],
            execs: vec![0; size],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn record(&mut self, kind: CounterKind, address: u16) {
        if !self.enabled {
            return;
        }
        let table = match kind {
            CounterKind::Read => &mut self.reads,
            CounterKind::Write => &mut self.writes,
            CounterKind::Exec => &mut self.execs,
        };
        let slot = &mut table[address as usize];
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, kind: CounterKind, address: u16) -> u32 {
        self.counts(kind).get(address as usize).copied().unwrap_or(0)
    }

    /// The full table for a kind; empty when counting is disabled.
    pub fn counts(&self, kind: CounterKind) -> &[u32] {
        match kind {
            CounterKind::Read => &self.reads,
            CounterKind::Write => &self.writes,
            CounterKind::Exec => &self.execs,
        }
    }

    pub fn reset(&mut self) {
        self.reads.fill(0);
        self.writes.fill(0);
        self.execs.fill(0);
    }
}

impl Default for AccessCounters {
    fn default() -> Self {
        Self::new(true)
    }
}
