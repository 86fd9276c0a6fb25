//! Owner of every event and memory callback registration.

use super::{
    CallbackHandle, EventCallback, EventRegistration, MemoryCallback, MemoryRegistration,
};
use crate::error::{HookError, Result};
use crate::events::EventKind;
use crate::hooks::AddressRangeIndex;
use crate::memory::AccessKind;

/// Registrations in registration order plus the address index over them.
///
/// Every mutation validates first and only then touches the tables, so a
/// failed call never leaves the index half updated.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    memory: Vec<MemoryRegistration>,
    events: Vec<EventRegistration>,
    index: AddressRangeIndex,
    /// Report unknown handles on removal instead of ignoring them
    strict: bool,
}

impl CallbackRegistry {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn register_event(&mut self, kind: EventKind, callback: Box<dyn EventCallback>) -> CallbackHandle {
        let handle = CallbackHandle::allocate();
        self.insert_event(EventRegistration {
            handle,
            kind,
            callback,
        });
        handle
    }

    /// Insert a registration whose handle was drawn earlier.
    pub(crate) fn insert_event(&mut self, registration: EventRegistration) {
        log::debug!(
            "event callback {} registered for {:?}",
            registration.handle,
            registration.kind
        );
        self.events.push(registration);
    }

    /// Ok(false) when nothing matched in lenient mode.
    pub fn unregister_event(&mut self, handle: CallbackHandle, kind: EventKind) -> Result<bool> {
        match self
            .events
            .iter()
            .position(|reg| reg.handle == handle && reg.kind == kind)
        {
            Some(pos) => {
                self.events.remove(pos);
                log::debug!("event callback {} removed from {:?}", handle, kind);
                Ok(true)
            }
            None => self.missing(handle),
        }
    }

    pub fn register_memory(
        &mut self,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
        callback: Box<dyn MemoryCallback>,
    ) -> Result<CallbackHandle> {
        let registration =
            MemoryRegistration::new(CallbackHandle::allocate(), kind, start, end, callback)?;
        let handle = registration.handle;
        self.insert_memory(registration);
        Ok(handle)
    }

    /// Insert an already validated registration.
    pub(crate) fn insert_memory(&mut self, registration: MemoryRegistration) {
        log::debug!(
            "memory callback {} registered for {} ${:04X}-${:04X}",
            registration.handle,
            registration.kind,
            registration.start,
            registration.end
        );
        self.memory.push(registration);
        self.index.rebuild(&self.memory);
    }

    /// Removal must name the exact tuple used at registration.
    pub fn unregister_memory(
        &mut self,
        handle: CallbackHandle,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
    ) -> Result<bool> {
        let end = end.unwrap_or(start);
        match self
            .memory
            .iter()
            .position(|reg| reg.matches(handle, kind, start, end))
        {
            Some(pos) => {
                self.memory.remove(pos);
                self.index.rebuild(&self.memory);
                log::debug!("memory callback {} removed", handle);
                Ok(true)
            }
            None => self.missing(handle),
        }
    }

    /// Drop whatever registration carries `handle`, regardless of its kind.
    pub fn unregister(&mut self, handle: CallbackHandle) -> bool {
        if let Some(pos) = self.memory.iter().position(|reg| reg.handle == handle) {
            self.memory.remove(pos);
            self.index.rebuild(&self.memory);
            return true;
        }
        if let Some(pos) = self.events.iter().position(|reg| reg.handle == handle) {
            self.events.remove(pos);
            return true;
        }
        false
    }

    fn missing(&self, handle: CallbackHandle) -> Result<bool> {
        if self.strict {
            Err(HookError::InvalidHandle(handle))
        } else {
            log::debug!("ignoring removal of unknown callback {}", handle);
            Ok(false)
        }
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.events.clear();
        self.index.rebuild(&self.memory);
    }

    pub fn memory_count(&self) -> usize {
        self.memory.len()
    }

    pub fn event_count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|reg| reg.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.events.is_empty()
    }

    pub fn index(&self) -> &AddressRangeIndex {
        &self.index
    }

    #[inline]
    pub fn has_memory_callbacks(&self, kind: AccessKind) -> bool {
        !self.index.is_empty(kind)
    }

    /// Handles matching an access, in the order they would be invoked.
    pub fn lookup(&self, kind: AccessKind, address: u16) -> Vec<CallbackHandle> {
        self.index
            .lookup(kind, address)
            .iter()
            .map(|&pos| self.memory[pos as usize].handle)
            .collect()
    }

    /// Split borrow for dispatch: the index positions for one access and
    /// the table they point into.
    #[inline]
    pub(crate) fn memory_dispatch(
        &mut self,
        kind: AccessKind,
        address: u16,
    ) -> (&[u32], &mut [MemoryRegistration]) {
        (self.index.lookup(kind, address), &mut self.memory)
    }

    pub(crate) fn events_mut(&mut self) -> &mut [EventRegistration] {
        &mut self.events
    }
}
