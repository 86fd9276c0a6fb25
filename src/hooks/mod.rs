//! Callback registrations and the handles that name them.

pub mod index;
pub mod registry;

#[cfg(test)]
mod tests_index;
#[cfg(test)]
mod tests_registry;

use crate::error::{HookError, Result};
use crate::events::{Event, EventKind};
use crate::memory::AccessKind;
use crate::session::ScriptContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

pub use index::AddressRangeIndex;
pub use registry::CallbackRegistry;

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// Opaque registration identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    /// Draw a fresh handle. Handles are never handed out twice.
    pub fn allocate() -> Self {
        CallbackHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One intercepted bus transaction as presented to a memory callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    pub address: u16,
    pub value: u8,
}

/// Invoked for every matching bus access. Returning `Some` overrides the
/// value read or written; exec callbacks have their return value ignored.
pub trait MemoryCallback {
    fn invoke(&mut self, ctx: &mut ScriptContext<'_>, access: MemoryAccess) -> Option<u8>;
}

impl<F> MemoryCallback for F
where
    F: FnMut(&mut ScriptContext<'_>, MemoryAccess) -> Option<u8>,
{
    fn invoke(&mut self, ctx: &mut ScriptContext<'_>, access: MemoryAccess) -> Option<u8> {
        self(ctx, access)
    }
}

pub trait EventCallback {
    fn invoke(&mut self, ctx: &mut ScriptContext<'_>, event: &Event);
}

impl<F> EventCallback for F
where
    F: FnMut(&mut ScriptContext<'_>, &Event),
{
    fn invoke(&mut self, ctx: &mut ScriptContext<'_>, event: &Event) {
        self(ctx, event)
    }
}

/// Box a closure as a memory callback.
pub fn memory_callback<F>(f: F) -> Box<dyn MemoryCallback>
where
    F: FnMut(&mut ScriptContext<'_>, MemoryAccess) -> Option<u8> + 'static,
{
    Box::new(f)
}

/// Box a closure as an event callback.
pub fn event_callback<F>(f: F) -> Box<dyn EventCallback>
where
    F: FnMut(&mut ScriptContext<'_>, &Event) + 'static,
{
    Box::new(f)
}

/// Check a script-supplied range against the bus space of `kind`.
/// `end` defaults to `start`.
pub fn validate_range(kind: AccessKind, start: u32, end: Option<u32>) -> Result<(u16, u16)> {
    let end = end.unwrap_or(start);
    if start > end || end > kind.address_max() {
        return Err(HookError::InvalidRange { kind, start, end });
    }
    Ok((start as u16, end as u16))
}

pub struct MemoryRegistration {
    pub handle: CallbackHandle,
    pub kind: AccessKind,
    pub start: u16,
    pub end: u16,
    pub(crate) callback: Box<dyn MemoryCallback>,
}

impl MemoryRegistration {
    pub fn new(
        handle: CallbackHandle,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
        callback: Box<dyn MemoryCallback>,
    ) -> Result<Self> {
        let (start, end) = validate_range(kind, start, end)?;
        Ok(Self {
            handle,
            kind,
            start,
            end,
            callback,
        })
    }

    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end
    }

    /// Exact-tuple match used by removal.
    pub fn matches(&self, handle: CallbackHandle, kind: AccessKind, start: u32, end: u32) -> bool {
        self.handle == handle
            && self.kind == kind
            && self.start as u32 == start
            && self.end as u32 == end
    }
}

impl fmt::Debug for MemoryRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegistration")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("start", &format_args!("${:04X}", self.start))
            .field("end", &format_args!("${:04X}", self.end))
            .finish_non_exhaustive()
    }
}

pub struct EventRegistration {
    pub handle: CallbackHandle,
    pub kind: EventKind,
    pub(crate) callback: Box<dyn EventCallback>,
}

impl fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistration")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
