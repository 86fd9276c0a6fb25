//! What a callback can reach while it runs.

use crate::cpu::{self, ExecutionCore};
use crate::debugger::BreakReason;
use crate::error::{HookError, Result};
use crate::events::{Event, EventKind};
use crate::hooks::{
    CallbackHandle, EventCallback, EventRegistration, MemoryAccess, MemoryRegistration,
};
use crate::io::ControllerState;
use crate::memory::byte_utils::join_u16;
use crate::memory::{AccessKind, BusBackend, MemoryType};
use crate::savestate::{LoadRequest, SavestateCoordinator};
use crate::state::EmulationSnapshot;

/// Work requested from inside a callback, applied by the session once the
/// current dispatch pass is over.
pub enum Deferred {
    AddMemory(MemoryRegistration),
    AddEvent(EventRegistration),
    RemoveMemory {
        handle: CallbackHandle,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
    },
    RemoveEvent {
        handle: CallbackHandle,
        kind: EventKind,
    },
    /// A restore completed; the frame phase must be resynced before the
    /// event goes out.
    Loaded(Option<u32>),
    Fire(Event),
    Break(BreakReason),
    Resume,
    Stop(i32),
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deferred::AddMemory(reg) => write!(f, "AddMemory({:?})", reg),
            Deferred::AddEvent(reg) => write!(f, "AddEvent({:?})", reg),
            Deferred::RemoveMemory { handle, kind, .. } => {
                write!(f, "RemoveMemory({}, {})", handle, kind)
            }
            Deferred::RemoveEvent { handle, kind } => write!(f, "RemoveEvent({}, {:?})", handle, kind),
            Deferred::Loaded(slot) => write!(f, "Loaded({:?})", slot),
            Deferred::Fire(event) => write!(f, "Fire({:?})", event),
            Deferred::Break(reason) => write!(f, "Break({:?})", reason),
            Deferred::Resume => f.write_str("Resume"),
            Deferred::Stop(code) => write!(f, "Stop({})", code),
        }
    }
}

/// Handed to every callback invocation.
///
/// The core is only reachable at an instruction boundary (event callbacks
/// fired between instructions). Memory callbacks run mid-instruction and
/// see `at_boundary() == false`: synchronous savestates fail there and
/// asynchronous requests are queued.
pub struct ScriptContext<'a> {
    bus: &'a mut dyn BusBackend,
    core: Option<&'a mut dyn ExecutionCore>,
    savestates: &'a mut SavestateCoordinator,
    deferred: &'a mut Vec<Deferred>,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(
        bus: &'a mut dyn BusBackend,
        core: Option<&'a mut dyn ExecutionCore>,
        savestates: &'a mut SavestateCoordinator,
        deferred: &'a mut Vec<Deferred>,
    ) -> Self {
        Self {
            bus,
            core,
            savestates,
            deferred,
        }
    }

    pub fn at_boundary(&self) -> bool {
        self.core.is_some()
    }

    /// Side-effect-free read. Bus types are redirected to their debug
    /// mirror, so reads from a callback never re-enter the interceptor.
    pub fn peek(&self, space: MemoryType, address: u32) -> Result<u8> {
        let space = space.debug_mirror();
        self.bus
            .peek(space, address)
            .ok_or(HookError::AddressOutOfRange { space, address })
    }

    pub fn peek_word(&self, space: MemoryType, address: u32) -> Result<u16> {
        let low = self.peek(space, address)?;
        let high = self.peek(space, address.wrapping_add(1))?;
        Ok(join_u16(low, high))
    }

    /// Side-effect-free write.
    pub fn poke(&mut self, space: MemoryType, address: u32, value: u8) -> Result<()> {
        let space = space.debug_mirror();
        if self.bus.poke(space, address, value) {
            Ok(())
        } else {
            Err(HookError::AddressOutOfRange { space, address })
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.bus.ppu_state().frame_count
    }

    /// Full machine snapshot; `None` mid-instruction.
    pub fn state(&self) -> Option<EmulationSnapshot> {
        self.core
            .as_deref()
            .map(|core| cpu::snapshot(core, &*self.bus))
    }

    pub fn input(&self, port: u8) -> Option<ControllerState> {
        self.bus.input(port)
    }

    pub fn set_input(&mut self, port: u8, state: ControllerState) -> bool {
        self.bus.set_input(port, state)
    }

    pub fn break_execution(&mut self) {
        self.deferred.push(Deferred::Break(BreakReason::Script));
    }

    pub fn resume(&mut self) {
        self.deferred.push(Deferred::Resume);
    }

    pub fn stop(&mut self, exit_code: i32) {
        self.deferred.push(Deferred::Stop(exit_code));
    }

    /// Synchronous capture. Fails with `InvalidCallContext` mid-instruction.
    pub fn capture_state(&mut self) -> Result<Vec<u8>> {
        let blob = match self.core.as_deref() {
            Some(core) => self.savestates.capture_sync(core, &*self.bus)?,
            None => {
                return Err(HookError::InvalidCallContext(
                    "capture_state called mid-instruction",
                ))
            }
        };
        self.deferred.push(Deferred::Fire(Event::StateSaved { slot: None }));
        Ok(blob)
    }

    /// Synchronous restore. Fails with `InvalidCallContext` mid-instruction.
    pub fn restore_state(&mut self, blob: &[u8]) -> Result<()> {
        match self.core.as_deref_mut() {
            Some(core) => {
                self.savestates.restore_sync(core, &mut *self.bus, blob)?;
                self.deferred.push(Deferred::Loaded(None));
                Ok(())
            }
            None => Err(HookError::InvalidCallContext(
                "restore_state called mid-instruction",
            )),
        }
    }

    pub fn request_save(&mut self, slot: u32) -> Result<()> {
        let saved = self
            .savestates
            .request_save_async(slot, self.core.as_deref(), &*self.bus)?;
        if saved {
            self.deferred.push(Deferred::Fire(Event::StateSaved { slot: Some(slot) }));
        }
        Ok(())
    }

    /// False when the slot is empty or an immediate load failed.
    pub fn request_load(&mut self, slot: u32) -> bool {
        match self
            .savestates
            .request_load_async(slot, self.core.as_deref_mut(), &mut *self.bus)
        {
            LoadRequest::Loaded => {
                self.deferred.push(Deferred::Loaded(Some(slot)));
                true
            }
            LoadRequest::Queued => true,
            LoadRequest::Rejected => false,
        }
    }

    pub fn slot_data(&self, slot: u32) -> Result<Vec<u8>> {
        self.savestates.slot_data(slot).map(<[u8]>::to_vec)
    }

    pub fn clear_slot(&mut self, slot: u32) -> bool {
        self.savestates.clear_slot(slot)
    }

    /// Takes effect once the current dispatch pass finishes.
    pub fn add_memory_callback<F>(
        &mut self,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
        callback: F,
    ) -> Result<CallbackHandle>
    where
        F: FnMut(&mut ScriptContext<'_>, MemoryAccess) -> Option<u8> + 'static,
    {
        let registration =
            MemoryRegistration::new(CallbackHandle::allocate(), kind, start, end, Box::new(callback))?;
        let handle = registration.handle;
        self.deferred.push(Deferred::AddMemory(registration));
        Ok(handle)
    }

    /// Takes effect once the current dispatch pass finishes.
    pub fn add_event_callback<F>(&mut self, kind: EventKind, callback: F) -> CallbackHandle
    where
        F: FnMut(&mut ScriptContext<'_>, &Event) + 'static,
    {
        let handle = CallbackHandle::allocate();
        let callback: Box<dyn EventCallback> = Box::new(callback);
        self.deferred.push(Deferred::AddEvent(EventRegistration {
            handle,
            kind,
            callback,
        }));
        handle
    }

    pub fn remove_memory_callback(
        &mut self,
        handle: CallbackHandle,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
    ) {
        self.deferred.push(Deferred::RemoveMemory {
            handle,
            kind,
            start,
            end,
        });
    }

    pub fn remove_event_callback(&mut self, handle: CallbackHandle, kind: EventKind) {
        self.deferred.push(Deferred::RemoveEvent { handle, kind });
    }

    pub fn log(&self, message: &str) {
        log::info!(target: "script", "{}", message);
    }
}
