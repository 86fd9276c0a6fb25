//! Sits between the CPU core and the bus.
//!
//! Every access is looked up in the callback registry before it reaches (or
//! after it leaves) the bus:
//!
//! * reads: the bus produces the value, callbacks may override what the
//!   core sees;
//! * writes: callbacks run before the write commits and may override the
//!   value stored;
//! * exec: callbacks are notified of the opcode fetch, overrides ignored.
//!
//! Overrides chain: each callback sees the value left by the previous one
//! and the last override wins.

use super::{AccessCounters, AccessKind, BusBackend, CounterKind, PpuTransfer};
use crate::cpu::CoreHooks;
use crate::events::{Event, EventDispatcher};
use crate::hooks::{CallbackRegistry, MemoryAccess};
use crate::savestate::SavestateCoordinator;
use crate::session::{Deferred, ScriptContext};

pub struct MemoryInterceptor<'a> {
    registry: &'a mut CallbackRegistry,
    dispatcher: &'a mut EventDispatcher,
    bus: &'a mut dyn BusBackend,
    savestates: &'a mut SavestateCoordinator,
    counters: &'a mut AccessCounters,
    deferred: &'a mut Vec<Deferred>,
}

impl<'a> MemoryInterceptor<'a> {
    pub(crate) fn new(
        registry: &'a mut CallbackRegistry,
        dispatcher: &'a mut EventDispatcher,
        bus: &'a mut dyn BusBackend,
        savestates: &'a mut SavestateCoordinator,
        counters: &'a mut AccessCounters,
        deferred: &'a mut Vec<Deferred>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            bus,
            savestates,
            counters,
            deferred,
        }
    }

    /// Side-effecting read through the callback chain. `kind` must be
    /// `CpuRead` or `PpuRead`.
    pub fn on_read(&mut self, kind: AccessKind, address: u16) -> u8 {
        let value = match kind {
            AccessKind::PpuRead => self.bus.ppu_read(address),
            _ => self.bus.cpu_read(address),
        };
        let value = self.dispatch(kind, address, value);
        if kind == AccessKind::CpuRead {
            self.complete_ppu_transfer();
        }
        value
    }

    /// Side-effecting write through the callback chain. Returns the value
    /// that was committed.
    pub fn on_write(&mut self, kind: AccessKind, address: u16, value: u8) -> u8 {
        let value = self.dispatch(kind, address, value);
        match kind {
            AccessKind::PpuWrite => self.bus.ppu_write(address, value),
            _ => {
                self.bus.cpu_write(address, value);
                self.complete_ppu_transfer();
                if self.bus.take_input_poll() {
                    self.fire(Event::InputPolled);
                }
            }
        }
        value
    }

    /// Opcode fetch. Exec callbacks only observe.
    pub fn on_exec(&mut self, address: u16) -> u8 {
        let opcode = self.bus.cpu_read(address);
        self.dispatch(AccessKind::CpuExec, address, opcode);
        opcode
    }

    /// A CPU access to the PPU data port turns into a PPU bus transaction,
    /// which is intercepted in turn.
    fn complete_ppu_transfer(&mut self) {
        match self.bus.take_ppu_transfer() {
            Some(PpuTransfer::Read { address }) => {
                let value = self.bus.ppu_read(address);
                let value = self.dispatch(AccessKind::PpuRead, address, value);
                self.bus.finish_ppu_read(value);
            }
            Some(PpuTransfer::Write { address, value }) => {
                let value = self.dispatch(AccessKind::PpuWrite, address, value);
                self.bus.ppu_write(address, value);
            }
            None => {}
        }
    }

    fn dispatch(&mut self, kind: AccessKind, address: u16, value: u8) -> u8 {
        if self.dispatcher.is_ended() || !self.registry.has_memory_callbacks(kind) {
            return value;
        }
        let (positions, table) = self.registry.memory_dispatch(kind, address);
        if positions.is_empty() {
            return value;
        }

        let mut ctx = ScriptContext::new(
            &mut *self.bus,
            None,
            &mut *self.savestates,
            &mut *self.deferred,
        );
        let mut current = value;
        for &pos in positions {
            let registration = &mut table[pos as usize];
            let access = MemoryAccess {
                kind,
                address,
                value: current,
            };
            let result = registration.callback.invoke(&mut ctx, access);
            if let Some(new_value) = result {
                if kind != AccessKind::CpuExec {
                    log::trace!(
                        "{} ${:04X}: {} overrides ${:02X} with ${:02X}",
                        kind,
                        address,
                        registration.handle,
                        current,
                        new_value
                    );
                    current = new_value;
                }
            }
        }
        current
    }

    /// Fire an event raised mid-instruction.
    pub fn fire(&mut self, event: Event) {
        let mut ctx = ScriptContext::new(
            &mut *self.bus,
            None,
            &mut *self.savestates,
            &mut *self.deferred,
        );
        if let Err(e) = self.dispatcher.fire(&mut *self.registry, &event, &mut ctx) {
            log::warn!("{:?} not delivered: {}", event, e);
        }
    }
}

/// Only core-originated traffic is counted.
impl CoreHooks for MemoryInterceptor<'_> {
    fn read(&mut self, address: u16) -> u8 {
        self.counters.record(CounterKind::Read, address);
        self.on_read(AccessKind::CpuRead, address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.counters.record(CounterKind::Write, address);
        self.on_write(AccessKind::CpuWrite, address, value);
    }

    fn fetch(&mut self, address: u16) -> u8 {
        self.counters.record(CounterKind::Exec, address);
        self.on_exec(address)
    }

    fn notify_reset(&mut self) {
        self.fire(Event::Reset);
    }

    fn notify_nmi(&mut self) {
        self.fire(Event::Nmi);
    }

    fn notify_irq(&mut self) {
        self.fire(Event::Irq);
    }
}
