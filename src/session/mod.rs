//! The emulation session: one machine, its callback registry and the loop
//! that drives them.
//!
//! Everything runs on the thread that owns the session. Other threads talk
//! to it through a [`RemoteHandle`]; their commands are drained at the next
//! instruction boundary.

pub mod context;
pub mod remote;


use crate::config::SessionConfig;
use crate::cpu::{self, ExecutionCore, InstructionStep, MiniCpu};
use crate::debugger::{BreakReason, ExecState, ExecuteCountType, ExecutionController};
use crate::error::{HookError, Result};
use crate::events::{Event, EventDispatcher, EventKind};
use crate::hooks::{CallbackHandle, CallbackRegistry, MemoryAccess};
use crate::io::ControllerState;
use crate::memory::byte_utils::{join_u16, split_u16, widen_u16, widen_u8};
use crate::memory::{
    AccessCounters, AccessKind, BusBackend, Cartridge, CounterKind, MemoryInterceptor,
    MemoryType, NesBus, CPU_ADDRESS_MAX, PPU_ADDRESS_MAX,
};
use crate::savestate::{self, LoadRequest, SavestateCoordinator};
use crate::state::EmulationSnapshot;
use crossbeam_channel::{Receiver, TryRecvError};
use std::path::Path;

pub use context::{Deferred, ScriptContext};
pub use remote::{RemoteCommand, RemoteHandle};

/// Result of a single `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed(InstructionStep),
    Broken(BreakReason),
    Stopped(i32),
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new frame started; carries its number
    FrameComplete(u64),
    Broken(BreakReason),
    Stopped(i32),
}

pub type NesSession = Session<MiniCpu, NesBus>;

pub struct Session<C: ExecutionCore + 'static, B: BusBackend + 'static> {
    core: C,
    bus: B,
    registry: CallbackRegistry,
    dispatcher: EventDispatcher,
    savestates: SavestateCoordinator,
    controller: ExecutionController,
    counters: AccessCounters,
    deferred: Vec<Deferred>,
    /// Set whenever a break is entered; consumed by the run loops
    last_break: Option<BreakReason>,
    /// Bumped on every restore
    restore_epoch: u64,
    remote: RemoteHandle,
    remote_rx: Receiver<RemoteCommand>,
    config: SessionConfig,
}

impl Session<MiniCpu, NesBus> {
    /// Reference machine with the given cartridge.
    pub fn nes(cartridge: Cartridge, config: SessionConfig) -> Self {
        Self::new(MiniCpu::new(), NesBus::new(cartridge), config)
    }
}

impl<C: ExecutionCore + 'static, B: BusBackend + 'static> Session<C, B> {
    pub fn new(core: C, bus: B, config: SessionConfig) -> Self {
        let (remote, remote_rx) = remote::channel();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.resync(&bus.ppu_state());
        log::info!(
            "session started: core={} strict_unregister={} counters={}",
            core.identity(),
            config.strict_unregister,
            config.access_counters
        );
        Self {
            core,
            bus,
            registry: CallbackRegistry::new(config.strict_unregister),
            dispatcher,
            savestates: SavestateCoordinator::new(config.max_savestate_file_size),
            controller: ExecutionController::new(config.max_breakpoints),
            counters: AccessCounters::new(config.access_counters),
            deferred: Vec::new(),
            last_break: None,
            restore_epoch: 0,
            remote,
            remote_rx,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Direct bus access for host-side setup. Bypasses every callback.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn savestates(&self) -> &SavestateCoordinator {
        &self.savestates
    }

    pub fn exec_state(&self) -> ExecState {
        self.controller.state()
    }

    pub fn frame_count(&self) -> u64 {
        self.bus.ppu_state().frame_count
    }

    /// A handle other threads can use to drive this session.
    pub fn remote(&self) -> RemoteHandle {
        self.remote.clone()
    }

    // Registration

    pub fn add_event_callback<F>(&mut self, kind: EventKind, callback: F) -> CallbackHandle
    where
        F: FnMut(&mut ScriptContext<'_>, &Event) + 'static,
    {
        self.registry.register_event(kind, Box::new(callback))
    }

    pub fn remove_event_callback(&mut self, handle: CallbackHandle, kind: EventKind) -> Result<bool> {
        self.registry.unregister_event(handle, kind)
    }

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
        self.registry.register_memory(kind, start, end, Box::new(callback))
    }

    pub fn remove_memory_callback(
        &mut self,
        handle: CallbackHandle,
        kind: AccessKind,
        start: u32,
        end: Option<u32>,
    ) -> Result<bool> {
        self.registry.unregister_memory(handle, kind, start, end)
    }

    // Memory API

    fn interceptor(&mut self) -> MemoryInterceptor<'_> {
        MemoryInterceptor::new(
            &mut self.registry,
            &mut self.dispatcher,
            &mut self.bus,
            &mut self.savestates,
            &mut self.counters,
            &mut self.deferred,
        )
    }

    fn bus_address(space: MemoryType, address: u32, max: u32) -> Result<u16> {
        if address > max {
            return Err(HookError::AddressOutOfRange { space, address });
        }
        Ok(address as u16)
    }

    /// Range check without touching the bus.
    fn check_address(&self, address: u32, space: MemoryType) -> Result<()> {
        let in_range = match space {
            MemoryType::Cpu => address <= CPU_ADDRESS_MAX,
            MemoryType::Ppu => address <= PPU_ADDRESS_MAX,
            other => (address as usize) < self.bus.size_of(other),
        };
        if in_range {
            Ok(())
        } else {
            Err(HookError::AddressOutOfRange { space, address })
        }
    }

    fn check_word(&self, address: u32, space: MemoryType) -> Result<()> {
        self.check_address(address, space)?;
        let high = address
            .checked_add(1)
            .ok_or(HookError::AddressOutOfRange { space, address })?;
        self.check_address(high, space)
    }

    fn read_byte(&mut self, address: u32, space: MemoryType) -> Result<u8> {
        let value = match space {
            MemoryType::Cpu => {
                let address = Self::bus_address(space, address, CPU_ADDRESS_MAX)?;
                self.interceptor().on_read(AccessKind::CpuRead, address)
            }
            MemoryType::Ppu => {
                let address = Self::bus_address(space, address, PPU_ADDRESS_MAX)?;
                self.interceptor().on_read(AccessKind::PpuRead, address)
            }
            other => {
                return self
                    .bus
                    .peek(other, address)
                    .ok_or(HookError::AddressOutOfRange { space: other, address })
            }
        };
        self.boundary();
        Ok(value)
    }

    fn write_byte(&mut self, address: u32, value: u8, space: MemoryType) -> Result<()> {
        match space {
            MemoryType::Cpu => {
                let address = Self::bus_address(space, address, CPU_ADDRESS_MAX)?;
                self.interceptor().on_write(AccessKind::CpuWrite, address, value);
            }
            MemoryType::Ppu => {
                let address = Self::bus_address(space, address, PPU_ADDRESS_MAX)?;
                self.interceptor().on_write(AccessKind::PpuWrite, address, value);
            }
            other => {
                if !self.bus.poke(other, address, value) {
                    return Err(HookError::AddressOutOfRange { space: other, address });
                }
                return Ok(());
            }
        }
        self.boundary();
        Ok(())
    }

    /// `Cpu` and `Ppu` reads have side effects and run callbacks; every
    /// other type is a silent read of backing storage.
    pub fn read(&mut self, address: u32, space: MemoryType, signed: bool) -> Result<i32> {
        let value = self.read_byte(address, space)?;
        Ok(widen_u8(value, signed))
    }

    /// Little-endian 16-bit read. Both bytes are range checked before
    /// either is accessed.
    pub fn read_word(&mut self, address: u32, space: MemoryType, signed: bool) -> Result<i32> {
        self.check_word(address, space)?;
        let low = self.read_byte(address, space)?;
        let high = self.read_byte(address + 1, space)?;
        Ok(widen_u16(join_u16(low, high), signed))
    }

    pub fn write(&mut self, address: u32, value: u8, space: MemoryType) -> Result<()> {
        self.write_byte(address, value, space)
    }

    pub fn write_word(&mut self, address: u32, value: u16, space: MemoryType) -> Result<()> {
        self.check_word(address, space)?;
        let (low, high) = split_u16(value);
        // Debug pokes can refuse an in-range address; undo the low byte then
        let previous = self.bus.peek(space, address);
        self.write_byte(address, low, space)?;
        let result = self.write_byte(address + 1, high, space);
        if result.is_err() {
            if let Some(previous) = previous {
                self.bus.poke(space, address, previous);
            }
        }
        result
    }

    // State

    pub fn get_state(&self) -> EmulationSnapshot {
        cpu::snapshot(&self.core, &self.bus)
    }

    /// Applies the CPU and PPU parts only; APU and cartridge are read-only.
    pub fn set_state(&mut self, state: &EmulationSnapshot) {
        self.core.set_cpu_state(&state.cpu);
        self.bus.set_ppu_state(&state.ppu);
        self.state_replaced();
    }

    pub fn capture_state(&mut self) -> Result<Vec<u8>> {
        let blob = self.savestates.capture_sync(&self.core, &self.bus)?;
        self.notify(Event::StateSaved { slot: None });
        Ok(blob)
    }

    pub fn restore_state(&mut self, blob: &[u8]) -> Result<()> {
        self.savestates
            .restore_sync(&mut self.core, &mut self.bus, blob)?;
        self.state_replaced();
        self.notify(Event::StateLoaded { slot: None });
        Ok(())
    }

    /// The session API always runs at a boundary, so the slot is populated
    /// before this returns.
    pub fn request_save_async(&mut self, slot: u32) -> Result<()> {
        let saved = self.savestates.request_save_async(
            slot,
            Some(&self.core as &dyn ExecutionCore),
            &self.bus,
        )?;
        if saved {
            self.notify(Event::StateSaved { slot: Some(slot) });
        }
        Ok(())
    }

    /// False for an empty slot or a failed load; the state is untouched
    /// either way.
    pub fn request_load_async(&mut self, slot: u32) -> bool {
        let request = self.savestates.request_load_async(
            slot,
            Some(&mut self.core as &mut dyn ExecutionCore),
            &mut self.bus,
        );
        match request {
            LoadRequest::Loaded => {
                self.state_replaced();
                self.notify(Event::StateLoaded { slot: Some(slot) });
                true
            }
            LoadRequest::Queued => true,
            LoadRequest::Rejected => false,
        }
    }

    pub fn slot_data(&self, slot: u32) -> Result<&[u8]> {
        self.savestates.slot_data(slot)
    }

    pub fn clear_slot(&mut self, slot: u32) -> bool {
        self.savestates.clear_slot(slot)
    }

    pub fn export_slot(&self, slot: u32, path: &Path) -> Result<()> {
        self.savestates.export_slot(slot, path)
    }

    pub fn import_slot(&mut self, slot: u32, path: &Path) -> Result<()> {
        self.savestates.import_slot(slot, path)
    }

    // Input

    pub fn get_input(&self, port: u8) -> Option<ControllerState> {
        self.bus.input(port)
    }

    pub fn set_input(&mut self, port: u8, state: ControllerState) -> bool {
        self.bus.set_input(port, state)
    }

    // Access counters

    pub fn access_count(&self, kind: CounterKind, address: u16) -> u32 {
        self.counters.get(kind, address)
    }

    pub fn access_counters(&self) -> &AccessCounters {
        &self.counters
    }

    pub fn reset_access_counters(&mut self) {
        self.counters.reset();
    }

    // Execution control

    pub fn add_breakpoint(&mut self, address: u16) -> Result<bool> {
        self.controller.add_breakpoint(address)
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.controller.remove_breakpoint(address)
    }

    pub fn breakpoints(&self) -> Vec<u16> {
        self.controller.breakpoints().collect()
    }

    /// Running -> Broken, firing `CodeBreak`.
    pub fn break_execution(&mut self) -> bool {
        let was_running = self.controller.is_running();
        self.enter_break(BreakReason::Explicit);
        was_running
    }

    /// Broken -> Running. A no-op while running.
    pub fn resume(&mut self) -> bool {
        self.controller.resume()
    }

    /// End the script session and stop emulation for good.
    pub fn stop(&mut self, exit_code: i32) {
        if let ExecState::Stopped(_) = self.controller.state() {
            return;
        }
        self.end_script();
        self.controller.stop(exit_code);
    }

    /// Fire `ScriptEnded` and drop every registration. Emulation itself
    /// keeps running.
    pub fn end_script(&mut self) -> usize {
        let invoked = {
            let mut ctx = ScriptContext::new(
                &mut self.bus,
                Some(&mut self.core as &mut dyn ExecutionCore),
                &mut self.savestates,
                &mut self.deferred,
            );
            self.dispatcher.end(&mut self.registry, &mut ctx)
        };
        self.deferred.clear();
        invoked
    }

    pub fn reset(&mut self) -> Result<()> {
        self.controller.ensure_not_stopped()?;
        self.bus.reset();
        self.dispatcher.resync(&self.bus.ppu_state());

        self.savestates.set_boundary(false);
        let mut hooks = MemoryInterceptor::new(
            &mut self.registry,
            &mut self.dispatcher,
            &mut self.bus,
            &mut self.savestates,
            &mut self.counters,
            &mut self.deferred,
        );
        self.core.reset(&mut hooks);
        self.savestates.set_boundary(true);

        self.boundary();
        Ok(())
    }

    /// Execute one instruction if running.
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.controller.ensure_not_stopped()?;
        self.boundary();
        match self.controller.state() {
            ExecState::Broken(reason) => return Ok(StepOutcome::Broken(reason)),
            ExecState::Stopped(code) => return Ok(StepOutcome::Stopped(code)),
            ExecState::Running => {}
        }

        let pc = self.core.program_counter();
        if self.controller.hit_breakpoint(pc) {
            log::debug!("breakpoint hit at ${:04X}", pc);
            self.enter_break(BreakReason::Breakpoint);
            return Ok(StepOutcome::Broken(BreakReason::Breakpoint));
        }

        let step = self.execute_instruction();
        self.after_instruction(step);

        Ok(match self.controller.state() {
            ExecState::Stopped(code) => StepOutcome::Stopped(code),
            _ => StepOutcome::Executed(step),
        })
    }

    /// Run until the next frame starts.
    pub fn run_frame(&mut self) -> Result<RunOutcome> {
        let start = self.frame_count();
        self.last_break = None;
        loop {
            if let Some(outcome) = self.run_one()? {
                return Ok(outcome);
            }
            let frame = self.frame_count();
            if frame != start {
                return Ok(RunOutcome::FrameComplete(frame));
            }
        }
    }

    /// Resume, run `count` units, then break with `CountReached`. Budgets
    /// are checked between instructions.
    pub fn run_until(&mut self, count: u64, unit: ExecuteCountType) -> Result<RunOutcome> {
        self.controller.ensure_not_stopped()?;
        self.controller.resume();
        self.controller.arm(count, unit);
        self.last_break = None;
        if self.controller.budget_exhausted() {
            self.enter_break(BreakReason::CountReached);
            return Ok(RunOutcome::Broken(BreakReason::CountReached));
        }
        loop {
            if let Some(outcome) = self.run_one()? {
                return Ok(outcome);
            }
        }
    }

    /// One step of a run loop; `Some` when the loop must return.
    fn run_one(&mut self) -> Result<Option<RunOutcome>> {
        match self.step()? {
            StepOutcome::Broken(reason) => return Ok(Some(RunOutcome::Broken(reason))),
            StepOutcome::Stopped(code) => return Ok(Some(RunOutcome::Stopped(code))),
            StepOutcome::Executed(_) => {}
        }
        // A CodeBreak callback may already have resumed; the break still
        // ends the run.
        Ok(self.last_break.take().map(RunOutcome::Broken))
    }

    fn execute_instruction(&mut self) -> InstructionStep {
        self.savestates.set_boundary(false);
        let mut hooks = MemoryInterceptor::new(
            &mut self.registry,
            &mut self.dispatcher,
            &mut self.bus,
            &mut self.savestates,
            &mut self.counters,
            &mut self.deferred,
        );
        let step = self.core.step(&mut hooks);
        self.savestates.set_boundary(true);
        step
    }

    /// Tick the PPU and fire frame events in hardware order. A callback that
    /// replaces the machine state ends signal processing for this
    /// instruction; its remaining signals and cycle charge belong to the
    /// discarded state.
    fn after_instruction(&mut self, step: InstructionStep) {
        self.apply_deferred();

        let epoch = self.restore_epoch;
        let signals = self.bus.tick(step.cycles);
        self.core.set_irq_line(signals.irq);
        if let Some((scanline, dot)) = signals.sprite_zero_hit {
            self.notify(Event::SpriteZeroHit { scanline, dot });
        }
        if signals.frame_end && self.restore_epoch == epoch {
            let frame = self.frame_count();
            self.notify(Event::EndFrame { frame });
        }
        if self.restore_epoch == epoch {
            if signals.nmi {
                self.core.signal_nmi();
            }
            if signals.frame_start {
                let frame = self.frame_count();
                self.notify(Event::StartFrame { frame });
            }
        }

        if self.restore_epoch == epoch && self.controller.account(step.cycles) {
            self.enter_break(BreakReason::CountReached);
        }
        self.boundary();
    }

    /// The core and bus were replaced wholesale.
    fn state_replaced(&mut self) {
        self.dispatcher.resync(&self.bus.ppu_state());
        self.restore_epoch = self.restore_epoch.wrapping_add(1);
    }

    /// Instruction boundary housekeeping: remote commands, deferred work,
    /// then pending savestate requests (save before load).
    fn boundary(&mut self) {
        self.drain_remote();
        self.apply_deferred();

        let (save, load) = self.savestates.take_pending();
        if let Some(slot) = save {
            match savestate::encode(&self.core, &self.bus) {
                Ok(blob) => {
                    self.savestates.store(slot, blob);
                    self.notify(Event::StateSaved { slot: Some(slot) });
                }
                Err(e) => log::warn!("pending save to slot {} failed: {}", slot, e),
            }
        }
        if let Some(slot) = load {
            match self.savestates.load_slot(slot, &mut self.core, &mut self.bus) {
                Ok(()) => {
                    self.state_replaced();
                    self.notify(Event::StateLoaded { slot: Some(slot) });
                }
                Err(e) => log::warn!("pending load of slot {} failed: {}", slot, e),
            }
        }
    }

    fn drain_remote(&mut self) {
        loop {
            match self.remote_rx.try_recv() {
                Ok(command) => self.apply_remote(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply_remote(&mut self, command: RemoteCommand) {
        log::debug!("remote command {:?}", command);
        match command {
            RemoteCommand::Break => self.enter_break(BreakReason::Remote),
            RemoteCommand::Resume => {
                self.controller.resume();
            }
            RemoteCommand::RequestSave(slot) => self.savestates.queue_save(slot),
            RemoteCommand::RequestLoad(slot) => {
                if self.savestates.has_slot(slot) {
                    self.savestates.queue_load(slot);
                } else {
                    log::warn!("remote load of empty slot {} ignored", slot);
                }
            }
            RemoteCommand::ClearSlot(slot) => {
                self.savestates.clear_slot(slot);
            }
            RemoteCommand::SetInput { port, state } => {
                if !self.bus.set_input(port, state) {
                    log::warn!("remote input for unknown port {} ignored", port);
                }
            }
            RemoteCommand::Stop(code) => self.stop(code),
        }
    }

    fn enter_break(&mut self, reason: BreakReason) {
        if self.controller.break_execution(reason) {
            self.last_break = Some(reason);
            let pc = self.core.program_counter();
            self.notify(Event::CodeBreak { reason, pc });
        }
    }

    /// Fire at a boundary, then apply whatever the callbacks deferred.
    fn fire(&mut self, event: Event) -> Result<usize> {
        let invoked = {
            let mut ctx = ScriptContext::new(
                &mut self.bus,
                Some(&mut self.core as &mut dyn ExecutionCore),
                &mut self.savestates,
                &mut self.deferred,
            );
            self.dispatcher.fire(&mut self.registry, &event, &mut ctx)?
        };
        self.apply_deferred();
        Ok(invoked)
    }

    fn notify(&mut self, event: Event) {
        if let Err(e) = self.fire(event.clone()) {
            log::warn!("{:?} not delivered: {}", event, e);
        }
    }

    fn apply_deferred(&mut self) {
        while !self.deferred.is_empty() {
            let batch = std::mem::take(&mut self.deferred);
            for item in batch {
                log::trace!("applying deferred {:?}", item);
                match item {
                    Deferred::AddMemory(registration) => {
                        if !self.dispatcher.is_ended() {
                            self.registry.insert_memory(registration);
                        }
                    }
                    Deferred::AddEvent(registration) => {
                        if !self.dispatcher.is_ended() {
                            self.registry.insert_event(registration);
                        }
                    }
                    Deferred::RemoveMemory {
                        handle,
                        kind,
                        start,
                        end,
                    } => {
                        if let Err(e) = self.registry.unregister_memory(handle, kind, start, end) {
                            log::warn!("deferred removal of {} failed: {}", handle, e);
                        }
                    }
                    Deferred::RemoveEvent { handle, kind } => {
                        if let Err(e) = self.registry.unregister_event(handle, kind) {
                            log::warn!("deferred removal of {} failed: {}", handle, e);
                        }
                    }
                    Deferred::Loaded(slot) => {
                        self.state_replaced();
                        self.notify(Event::StateLoaded { slot });
                    }
                    Deferred::Fire(event) => self.notify(event),
                    Deferred::Break(reason) => self.enter_break(reason),
                    Deferred::Resume => {
                        self.controller.resume();
                    }
                    Deferred::Stop(code) => self.stop(code),
                }
            }
        }
    }
}

impl<C: ExecutionCore + 'static, B: BusBackend + 'static> Drop for Session<C, B> {
    fn drop(&mut self) {
        if !self.dispatcher.is_ended() {
            self.end_script();
        }
    }
}
