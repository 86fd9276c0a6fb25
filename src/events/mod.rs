//! Lifecycle events and their synchronous dispatch.

#[cfg(test)]
mod tests_dispatch;

use crate::debugger::BreakReason;
use crate::error::{HookError, Result};
use crate::hooks::CallbackRegistry;
use crate::session::ScriptContext;
use crate::state::PpuState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Reset,
    Nmi,
    Irq,
    StartFrame,
    EndFrame,
    CodeBreak,
    StateLoaded,
    StateSaved,
    InputPolled,
    SpriteZeroHit,
    ScriptEnded,
}

impl EventKind {
    pub const COUNT: usize = 11;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::Reset,
        EventKind::Nmi,
        EventKind::Irq,
        EventKind::StartFrame,
        EventKind::EndFrame,
        EventKind::CodeBreak,
        EventKind::StateLoaded,
        EventKind::StateSaved,
        EventKind::InputPolled,
        EventKind::SpriteZeroHit,
        EventKind::ScriptEnded,
    ];

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A fired event with its fixed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reset,
    Nmi,
    Irq,
    StartFrame { frame: u64 },
    EndFrame { frame: u64 },
    CodeBreak { reason: BreakReason, pc: u16 },
    /// `slot` is `None` for synchronous loads.
    StateLoaded { slot: Option<u32> },
    /// `slot` is `None` for synchronous saves.
    StateSaved { slot: Option<u32> },
    InputPolled,
    SpriteZeroHit { scanline: u16, dot: u16 },
    ScriptEnded,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Reset => EventKind::Reset,
            Event::Nmi => EventKind::Nmi,
            Event::Irq => EventKind::Irq,
            Event::StartFrame { .. } => EventKind::StartFrame,
            Event::EndFrame { .. } => EventKind::EndFrame,
            Event::CodeBreak { .. } => EventKind::CodeBreak,
            Event::StateLoaded { .. } => EventKind::StateLoaded,
            Event::StateSaved { .. } => EventKind::StateSaved,
            Event::InputPolled => EventKind::InputPolled,
            Event::SpriteZeroHit { .. } => EventKind::SpriteZeroHit,
            Event::ScriptEnded => EventKind::ScriptEnded,
        }
    }
}

/// Where the PPU is relative to the frame window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// Between the post-render line and the pre-render line
    #[default]
    OutsideFrame,
    /// Between the pre-render line and the post-render line
    InFrame,
}

impl FramePhase {
    /// The frame window opens at scanline 261 dot 0 and closes at scanline
    /// 240 dot 0.
    pub fn of(ppu: &PpuState) -> Self {
        if ppu.scanline == 261 || ppu.scanline < 240 {
            FramePhase::InFrame
        } else {
            FramePhase::OutsideFrame
        }
    }
}

/// Fires events to registered callbacks, in registration order, on the
/// calling thread.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    phase: FramePhase,
    ended: bool,
    fired: [u64; EventKind::COUNT],
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// True once `ScriptEnded` has fired.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// How many times an event kind has fired.
    pub fn fired(&self, kind: EventKind) -> u64 {
        self.fired[kind.index()]
    }

    /// Realign the frame phase with the PPU, e.g. after a state restore.
    pub fn resync(&mut self, ppu: &PpuState) {
        self.phase = FramePhase::of(ppu);
    }

    fn enter_phase(&mut self, event: &Event) -> Result<()> {
        match event.kind() {
            EventKind::StartFrame => {
                if self.phase == FramePhase::InFrame {
                    return Err(HookError::InvalidCallContext("startFrame fired inside a frame"));
                }
                self.phase = FramePhase::InFrame;
            }
            EventKind::EndFrame => {
                if self.phase != FramePhase::InFrame {
                    return Err(HookError::InvalidCallContext("endFrame fired outside a frame"));
                }
                self.phase = FramePhase::OutsideFrame;
            }
            EventKind::SpriteZeroHit => {
                if self.phase != FramePhase::InFrame {
                    return Err(HookError::InvalidCallContext(
                        "spriteZeroHit fired outside a frame",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Invoke every callback registered for the event's kind. Returns the
    /// number of callbacks invoked.
    pub fn fire(
        &mut self,
        registry: &mut CallbackRegistry,
        event: &Event,
        ctx: &mut ScriptContext<'_>,
    ) -> Result<usize> {
        if self.ended {
            log::trace!("dropping {:?} after script end", event);
            return Ok(0);
        }
        if event.kind() == EventKind::ScriptEnded {
            return Ok(self.end(registry, ctx));
        }
        self.enter_phase(event)?;
        Ok(self.invoke(registry, event, ctx))
    }

    /// Fire `ScriptEnded` once and tear down every registration.
    pub fn end(&mut self, registry: &mut CallbackRegistry, ctx: &mut ScriptContext<'_>) -> usize {
        if self.ended {
            return 0;
        }
        let invoked = self.invoke(registry, &Event::ScriptEnded, ctx);
        self.ended = true;
        registry.clear();
        log::debug!("script ended, {} callback(s) notified", invoked);
        invoked
    }

    fn invoke(
        &mut self,
        registry: &mut CallbackRegistry,
        event: &Event,
        ctx: &mut ScriptContext<'_>,
    ) -> usize {
        let kind = event.kind();
        self.fired[kind.index()] += 1;
        let mut invoked = 0;
        for registration in registry.events_mut().iter_mut().filter(|r| r.kind == kind) {
            registration.callback.invoke(ctx, event);
            invoked += 1;
        }
        if invoked > 0 {
            log::trace!("{:?} delivered to {} callback(s)", event, invoked);
        }
        invoked
    }
}
