use super::*;
use crate::hooks::{event_callback, CallbackRegistry};
use crate::memory::{BusBackend, Cartridge, NesBus};
use crate::savestate::SavestateCoordinator;
use crate::session::{Deferred, ScriptContext};
use std::cell::RefCell;
use std::rc::Rc;

struct Harness {
    bus: NesBus,
    savestates: SavestateCoordinator,
    deferred: Vec<Deferred>,
    registry: CallbackRegistry,
    dispatcher: EventDispatcher,
}

impl Harness {
    fn new() -> Self {
        let bus = NesBus::new(Cartridge::nrom(vec![0xEA; 0x8000], vec![0; 0x2000]));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.resync(&bus.ppu_state());
        Self {
            bus,
            savestates: SavestateCoordinator::default(),
            deferred: Vec::new(),
            registry: CallbackRegistry::new(false),
            dispatcher,
        }
    }

    fn fire(&mut self, event: Event) -> crate::error::Result<usize> {
        let mut ctx = ScriptContext::new(&mut self.bus, None, &mut self.savestates, &mut self.deferred);
        self.dispatcher.fire(&mut self.registry, &event, &mut ctx)
    }

    fn end(&mut self) -> usize {
        let mut ctx = ScriptContext::new(&mut self.bus, None, &mut self.savestates, &mut self.deferred);
        self.dispatcher.end(&mut self.registry, &mut ctx)
    }
}

#[test]
fn test_power_on_is_outside_frame() {
    let h = Harness::new();
    assert_eq!(h.dispatcher.phase(), FramePhase::OutsideFrame);
}

#[test]
fn test_frame_phase_boundaries() {
    let mut ppu = PpuState::default();
    ppu.scanline = 0;
    assert_eq!(FramePhase::of(&ppu), FramePhase::InFrame);
    ppu.scanline = 239;
    assert_eq!(FramePhase::of(&ppu), FramePhase::InFrame);
    ppu.scanline = 240;
    assert_eq!(FramePhase::of(&ppu), FramePhase::OutsideFrame);
    ppu.scanline = 260;
    assert_eq!(FramePhase::of(&ppu), FramePhase::OutsideFrame);
    ppu.scanline = 261;
    assert_eq!(FramePhase::of(&ppu), FramePhase::InFrame);
}

#[test]
fn test_frame_events_must_alternate() {
    let mut h = Harness::new();
    assert!(matches!(
        h.fire(Event::EndFrame { frame: 0 }),
        Err(HookError::InvalidCallContext(_))
    ));
    assert!(matches!(
        h.fire(Event::SpriteZeroHit { scanline: 30, dot: 10 }),
        Err(HookError::InvalidCallContext(_))
    ));

    h.fire(Event::StartFrame { frame: 1 }).unwrap();
    assert_eq!(h.dispatcher.phase(), FramePhase::InFrame);
    assert!(h.fire(Event::StartFrame { frame: 2 }).is_err());
    h.fire(Event::SpriteZeroHit { scanline: 30, dot: 10 }).unwrap();
    h.fire(Event::EndFrame { frame: 1 }).unwrap();
    assert_eq!(h.dispatcher.phase(), FramePhase::OutsideFrame);

    // A rejected fire is not counted
    assert_eq!(h.dispatcher.fired(EventKind::StartFrame), 1);
    assert_eq!(h.dispatcher.fired(EventKind::EndFrame), 1);
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let mut h = Harness::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for tag in 0..3 {
        let order = Rc::clone(&order);
        h.registry.register_event(
            EventKind::Nmi,
            event_callback(move |_, _| order.borrow_mut().push(tag)),
        );
    }
    // Other kinds are not invoked
    let stray = Rc::new(RefCell::new(0));
    let s = Rc::clone(&stray);
    h.registry
        .register_event(EventKind::Irq, event_callback(move |_, _| *s.borrow_mut() += 1));

    assert_eq!(h.fire(Event::Nmi).unwrap(), 3);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
    assert_eq!(*stray.borrow(), 0);
}

#[test]
fn test_callbacks_see_payload() {
    let mut h = Harness::new();
    let seen = Rc::new(RefCell::new(None));
    let s = Rc::clone(&seen);
    h.registry.register_event(
        EventKind::CodeBreak,
        event_callback(move |_, event| *s.borrow_mut() = Some(event.clone())),
    );
    let event = Event::CodeBreak {
        reason: BreakReason::Breakpoint,
        pc: 0x8123,
    };
    h.fire(event.clone()).unwrap();
    assert_eq!(*seen.borrow(), Some(event));
}

#[test]
fn test_registration_inside_callback_is_deferred() {
    let mut h = Harness::new();
    h.registry.register_event(
        EventKind::Reset,
        event_callback(|ctx, _| {
            ctx.add_event_callback(EventKind::Reset, |_, _| {});
        }),
    );
    assert_eq!(h.fire(Event::Reset).unwrap(), 1);
    assert_eq!(h.registry.event_count(EventKind::Reset), 1);
    assert_eq!(h.deferred.len(), 1);
    assert!(matches!(h.deferred[0], Deferred::AddEvent(_)));
}

#[test]
fn test_script_ended_is_terminal() {
    let mut h = Harness::new();
    let ended = Rc::new(RefCell::new(0));
    let e = Rc::clone(&ended);
    h.registry
        .register_event(EventKind::ScriptEnded, event_callback(move |_, _| *e.borrow_mut() += 1));
    h.registry.register_event(EventKind::Nmi, event_callback(|_, _| {}));

    assert_eq!(h.fire(Event::ScriptEnded).unwrap(), 1);
    assert!(h.dispatcher.is_ended());
    assert!(h.registry.is_empty());

    // Neither a second end nor any later event reaches a callback
    assert_eq!(h.end(), 0);
    assert_eq!(h.fire(Event::Nmi).unwrap(), 0);
    assert_eq!(*ended.borrow(), 1);
    assert_eq!(h.dispatcher.fired(EventKind::ScriptEnded), 1);
    assert_eq!(h.dispatcher.fired(EventKind::Nmi), 0);
}

#[test]
fn test_resync_follows_ppu() {
    let mut h = Harness::new();
    let mut ppu = h.bus.ppu_state();
    ppu.scanline = 100;
    h.bus.set_ppu_state(&ppu);
    h.dispatcher.resync(&h.bus.ppu_state());
    assert_eq!(h.dispatcher.phase(), FramePhase::InFrame);
    h.fire(Event::EndFrame { frame: 0 }).unwrap();
}

#[test]
fn test_event_kind_table() {
    for (i, kind) in EventKind::ALL.iter().enumerate() {
        assert_eq!(kind.index(), i);
    }
    assert_eq!(Event::StateSaved { slot: Some(2) }.kind(), EventKind::StateSaved);
    assert_eq!(Event::InputPolled.kind(), EventKind::InputPolled);
}
