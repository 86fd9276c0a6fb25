//! hookcore - script-facing instrumentation for an NES emulation core
//!
//! Memory-access interception, lifecycle events, execution control and
//! savestate slots, layered over a CPU core and a system bus.

pub mod config;
pub mod cpu;
pub mod debugger;
pub mod error;
pub mod events;
pub mod hooks;
pub mod io;
pub mod memory;
pub mod savestate;
pub mod session;
pub mod state;

pub use config::SessionConfig;
pub use cpu::{ExecutionCore, MiniCpu};
pub use debugger::{BreakReason, ExecState, ExecuteCountType};
pub use error::{HookError, Result};
pub use events::{Event, EventKind};
pub use hooks::{CallbackHandle, MemoryAccess};
pub use io::ControllerState;
pub use memory::{AccessKind, BusBackend, Cartridge, MemoryType, NesBus};
pub use session::{NesSession, RemoteHandle, RunOutcome, ScriptContext, Session, StepOutcome};
pub use state::EmulationSnapshot;
