use crate::error::Result;
use serde_json::Value;

pub mod execution;


pub use execution::{BreakReason, ExecState, ExecuteCountType, ExecutionController, MAX_BREAKPOINTS};

/// A trait for components whose full state can be captured and restored.
pub trait Debuggable {
    /// Reads the component's state and returns it as a JSON value.
    fn read_state(&self) -> Value;

    /// Replaces the component's state from a JSON value.
    ///
    /// Implementations deserialize into a fresh value first and only then
    /// swap it in, so a rejected state leaves the component untouched.
    fn write_state(&mut self, state: &Value) -> Result<()>;
}
