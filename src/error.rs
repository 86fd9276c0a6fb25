//! Error types shared by every layer of the hook core.

use crate::hooks::CallbackHandle;
use crate::memory::{AccessKind, MemoryType};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HookError>;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid {kind} range ${start:04X}-${end:04X}")]
    InvalidRange {
        kind: AccessKind,
        start: u32,
        end: u32,
    },
    #[error("unknown callback handle {0}")]
    InvalidHandle(CallbackHandle),
    #[error("invalid call context: {0}")]
    InvalidCallContext(&'static str),
    #[error("corrupt savestate: {0}")]
    CorruptSavestate(String),
    #[error("savestate slot {0} is empty")]
    SlotNotFound(u32),
    #[error("address ${address:X} is outside {space:?} memory")]
    AddressOutOfRange { space: MemoryType, address: u32 },
    #[error("breakpoint limit of {0} reached")]
    TooManyBreakpoints(usize),
    #[error("emulation stopped with exit code {0}")]
    Stopped(i32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
}
