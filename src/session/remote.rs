//! Commands sent to a session from other threads.
//!
//! The session drains the queue at every instruction boundary, so a remote
//! request never observes a half-executed instruction.

use crate::io::ControllerState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Commands buffered between two boundaries.
pub const REMOTE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Break,
    Resume,
    RequestSave(u32),
    RequestLoad(u32),
    ClearSlot(u32),
    SetInput { port: u8, state: ControllerState },
    Stop(i32),
}

/// Cloneable, `Send` handle for driving a session from another thread.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    tx: Sender<RemoteCommand>,
}

impl RemoteHandle {
    /// False when the queue is full or the session is gone.
    pub fn send(&self, command: RemoteCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                log::warn!("remote queue full, dropping {:?}", command);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn break_execution(&self) -> bool {
        self.send(RemoteCommand::Break)
    }

    pub fn resume(&self) -> bool {
        self.send(RemoteCommand::Resume)
    }

    pub fn request_save(&self, slot: u32) -> bool {
        self.send(RemoteCommand::RequestSave(slot))
    }

    pub fn request_load(&self, slot: u32) -> bool {
        self.send(RemoteCommand::RequestLoad(slot))
    }

    pub fn stop(&self, exit_code: i32) -> bool {
        self.send(RemoteCommand::Stop(exit_code))
    }
}

pub(crate) fn channel() -> (RemoteHandle, Receiver<RemoteCommand>) {
    let (tx, rx) = bounded(REMOTE_QUEUE_DEPTH);
    (RemoteHandle { tx }, rx)
}
