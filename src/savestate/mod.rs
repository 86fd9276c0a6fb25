//! Savestate capture/restore, numbered slots and the pending-request queue.
//!
//! Blob layout (little endian):
//!
//! | Offset | Size | Field                          |
//! |:-------|:-----|:-------------------------------|
//! | 0      | 4    | magic `HKST`                   |
//! | 4      | 2    | format version                 |
//! | 6      | 4    | payload length                 |
//! | 10     | n    | JSON `{machine, core, bus}`    |

pub mod archive;

#[cfg(test)]
mod tests_savestate;

use crate::cpu::ExecutionCore;
use crate::error::{HookError, Result};
use crate::memory::BusBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub use archive::MAX_SAVESTATE_FILE_SIZE;

pub const SAVESTATE_MAGIC: [u8; 4] = *b"HKST";
pub const SAVESTATE_VERSION: u16 = 1;
const HEADER_LEN: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct SavestatePayload {
    machine: String,
    core: Value,
    bus: Value,
}

/// Serialize the whole machine into a self-describing blob.
pub fn encode(core: &dyn ExecutionCore, bus: &dyn BusBackend) -> Result<Vec<u8>> {
    let payload = SavestatePayload {
        machine: core.identity().to_string(),
        core: core.read_state(),
        bus: bus.read_state(),
    };
    let body = serde_json::to_vec(&payload)?;

    let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
    blob.extend_from_slice(&SAVESTATE_MAGIC);
    blob.extend_from_slice(&SAVESTATE_VERSION.to_le_bytes());
    blob.extend_from_slice(&(body.len() as u32).to_le_bytes());
    blob.extend_from_slice(&body);
    Ok(blob)
}

fn corrupt(reason: impl Into<String>) -> HookError {
    HookError::CorruptSavestate(reason.into())
}

fn decode(blob: &[u8]) -> Result<SavestatePayload> {
    if blob.len() < HEADER_LEN {
        return Err(corrupt(format!("blob too short ({} bytes)", blob.len())));
    }
    if blob[0..4] != SAVESTATE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u16::from_le_bytes([blob[4], blob[5]]);
    if version != SAVESTATE_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    let length = u32::from_le_bytes([blob[6], blob[7], blob[8], blob[9]]) as usize;
    let body = &blob[HEADER_LEN..];
    if body.len() != length {
        return Err(corrupt(format!(
            "payload length {} does not match header ({})",
            body.len(),
            length
        )));
    }
    serde_json::from_slice(body).map_err(|e| corrupt(format!("payload: {}", e)))
}

/// Check a blob's framing and payload without applying it.
pub fn validate(blob: &[u8]) -> Result<()> {
    decode(blob).map(|_| ())
}

/// Apply a blob atomically: on any failure the machine is left exactly as
/// it was.
pub fn restore(core: &mut dyn ExecutionCore, bus: &mut dyn BusBackend, blob: &[u8]) -> Result<()> {
    let payload = decode(blob)?;
    if payload.machine != core.identity() {
        return Err(corrupt(format!(
            "savestate is for '{}', not '{}'",
            payload.machine,
            core.identity()
        )));
    }

    let rollback = core.read_state();
    core.write_state(&payload.core)?;
    if let Err(e) = bus.write_state(&payload.bus) {
        if let Err(rollback_err) = core.write_state(&rollback) {
            log::error!("cpu rollback after failed restore failed: {}", rollback_err);
        }
        return Err(e);
    }
    Ok(())
}

/// Outcome of an asynchronous load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRequest {
    /// Applied immediately at an instruction boundary
    Loaded,
    /// Queued for the next boundary
    Queued,
    Rejected,
}

/// Owns the slots and the pending save/load requests.
///
/// At most one save and one load are pending; a newer request of the same
/// kind replaces the older one.
#[derive(Debug)]
pub struct SavestateCoordinator {
    slots: BTreeMap<u32, Vec<u8>>,
    pending_save: Option<u32>,
    pending_load: Option<u32>,
    at_boundary: bool,
    max_file_size: u64,
}

impl Default for SavestateCoordinator {
    fn default() -> Self {
        Self::new(MAX_SAVESTATE_FILE_SIZE)
    }
}

impl SavestateCoordinator {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            slots: BTreeMap::new(),
            pending_save: None,
            pending_load: None,
            at_boundary: true,
            max_file_size,
        }
    }

    pub fn at_boundary(&self) -> bool {
        self.at_boundary
    }

    pub(crate) fn set_boundary(&mut self, at_boundary: bool) {
        self.at_boundary = at_boundary;
    }

    fn require_boundary(&self) -> Result<()> {
        if self.at_boundary {
            Ok(())
        } else {
            Err(HookError::InvalidCallContext(
                "synchronous savestates need an instruction boundary",
            ))
        }
    }

    pub fn capture_sync(&self, core: &dyn ExecutionCore, bus: &dyn BusBackend) -> Result<Vec<u8>> {
        self.require_boundary()?;
        encode(core, bus)
    }

    pub fn restore_sync(
        &self,
        core: &mut dyn ExecutionCore,
        bus: &mut dyn BusBackend,
        blob: &[u8],
    ) -> Result<()> {
        self.require_boundary()?;
        restore(core, bus, blob)
    }

    /// Save into `slot` now when a core is available at a boundary,
    /// otherwise queue it. Returns true when the save completed.
    pub fn request_save_async(
        &mut self,
        slot: u32,
        core: Option<&dyn ExecutionCore>,
        bus: &dyn BusBackend,
    ) -> Result<bool> {
        match core {
            Some(core) if self.at_boundary => {
                let blob = encode(core, bus)?;
                self.store(slot, blob);
                Ok(true)
            }
            _ => {
                self.queue_save(slot);
                Ok(false)
            }
        }
    }

    /// Load `slot` now when possible, otherwise queue it. Empty slots and
    /// failed immediate restores are rejected, leaving the machine as it
    /// was.
    pub fn request_load_async(
        &mut self,
        slot: u32,
        core: Option<&mut (dyn ExecutionCore + '_)>,
        bus: &mut dyn BusBackend,
    ) -> LoadRequest {
        if !self.slots.contains_key(&slot) {
            log::debug!("load from empty slot {} rejected", slot);
            return LoadRequest::Rejected;
        }
        match core {
            Some(core) if self.at_boundary => match self.load_slot(slot, core, bus) {
                Ok(()) => LoadRequest::Loaded,
                Err(e) => {
                    log::warn!("loading slot {} failed: {}", slot, e);
                    LoadRequest::Rejected
                }
            },
            _ => {
                self.queue_load(slot);
                LoadRequest::Queued
            }
        }
    }

    /// Restore the machine from a stored slot.
    pub fn load_slot(
        &self,
        slot: u32,
        core: &mut dyn ExecutionCore,
        bus: &mut dyn BusBackend,
    ) -> Result<()> {
        let blob = self.slots.get(&slot).ok_or(HookError::SlotNotFound(slot))?;
        restore(core, bus, blob)
    }

    pub fn queue_save(&mut self, slot: u32) {
        if let Some(previous) = self.pending_save.replace(slot) {
            log::debug!("pending save to slot {} replaced by slot {}", previous, slot);
        }
    }

    pub fn queue_load(&mut self, slot: u32) {
        if let Some(previous) = self.pending_load.replace(slot) {
            log::debug!("pending load of slot {} replaced by slot {}", previous, slot);
        }
    }

    pub fn pending_save(&self) -> Option<u32> {
        self.pending_save
    }

    pub fn pending_load(&self) -> Option<u32> {
        self.pending_load
    }

    /// Drain both pending requests as (save, load).
    pub fn take_pending(&mut self) -> (Option<u32>, Option<u32>) {
        (self.pending_save.take(), self.pending_load.take())
    }

    pub fn store(&mut self, slot: u32, blob: Vec<u8>) {
        log::debug!("slot {} holds {} bytes", slot, blob.len());
        self.slots.insert(slot, blob);
    }

    pub fn has_slot(&self, slot: u32) -> bool {
        self.slots.contains_key(&slot)
    }

    pub fn slot_data(&self, slot: u32) -> Result<&[u8]> {
        self.slots
            .get(&slot)
            .map(Vec::as_slice)
            .ok_or(HookError::SlotNotFound(slot))
    }

    pub fn clear_slot(&mut self, slot: u32) -> bool {
        self.slots.remove(&slot).is_some()
    }

    pub fn slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    pub fn export_slot(&self, slot: u32, path: &Path) -> Result<()> {
        archive::export(path, slot, self.slot_data(slot)?)
    }

    /// Import an exported archive into `slot`. The blob is validated before
    /// the slot is touched.
    pub fn import_slot(&mut self, slot: u32, path: &Path) -> Result<()> {
        let (metadata, blob) = archive::import(path, self.max_file_size)?;
        validate(&blob)?;
        log::info!(
            "imported savestate from {} (slot {} saved {})",
            path.display(),
            metadata.slot,
            metadata.saved_at
        );
        self.store(slot, blob);
        Ok(())
    }
}
