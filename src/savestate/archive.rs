//! Savestate slots exported to disk as zip archives.
//!
//! An archive holds `savestate.json` (metadata) and `state.bin` (the raw
//! savestate blob).

use crate::error::{HookError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_MAGIC: &str = "hookcore.savestate";
pub const ARCHIVE_VERSION: u32 = 1;

/// Largest archive accepted on import (16MB).
pub const MAX_SAVESTATE_FILE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub magic: String,
    pub version: u32,
    pub slot: u32,
    /// RFC 3339 timestamp
    pub saved_at: String,
    pub blob_size: usize,
}

pub fn export(path: &Path, slot: u32, blob: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let metadata = ArchiveMetadata {
        magic: ARCHIVE_MAGIC.to_string(),
        version: ARCHIVE_VERSION,
        slot,
        saved_at: chrono::Local::now().to_rfc3339(),
        blob_size: blob.len(),
    };

    zip.start_file("savestate.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&metadata)?)?;

    zip.start_file("state.bin", options)?;
    zip.write_all(blob)?;

    zip.finish()?;
    log::info!("slot {} exported to {}", slot, path.display());
    Ok(())
}

pub fn import(path: &Path, max_size: u64) -> Result<(ArchiveMetadata, Vec<u8>)> {
    let size = std::fs::metadata(path)?.len();
    if size > max_size {
        return Err(HookError::CorruptSavestate(format!(
            "archive is {} bytes, limit is {}",
            size, max_size
        )));
    }

    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let metadata: ArchiveMetadata = {
        let mut buf = Vec::new();
        archive
            .by_name("savestate.json")
            .map_err(|e| HookError::CorruptSavestate(format!("savestate.json missing: {}", e)))?
            .read_to_end(&mut buf)?;
        serde_json::from_slice(&buf)
            .map_err(|e| HookError::CorruptSavestate(format!("savestate.json: {}", e)))?
    };
    if metadata.magic != ARCHIVE_MAGIC || metadata.version != ARCHIVE_VERSION {
        return Err(HookError::CorruptSavestate(
            "archive magic/version mismatch".to_string(),
        ));
    }

    let mut blob = Vec::new();
    {
        let entry = archive
            .by_name("state.bin")
            .map_err(|e| HookError::CorruptSavestate(format!("state.bin missing: {}", e)))?;
        // Inflated size is bounded too
        entry.take(max_size).read_to_end(&mut blob)?;
    }
    if blob.len() != metadata.blob_size {
        return Err(HookError::CorruptSavestate(format!(
            "state.bin is {} bytes, metadata says {}",
            blob.len(),
            metadata.blob_size
        )));
    }

    Ok((metadata, blob))
}
