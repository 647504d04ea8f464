//! Checkpoint artifact: `id,raw,edit,status` CSV rewritten after every batch.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use aibridge_shared::{AiBridgeError, Checkpoint, RecordStatus, Result, TranslationRecord, WorkItem};

use crate::source::{column_index, parse_id};

/// One serialized checkpoint row.
#[derive(Debug, Serialize)]
struct CheckpointRow<'a> {
    id: i64,
    raw: &'a str,
    edit: &'a str,
    status: &'a str,
}

/// Handle to a checkpoint file on disk.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint. A missing or unparsable file yields an empty
    /// checkpoint; parse failures are logged.
    pub fn load(&self) -> Checkpoint {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint yet");
            return Checkpoint::new();
        }

        match read_checkpoint(&self.path) {
            Ok(checkpoint) => {
                debug!(
                    path = %self.path.display(),
                    records = checkpoint.len(),
                    completed = checkpoint.completed_count(),
                    "loaded checkpoint"
                );
                checkpoint
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "checkpoint unreadable, starting empty"
                );
                Checkpoint::new()
            }
        }
    }

    /// Rewrite the whole artifact, sorted by id.
    ///
    /// Rows go to a sibling temp file which is then renamed over the target,
    /// so a crash mid-write leaves the previous checkpoint intact.
    pub fn flush(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| AiBridgeError::io(&dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AiBridgeError::checkpoint(&self.path, "path has no file name"))?;
        let temp = dir.join(format!(".{file_name}.tmp"));

        write_rows(&temp, checkpoint)?;

        std::fs::rename(&temp, &self.path).map_err(|e| AiBridgeError::io(&self.path, e))?;

        debug!(path = %self.path.display(), records = checkpoint.len(), "checkpoint flushed");
        Ok(())
    }
}

fn write_rows(temp: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let file = File::create(temp).map_err(|e| AiBridgeError::io(temp, e))?;
    let mut writer = csv::Writer::from_writer(file);

    for record in checkpoint.records() {
        writer
            .serialize(CheckpointRow {
                id: record.id,
                raw: &record.raw,
                edit: &record.edit,
                status: record.status.as_str(),
            })
            .map_err(|e| AiBridgeError::checkpoint(temp, e.to_string()))?;
    }

    // An empty checkpoint still gets its header row.
    if checkpoint.is_empty() {
        writer
            .write_record(["id", "raw", "edit", "status"])
            .map_err(|e| AiBridgeError::checkpoint(temp, e.to_string()))?;
    }

    let mut file = writer
        .into_inner()
        .map_err(|e| AiBridgeError::checkpoint(temp, e.to_string()))?;
    file.flush().map_err(|e| AiBridgeError::io(temp, e))?;
    file.sync_all().map_err(|e| AiBridgeError::io(temp, e))?;
    Ok(())
}

fn read_checkpoint(path: &Path) -> std::result::Result<Checkpoint, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let id_col = column_index(&headers, "id").ok_or("missing 'id' column")?;
    let raw_col = column_index(&headers, "raw");
    let edit_col = column_index(&headers, "edit");
    let status_col = column_index(&headers, "status");

    let field = |record: &csv::StringRecord, col: Option<usize>| -> String {
        col.and_then(|c| record.get(c)).unwrap_or("").to_string()
    };

    let mut checkpoint = Checkpoint::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let raw_id = record.get(id_col).unwrap_or("");
        let id = parse_id(raw_id).ok_or_else(|| format!("invalid id '{raw_id}'"))?;

        checkpoint.upsert(TranslationRecord {
            id,
            raw: field(&record, raw_col),
            edit: field(&record, edit_col),
            status: RecordStatus::parse(&field(&record, status_col)),
        });
    }

    Ok(checkpoint)
}

/// Upsert a batch of records by id.
pub fn merge(checkpoint: &mut Checkpoint, records: impl IntoIterator<Item = TranslationRecord>) {
    for record in records {
        checkpoint.upsert(record);
    }
}

/// `(processed, total)` over `items`. Records for ids outside `items` are
/// ignored.
pub fn progress(checkpoint: &Checkpoint, items: &[WorkItem]) -> (usize, usize) {
    let processed = items
        .iter()
        .filter(|item| checkpoint.is_completed(item.id))
        .count();
    (processed, items.len())
}
