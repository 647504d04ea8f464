//! Core domain types for AIBridge translation runs.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// One source row pending transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Externally assigned identifier, unique within a source.
    pub id: i64,
    /// Row text sent to the provider.
    pub text: String,
}

impl WorkItem {
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TranslationRecord
// ---------------------------------------------------------------------------

/// Stored status of a record. Advisory only: completion is always
/// re-derived from the `edit` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl RecordStatus {
    /// Value written to the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status; anything unrecognised reads as pending.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one row, as persisted in the checkpoint artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRecord {
    pub id: i64,
    /// Source text at the time of processing.
    pub raw: String,
    /// Provider output; empty when the row failed or is pending.
    pub edit: String,
    pub status: RecordStatus,
}

impl TranslationRecord {
    /// Build a record from a processed row, deriving the status from `edit`.
    pub fn from_result(item: &WorkItem, edit: impl Into<String>) -> Self {
        let edit = edit.into();
        let status = if edit.trim().is_empty() {
            RecordStatus::Failed
        } else {
            RecordStatus::Completed
        };
        Self {
            id: item.id,
            raw: item.text.clone(),
            edit,
            status,
        }
    }

    /// Build a failed record (empty `edit`) for a row whose batch was lost.
    pub fn failed(item: &WorkItem) -> Self {
        Self::from_result(item, String::new())
    }

    /// A record is completed exactly when `edit` holds non-blank text.
    pub fn is_completed(&self) -> bool {
        !self.edit.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Persisted id → record map that makes runs resumable.
///
/// Backed by a `BTreeMap` so iteration is always ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    records: BTreeMap<i64, TranslationRecord>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&TranslationRecord> {
        self.records.get(&id)
    }

    /// Insert or overwrite the record with the same id.
    pub fn upsert(&mut self, record: TranslationRecord) {
        self.records.insert(record.id, record);
    }

    /// Records in ascending id order.
    pub fn records(&self) -> impl Iterator<Item = &TranslationRecord> {
        self.records.values()
    }

    pub fn is_completed(&self, id: i64) -> bool {
        self.records
            .get(&id)
            .is_some_and(TranslationRecord::is_completed)
    }

    /// Ids whose record satisfies the completion predicate.
    pub fn completed_ids(&self) -> HashSet<i64> {
        self.records
            .values()
            .filter(|r| r.is_completed())
            .map(|r| r.id)
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.records.values().filter(|r| r.is_completed()).count()
    }
}

impl FromIterator<TranslationRecord> for Checkpoint {
    fn from_iter<T: IntoIterator<Item = TranslationRecord>>(iter: T) -> Self {
        let mut checkpoint = Self::new();
        for record in iter {
            checkpoint.upsert(record);
        }
        checkpoint
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Shorten a credential for log output.
pub fn mask_credential(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_derived_from_edit() {
        let item = WorkItem::new(7, "你好");
        assert!(TranslationRecord::from_result(&item, "hello").is_completed());
        assert!(!TranslationRecord::from_result(&item, "   ").is_completed());

        // A stale "completed" status with an empty edit is not complete.
        let stale = TranslationRecord {
            id: 7,
            raw: "你好".into(),
            edit: String::new(),
            status: RecordStatus::Completed,
        };
        assert!(!stale.is_completed());
    }

    #[test]
    fn from_result_sets_status() {
        let item = WorkItem::new(1, "a");
        assert_eq!(
            TranslationRecord::from_result(&item, "b").status,
            RecordStatus::Completed
        );
        let failed = TranslationRecord::failed(&item);
        assert_eq!(failed.status, RecordStatus::Failed);
    }

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(RecordStatus::parse("completed"), RecordStatus::Completed);
        assert_eq!(RecordStatus::parse(" FAILED "), RecordStatus::Failed);
        assert_eq!(RecordStatus::parse(""), RecordStatus::Pending);
        assert_eq!(RecordStatus::parse("nan"), RecordStatus::Pending);
    }

    #[test]
    fn checkpoint_iterates_sorted() {
        let checkpoint: Checkpoint = [30, 10, 20]
            .into_iter()
            .map(|id| TranslationRecord::from_result(&WorkItem::new(id, "x"), "y"))
            .collect();
        let ids: Vec<i64> = checkpoint.records().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn upsert_overwrites() {
        let item = WorkItem::new(1, "a");
        let mut checkpoint = Checkpoint::new();
        checkpoint.upsert(TranslationRecord::failed(&item));
        assert!(!checkpoint.is_completed(1));
        checkpoint.upsert(TranslationRecord::from_result(&item, "done"));
        assert!(checkpoint.is_completed(1));
        assert_eq!(checkpoint.len(), 1);
    }

    #[test]
    fn credential_masking() {
        assert_eq!(mask_credential("sk-abcdef123456"), "sk-abc...");
        assert_eq!(mask_credential("ab"), "ab...");
    }
}
