//! Source rows: loading, id-range filtering, and the unprocessed diff.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use aibridge_shared::{AiBridgeError, Checkpoint, Result, WorkItem};

/// Reads a source document into ordered work items.
///
/// Format conversion (spreadsheets, archives, plain text) lives behind this
/// trait; [`CsvSource`] is the built-in reader.
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Vec<WorkItem>>;
}

/// UTF-8 CSV with a header row containing at least `id` and `text`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSource;

impl SourceReader for CsvSource {
    fn read(&self, path: &Path) -> Result<Vec<WorkItem>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| AiBridgeError::input(format!("cannot open {}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| {
                AiBridgeError::input(format!("cannot read header of {}: {e}", path.display()))
            })?
            .clone();

        let id_col = column_index(&headers, "id").ok_or_else(|| {
            AiBridgeError::input(format!("{} has no 'id' column", path.display()))
        })?;
        let text_col = column_index(&headers, "text").ok_or_else(|| {
            let available: Vec<&str> = headers.iter().collect();
            AiBridgeError::input(format!(
                "{} has no 'text' column (available: {})",
                path.display(),
                available.join(", ")
            ))
        })?;

        let mut items = Vec::new();
        for (row, record) in reader.records().enumerate() {
            // Header is line 1.
            let line = row + 2;
            let record = record
                .map_err(|e| AiBridgeError::input(format!("{}:{line}: {e}", path.display())))?;

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let raw_id = record.get(id_col).unwrap_or("");
            let id = parse_id(raw_id).ok_or_else(|| {
                AiBridgeError::input(format!(
                    "{}:{line}: invalid id '{raw_id}'",
                    path.display()
                ))
            })?;
            let text = record.get(text_col).unwrap_or("");
            items.push(WorkItem::new(id, text));
        }

        Ok(items)
    }
}

/// Locate a column by name, ignoring case, padding, and a UTF-8 BOM.
pub(crate) fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| {
            h.trim_start_matches('\u{feff}')
                .trim()
                .eq_ignore_ascii_case(name)
        })
}

/// Parse an id cell. Spreadsheet exports write integral ids as `12.0`.
pub(crate) fn parse_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let float = raw.parse::<f64>().ok()?;
    (float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64)
        .then_some(float as i64)
}

// ---------------------------------------------------------------------------
// WorkItemStore
// ---------------------------------------------------------------------------

/// Loads source rows through a [`SourceReader`] and enforces id uniqueness.
pub struct WorkItemStore {
    reader: Box<dyn SourceReader>,
}

impl WorkItemStore {
    pub fn new(reader: Box<dyn SourceReader>) -> Self {
        Self { reader }
    }

    /// Load all rows in source order.
    pub fn load(&self, path: &Path) -> Result<Vec<WorkItem>> {
        if !path.is_file() {
            return Err(AiBridgeError::input(format!(
                "source file not found: {}",
                path.display()
            )));
        }

        let items = self.reader.read(path)?;

        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|item| !seen.insert(item.id)) {
            return Err(AiBridgeError::input(format!(
                "duplicate id {} in {}",
                dup.id,
                path.display()
            )));
        }

        info!(rows = items.len(), path = %path.display(), "loaded source rows");
        Ok(items)
    }
}

impl Default for WorkItemStore {
    fn default() -> Self {
        Self::new(Box::new(CsvSource))
    }
}

// ---------------------------------------------------------------------------
// Filtering and diff
// ---------------------------------------------------------------------------

/// Inclusive id bounds. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdRange {
    pub low: Option<i64>,
    pub high: Option<i64>,
}

impl IdRange {
    pub fn new(low: Option<i64>, high: Option<i64>) -> Self {
        Self { low, high }
    }

    /// Build from free-form bound strings. Blank or non-numeric bounds are
    /// ignored rather than rejected.
    pub fn from_bounds(low: Option<&str>, high: Option<&str>) -> Self {
        Self {
            low: parse_bound("low", low),
            high: parse_bound("high", high),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.low.is_none_or(|low| id >= low) && self.high.is_none_or(|high| id <= high)
    }
}

fn parse_bound(which: &str, raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_id(raw);
    if parsed.is_none() {
        warn!(bound = which, value = raw, "ignoring non-numeric id bound");
    }
    parsed
}

/// Keep rows whose id lies within `range`, preserving order.
pub fn filter(items: Vec<WorkItem>, range: IdRange) -> Vec<WorkItem> {
    let before = items.len();
    let kept: Vec<WorkItem> = items.into_iter().filter(|i| range.contains(i.id)).collect();
    debug!(before, after = kept.len(), ?range, "applied id range");
    kept
}

/// Rows without a completed record in `checkpoint`, ascending by id.
pub fn unprocessed(items: &[WorkItem], checkpoint: &Checkpoint) -> Vec<WorkItem> {
    let completed = checkpoint.completed_ids();
    let mut pending: Vec<WorkItem> = items
        .iter()
        .filter(|item| !completed.contains(&item.id))
        .cloned()
        .collect();
    pending.sort_by_key(|item| item.id);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibridge_shared::TranslationRecord;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("write source");
        path
    }

    #[test]
    fn load_csv_with_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "novel_CN.csv",
            "\u{feff}chapter,ID,text\n1,3,\"你好, 世界\"\n1,1,第二行\n2,2.0,\n",
        );
        let items = WorkItemStore::default().load(&path).unwrap();
        assert_eq!(
            items,
            vec![
                WorkItem::new(3, "你好, 世界"),
                WorkItem::new(1, "第二行"),
                WorkItem::new(2, ""),
            ]
        );
    }

    #[test]
    fn load_skips_blank_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.csv", "id,text\n1,a\n,\n2,b\n");
        let items = WorkItemStore::default().load(&path).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn missing_text_column_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.csv", "id,body\n1,a\n");
        let err = WorkItemStore::default().load(&path).unwrap_err();
        assert!(matches!(err, AiBridgeError::Input { .. }));
        assert!(err.to_string().contains("body"));
    }

    #[test]
    fn missing_id_column_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.csv", "text\nhello\n");
        assert!(matches!(
            WorkItemStore::default().load(&path),
            Err(AiBridgeError::Input { .. })
        ));
    }

    #[test]
    fn bad_id_and_duplicates_are_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write(&dir, "bad.csv", "id,text\nabc,hello\n");
        let err = WorkItemStore::default().load(&bad).unwrap_err();
        assert!(err.to_string().contains(":2:"));

        let dup = write(&dir, "dup.csv", "id,text\n1,a\n1,b\n");
        let err = WorkItemStore::default().load(&dup).unwrap_err();
        assert!(err.to_string().contains("duplicate id 1"));
    }

    #[test]
    fn unreadable_source_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkItemStore::default()
            .load(&dir.path().join("missing.csv"))
            .unwrap_err();
        assert!(matches!(err, AiBridgeError::Input { .. }));
    }

    #[test]
    fn parse_id_variants() {
        assert_eq!(parse_id(" 42 "), Some(42));
        assert_eq!(parse_id("42.0"), Some(42));
        assert_eq!(parse_id("42.5"), None);
        assert_eq!(parse_id("NaN"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn range_filter_is_inclusive_and_lenient() {
        let items: Vec<WorkItem> = (1..=10).map(|id| WorkItem::new(id, "t")).collect();

        let kept = filter(items.clone(), IdRange::from_bounds(Some("3"), Some("5")));
        assert_eq!(kept.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 4, 5]);

        let kept = filter(items.clone(), IdRange::from_bounds(Some("abc"), Some("2")));
        assert_eq!(kept.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

        let kept = filter(items.clone(), IdRange::from_bounds(None, Some("  ")));
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn unprocessed_excludes_completed_and_sorts() {
        let items = vec![
            WorkItem::new(5, "e"),
            WorkItem::new(1, "a"),
            WorkItem::new(3, "c"),
            WorkItem::new(2, "b"),
        ];
        let mut checkpoint = Checkpoint::new();
        checkpoint.upsert(TranslationRecord::from_result(&items[1], "A"));
        // Failed rows stay eligible.
        checkpoint.upsert(TranslationRecord::failed(&items[2]));

        let pending = unprocessed(&items, &checkpoint);
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3, 5]);
    }

    #[test]
    fn completed_never_reappears() {
        let items: Vec<WorkItem> = (1..=50).map(|id| WorkItem::new(id, "t")).collect();
        let checkpoint: Checkpoint = items
            .iter()
            .filter(|i| i.id % 3 == 0)
            .map(|i| TranslationRecord::from_result(i, "done"))
            .collect();
        let pending = unprocessed(&items, &checkpoint);
        assert!(pending.iter().all(|i| !checkpoint.is_completed(i.id)));
        assert_eq!(pending.len(), 50 - 16);
    }
}
