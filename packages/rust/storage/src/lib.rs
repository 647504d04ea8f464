//! File-backed stores for a translation run.
//!
//! - [`WorkItemStore`]: reads source rows and diffs them against a checkpoint
//! - [`ProgressStore`]: loads and rewrites the checkpoint artifact
//!   (`id,raw,edit,status` CSV, always sorted by id)
//!
//! **Ownership rule:** during a run the orchestrator is the only writer of a
//! checkpoint file. Readers (status polls) load their own copy.

mod checkpoint;
mod paths;
mod source;

pub use checkpoint::{ProgressStore, merge, progress};
pub use paths::{detect_language, output_path_for};
pub use source::{CsvSource, IdRange, SourceReader, WorkItemStore, filter, unprocessed};
