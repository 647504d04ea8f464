//! Source language detection and checkpoint path derivation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Language codes recognised in source file names, in priority order.
const LANGUAGE_CODES: [&str; 5] = ["JP", "EN", "KR", "CN", "VI"];

/// Folder used when the source language cannot be detected.
const UNKNOWN_LANGUAGE_DIR: &str = "Other";

/// Raw source folders are named `Raw_<LANG>`.
static RAW_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Raw_(JP|EN|KR|CN|VI)").expect("valid regex"));

/// Detect the source language.
///
/// A `Raw_<LANG>` folder anywhere in the parent path wins
/// (`Raw_CN/legend.csv` → `CN`); otherwise the first code found in the
/// file name, ignoring case (`novel_cn.csv` → `CN`).
pub fn detect_language(path: &Path) -> Option<&'static str> {
    if let Some(parent) = path.parent() {
        let parent = parent.to_string_lossy();
        if let Some(caps) = RAW_DIR.captures(&parent) {
            let code = &caps[1];
            return LANGUAGE_CODES.into_iter().find(|known| *known == code);
        }
    }

    let name = path.file_name()?.to_string_lossy().to_uppercase();
    LANGUAGE_CODES.into_iter().find(|code| name.contains(code))
}

/// Default checkpoint location for a source:
/// `<output_dir>/<LANG>/<stem>_<prompt_type>_translated.csv`.
pub fn output_path_for(input: &Path, prompt_type: &str, output_dir: &Path) -> PathBuf {
    let lang = detect_language(input).unwrap_or(UNKNOWN_LANGUAGE_DIR);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "source".to_string());

    let file_name = if prompt_type.is_empty() {
        format!("{stem}_translated.csv")
    } else {
        format!("{stem}_{prompt_type}_translated.csv")
    };

    output_dir.join(lang).join(file_name)
}
