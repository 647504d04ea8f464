//! Numbered-text protocol between batches and providers.
//!
//! A batch is sent as `"1. <text>\n2. <text>..."` and the provider is expected
//! to answer with the same numbering. [`decode`] is total: whatever comes back,
//! it yields exactly one slot per expected row, with `""` for rows it could not
//! recover.

mod prompt;

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use aibridge_shared::WorkItem;

pub use prompt::{PromptLibrary, PromptSource, count_info, fill_template};

/// Matches a line that opens a numbered entry: `12. content`.
static NUMBERED_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s*(.*)$").expect("valid regex"));

/// Leading `12. ` token stripped in fallback mode.
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").expect("valid regex"));

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode rows as numbered lines. Numbering is local to the batch and starts at 1.
pub fn encode(items: &[WorkItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.text))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a provider response into exactly `expected_count` entries.
///
/// Numbered entries are placed at their number; entries outside `1..=expected_count`
/// are dropped and gaps become `""`. When the response carries no numbering at
/// all, the first `expected_count` lines are taken positionally.
pub fn decode(response: &str, expected_count: usize) -> Vec<String> {
    if expected_count == 0 {
        return Vec::new();
    }

    let pairs = numbered_pairs(response);

    if pairs.is_empty() {
        debug!(
            expected_count,
            "no numbered entries in response, using line fallback"
        );
        return decode_by_lines(response, expected_count);
    }

    // Later duplicates win.
    let by_number: HashMap<usize, String> = pairs.into_iter().collect();

    let decoded: Vec<String> = (1..=expected_count)
        .map(|i| by_number.get(&i).cloned().unwrap_or_default())
        .collect();

    let missing = decoded.iter().filter(|s| s.is_empty()).count();
    if missing > 0 {
        debug!(
            expected_count,
            missing,
            "response is missing numbered entries"
        );
    }

    decoded
}

/// Collect `(number, content)` pairs. An entry runs from its numbered line up
/// to the next numbered line or the end of the text.
fn numbered_pairs(response: &str) -> Vec<(usize, String)> {
    let mut pairs: Vec<(usize, String)> = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for line in response.lines() {
        let opened = NUMBERED_LINE_RE.captures(line).and_then(|caps| {
            let number = caps[1].parse::<usize>().ok()?;
            Some((number, caps[2].to_string()))
        });

        match opened {
            Some(entry) => {
                if let Some(done) = current.replace(entry) {
                    pairs.push(done);
                }
            }
            None => {
                // Continuation lines belong to the open entry; text before
                // the first numbered line is preamble and is ignored.
                if let Some((_, content)) = current.as_mut() {
                    content.push('\n');
                    content.push_str(line);
                }
            }
        }
    }

    if let Some(done) = current {
        pairs.push(done);
    }

    pairs
        .into_iter()
        .map(|(number, content)| (number, content.trim().to_string()))
        .collect()
}

fn strip_number(line: &str) -> String {
    LEADING_NUMBER_RE.replace(line, "").trim().to_string()
}

/// Positional fallback: one line per row, padded with `""`.
fn decode_by_lines(response: &str, expected_count: usize) -> Vec<String> {
    let mut decoded: Vec<String> = response
        .trim()
        .lines()
        .take(expected_count)
        .map(|line| strip_number(line.trim()))
        .collect();

    decoded.resize(expected_count, String::new());
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn items(texts: &[&str]) -> Vec<WorkItem> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| WorkItem::new(100 + i as i64 * 3, *t))
            .collect()
    }

    #[test]
    fn encode_numbers_from_one() {
        let batch = items(&["first", "second", "third"]);
        assert_eq!(encode(&batch), "1. first\n2. second\n3. third");
    }

    #[test]
    fn encode_empty_batch() {
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn decode_well_formed() {
        let out = decode("1. one\n2. two\n3. three", 3);
        assert_eq!(out, vec!["one", "two", "three"]);
    }

    #[test]
    fn decode_fills_gaps_and_drops_extras() {
        let out = decode("1. one\n3. three\n7. seven", 4);
        assert_eq!(out, vec!["one", "", "three", ""]);
    }

    #[test]
    fn decode_multiline_entry_and_preamble() {
        let response = "Here you go:\n\n1. line one\ncontinued here\n2. two\n";
        let out = decode(response, 2);
        assert_eq!(out, vec!["line one\ncontinued here", "two"]);
    }

    #[test]
    fn decode_out_of_order_and_duplicates() {
        let out = decode("2. b\n1. a\n2. b2", 2);
        assert_eq!(out, vec!["a", "b2"]);
    }

    #[test]
    fn decode_number_without_space() {
        let out = decode("1.alpha\n2.\nbeta", 2);
        assert_eq!(out, vec!["alpha", "beta"]);
    }

    #[test]
    fn decode_unnumbered_response_uses_lines() {
        let out = decode("alpha\nbeta\ngamma", 5);
        assert_eq!(out, vec!["alpha", "beta", "gamma", "", ""]);
    }

    #[test]
    fn decode_unnumbered_truncates_extra_lines() {
        let out = decode("a\nb\nc\nd", 2);
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn decode_empty_response() {
        assert_eq!(decode("", 3), vec!["", "", ""]);
        assert!(decode("", 0).is_empty());
        assert!(decode("1. x", 0).is_empty());
    }

    #[test]
    fn decode_crlf_response() {
        let out = decode("1. a\r\n2. b\r\n", 2);
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn embedded_numbered_line_splits_entry() {
        // Row text that itself contains "\n2. " is ambiguous on the wire:
        // the second line is read as a separate entry.
        let batch = items(&["intro\n2. not a row", "real second"]);
        let out = decode(&encode(&batch), 2);
        assert_eq!(out, vec!["intro", "real second"]);
    }

    proptest! {
        #[test]
        fn decode_always_returns_expected_len(response in ".{0,400}", n in 0usize..40) {
            prop_assert_eq!(decode(&response, n).len(), n);
        }

        #[test]
        fn echo_roundtrips(texts in prop::collection::vec("[a-z]([a-z ,]{0,20}[a-z])?", 1..30)) {
            let batch: Vec<WorkItem> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| WorkItem::new(i as i64, t.clone()))
                .collect();
            let decoded = decode(&encode(&batch), batch.len());
            prop_assert_eq!(decoded, texts);
        }
    }
}
