//! Range-edit application, unified-diff previews, and content fingerprints.

use crate::proposals::{validate_file_edits, Position, RangeEdit};
use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use similar::TextDiff;

/// Hex-encoded SHA-1 of `text`. Edit proposals carry this as `beforeHash`.
pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deserialize the model-supplied `edits` array.
pub fn parse_edits(value: &JsonValue) -> Result<Vec<RangeEdit>, String> {
    serde_json::from_value::<Vec<RangeEdit>>(value.clone())
        .map_err(|e| format!("invalid edits: {e}"))
}

/// Apply non-overlapping range edits to `text`.
///
/// Edits are sorted by start position, validated against the per-file caps,
/// then applied back-to-front so earlier offsets stay untouched. A character
/// index beyond the end of its line clamps to the line end; a line index
/// beyond the end of the text clamps to the end of the text.
pub fn apply_range_edits(text: &str, edits: &[RangeEdit]) -> Result<String, String> {
    let mut sorted = edits.to_vec();
    sorted.sort_by_key(|e| (e.start.line, e.start.character));
    validate_file_edits(&sorted)?;

    let starts = line_start_offsets(text);
    let mut out = text.to_string();
    for e in sorted.iter().rev() {
        let start = byte_offset(text, &starts, e.start);
        let end = byte_offset(text, &starts, e.end).max(start);
        out.replace_range(start..end, &e.text);
    }
    Ok(out)
}

/// Unified diff between `before` and `after` with three lines of context.
pub fn unified_preview(before: &str, after: &str, path: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

fn line_start_offsets(text: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn byte_offset(text: &str, starts: &[usize], pos: Position) -> usize {
    if pos.line >= starts.len() {
        return text.len();
    }
    let line_start = starts[pos.line];
    let line_end = starts
        .get(pos.line + 1)
        .map(|s| s.saturating_sub(1))
        .unwrap_or(text.len());
    let line = &text[line_start..line_end];
    let in_line = line
        .char_indices()
        .nth(pos.character)
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    line_start + in_line
}
