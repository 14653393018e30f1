//! Fallback generator: when the loop exits without an actionable proposal
//! and fallbacks are enabled, synthesize a safe one from the editor context.

use super::diff;
use super::types::ChatInput;
use crate::proposals::{
    AssetSearch, DiffPreview, EditSafety, FileEdit, Op, Position, Proposal, ProposalBody,
    RangeDiff, RangeEdit,
};
use crate::scene::{canonical_path, path_leaf};

const COMMENT_CAP: usize = 80;
const FALLBACK_SEARCH_LIMIT: u32 = 6;

/// Returns the proposal plus the event label (`fallback.edit`,
/// `fallback.object`, or `fallback.asset`).
pub fn fallback_proposals(input: &ChatInput) -> (Vec<Proposal>, &'static str) {
    // 1. Prepend a marker comment to the active script.
    if let Some(script) = &input.context.active_script {
        let note = first_line(&input.message, COMMENT_CAP);
        let edit = RangeEdit {
            start: Position::new(0, 0),
            end: Position::new(0, 0),
            text: format!("-- {note}\n"),
        };
        let after = diff::apply_range_edits(&script.text, std::slice::from_ref(&edit))
            .unwrap_or_else(|_| script.text.clone());
        let proposal = Proposal::with_notes(
            ProposalBody::Edit {
                files: vec![FileEdit {
                    path: script.path.clone(),
                    diff: RangeDiff::new(vec![edit]),
                    preview: Some(DiffPreview {
                        unified: diff::unified_preview(&script.text, &after, &script.path),
                    }),
                    safety: EditSafety {
                        before_hash: diff::sha1_hex(&script.text),
                        base_text: Some(script.text.clone()),
                    },
                }],
            },
            "fallback",
        );
        return (vec![proposal], "fallback.edit");
    }

    // 2. Rename the single selection.
    if let [only] = input.context.selection.as_slice() {
        let path = canonical_path(&only.path);
        let new_name = format!("{}_Warp", path_leaf(&path));
        let proposal = Proposal::with_notes(
            ProposalBody::ObjectOp {
                ops: vec![Op::RenameInstance { path, new_name }],
            },
            "fallback",
        );
        return (vec![proposal], "fallback.object");
    }

    // 3. Asset search seeded from the message.
    let query = {
        let trimmed = input.message.trim();
        if trimmed.is_empty() {
            "button".to_string()
        } else {
            trimmed.to_string()
        }
    };
    let proposal = Proposal::with_notes(
        ProposalBody::AssetOp {
            search: Some(AssetSearch {
                query,
                tags: None,
                limit: Some(FALLBACK_SEARCH_LIMIT),
            }),
            insert: None,
            generate3d: None,
        },
        "fallback",
    );
    (vec![proposal], "fallback.asset")
}

fn first_line(text: &str, cap: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= cap {
        line.to_string()
    } else {
        line.chars().take(cap).collect()
    }
}
