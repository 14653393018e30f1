//! Working-set assembly: the ordered message list presented to the provider
//! on each turn, kept within the token budget by folding older turns into a
//! summary block.
//!
//! Token counting is char-based until a real tokenizer is wired in; nothing
//! here depends on the estimator beyond monotonicity.

use super::types::TaskState;
use crate::providers::ChatMessage;

/// Most recent assistant/user turns kept verbatim.
pub const RECENT_TURNS: usize = 6;
/// Most recent tool results kept (older ones are dropped or summarized).
pub const RECENT_TOOL_RESULTS: usize = 3;
/// Character cap applied to a kept tool-result body.
pub const TOOL_RESULT_CAP: usize = 8_000;
/// Compaction fires above this fraction of the effective window.
const COMPACT_TRIGGER: f64 = 0.8;
/// Summary block budget, in estimated tokens.
const SUMMARY_MAX_TOKENS: usize = 1_200;
/// World facts included in the working-set block.
const MAX_WORLD_FACTS: usize = 30;

pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        (chars + 3) / 4
    }
}

pub fn estimate_tokens_for_messages(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum()
}

fn is_tool_result(msg: &ChatMessage) -> bool {
    msg.role == "user" && msg.content.starts_with("TOOL_RESULT")
}

/// Assemble the provider-visible message list, in priority order: system
/// prompt, summary block, compact working-set facts, then the recent turns
/// with the current goal last.
pub fn build_working_set(
    system_prompt: &str,
    state: &TaskState,
    cache_facts: &[String],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new("system", system_prompt)];

    if let Some(summary) = &state.summary {
        messages.push(ChatMessage::new(
            "user",
            format!("CONTEXT SUMMARY (older turns folded)\n{summary}"),
        ));
    }

    if let Some(block) = working_set_block(state, cache_facts) {
        messages.push(ChatMessage::new("user", block));
    }

    // Walk history from the end: keep the last RECENT_TURNS conversation
    // turns verbatim and the last RECENT_TOOL_RESULTS tool results
    // (truncated); older material is covered by the summary.
    let mut kept: Vec<ChatMessage> = Vec::new();
    let mut turns = 0usize;
    let mut tool_results = 0usize;
    for msg in state.history.iter().rev() {
        if is_tool_result(msg) {
            if tool_results < RECENT_TOOL_RESULTS {
                kept.push(truncate_message(msg, TOOL_RESULT_CAP));
                tool_results += 1;
            }
        } else if turns < RECENT_TURNS {
            kept.push(msg.clone());
            turns += 1;
        }
        if turns >= RECENT_TURNS && tool_results >= RECENT_TOOL_RESULTS {
            break;
        }
    }
    kept.reverse();
    messages.extend(kept);
    messages
}

fn truncate_message(msg: &ChatMessage, cap: usize) -> ChatMessage {
    if msg.content.chars().count() <= cap {
        return msg.clone();
    }
    let truncated: String = msg.content.chars().take(cap).collect();
    ChatMessage::new(
        msg.role.clone(),
        format!("{truncated}\n... (truncated)"),
    )
}

/// Compact block of cache facts (fresh tool reads and their fingerprints)
/// and world facts (important paths).
fn working_set_block(state: &TaskState, cache_facts: &[String]) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    for fact in cache_facts {
        lines.push(format!("- {fact}"));
    }
    if let Some(place_hash) = state.fingerprints.get("placeHash") {
        let mut paths: Vec<&str> = state.scene.nodes().map(|n| n.path.as_str()).collect();
        paths.sort();
        if !paths.is_empty() {
            let shown = &paths[..paths.len().min(MAX_WORLD_FACTS)];
            lines.push(format!(
                "- scene snapshot {}: {} nodes, paths: {}",
                &place_hash[..place_hash.len().min(12)],
                paths.len(),
                shown.join(", ")
            ));
        }
    }
    if !state.plan.is_empty() {
        let rendered: Vec<String> = state
            .plan
            .iter()
            .map(|s| format!("[{}] {}", if s.done { "x" } else { " " }, s.text))
            .collect();
        lines.push(format!("- plan: {}", rendered.join("; ")));
    }
    if lines.is_empty() {
        None
    } else {
        Some(format!("WORKING SET\n{}", lines.join("\n")))
    }
}

/// Fold turns older than the most recent window into an updated summary when
/// the estimate crosses the trigger. Returns true if compaction ran.
pub fn maybe_compact(state: &mut TaskState, window_tokens: usize) -> bool {
    let budget = (window_tokens as f64 * COMPACT_TRIGGER) as usize;
    let estimate = state
        .token_totals
        .total()
        .max(estimate_tokens_for_messages(&state.history));
    if estimate <= budget {
        return false;
    }
    if state.history.len() <= RECENT_TURNS {
        return false;
    }

    let fold_idx = state.history.len() - RECENT_TURNS;
    let folded: Vec<ChatMessage> = state.history.drain(..fold_idx).collect();
    let summary = summarize_folded(state, &folded);
    state.summary = Some(summary);

    let prior = state
        .history_deleted_range
        .map(|(_, end)| end)
        .unwrap_or(0);
    state.history_deleted_range = Some((0, prior + fold_idx));
    tracing::info!(
        "Compacted {} turns into summary (deleted range 0..{})",
        fold_idx,
        prior + fold_idx
    );
    true
}

/// Summary covering the goal, accepted proposals, resource fingerprints, and
/// open blockers from the folded turns.
fn summarize_folded(state: &TaskState, folded: &[ChatMessage]) -> String {
    let mut out = String::new();

    if let Some(goal) = folded
        .iter()
        .chain(state.history.iter())
        .find(|m| m.role == "user" && !m.content.starts_with("TOOL_RESULT"))
    {
        out.push_str(&format!("Goal: {}\n", first_line(&goal.content, 200)));
    }

    let accepted: Vec<&str> = state
        .tool_runs
        .iter()
        .filter(|r| r.ok)
        .map(|r| r.name.as_str())
        .collect();
    if !accepted.is_empty() {
        out.push_str(&format!("Tools run: {}\n", accepted.join(", ")));
    }

    if !state.fingerprints.is_empty() {
        let mut fps: Vec<String> = state
            .fingerprints
            .iter()
            .map(|(k, v)| format!("{}={}", k, &v[..v.len().min(12)]))
            .collect();
        fps.sort();
        out.push_str(&format!("Fingerprints: {}\n", fps.join(", ")));
    }

    let blockers: Vec<String> = folded
        .iter()
        .filter(|m| {
            m.content.starts_with("VALIDATION_ERROR") || m.content.starts_with("POLICY_ERROR")
        })
        .map(|m| first_line(&m.content, 120))
        .collect();
    if !blockers.is_empty() {
        out.push_str(&format!("Blockers: {}\n", blockers.join(" | ")));
    }

    out.push_str(&format!("(compressed {} earlier turns)", folded.len()));

    // Keep the summary inside its own budget.
    let cap_chars = SUMMARY_MAX_TOKENS * 4;
    if out.chars().count() > cap_chars {
        out = out.chars().take(cap_chars).collect();
    }
    out
}

fn first_line(text: &str, cap: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= cap {
        line.to_string()
    } else {
        line.chars().take(cap).collect::<String>() + "..."
    }
}
