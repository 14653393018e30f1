use crate::cache::ToolResultCache;
use crate::proposals::Proposal;
use crate::providers::ChatMessage;
use crate::scene::{CodeDefIndex, CodeDefinition, SceneGraph, SceneNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Chat input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInput {
    pub project_id: String,
    pub message: String,
    #[serde(default)]
    pub context: ChatContext,
    /// `"geometry_only"` opts this request out of the script-edit policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ChatInput {
    pub fn geometry_only(&self) -> bool {
        self.mode.as_deref() == Some("geometry_only")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default)]
    pub active_script: Option<ActiveScript>,
    #[serde(default)]
    pub selection: Vec<SelectedInstance>,
    #[serde(default)]
    pub open_docs: Vec<OpenDoc>,
    #[serde(default)]
    pub scene: Option<Vec<SceneNode>>,
    #[serde(default)]
    pub code_definitions: Option<Vec<CodeDefinition>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveScript {
    pub path: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedInstance {
    pub class_name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDoc {
    pub path: String,
}

// ---------------------------------------------------------------------------
// Task state (per workflow)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    pub name: String,
    pub ok: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTotals {
    pub input: usize,
    pub output: usize,
    pub cache_reads: usize,
    pub cache_writes: usize,
}

impl TokenTotals {
    pub fn total(&self) -> usize {
        self.input + self.output + self.cache_reads + self.cache_writes
    }
}

/// Owned by the workflow for its lifetime; read by the Plan/Act loop and
/// mutated only at turn boundaries.
pub struct TaskState {
    pub workflow_id: String,
    /// Ordered (role, content) turns, excluding the system prompt.
    pub history: Vec<ChatMessage>,
    pub plan: Vec<PlanStep>,
    pub plan_notes: Option<String>,
    pub tool_runs: Vec<ToolRun>,
    pub token_totals: TokenTotals,
    pub fingerprints: HashMap<String, String>,
    pub scene: SceneGraph,
    pub code_defs: CodeDefIndex,
    pub tool_cache: ToolResultCache,
    /// Summary block that replaced folded turns, if compaction has run.
    pub summary: Option<String>,
    /// `[0, folded_idx)` of turns folded into the summary.
    pub history_deleted_range: Option<(usize, usize)>,
    /// Mutating ops emitted over the workflow (completion gate + hard cap).
    pub object_op_count: usize,
    pub script_edit_seen: bool,
    /// Single-flight guard: true while a request is being served.
    pub in_flight: bool,
}

impl TaskState {
    pub fn new(workflow_id: String) -> Self {
        Self {
            workflow_id,
            history: Vec::new(),
            plan: Vec::new(),
            plan_notes: None,
            tool_runs: Vec::new(),
            token_totals: TokenTotals::default(),
            fingerprints: HashMap::new(),
            scene: SceneGraph::default(),
            code_defs: CodeDefIndex::default(),
            tool_cache: ToolResultCache::new(),
            summary: None,
            history_deleted_range: None,
            object_op_count: 0,
            script_edit_seen: false,
            in_flight: false,
        }
    }

    /// Refresh the editor-owned snapshots from a new Chat Input. The
    /// snapshot is the invalidation boundary: a changed scene fingerprint
    /// drops dependent cache entries.
    pub fn absorb_context(&mut self, context: &ChatContext) {
        if let Some(snapshot) = &context.scene {
            let graph = SceneGraph::from_snapshot(snapshot);
            let fingerprint = graph.fingerprint();
            if let Some(previous) = self.fingerprints.get("placeHash") {
                if previous != &fingerprint {
                    let old = previous.clone();
                    self.tool_cache.invalidate_fingerprint(&old);
                }
            }
            self.fingerprints.insert("placeHash".to_string(), fingerprint);
            self.scene = graph;
        }
        if let Some(defs) = &context.code_definitions {
            self.code_defs = CodeDefIndex::new(defs.clone());
        }
        if let Some(script) = &context.active_script {
            let hash = super::diff::sha1_hex(&script.text);
            if let Some(previous) = self.fingerprints.get("activeScriptHash") {
                if previous != &hash {
                    let old = previous.clone();
                    self.tool_cache.invalidate_fingerprint(&old);
                }
            }
            self.fingerprints.insert("activeScriptHash".to_string(), hash);
        }
    }

    pub fn view(&self) -> TaskStateView {
        TaskStateView {
            workflow_id: self.workflow_id.clone(),
            plan: self.plan.clone(),
            plan_notes: self.plan_notes.clone(),
            tool_runs: self.tool_runs.clone(),
            fingerprints: self.fingerprints.clone(),
            summary: self.summary.clone(),
            history_turns: self.history.len(),
            history_deleted_range: self.history_deleted_range,
            object_op_count: self.object_op_count,
        }
    }
}

/// Serializable slice of the Task State returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateView {
    pub workflow_id: String,
    pub plan: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_notes: Option<String>,
    pub tool_runs: Vec<ToolRun>,
    pub fingerprints: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub history_turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_deleted_range: Option<(usize, usize)>,
    pub object_op_count: usize,
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub workflow_id: String,
    pub proposals: Vec<Proposal>,
    pub task_state: TaskStateView,
    pub token_totals: TokenTotals,
    /// True only if a Completion proposal was emitted and the completion
    /// gate passed.
    pub is_complete: bool,
}

// ---------------------------------------------------------------------------
// Fatal error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LoopError {
    /// Schema rejections exceeded the consecutive limit.
    Validation { tool: String, message: String },
    /// An unrecognized tool name exceeded its retry budget.
    UnknownTool(String),
    /// Parser produced nothing and the provider was explicitly requested.
    Parse(String),
    /// Provider failure that terminates the loop.
    Provider(String),
    Cancelled,
    /// Turn cap or mutation cap reached without an actionable proposal.
    BudgetExceeded(String),
}

impl std::fmt::Display for LoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { tool, message } => {
                write!(f, "validation failed for '{tool}': {message}")
            }
            Self::UnknownTool(name) => write!(f, "unknown tool '{name}'"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Provider(msg) => write!(f, "provider error: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::BudgetExceeded(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LoopError {}
