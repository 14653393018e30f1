//! Prompt template store.
//!
//! Compiled-in templates from `prompts/` in the source tree, with `{variable}`
//! placeholders substituted via [`PromptStore::render`].

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Well-known prompt keys
// ---------------------------------------------------------------------------

/// System prompt for the Plan/Act loop. Vars: `{tool_list}`, `{workspace_root}`.
pub const SYSTEM_PROMPT: &str = "system-prompt";
/// Reflection when no tool call could be parsed.
pub const NUDGE_NO_TOOL: &str = "nudge-no-tool";
/// Reflection when more than one top-level tool tag was emitted.
pub const NUDGE_SINGLE_TOOL: &str = "nudge-single-tool";
/// Reflection for schema validation failures. Vars: `{tool}`, `{issues}`.
pub const NUDGE_VALIDATION: &str = "nudge-validation";
/// Reflection for an unrecognized tool name. Vars: `{tool}`.
pub const NUDGE_UNKNOWN_TOOL: &str = "nudge-unknown-tool";
/// Reflection for policy violations (e.g. completion gate). Vars: `{tool}`, `{message}`.
pub const NUDGE_POLICY: &str = "nudge-policy";

const DEFAULTS: &[(&str, &str)] = &[
    (SYSTEM_PROMPT, include_str!("../prompts/system-prompt.md")),
    (NUDGE_NO_TOOL, include_str!("../prompts/nudge-no-tool.md")),
    (NUDGE_SINGLE_TOOL, include_str!("../prompts/nudge-single-tool.md")),
    (NUDGE_VALIDATION, include_str!("../prompts/nudge-validation.md")),
    (NUDGE_UNKNOWN_TOOL, include_str!("../prompts/nudge-unknown-tool.md")),
    (NUDGE_POLICY, include_str!("../prompts/nudge-policy.md")),
];

// ---------------------------------------------------------------------------
// PromptStore
// ---------------------------------------------------------------------------

pub struct PromptStore {
    prompts: HashMap<String, String>,
}

impl PromptStore {
    pub fn load() -> Self {
        let prompts = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { prompts }
    }

    /// Get a raw template by key. Returns `None` for unknown keys.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.prompts.get(key).map(|s| s.as_str())
    }

    /// Render a template, replacing every `{name}` with the corresponding
    /// value from `vars`. Unknown keys in the template are left as-is.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        self.get(key)
            .map(|tpl| Self::substitute(tpl, vars))
            .unwrap_or_default()
    }

    /// Substitute `{name}` placeholders in `tpl`.
    pub fn substitute(tpl: &str, vars: &[(&str, &str)]) -> String {
        let mut out = tpl.to_string();
        for (name, value) in vars {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}
