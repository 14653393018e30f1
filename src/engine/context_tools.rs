//! Local execution of the read-only context tools.
//!
//! Answers come from the chat context, the cached scene graph, and the
//! mirrored code-definition snapshot. The host filesystem is never touched.
//! Results land in the per-workflow tool cache; a cache-served turn injects
//! a compact cache fact instead of re-sending the body.

use super::types::{ChatInput, TaskState};
use crate::cache::{ToolResultCache, CODE_TTL, STRUCTURE_TTL};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

/// Character cap applied to the active script text.
pub const ACTIVE_SCRIPT_CAP: usize = 40_000;

const DEFAULT_OPEN_DOCS: usize = 20;
const DEFAULT_CHILD_DEPTH: usize = 1;
const DEFAULT_MAX_NODES: usize = 100;
const DEFAULT_MAX_BYTES: usize = 16_384;
const DEFAULT_DEF_LIMIT: usize = 200;
const DEFAULT_SEARCH_LIMIT: usize = 50;

#[derive(Debug)]
pub struct ContextToolOutput {
    pub value: JsonValue,
    pub from_cache: bool,
    /// Injected into the next working set when the result was cache-served.
    pub cache_fact: Option<String>,
}

pub fn execute_context_tool(
    name: &str,
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<ContextToolOutput, String> {
    let fingerprints = fingerprints_for(name, state);
    let key = ToolResultCache::key(name, args, &fingerprints);

    if let Some(cached) = state.tool_cache.get(&key) {
        let value = cached.clone();
        let fact = format!(
            "Used cached {}({}) against {}; unchanged",
            name,
            compact_args(args),
            fingerprints
                .first()
                .map(|f| &f[..f.len().min(12)])
                .unwrap_or("context")
        );
        return Ok(ContextToolOutput {
            value,
            from_cache: true,
            cache_fact: Some(fact),
        });
    }

    let (value, ttl) = run_tool(name, args, input, state)?;
    state
        .tool_cache
        .set(key, value.clone(), ttl, &fingerprints);
    Ok(ContextToolOutput {
        value,
        from_cache: false,
        cache_fact: None,
    })
}

fn fingerprints_for(name: &str, state: &TaskState) -> Vec<String> {
    let key = match name {
        "get_active_script" => "activeScriptHash",
        "list_children" | "get_properties" | "list_selection" => "placeHash",
        _ => return Vec::new(),
    };
    state
        .fingerprints
        .get(key)
        .map(|v| vec![v.clone()])
        .unwrap_or_default()
}

fn run_tool(
    name: &str,
    args: &JsonValue,
    input: &ChatInput,
    state: &TaskState,
) -> Result<(JsonValue, Duration), String> {
    match name {
        "get_active_script" => {
            let value = match &input.context.active_script {
                Some(script) => {
                    let truncated = script.text.chars().count() > ACTIVE_SCRIPT_CAP;
                    let text: String = script.text.chars().take(ACTIVE_SCRIPT_CAP).collect();
                    json!({ "path": script.path, "text": text, "truncated": truncated })
                }
                None => JsonValue::Null,
            };
            Ok((value, STRUCTURE_TTL))
        }
        "list_selection" => {
            let value = serde_json::to_value(&input.context.selection)
                .map_err(|e| format!("selection serialization failed: {e}"))?;
            Ok((value, STRUCTURE_TTL))
        }
        "list_open_documents" => {
            let max = usize_arg(args, "maxCount").unwrap_or(DEFAULT_OPEN_DOCS);
            let docs: Vec<&crate::engine::types::OpenDoc> =
                input.context.open_docs.iter().take(max).collect();
            let value = serde_json::to_value(docs)
                .map_err(|e| format!("open docs serialization failed: {e}"))?;
            Ok((value, STRUCTURE_TTL))
        }
        "list_children" => {
            let parent = str_arg(args, "parentPath")
                .ok_or_else(|| "parentPath is required".to_string())?;
            let depth = usize_arg(args, "depth").unwrap_or(DEFAULT_CHILD_DEPTH);
            let max_nodes = usize_arg(args, "maxNodes").unwrap_or(DEFAULT_MAX_NODES);
            let whitelist = string_vec_arg(args, "classWhitelist");
            let children =
                state
                    .scene
                    .list_children(&parent, depth, max_nodes, whitelist.as_deref());
            let value = JsonValue::Array(
                children
                    .iter()
                    .map(|n| {
                        json!({ "path": n.path, "className": n.class_name, "name": n.name })
                    })
                    .collect(),
            );
            Ok((value, STRUCTURE_TTL))
        }
        "get_properties" => {
            let path = str_arg(args, "path").ok_or_else(|| "path is required".to_string())?;
            let keys = string_vec_arg(args, "keys");
            let include_attrs = args
                .get("includeAllAttributes")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let max_bytes = usize_arg(args, "maxBytes").unwrap_or(DEFAULT_MAX_BYTES);
            let props = state
                .scene
                .get_properties(&path, keys.as_deref(), include_attrs, max_bytes)
                .ok_or_else(|| format!("no instance in snapshot at '{path}'"))?;
            Ok((JsonValue::Object(props), STRUCTURE_TTL))
        }
        "list_code_definition_names" => {
            let root = str_arg(args, "root");
            let limit = usize_arg(args, "limit").unwrap_or(DEFAULT_DEF_LIMIT);
            let exts = string_vec_arg(args, "exts");
            let defs = state
                .code_defs
                .list(root.as_deref(), limit, exts.as_deref());
            let value = serde_json::to_value(defs)
                .map_err(|e| format!("definition serialization failed: {e}"))?;
            Ok((value, CODE_TTL))
        }
        "search_files" => {
            let query = str_arg(args, "query").ok_or_else(|| "query is required".to_string())?;
            let root = str_arg(args, "root");
            let limit = usize_arg(args, "limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
            let exts = string_vec_arg(args, "exts");
            let case_sensitive = args
                .get("caseSensitive")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let hits = state.code_defs.search(
                &query,
                root.as_deref(),
                limit,
                exts.as_deref(),
                case_sensitive,
            );
            let value = serde_json::to_value(hits)
                .map_err(|e| format!("search serialization failed: {e}"))?;
            Ok((value, CODE_TTL))
        }
        other => Err(format!("'{other}' is not a context tool")),
    }
}

fn str_arg(args: &JsonValue, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn usize_arg(args: &JsonValue, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn string_vec_arg(args: &JsonValue, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

fn compact_args(args: &JsonValue) -> String {
    match args.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    }
}
