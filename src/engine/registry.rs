//! Tool registry: per-tool argument schemas with lenient coercions.
//!
//! Schemas are strict about shape but accept lenient inputs via a
//! pre-transform pass: JSON objects supplied as strings are parsed and
//! rewrapped, arrays accept three input shapes, alias fields are folded,
//! numeric strings are parsed, and out-of-range values clamp to the schema
//! limits. Anything still wrong after the pre-transform becomes a structured
//! `{path, message}` issue reflected back to the model.

use super::parser::lenient_json_parse;
use serde_json::{Map, Value as JsonValue};

// ---------------------------------------------------------------------------
// Schema types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Read-only, executed locally by the loop.
    Context,
    /// Plan bookkeeping; updates Task State and loops.
    Planning,
    /// Script edits (mutating).
    Script,
    /// Scene instance operations (mutating).
    Instance,
    /// Asset catalog operations.
    Asset,
    /// Transient assistant text; never a proposal.
    Message,
    /// Terminal summary.
    Completion,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamShape {
    Text,
    Number { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Flag,
    StringArray { max: usize },
    Object,
    Edits,
}

pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub shape: ParamShape,
    pub aliases: &'static [&'static str],
}

pub struct ToolSpec {
    pub name: &'static str,
    pub kind: ToolKind,
    pub params: &'static [ParamSpec],
}

/// Wrapper tags unwrapped by the parser to expose an inner `{name, arguments}`.
pub const WRAPPER_TAGS: &[&str] = &["tool_call", "function_call", "action"];

const fn param(name: &'static str, required: bool, shape: ParamShape) -> ParamSpec {
    ParamSpec {
        name,
        required,
        shape,
        aliases: &[],
    }
}

const fn param_aliased(
    name: &'static str,
    required: bool,
    shape: ParamShape,
    aliases: &'static [&'static str],
) -> ParamSpec {
    ParamSpec {
        name,
        required,
        shape,
        aliases,
    }
}

// ---------------------------------------------------------------------------
// The registry table
// ---------------------------------------------------------------------------

static TOOLS: &[ToolSpec] = &[
    // Context (read-only)
    ToolSpec { name: "get_active_script", kind: ToolKind::Context, params: &[] },
    ToolSpec { name: "list_selection", kind: ToolKind::Context, params: &[] },
    ToolSpec {
        name: "list_open_documents",
        kind: ToolKind::Context,
        params: &[param("maxCount", false, ParamShape::Integer { min: 1, max: 200 })],
    },
    ToolSpec {
        name: "list_children",
        kind: ToolKind::Context,
        params: &[
            param_aliased("parentPath", true, ParamShape::Text, &["parent", "path"]),
            param("depth", false, ParamShape::Integer { min: 1, max: 8 }),
            param("maxNodes", false, ParamShape::Integer { min: 1, max: 500 }),
            param("classWhitelist", false, ParamShape::StringArray { max: 32 }),
        ],
    },
    ToolSpec {
        name: "get_properties",
        kind: ToolKind::Context,
        params: &[
            param("path", true, ParamShape::Text),
            param("keys", false, ParamShape::StringArray { max: 64 }),
            param("includeAllAttributes", false, ParamShape::Flag),
            param("maxBytes", false, ParamShape::Integer { min: 256, max: 65536 }),
        ],
    },
    ToolSpec {
        name: "list_code_definition_names",
        kind: ToolKind::Context,
        params: &[
            param("root", false, ParamShape::Text),
            param("limit", false, ParamShape::Integer { min: 1, max: 500 }),
            param("exts", false, ParamShape::StringArray { max: 16 }),
        ],
    },
    ToolSpec {
        name: "search_files",
        kind: ToolKind::Context,
        params: &[
            param("query", true, ParamShape::Text),
            param("root", false, ParamShape::Text),
            param("limit", false, ParamShape::Integer { min: 1, max: 200 }),
            param("exts", false, ParamShape::StringArray { max: 16 }),
            param("caseSensitive", false, ParamShape::Flag),
        ],
    },
    // Planning
    ToolSpec {
        name: "start_plan",
        kind: ToolKind::Planning,
        params: &[param("steps", true, ParamShape::StringArray { max: 32 })],
    },
    ToolSpec {
        name: "update_plan",
        kind: ToolKind::Planning,
        params: &[
            param("completedStep", false, ParamShape::Text),
            param("nextStep", false, ParamShape::Text),
            param("notes", false, ParamShape::Text),
        ],
    },
    // Free-form `<plan>` carry-forward.
    ToolSpec {
        name: "plan",
        kind: ToolKind::Planning,
        params: &[param("text", false, ParamShape::Text)],
    },
    // Scripting
    ToolSpec {
        name: "open_or_create_script",
        kind: ToolKind::Script,
        params: &[
            param("path", false, ParamShape::Text),
            param_aliased("parentPath", false, ParamShape::Text, &["parent"]),
            param("name", false, ParamShape::Text),
        ],
    },
    ToolSpec {
        name: "show_diff",
        kind: ToolKind::Script,
        params: &[
            param("path", false, ParamShape::Text),
            param("edits", true, ParamShape::Edits),
        ],
    },
    ToolSpec {
        name: "apply_edit",
        kind: ToolKind::Script,
        params: &[
            param("path", false, ParamShape::Text),
            param("edits", true, ParamShape::Edits),
        ],
    },
    // Instance ops
    ToolSpec {
        name: "create_instance",
        kind: ToolKind::Instance,
        params: &[
            param("className", true, ParamShape::Text),
            param_aliased("parentPath", true, ParamShape::Text, &["parent"]),
            param("props", false, ParamShape::Object),
        ],
    },
    ToolSpec {
        name: "set_properties",
        kind: ToolKind::Instance,
        params: &[
            param("path", false, ParamShape::Text),
            param("props", true, ParamShape::Object),
        ],
    },
    ToolSpec {
        name: "rename_instance",
        kind: ToolKind::Instance,
        params: &[
            param("path", false, ParamShape::Text),
            param("newName", true, ParamShape::Text),
        ],
    },
    ToolSpec {
        name: "delete_instance",
        kind: ToolKind::Instance,
        params: &[param("path", false, ParamShape::Text)],
    },
    // Assets
    ToolSpec {
        name: "search_assets",
        kind: ToolKind::Asset,
        params: &[
            param_aliased("query", true, ParamShape::Text, &["q"]),
            param("tags", false, ParamShape::StringArray { max: crate::proposals::MAX_ASSET_TAGS }),
            param("limit", false, ParamShape::Integer { min: 1, max: 50 }),
        ],
    },
    ToolSpec {
        name: "insert_asset",
        kind: ToolKind::Asset,
        params: &[
            param("assetId", true, ParamShape::Integer { min: 0, max: i64::MAX }),
            param_aliased("parentPath", false, ParamShape::Text, &["parent"]),
        ],
    },
    ToolSpec {
        name: "generate_asset_3d",
        kind: ToolKind::Asset,
        params: &[
            param("prompt", true, ParamShape::Text),
            param("tags", false, ParamShape::StringArray { max: crate::proposals::MAX_ASSET_TAGS }),
            param("style", false, ParamShape::Text),
            param("budget", false, ParamShape::Integer { min: 0, max: 1_000_000 }),
        ],
    },
    // Messaging / completion
    ToolSpec {
        name: "message",
        kind: ToolKind::Message,
        params: &[
            param("text", true, ParamShape::Text),
            param("phase", false, ParamShape::Text),
        ],
    },
    ToolSpec {
        name: "final_message",
        kind: ToolKind::Completion,
        params: &[
            param("text", true, ParamShape::Text),
            param("confidence", false, ParamShape::Number { min: 0.0, max: 1.0 }),
        ],
    },
    ToolSpec {
        name: "complete",
        kind: ToolKind::Completion,
        params: &[
            param("summary", true, ParamShape::Text),
            param("confidence", false, ParamShape::Number { min: 0.0, max: 1.0 }),
        ],
    },
    ToolSpec {
        name: "attempt_completion",
        kind: ToolKind::Completion,
        params: &[
            param("result", true, ParamShape::Text),
            param("confidence", false, ParamShape::Number { min: 0.0, max: 1.0 }),
        ],
    },
];

pub fn registry() -> &'static [ToolSpec] {
    TOOLS
}

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

pub fn is_wrapper(name: &str) -> bool {
    WRAPPER_TAGS.contains(&name)
}

/// The parameter a bare tag body maps onto (`<complete>done</complete>`).
pub fn primary_param(name: &str) -> Option<&'static str> {
    match name {
        "plan" => Some("text"),
        "message" | "final_message" => Some("text"),
        "complete" => Some("summary"),
        "attempt_completion" => Some("result"),
        "search_assets" => Some("query"),
        "generate_asset_3d" => Some("prompt"),
        _ => None,
    }
}

/// One-line tool list for the system prompt.
pub fn tool_list_for_prompt() -> String {
    let mut out = String::new();
    for tool in TOOLS {
        if tool.name == "plan" {
            continue;
        }
        let params: Vec<String> = tool
            .params
            .iter()
            .map(|p| {
                if p.required {
                    p.name.to_string()
                } else {
                    format!("{}?", p.name)
                }
            })
            .collect();
        out.push_str(&format!("- {}({})\n", tool.name, params.join(", ")));
    }
    out
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub message: String,
}

impl ValidationIssue {
    fn at(name: &str, message: impl Into<String>) -> Self {
        Self {
            path: vec![name.to_string()],
            message: message.into(),
        }
    }
}

pub fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| {
            if i.path.is_empty() {
                i.message.clone()
            } else {
                format!("{}: {}", i.path.join("."), i.message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validate and normalize tool arguments against the schema.
///
/// On success the returned object carries canonical keys (aliases folded,
/// strings parsed into their schema shapes, numbers clamped). Unknown extra
/// keys pass through untouched.
pub fn validate(spec: &ToolSpec, args: &JsonValue) -> Result<JsonValue, Vec<ValidationIssue>> {
    let mut obj = match args {
        JsonValue::Object(map) => map.clone(),
        JsonValue::Null => Map::new(),
        JsonValue::String(s) => match lenient_json_parse(s) {
            Some(JsonValue::Object(map)) => map,
            _ => {
                return Err(vec![ValidationIssue {
                    path: vec![],
                    message: "arguments must be an object".to_string(),
                }])
            }
        },
        _ => {
            return Err(vec![ValidationIssue {
                path: vec![],
                message: "arguments must be an object".to_string(),
            }])
        }
    };

    let mut issues = Vec::new();

    for p in spec.params {
        // Fold aliases onto the canonical key.
        if !obj.contains_key(p.name) {
            for alias in p.aliases {
                if let Some(v) = obj.remove(*alias) {
                    obj.insert(p.name.to_string(), v);
                    break;
                }
            }
        }

        match obj.get(p.name).cloned() {
            None | Some(JsonValue::Null) => {
                obj.remove(p.name);
                if p.required {
                    issues.push(ValidationIssue::at(p.name, "required argument is missing"));
                }
            }
            Some(value) => match coerce(p.shape, &value) {
                Ok(coerced) => {
                    obj.insert(p.name.to_string(), coerced);
                }
                Err(msg) => issues.push(ValidationIssue::at(p.name, msg)),
            },
        }
    }

    cross_field_checks(spec, &mut obj, &mut issues);

    if issues.is_empty() {
        Ok(JsonValue::Object(obj))
    } else {
        Err(issues)
    }
}

fn cross_field_checks(spec: &ToolSpec, obj: &mut Map<String, JsonValue>, issues: &mut Vec<ValidationIssue>) {
    match spec.name {
        "open_or_create_script" => {
            let has_path = obj.get("path").and_then(|v| v.as_str()).map(|s| !s.is_empty()) == Some(true);
            let has_pair = obj.get("parentPath").is_some() && obj.get("name").is_some();
            if !has_path && !has_pair {
                issues.push(ValidationIssue::at(
                    "path",
                    "either path or parentPath+name is required",
                ));
            }
        }
        "message" => {
            // Unknown phases fold to "update" rather than erroring.
            let phase = obj
                .get("phase")
                .and_then(|v| v.as_str())
                .unwrap_or("update");
            let normalized = match phase {
                "start" | "update" | "final" => phase.to_string(),
                _ => "update".to_string(),
            };
            obj.insert("phase".to_string(), JsonValue::String(normalized));
        }
        _ => {}
    }
}

fn coerce(shape: ParamShape, value: &JsonValue) -> Result<JsonValue, String> {
    match shape {
        ParamShape::Text => match value {
            JsonValue::String(s) => Ok(JsonValue::String(s.clone())),
            JsonValue::Number(n) => Ok(JsonValue::String(n.to_string())),
            JsonValue::Bool(b) => Ok(JsonValue::String(b.to_string())),
            _ => Err("expected a string".to_string()),
        },
        ParamShape::Number { min, max } => {
            let n = match value {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match n {
                Some(n) => Ok(JsonValue::from(n.clamp(min, max))),
                None => Err("expected a number".to_string()),
            }
        }
        ParamShape::Integer { min, max } => {
            let n = match value {
                JsonValue::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64)),
                JsonValue::String(s) => {
                    let t = s.trim();
                    t.parse::<i64>()
                        .ok()
                        .or_else(|| t.parse::<f64>().ok().map(|f| f as i64))
                }
                _ => None,
            };
            match n {
                Some(n) => Ok(JsonValue::from(n.clamp(min, max))),
                None => Err("expected an integer".to_string()),
            }
        }
        ParamShape::Flag => match value {
            JsonValue::Bool(b) => Ok(JsonValue::Bool(*b)),
            JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(JsonValue::Bool(true)),
                "false" | "0" | "no" => Ok(JsonValue::Bool(false)),
                _ => Err("expected a boolean".to_string()),
            },
            _ => Err("expected a boolean".to_string()),
        },
        ParamShape::StringArray { max } => {
            let items = flexible_string_array(value)?;
            let deduped = dedup_trim_cap(items, max);
            Ok(JsonValue::Array(
                deduped.into_iter().map(JsonValue::String).collect(),
            ))
        }
        ParamShape::Object => match value {
            JsonValue::Object(map) => Ok(JsonValue::Object(map.clone())),
            JsonValue::String(s) => match lenient_json_parse(s) {
                Some(JsonValue::Object(map)) => Ok(JsonValue::Object(map)),
                _ => Err("expected a JSON object".to_string()),
            },
            _ => Err("expected a JSON object".to_string()),
        },
        ParamShape::Edits => match value {
            JsonValue::Array(items) => Ok(JsonValue::Array(items.clone())),
            JsonValue::String(s) => match lenient_json_parse(s) {
                Some(JsonValue::Array(items)) => Ok(JsonValue::Array(items)),
                _ => Err("expected an array of range edits".to_string()),
            },
            _ => Err("expected an array of range edits".to_string()),
        },
    }
}

/// Flexible string-array coercion. Accepts a genuine list, a JSON-encoded
/// string (single quotes tolerated), or a comma/whitespace-delimited plain
/// string.
pub fn flexible_string_array(value: &JsonValue) -> Result<Vec<String>, String> {
    match value {
        JsonValue::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    JsonValue::String(s) => out.push(s.clone()),
                    JsonValue::Number(n) => out.push(n.to_string()),
                    JsonValue::Bool(b) => out.push(b.to_string()),
                    other => return Err(format!("unsupported array element: {other}")),
                }
            }
            Ok(out)
        }
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }
            if trimmed.starts_with('[') {
                if let Some(parsed) = lenient_json_parse(trimmed) {
                    if parsed.is_array() {
                        return flexible_string_array(&parsed);
                    }
                }
            }
            let parts: Vec<String> = if trimmed.contains(',') {
                trimmed.split(',').map(|p| p.trim().to_string()).collect()
            } else {
                trimmed.split_whitespace().map(str::to_string).collect()
            };
            Ok(parts)
        }
        _ => Err("expected a string array".to_string()),
    }
}

fn dedup_trim_cap(items: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
        if out.len() >= max {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_tool_name_is_unique() {
        let mut names: Vec<&str> = registry().iter().map(|t| t.name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn alias_folding() {
        let spec = find("create_instance").unwrap();
        let args = json!({ "className": "Part", "parent": "game.Workspace" });
        let out = validate(spec, &args).unwrap();
        assert_eq!(out["parentPath"], "game.Workspace");
        assert!(out.get("parent").is_none());
    }

    #[test]
    fn list_children_accepts_path_alias() {
        let spec = find("list_children").unwrap();
        let out = validate(spec, &json!({ "path": "Workspace" })).unwrap();
        assert_eq!(out["parentPath"], "Workspace");
    }

    #[test]
    fn search_assets_accepts_q_alias() {
        let spec = find("search_assets").unwrap();
        let out = validate(spec, &json!({ "q": "tree" })).unwrap();
        assert_eq!(out["query"], "tree");
    }

    #[test]
    fn missing_required_is_an_issue() {
        let spec = find("create_instance").unwrap();
        let err = validate(spec, &json!({ "className": "Part" })).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].path, vec!["parentPath".to_string()]);
        assert!(render_issues(&err).contains("parentPath"));
    }

    #[test]
    fn object_accepts_json_string() {
        let spec = find("create_instance").unwrap();
        let args = json!({
            "className": "Part",
            "parentPath": "game.Workspace",
            "props": "{\"Name\":\"Floor\"}"
        });
        let out = validate(spec, &args).unwrap();
        assert_eq!(out["props"]["Name"], "Floor");
    }

    #[test]
    fn arguments_accept_json_string_wrapper() {
        let spec = find("search_assets").unwrap();
        let out = validate(spec, &json!("{\"query\": \"tree\"}")).unwrap();
        assert_eq!(out["query"], "tree");
    }

    #[test]
    fn numeric_strings_parse_and_clamp() {
        let spec = find("search_assets").unwrap();
        let out = validate(spec, &json!({ "query": "x", "limit": "120" })).unwrap();
        assert_eq!(out["limit"], 50);

        let out = validate(spec, &json!({ "query": "x", "limit": 0 })).unwrap();
        assert_eq!(out["limit"], 1);
    }

    #[test]
    fn confidence_clamps_to_unit_interval() {
        let spec = find("complete").unwrap();
        let out = validate(spec, &json!({ "summary": "done", "confidence": 1.7 })).unwrap();
        assert_eq!(out["confidence"], 1.0);
    }

    #[test]
    fn flexible_arrays_three_shapes() {
        let expect = vec!["nature".to_string(), "plant".to_string()];
        for input in [
            json!(["nature", "plant"]),
            json!("[\"nature\",\"plant\"]"),
            json!("['nature','plant']"),
            json!("nature, plant"),
            json!("nature plant"),
        ] {
            assert_eq!(flexible_string_array(&input).unwrap(), expect, "input: {input}");
        }
    }

    #[test]
    fn string_array_dedups_and_caps() {
        let spec = find("search_assets").unwrap();
        let out = validate(
            spec,
            &json!({ "query": "x", "tags": " a, b ,a, c " }),
        )
        .unwrap();
        assert_eq!(out["tags"], json!(["a", "b", "c"]));

        let many: Vec<String> = (0..30).map(|i| format!("t{i}")).collect();
        let out = validate(spec, &json!({ "query": "x", "tags": many })).unwrap();
        assert_eq!(out["tags"].as_array().unwrap().len(), crate::proposals::MAX_ASSET_TAGS);
    }

    #[test]
    fn edits_accept_string_form() {
        let spec = find("show_diff").unwrap();
        let args = json!({
            "path": "Script",
            "edits": "[{\"start\":{\"line\":0,\"character\":0},\"end\":{\"line\":0,\"character\":0},\"text\":\"x\"}]"
        });
        let out = validate(spec, &args).unwrap();
        assert!(out["edits"].is_array());
    }

    #[test]
    fn open_or_create_script_cross_field() {
        let spec = find("open_or_create_script").unwrap();
        assert!(validate(spec, &json!({})).is_err());
        assert!(validate(spec, &json!({ "path": "Script" })).is_ok());
        assert!(validate(spec, &json!({ "parentPath": "game.Workspace", "name": "Main" })).is_ok());
    }

    #[test]
    fn message_phase_normalizes() {
        let spec = find("message").unwrap();
        let out = validate(spec, &json!({ "text": "hi", "phase": "bogus" })).unwrap();
        assert_eq!(out["phase"], "update");
        let out = validate(spec, &json!({ "text": "hi" })).unwrap();
        assert_eq!(out["phase"], "update");
        let out = validate(spec, &json!({ "text": "hi", "phase": "final" })).unwrap();
        assert_eq!(out["phase"], "final");
    }

    #[test]
    fn flag_coercion() {
        let spec = find("search_files").unwrap();
        let out = validate(spec, &json!({ "query": "x", "caseSensitive": "true" })).unwrap();
        assert_eq!(out["caseSensitive"], true);
        assert!(validate(spec, &json!({ "query": "x", "caseSensitive": "maybe" })).is_err());
    }

    #[test]
    fn unknown_extra_keys_pass_through() {
        let spec = find("list_selection").unwrap();
        let out = validate(spec, &json!({ "whatever": 1 })).unwrap();
        assert_eq!(out["whatever"], 1);
    }
}
