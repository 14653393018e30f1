//! Proposal data model.
//!
//! Proposals are typed, reviewable change requests emitted by the orchestrator.
//! They are never executed here; the editor plugin previews and applies them
//! under user approval.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Maximum range edits per file in a single Edit proposal.
pub const MAX_EDITS_PER_FILE: usize = 20;
/// Maximum inserted characters per file in a single Edit proposal.
pub const MAX_INSERT_CHARS_PER_FILE: usize = 2000;
/// Maximum tags carried on an asset search.
pub const MAX_ASSET_TAGS: usize = 16;

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub body: ProposalBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalBody {
    Edit {
        files: Vec<FileEdit>,
    },
    ObjectOp {
        ops: Vec<Op>,
    },
    AssetOp {
        #[serde(skip_serializing_if = "Option::is_none")]
        search: Option<AssetSearch>,
        #[serde(skip_serializing_if = "Option::is_none")]
        insert: Option<AssetInsert>,
        #[serde(skip_serializing_if = "Option::is_none")]
        generate3d: Option<AssetGenerate3d>,
    },
    Completion {
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
}

impl Proposal {
    pub fn new(body: ProposalBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notes: None,
            body,
        }
    }

    pub fn with_notes(body: ProposalBody, notes: impl Into<String>) -> Self {
        let mut p = Self::new(body);
        p.notes = Some(notes.into());
        p
    }

    pub fn is_completion(&self) -> bool {
        matches!(self.body, ProposalBody::Completion { .. })
    }

    pub fn is_edit(&self) -> bool {
        matches!(self.body, ProposalBody::Edit { .. })
    }
}

// ---------------------------------------------------------------------------
// Edit proposals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub diff: RangeDiff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<DiffPreview>,
    pub safety: EditSafety,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeDiff {
    /// Always "rangeEDITS"; kept explicit for the wire format.
    pub mode: String,
    pub edits: Vec<RangeEdit>,
}

impl RangeDiff {
    pub fn new(edits: Vec<RangeEdit>) -> Self {
        Self {
            mode: "rangeEDITS".to_string(),
            edits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPreview {
    pub unified: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSafety {
    pub before_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_text: Option<String>,
}

/// A single range replacement with zero-based positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEdit {
    pub start: Position,
    pub end: Position,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

// ---------------------------------------------------------------------------
// Object operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    #[serde(rename_all = "camelCase")]
    CreateInstance {
        class_name: String,
        parent_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        props: Option<Map<String, JsonValue>>,
    },
    SetProperties {
        path: String,
        props: Map<String, JsonValue>,
    },
    #[serde(rename_all = "camelCase")]
    RenameInstance {
        path: String,
        new_name: String,
    },
    DeleteInstance {
        path: String,
    },
}

// ---------------------------------------------------------------------------
// Asset operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSearch {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInsert {
    pub asset_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetGenerate3d {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
}

// ---------------------------------------------------------------------------
// Structured property values
// ---------------------------------------------------------------------------

/// Wrapper tags recognized inside `props` values (`{"__t": "...", ...}`).
pub const STRUCTURED_TAGS: &[&str] = &[
    "Vector3",
    "Vector2",
    "Color3",
    "UDim",
    "UDim2",
    "CFrame",
    "EnumItem",
    "BrickColor",
    "Instance",
];

/// If `value` is a recognized structured wrapper, return its tag.
pub fn structured_tag(value: &JsonValue) -> Option<&str> {
    let tag = value.as_object()?.get("__t")?.as_str()?;
    STRUCTURED_TAGS.contains(&tag).then_some(tag)
}

/// Shape-check a structured wrapper. Plain values pass through as `Ok`.
pub fn validate_prop_value(value: &JsonValue) -> Result<(), String> {
    let Some(obj) = value.as_object() else {
        return Ok(());
    };
    let Some(tag) = obj.get("__t").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if !STRUCTURED_TAGS.contains(&tag) {
        return Ok(());
    }
    let need_numbers = |keys: &[&str]| -> Result<(), String> {
        for k in keys {
            if !obj.get(*k).map(|v| v.is_number()).unwrap_or(false) {
                return Err(format!("{tag} requires numeric '{k}'"));
            }
        }
        Ok(())
    };
    match tag {
        "Vector3" => need_numbers(&["x", "y", "z"]),
        "Vector2" => need_numbers(&["x", "y"]),
        "Color3" => need_numbers(&["r", "g", "b"]),
        "UDim" => need_numbers(&["scale", "offset"]),
        "UDim2" => {
            for k in ["x", "y"] {
                let inner = obj
                    .get(k)
                    .ok_or_else(|| format!("UDim2 requires '{k}'"))?;
                if structured_tag(inner) != Some("UDim") {
                    return Err(format!("UDim2 '{k}' must be a UDim wrapper"));
                }
                validate_prop_value(inner)?;
            }
            Ok(())
        }
        "CFrame" => {
            let comps = obj
                .get("comps")
                .and_then(|v| v.as_array())
                .ok_or_else(|| "CFrame requires 'comps'".to_string())?;
            if comps.len() != 12 || !comps.iter().all(|v| v.is_number()) {
                return Err("CFrame 'comps' must be 12 numbers".to_string());
            }
            Ok(())
        }
        "EnumItem" => {
            for k in ["enum", "name"] {
                if !obj.get(k).map(|v| v.is_string()).unwrap_or(false) {
                    return Err(format!("EnumItem requires string '{k}'"));
                }
            }
            Ok(())
        }
        "BrickColor" => obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|_| ())
            .ok_or_else(|| "BrickColor requires string 'name'".to_string()),
        "Instance" => obj
            .get("path")
            .and_then(|v| v.as_str())
            .map(|_| ())
            .ok_or_else(|| "Instance requires string 'path'".to_string()),
        _ => Ok(()),
    }
}

pub fn vector3(x: f64, y: f64, z: f64) -> JsonValue {
    serde_json::json!({ "__t": "Vector3", "x": x, "y": y, "z": z })
}

/// Identity-rotation CFrame positioned at `(x, y, z)`.
pub fn cframe_at(x: f64, y: f64, z: f64) -> JsonValue {
    serde_json::json!({
        "__t": "CFrame",
        "comps": [x, y, z, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    })
}

pub fn brick_color(name: &str) -> JsonValue {
    serde_json::json!({ "__t": "BrickColor", "name": name })
}

// ---------------------------------------------------------------------------
// Edit invariants
// ---------------------------------------------------------------------------

/// Enforce the per-file edit invariants: sorted by (line, character),
/// strictly non-overlapping, bounded count and inserted length.
pub fn validate_file_edits(edits: &[RangeEdit]) -> Result<(), String> {
    if edits.len() > MAX_EDITS_PER_FILE {
        return Err(format!(
            "too many edits ({} > {})",
            edits.len(),
            MAX_EDITS_PER_FILE
        ));
    }
    let inserted: usize = edits.iter().map(|e| e.text.chars().count()).sum();
    if inserted > MAX_INSERT_CHARS_PER_FILE {
        return Err(format!(
            "too many inserted characters ({} > {})",
            inserted, MAX_INSERT_CHARS_PER_FILE
        ));
    }
    for e in edits {
        if (e.start.line, e.start.character) > (e.end.line, e.end.character) {
            return Err(format!(
                "edit start {}:{} is after end {}:{}",
                e.start.line, e.start.character, e.end.line, e.end.character
            ));
        }
    }
    for pair in edits.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if (b.start.line, b.start.character) < (a.start.line, a.start.character) {
            return Err("edits are not sorted by position".to_string());
        }
        if (b.start.line, b.start.character) < (a.end.line, a.end.character) {
            return Err(format!(
                "overlapping edits at {}:{}",
                b.start.line, b.start.character
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(sl: usize, sc: usize, el: usize, ec: usize, text: &str) -> RangeEdit {
        RangeEdit {
            start: Position::new(sl, sc),
            end: Position::new(el, ec),
            text: text.to_string(),
        }
    }

    #[test]
    fn proposal_serializes_with_discriminator() {
        let p = Proposal::new(ProposalBody::Completion {
            summary: "done".to_string(),
            confidence: Some(0.9),
        });
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "completion");
        assert_eq!(json["summary"], "done");
        assert!(json["id"].as_str().is_some());
    }

    #[test]
    fn op_serializes_camel_case() {
        let op = Op::CreateInstance {
            class_name: "Part".to_string(),
            parent_path: "game.Workspace".to_string(),
            props: None,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "create_instance");
        assert_eq!(json["className"], "Part");
        assert_eq!(json["parentPath"], "game.Workspace");
    }

    #[test]
    fn safety_uses_camel_case_keys() {
        let s = EditSafety {
            before_hash: "abc".to_string(),
            base_text: Some("x".to_string()),
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["beforeHash"], "abc");
        assert_eq!(json["baseText"], "x");
    }

    #[test]
    fn structured_wrappers_validate() {
        assert!(validate_prop_value(&vector3(1.0, 2.0, 3.0)).is_ok());
        assert!(validate_prop_value(&cframe_at(0.0, 0.5, 0.0)).is_ok());
        assert!(validate_prop_value(&brick_color("Bright red")).is_ok());
        assert!(validate_prop_value(&serde_json::json!(42)).is_ok());

        let bad = serde_json::json!({ "__t": "Vector3", "x": 1, "y": "no" });
        assert!(validate_prop_value(&bad).is_err());
        let bad_cf = serde_json::json!({ "__t": "CFrame", "comps": [1, 2, 3] });
        assert!(validate_prop_value(&bad_cf).is_err());
    }

    #[test]
    fn unknown_wrapper_tag_is_plain_value() {
        let v = serde_json::json!({ "__t": "Quaternion", "w": 1 });
        assert_eq!(structured_tag(&v), None);
        assert!(validate_prop_value(&v).is_ok());
    }

    #[test]
    fn edit_caps_enforced() {
        let many: Vec<RangeEdit> = (0..21).map(|i| edit(i, 0, i, 0, "x")).collect();
        assert!(validate_file_edits(&many).unwrap_err().contains("too many edits"));

        let big = vec![edit(0, 0, 0, 0, &"y".repeat(2001))];
        assert!(validate_file_edits(&big)
            .unwrap_err()
            .contains("inserted characters"));
    }

    #[test]
    fn overlap_and_order_rejected() {
        let overlapping = vec![edit(0, 0, 0, 5, "a"), edit(0, 3, 0, 8, "b")];
        assert!(validate_file_edits(&overlapping).is_err());

        let unsorted = vec![edit(2, 0, 2, 1, "a"), edit(0, 0, 0, 1, "b")];
        assert!(validate_file_edits(&unsorted).is_err());

        let touching = vec![edit(0, 0, 0, 3, "a"), edit(0, 3, 0, 6, "b")];
        assert!(validate_file_edits(&touching).is_ok());
    }

    #[test]
    fn inverted_range_rejected() {
        let bad = vec![edit(1, 4, 1, 2, "a")];
        assert!(validate_file_edits(&bad).is_err());
    }
}
