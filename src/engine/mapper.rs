//! Proposal mapping: a validated tool invocation becomes zero or more typed
//! proposals. Includes missing-parent auto-repair under `game.Workspace`,
//! edit previews with safety fingerprints, and the completion gate.

use super::diff;
use super::registry::ValidationIssue;
use super::types::{ChatInput, TaskState};
use crate::proposals::{
    validate_prop_value, AssetGenerate3d, AssetInsert, AssetSearch, DiffPreview, EditSafety,
    FileEdit, Op, Proposal, ProposalBody, RangeDiff,
};
use crate::scene::{canonical_path, path_leaf, path_parent, SceneNode};
use serde_json::{Map, Value as JsonValue};

/// Most ancestors the parent repair may synthesize in one call.
const MAX_REPAIR_ANCESTORS: usize = 8;
/// Default asset search page size.
const DEFAULT_SEARCH_LIMIT: u32 = 6;

#[derive(Debug)]
pub enum MapError {
    Validation(Vec<ValidationIssue>),
    Policy(String),
}

impl MapError {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationIssue {
            path: vec![path.to_string()],
            message: message.into(),
        }])
    }
}

/// Map a validated invocation to proposals. `args` has already passed the
/// registry, so shapes are canonical; this layer owns the semantic rules.
pub fn map_invocation(
    name: &str,
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
    catalog_enabled: bool,
) -> Result<Vec<Proposal>, MapError> {
    match name {
        "show_diff" | "apply_edit" => map_edit(args, input, state),
        "open_or_create_script" => map_open_script(args, input, state),
        "create_instance" => map_create_instance(args, state),
        "set_properties" => map_set_properties(args, input, state),
        "rename_instance" => map_rename_instance(args, input, state),
        "delete_instance" => map_delete_instance(args, input, state),
        "search_assets" => map_search_assets(args, input, catalog_enabled),
        "insert_asset" => map_insert_asset(args),
        "generate_asset_3d" => map_generate_3d(args),
        "complete" | "attempt_completion" | "final_message" => {
            map_completion(name, args, input, state)
        }
        other => Err(MapError::at("tool", format!("'{other}' does not map to proposals"))),
    }
}

// ---------------------------------------------------------------------------
// Script edits
// ---------------------------------------------------------------------------

fn map_edit(
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<Vec<Proposal>, MapError> {
    let path = arg_str(args, "path")
        .or_else(|| input.context.active_script.as_ref().map(|s| s.path.clone()))
        .ok_or_else(|| MapError::at("path", "no path given and no active script"))?;

    let edits_value = args
        .get("edits")
        .ok_or_else(|| MapError::at("edits", "required argument is missing"))?;
    let mut edits = diff::parse_edits(edits_value).map_err(|e| MapError::at("edits", e))?;
    edits.sort_by_key(|e| (e.start.line, e.start.character));

    let base_text = input
        .context
        .active_script
        .as_ref()
        .filter(|s| s.path == path)
        .map(|s| s.text.clone())
        .unwrap_or_default();

    let after = diff::apply_range_edits(&base_text, &edits).map_err(|e| MapError::at("edits", e))?;
    let preview = diff::unified_preview(&base_text, &after, &path);

    if !edits.is_empty() {
        state.script_edit_seen = true;
    }

    Ok(vec![Proposal::new(ProposalBody::Edit {
        files: vec![FileEdit {
            path,
            diff: RangeDiff::new(edits),
            preview: Some(DiffPreview { unified: preview }),
            safety: EditSafety {
                before_hash: diff::sha1_hex(&base_text),
                base_text: Some(base_text),
            },
        }],
    })])
}

fn map_open_script(
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<Vec<Proposal>, MapError> {
    if let Some(path) = arg_str(args, "path").filter(|p| !p.is_empty()) {
        // Opening an existing (or new) script document: an Edit proposal with
        // no edits, carrying the safety hash of the known base.
        let base_text = input
            .context
            .active_script
            .as_ref()
            .filter(|s| s.path == path)
            .map(|s| s.text.clone())
            .unwrap_or_default();
        return Ok(vec![Proposal::with_notes(
            ProposalBody::Edit {
                files: vec![FileEdit {
                    path,
                    diff: RangeDiff::new(Vec::new()),
                    preview: None,
                    safety: EditSafety {
                        before_hash: diff::sha1_hex(&base_text),
                        base_text: Some(base_text),
                    },
                }],
            },
            "open_or_create",
        )]);
    }

    // parentPath + name: a new Script instance in the scene.
    let parent = arg_str(args, "parentPath")
        .ok_or_else(|| MapError::at("path", "either path or parentPath+name is required"))?;
    let name = arg_str(args, "name")
        .ok_or_else(|| MapError::at("name", "required with parentPath"))?;
    let parent = canonical_path(&parent);
    let mut props = Map::new();
    props.insert("Name".to_string(), JsonValue::String(name.clone()));
    props.insert("Source".to_string(), JsonValue::String(String::new()));
    let op = Op::CreateInstance {
        class_name: "Script".to_string(),
        parent_path: parent.clone(),
        props: Some(props),
    };
    record_created(state, &parent, "Script", &name);
    state.object_op_count += 1;
    Ok(vec![Proposal::new(ProposalBody::ObjectOp { ops: vec![op] })])
}

// ---------------------------------------------------------------------------
// Instance operations
// ---------------------------------------------------------------------------

fn map_create_instance(args: &JsonValue, state: &mut TaskState) -> Result<Vec<Proposal>, MapError> {
    let class_name = arg_str(args, "className")
        .ok_or_else(|| MapError::at("className", "required argument is missing"))?;
    let parent = canonical_path(
        &arg_str(args, "parentPath")
            .ok_or_else(|| MapError::at("parentPath", "required argument is missing"))?,
    );
    let props = validated_props(args.get("props"))?;

    let mut ops = Vec::new();

    // Missing-parent auto-repair, scoped to Workspace: synthesize Model
    // creations for each absent ancestor, top-down, before the requested op.
    if let Some(missing) = state.scene.missing_workspace_ancestors(&parent) {
        if missing.len() > MAX_REPAIR_ANCESTORS {
            return Err(MapError::at(
                "parentPath",
                format!(
                    "{} missing ancestors under Workspace (max {})",
                    missing.len(),
                    MAX_REPAIR_ANCESTORS
                ),
            ));
        }
        for ancestor in &missing {
            let leaf = path_leaf(ancestor).to_string();
            let ancestor_parent = path_parent(ancestor).unwrap_or("game.Workspace").to_string();
            let mut repair_props = Map::new();
            repair_props.insert("Name".to_string(), JsonValue::String(leaf.clone()));
            ops.push(Op::CreateInstance {
                class_name: "Model".to_string(),
                parent_path: ancestor_parent.clone(),
                props: Some(repair_props),
            });
            record_created(state, &ancestor_parent, "Model", &leaf);
        }
    }

    let instance_name = props
        .as_ref()
        .and_then(|p| p.get("Name"))
        .and_then(|v| v.as_str())
        .unwrap_or(&class_name)
        .to_string();
    ops.push(Op::CreateInstance {
        class_name: class_name.clone(),
        parent_path: parent.clone(),
        props,
    });
    record_created(state, &parent, &class_name, &instance_name);

    state.object_op_count += ops.len();
    Ok(vec![Proposal::new(ProposalBody::ObjectOp { ops })])
}

fn map_set_properties(
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<Vec<Proposal>, MapError> {
    let path = resolve_instance_path(args, input)?;
    let props = validated_props(args.get("props"))?
        .ok_or_else(|| MapError::at("props", "required argument is missing"))?;
    state.object_op_count += 1;
    Ok(vec![Proposal::new(ProposalBody::ObjectOp {
        ops: vec![Op::SetProperties { path, props }],
    })])
}

fn map_rename_instance(
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<Vec<Proposal>, MapError> {
    let path = resolve_instance_path(args, input)?;
    let new_name = arg_str(args, "newName")
        .ok_or_else(|| MapError::at("newName", "required argument is missing"))?;
    state.object_op_count += 1;
    Ok(vec![Proposal::new(ProposalBody::ObjectOp {
        ops: vec![Op::RenameInstance { path, new_name }],
    })])
}

fn map_delete_instance(
    args: &JsonValue,
    input: &ChatInput,
    state: &mut TaskState,
) -> Result<Vec<Proposal>, MapError> {
    let path = resolve_instance_path(args, input)?;
    state.object_op_count += 1;
    Ok(vec![Proposal::new(ProposalBody::ObjectOp {
        ops: vec![Op::DeleteInstance { path }],
    })])
}

/// `path` from the args, else inferred from a single selection.
fn resolve_instance_path(args: &JsonValue, input: &ChatInput) -> Result<String, MapError> {
    if let Some(path) = arg_str(args, "path").filter(|p| !p.is_empty()) {
        return Ok(canonical_path(&path));
    }
    match input.context.selection.as_slice() {
        [only] => Ok(canonical_path(&only.path)),
        [] => Err(MapError::at("path", "no path given and nothing selected")),
        _ => Err(MapError::at(
            "path",
            "no path given and more than one instance selected",
        )),
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

fn map_search_assets(
    args: &JsonValue,
    input: &ChatInput,
    catalog_enabled: bool,
) -> Result<Vec<Proposal>, MapError> {
    // Query ladder: explicit argument, then any semantic string buried in
    // the args, then the user message itself.
    let query = arg_str(args, "query")
        .filter(|q| !q.trim().is_empty())
        .or_else(|| super::parser::deep_find_string(args, super::parser::SEMANTIC_KEYS))
        .unwrap_or_else(|| input.message.trim().to_string());
    if query.is_empty() {
        return Err(MapError::at("query", "empty query and empty user message"));
    }
    let tags = args.get("tags").and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect::<Vec<_>>()
    });
    let limit = args
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_SEARCH_LIMIT);

    let body = ProposalBody::AssetOp {
        search: Some(AssetSearch {
            query,
            tags: tags.filter(|t| !t.is_empty()),
            limit: Some(limit),
        }),
        insert: None,
        generate3d: None,
    };
    if catalog_enabled {
        Ok(vec![Proposal::new(body)])
    } else {
        Ok(vec![Proposal::with_notes(body, "manual_fallback")])
    }
}

fn map_insert_asset(args: &JsonValue) -> Result<Vec<Proposal>, MapError> {
    let asset_id = args
        .get("assetId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| MapError::at("assetId", "numeric assetId is required"))?;
    let parent_path = arg_str(args, "parentPath").map(|p| canonical_path(&p));
    Ok(vec![Proposal::new(ProposalBody::AssetOp {
        search: None,
        insert: Some(AssetInsert {
            asset_id,
            parent_path,
        }),
        generate3d: None,
    })])
}

fn map_generate_3d(args: &JsonValue) -> Result<Vec<Proposal>, MapError> {
    let prompt = arg_str(args, "prompt")
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| MapError::at("prompt", "non-empty prompt is required"))?;
    let tags = args.get("tags").and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect::<Vec<_>>()
    });
    Ok(vec![Proposal::new(ProposalBody::AssetOp {
        search: None,
        insert: None,
        generate3d: Some(AssetGenerate3d {
            prompt,
            tags: tags.filter(|t| !t.is_empty()),
            style: arg_str(args, "style"),
            budget: args.get("budget").and_then(|v| v.as_u64()),
        }),
    })])
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

fn map_completion(
    name: &str,
    args: &JsonValue,
    input: &ChatInput,
    state: &TaskState,
) -> Result<Vec<Proposal>, MapError> {
    // Completion gate: new geometry requires an accompanying script edit
    // unless the request opted out of the script policy.
    if state.object_op_count > 0 && !state.script_edit_seen && !input.geometry_only() {
        return Err(MapError::Policy(
            "completion blocked: instances were created but no script edit was proposed; \
             propose the wiring script first (apply_edit) or mark the request geometry_only"
                .to_string(),
        ));
    }

    let summary_key = match name {
        "attempt_completion" => "result",
        "final_message" => "text",
        _ => "summary",
    };
    let summary = arg_str(args, summary_key)
        .or_else(|| arg_str(args, "summary"))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| MapError::at(summary_key, "non-empty summary is required"))?;
    let confidence = args
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c.clamp(0.0, 1.0));

    Ok(vec![Proposal::new(ProposalBody::Completion {
        summary,
        confidence,
    })])
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arg_str(args: &JsonValue, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Validate structured wrappers inside a props object.
fn validated_props(value: Option<&JsonValue>) -> Result<Option<Map<String, JsonValue>>, MapError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(map) = value.as_object() else {
        return Err(MapError::at("props", "expected a JSON object"));
    };
    let mut issues = Vec::new();
    for (key, prop) in map {
        if let Err(msg) = validate_prop_value(prop) {
            issues.push(ValidationIssue {
                path: vec!["props".to_string(), key.clone()],
                message: msg,
            });
        }
    }
    if issues.is_empty() {
        Ok(Some(map.clone()))
    } else {
        Err(MapError::Validation(issues))
    }
}

/// Track a creation in the cached snapshot so repeated repairs are
/// idempotent within the workflow.
fn record_created(state: &mut TaskState, parent: &str, class_name: &str, name: &str) {
    let path = format!("{parent}.{name}");
    if state.scene.contains(&path) {
        return;
    }
    state.scene.insert(SceneNode {
        path,
        class_name: class_name.to_string(),
        name: name.to_string(),
        parent_path: Some(parent.to_string()),
        props: Map::new(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{ActiveScript, ChatContext, SelectedInstance};
    use serde_json::json;

    fn bare_input() -> ChatInput {
        ChatInput {
            project_id: "p".into(),
            message: "make a wall".into(),
            context: ChatContext::default(),
            mode: None,
            model_override: None,
            workflow_id: None,
            provider: None,
        }
    }

    fn state_with_workspace() -> TaskState {
        let mut state = TaskState::new("wf".into());
        state.scene.insert(SceneNode {
            path: "game.Workspace".into(),
            class_name: "Workspace".into(),
            name: "Workspace".into(),
            parent_path: None,
            props: Map::new(),
        });
        state
    }

    fn ops_of(proposal: &Proposal) -> &[Op] {
        match &proposal.body {
            ProposalBody::ObjectOp { ops } => ops,
            other => panic!("expected object op, got {other:?}"),
        }
    }

    #[test]
    fn missing_parents_are_prepended_top_down() {
        let mut state = state_with_workspace();
        let args = json!({
            "className": "Part",
            "parentPath": "game.Workspace.Base.Structures",
            "props": { "Name": "WallNorth" }
        });
        let proposals =
            map_invocation("create_instance", &args, &bare_input(), &mut state, true).unwrap();
        assert_eq!(proposals.len(), 1);
        let ops = ops_of(&proposals[0]);
        assert_eq!(ops.len(), 3);
        match &ops[0] {
            Op::CreateInstance { class_name, parent_path, props } => {
                assert_eq!(class_name, "Model");
                assert_eq!(parent_path, "game.Workspace");
                assert_eq!(props.as_ref().unwrap()["Name"], "Base");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &ops[1] {
            Op::CreateInstance { class_name, parent_path, props } => {
                assert_eq!(class_name, "Model");
                assert_eq!(parent_path, "game.Workspace.Base");
                assert_eq!(props.as_ref().unwrap()["Name"], "Structures");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &ops[2] {
            Op::CreateInstance { class_name, parent_path, props } => {
                assert_eq!(class_name, "Part");
                assert_eq!(parent_path, "game.Workspace.Base.Structures");
                assert_eq!(props.as_ref().unwrap()["Name"], "WallNorth");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.object_op_count, 3);
    }

    #[test]
    fn repair_is_idempotent_against_post_repair_snapshot() {
        let mut state = state_with_workspace();
        let args = json!({
            "className": "Part",
            "parentPath": "game.Workspace.Base.Structures",
            "props": { "Name": "WallNorth" }
        });
        map_invocation("create_instance", &args, &bare_input(), &mut state, true).unwrap();

        // Same call again: the snapshot now contains the parents.
        let args2 = json!({
            "className": "Part",
            "parentPath": "game.Workspace.Base.Structures",
            "props": { "Name": "WallSouth" }
        });
        let proposals =
            map_invocation("create_instance", &args2, &bare_input(), &mut state, true).unwrap();
        assert_eq!(ops_of(&proposals[0]).len(), 1);
    }

    #[test]
    fn repair_depth_is_capped() {
        let mut state = state_with_workspace();
        let deep = format!(
            "game.Workspace.{}",
            (0..10).map(|i| format!("L{i}")).collect::<Vec<_>>().join(".")
        );
        let args = json!({ "className": "Part", "parentPath": deep });
        match map_invocation("create_instance", &args, &bare_input(), &mut state, true) {
            Err(MapError::Validation(issues)) => {
                assert_eq!(issues[0].path, vec!["parentPath".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn repair_only_under_workspace() {
        let mut state = state_with_workspace();
        let args = json!({ "className": "PointLight", "parentPath": "game.Lighting.Rig" });
        let proposals =
            map_invocation("create_instance", &args, &bare_input(), &mut state, true).unwrap();
        assert_eq!(ops_of(&proposals[0]).len(), 1);
    }

    #[test]
    fn set_properties_infers_single_selection() {
        let mut input = bare_input();
        input.context.selection = vec![SelectedInstance {
            class_name: "Part".into(),
            path: "game.Workspace.Door".into(),
        }];
        let mut state = state_with_workspace();
        let args = json!({ "props": { "Anchored": true } });
        let proposals =
            map_invocation("set_properties", &args, &input, &mut state, true).unwrap();
        match &ops_of(&proposals[0])[0] {
            Op::SetProperties { path, .. } => assert_eq!(path, "game.Workspace.Door"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn set_properties_fails_without_selection() {
        let mut state = state_with_workspace();
        let args = json!({ "props": { "Anchored": true } });
        assert!(matches!(
            map_invocation("set_properties", &args, &bare_input(), &mut state, true),
            Err(MapError::Validation(_))
        ));
    }

    #[test]
    fn bad_structured_prop_is_a_validation_issue() {
        let mut state = state_with_workspace();
        let args = json!({
            "className": "Part",
            "parentPath": "game.Workspace",
            "props": { "Size": { "__t": "Vector3", "x": 1 } }
        });
        match map_invocation("create_instance", &args, &bare_input(), &mut state, true) {
            Err(MapError::Validation(issues)) => {
                assert_eq!(issues[0].path, vec!["props".to_string(), "Size".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn edit_round_trip_with_safety() {
        let mut input = bare_input();
        input.context.active_script = Some(ActiveScript {
            path: "Script".into(),
            text: "print('hi')\n".into(),
        });
        let mut state = TaskState::new("wf".into());
        let args = json!({
            "path": "Script",
            "edits": [
                { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 0 }, "text": "-- note\n" }
            ]
        });
        let proposals = map_invocation("show_diff", &args, &input, &mut state, true).unwrap();
        match &proposals[0].body {
            ProposalBody::Edit { files } => {
                let file = &files[0];
                assert_eq!(file.safety.before_hash, diff::sha1_hex("print('hi')\n"));
                assert_eq!(file.safety.base_text.as_deref(), Some("print('hi')\n"));
                assert!(file.preview.as_ref().unwrap().unified.contains("+-- note"));
                let applied =
                    diff::apply_range_edits("print('hi')\n", &file.diff.edits).unwrap();
                assert_eq!(applied, "-- note\nprint('hi')\n");
            }
            other => panic!("expected edit, got {other:?}"),
        }
        assert!(state.script_edit_seen);
    }

    #[test]
    fn edit_path_falls_back_to_active_script() {
        let mut input = bare_input();
        input.context.active_script = Some(ActiveScript {
            path: "Main".into(),
            text: String::new(),
        });
        let mut state = TaskState::new("wf".into());
        let args = json!({ "edits": [] });
        let proposals = map_invocation("apply_edit", &args, &input, &mut state, true).unwrap();
        match &proposals[0].body {
            ProposalBody::Edit { files } => assert_eq!(files[0].path, "Main"),
            other => panic!("expected edit, got {other:?}"),
        }
        // An empty edit set opens the file but writes nothing.
        assert!(!state.script_edit_seen);
    }

    #[test]
    fn completion_gate_blocks_geometry_without_script() {
        let mut state = state_with_workspace();
        let create = json!({ "className": "Part", "parentPath": "game.Workspace" });
        map_invocation("create_instance", &create, &bare_input(), &mut state, true).unwrap();

        let done = json!({ "summary": "done" });
        match map_invocation("complete", &done, &bare_input(), &mut state, true) {
            Err(MapError::Policy(msg)) => assert!(msg.contains("script")),
            other => panic!("expected policy error, got {other:?}"),
        }
    }

    #[test]
    fn completion_gate_opens_after_edit_or_opt_out() {
        let mut state = state_with_workspace();
        let create = json!({ "className": "Part", "parentPath": "game.Workspace" });
        map_invocation("create_instance", &create, &bare_input(), &mut state, true).unwrap();
        state.script_edit_seen = true;
        let done = json!({ "summary": "done", "confidence": 0.8 });
        let proposals =
            map_invocation("complete", &done, &bare_input(), &mut state, true).unwrap();
        assert!(proposals[0].is_completion());

        // Opt-out path.
        let mut state2 = state_with_workspace();
        map_invocation("create_instance", &create, &bare_input(), &mut state2, true).unwrap();
        let mut input = bare_input();
        input.mode = Some("geometry_only".into());
        let proposals = map_invocation("complete", &done, &input, &mut state2, true).unwrap();
        assert!(proposals[0].is_completion());
    }

    #[test]
    fn attempt_completion_uses_result_field() {
        let mut state = TaskState::new("wf".into());
        let args = json!({ "result": "all wired up" });
        let proposals =
            map_invocation("attempt_completion", &args, &bare_input(), &mut state, true).unwrap();
        match &proposals[0].body {
            ProposalBody::Completion { summary, .. } => assert_eq!(summary, "all wired up"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn search_assets_defaults_and_fallback_query() {
        let mut state = TaskState::new("wf".into());
        let args = json!({ "query": "", "tags": ["nature", "plant"] });
        let proposals =
            map_invocation("search_assets", &args, &bare_input(), &mut state, true).unwrap();
        match &proposals[0].body {
            ProposalBody::AssetOp { search: Some(s), .. } => {
                // Empty query falls back to the user message.
                assert_eq!(s.query, "make a wall");
                assert_eq!(s.tags.as_ref().unwrap().len(), 2);
                assert_eq!(s.limit, Some(6));
            }
            other => panic!("expected asset search, got {other:?}"),
        }
    }

    #[test]
    fn search_assets_disabled_marks_manual_fallback() {
        let mut state = TaskState::new("wf".into());
        let args = json!({ "query": "tree" });
        let proposals =
            map_invocation("search_assets", &args, &bare_input(), &mut state, false).unwrap();
        assert_eq!(proposals[0].notes.as_deref(), Some("manual_fallback"));
    }

    #[test]
    fn insert_asset_requires_numeric_id() {
        let mut state = TaskState::new("wf".into());
        let ok = json!({ "assetId": 12345, "parentPath": "Workspace" });
        let proposals =
            map_invocation("insert_asset", &ok, &bare_input(), &mut state, true).unwrap();
        match &proposals[0].body {
            ProposalBody::AssetOp { insert: Some(i), .. } => {
                assert_eq!(i.asset_id, 12345);
                assert_eq!(i.parent_path.as_deref(), Some("game.Workspace"));
            }
            other => panic!("expected insert, got {other:?}"),
        }
        let bad = json!({ "assetId": "not-a-number" });
        assert!(matches!(
            map_invocation("insert_asset", &bad, &bare_input(), &mut state, true),
            Err(MapError::Validation(_))
        ));
    }

    #[test]
    fn open_or_create_script_by_parent_creates_instance() {
        let mut state = state_with_workspace();
        let args = json!({ "parentPath": "game.Workspace", "name": "Main" });
        let proposals =
            map_invocation("open_or_create_script", &args, &bare_input(), &mut state, true)
                .unwrap();
        match &ops_of(&proposals[0])[0] {
            Op::CreateInstance { class_name, props, .. } => {
                assert_eq!(class_name, "Script");
                assert_eq!(props.as_ref().unwrap()["Name"], "Main");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
