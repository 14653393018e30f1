//! Deterministic template bypass: well-known phrases map straight to a fixed
//! proposal sequence with no provider call.

use crate::proposals::{brick_color, cframe_at, vector3, Op, Proposal, ProposalBody};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::sync::OnceLock;

const MAX_GRID_DIM: usize = 10;
const CELL_SPACING: f64 = 6.0;

/// Match the user message against the template library. Returns the full
/// proposal sequence on a hit.
pub fn match_template(message: &str) -> Option<Vec<Proposal>> {
    if let Some(caps) = grid_re().captures(message) {
        let rows: usize = caps.get(1)?.as_str().parse().ok()?;
        let cols: usize = caps.get(2)?.as_str().parse().ok()?;
        if (1..=MAX_GRID_DIM).contains(&rows) && (1..=MAX_GRID_DIM).contains(&cols) {
            return Some(grid_proposals(rows, cols));
        }
    }
    if farm_re().is_match(message) {
        return Some(farm_proposals());
    }
    None
}

fn grid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:make\s+|create\s+|build\s+)?(?:a\s+)?grid\s+(\d{1,2})\s*[x×]\s*(\d{1,2})\s*$")
            .unwrap_or_else(|e| panic!("invalid grid regex: {e}"))
    })
}

fn farm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bfarm(?:ing)?\s+scaffold\b")
            .unwrap_or_else(|e| panic!("invalid farm regex: {e}"))
    })
}

fn create_op(class_name: &str, parent_path: &str, props: Map<String, JsonValue>) -> Proposal {
    Proposal::new(ProposalBody::ObjectOp {
        ops: vec![Op::CreateInstance {
            class_name: class_name.to_string(),
            parent_path: parent_path.to_string(),
            props: Some(props),
        }],
    })
}

/// `grid RxC`: one Model, then one anchored 4x1x4 Part per cell, centered on
/// the origin at y=0.5.
fn grid_proposals(rows: usize, cols: usize) -> Vec<Proposal> {
    let mut proposals = Vec::with_capacity(rows * cols + 1);

    let mut model_props = Map::new();
    model_props.insert("Name".to_string(), JsonValue::String("Grid".to_string()));
    proposals.push(create_op("Model", "game.Workspace", model_props));

    for i in 1..=rows {
        for j in 1..=cols {
            let x = (i as f64 - (rows as f64 + 1.0) / 2.0) * CELL_SPACING;
            let z = (j as f64 - (cols as f64 + 1.0) / 2.0) * CELL_SPACING;
            let mut props = Map::new();
            props.insert(
                "Name".to_string(),
                JsonValue::String(format!("Cell_{i}_{j}")),
            );
            props.insert("Anchored".to_string(), JsonValue::Bool(true));
            props.insert("Size".to_string(), vector3(4.0, 1.0, 4.0));
            props.insert("CFrame".to_string(), cframe_at(x, 0.5, z));
            proposals.push(create_op("Part", "game.Workspace.Grid", props));
        }
    }
    proposals
}

/// Farming scaffold: a Farm model with a field plate and four plots.
fn farm_proposals() -> Vec<Proposal> {
    let mut proposals = Vec::new();

    let mut farm = Map::new();
    farm.insert("Name".to_string(), JsonValue::String("Farm".to_string()));
    proposals.push(create_op("Model", "game.Workspace", farm));

    let mut field = Map::new();
    field.insert("Name".to_string(), JsonValue::String("Field".to_string()));
    field.insert("Anchored".to_string(), JsonValue::Bool(true));
    field.insert("Size".to_string(), vector3(32.0, 1.0, 32.0));
    field.insert("CFrame".to_string(), cframe_at(0.0, 0.5, 0.0));
    field.insert("BrickColor".to_string(), brick_color("Bright green"));
    proposals.push(create_op("Part", "game.Workspace.Farm", field));

    let mut plots = Map::new();
    plots.insert("Name".to_string(), JsonValue::String("Plots".to_string()));
    proposals.push(create_op("Model", "game.Workspace.Farm", plots));

    for (idx, (x, z)) in [(-8.0, -8.0), (8.0, -8.0), (-8.0, 8.0), (8.0, 8.0)]
        .into_iter()
        .enumerate()
    {
        let mut plot = Map::new();
        plot.insert(
            "Name".to_string(),
            JsonValue::String(format!("Plot_{}", idx + 1)),
        );
        plot.insert("Anchored".to_string(), JsonValue::Bool(true));
        plot.insert("Size".to_string(), vector3(8.0, 1.0, 8.0));
        plot.insert("CFrame".to_string(), cframe_at(x, 1.5, z));
        plot.insert("BrickColor".to_string(), brick_color("Reddish brown"));
        proposals.push(create_op("Part", "game.Workspace.Farm.Plots", plot));
    }
    proposals
}
