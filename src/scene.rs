//! Scene snapshot graph and mirrored code-definition index.
//!
//! Context tools answer from these structures, never from the live editor:
//! the snapshot shipped with a Chat Input is the invalidation boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// One instance in the bounded scene snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    pub path: String,
    pub class_name: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, JsonValue>,
}

/// Mirrored code definition shipped by the editor plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeDefinition {
    pub file: String,
    pub line: usize,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Canonical paths
// ---------------------------------------------------------------------------

/// Canonicalize a dotted instance path. The root is always `game`:
/// `Workspace.Base` and `game.Workspace.Base` both canonicalize to
/// `game.Workspace.Base`. Slash separators and stray whitespace are folded.
pub fn canonical_path(raw: &str) -> String {
    let mut segments: Vec<&str> = raw
        .trim()
        .split(['.', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.first().map(|s| s.eq_ignore_ascii_case("game")) == Some(true) {
        segments.remove(0);
    }
    if segments.is_empty() {
        return "game".to_string();
    }
    let mut out = String::from("game");
    for seg in segments {
        out.push('.');
        out.push_str(seg);
    }
    out
}

/// The last segment of a canonical path ("Structures" for
/// "game.Workspace.Base.Structures").
pub fn path_leaf(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// The parent of a canonical path, or `None` at the root.
pub fn path_parent(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

// ---------------------------------------------------------------------------
// SceneGraph
// ---------------------------------------------------------------------------

/// In-memory snapshot of the editor scene, indexed by canonical path.
#[derive(Debug, Default, Clone)]
pub struct SceneGraph {
    nodes: HashMap<String, SceneNode>,
    children: HashMap<String, Vec<String>>,
}

impl SceneGraph {
    pub fn from_snapshot(snapshot: &[SceneNode]) -> Self {
        let mut graph = Self::default();
        for node in snapshot {
            let mut node = node.clone();
            node.path = canonical_path(&node.path);
            node.parent_path = node
                .parent_path
                .as_deref()
                .map(canonical_path)
                .or_else(|| path_parent(&node.path).map(|p| p.to_string()));
            graph.insert(node);
        }
        graph
    }

    pub fn insert(&mut self, node: SceneNode) {
        let path = node.path.clone();
        if let Some(parent) = node.parent_path.clone() {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&path) {
                siblings.push(path.clone());
            }
        }
        self.nodes.insert(path, node);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&SceneNode> {
        self.nodes.get(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.values()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Breadth-first listing under `parent`, bounded by `depth` and `max_nodes`,
    /// optionally filtered by class name.
    pub fn list_children(
        &self,
        parent: &str,
        depth: usize,
        max_nodes: usize,
        class_whitelist: Option<&[String]>,
    ) -> Vec<&SceneNode> {
        let parent = canonical_path(parent);
        let mut out = Vec::new();
        let mut frontier = vec![parent];
        for _ in 0..depth.max(1) {
            let mut next = Vec::new();
            for p in &frontier {
                let Some(kids) = self.children.get(p) else {
                    continue;
                };
                for kid in kids {
                    let Some(node) = self.nodes.get(kid) else {
                        continue;
                    };
                    next.push(kid.clone());
                    if let Some(classes) = class_whitelist {
                        if !classes.iter().any(|c| c.eq_ignore_ascii_case(&node.class_name)) {
                            continue;
                        }
                    }
                    if out.len() < max_nodes {
                        out.push(node);
                    }
                }
            }
            if next.is_empty() || out.len() >= max_nodes {
                break;
            }
            frontier = next;
        }
        out
    }

    /// Property lookup with an optional key filter and a byte cap on the
    /// serialized result. Attribute keys (`@`-prefixed) are dropped unless
    /// `include_all_attributes` is set.
    pub fn get_properties(
        &self,
        path: &str,
        keys: Option<&[String]>,
        include_all_attributes: bool,
        max_bytes: usize,
    ) -> Option<Map<String, JsonValue>> {
        let node = self.nodes.get(&canonical_path(path))?;
        let mut out = Map::new();
        let mut used = 0usize;
        for (k, v) in &node.props {
            if k.starts_with('@') && !include_all_attributes {
                continue;
            }
            if let Some(filter) = keys {
                if !filter.iter().any(|f| f.eq_ignore_ascii_case(k)) {
                    continue;
                }
            }
            let size = k.len() + v.to_string().len();
            if used + size > max_bytes {
                break;
            }
            used += size;
            out.insert(k.clone(), v.clone());
        }
        Some(out)
    }

    /// Ancestor paths strictly below `game.Workspace` that are absent from the
    /// snapshot, in top-down order. Returns `None` when the path is not under
    /// Workspace (repair is scoped to Workspace only).
    pub fn missing_workspace_ancestors(&self, parent_path: &str) -> Option<Vec<String>> {
        let canonical = canonical_path(parent_path);
        let rest = canonical.strip_prefix("game.Workspace")?;
        if !rest.is_empty() && !rest.starts_with('.') {
            // A sibling service like game.WorkspaceStorage, not Workspace.
            return None;
        }
        let mut missing = Vec::new();
        let mut current = String::from("game.Workspace");
        for seg in rest.split('.').filter(|s| !s.is_empty()) {
            current.push('.');
            current.push_str(seg);
            if !self.contains(&current) {
                missing.push(current.clone());
            }
        }
        Some(missing)
    }

    /// Stable fingerprint over the snapshot (path + class per node, sorted).
    pub fn fingerprint(&self) -> String {
        let mut lines: Vec<String> = self
            .nodes
            .values()
            .map(|n| format!("{}\t{}", n.path, n.class_name))
            .collect();
        lines.sort();
        crate::engine::diff::sha1_hex(&lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Code definition mirror
// ---------------------------------------------------------------------------

/// Read-only index over the mirrored code definitions. `search_files` and
/// `list_code_definition_names` answer from here; the host filesystem is
/// never touched.
#[derive(Debug, Default, Clone)]
pub struct CodeDefIndex {
    defs: Vec<CodeDefinition>,
}

impl CodeDefIndex {
    pub fn new(defs: Vec<CodeDefinition>) -> Self {
        Self { defs }
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn list(&self, root: Option<&str>, limit: usize, exts: Option<&[String]>) -> Vec<&CodeDefinition> {
        self.defs
            .iter()
            .filter(|d| root.map(|r| d.file.starts_with(r)).unwrap_or(true))
            .filter(|d| ext_matches(&d.file, exts))
            .take(limit)
            .collect()
    }

    /// Substring search over definition names and file paths.
    pub fn search(
        &self,
        query: &str,
        root: Option<&str>,
        limit: usize,
        exts: Option<&[String]>,
        case_sensitive: bool,
    ) -> Vec<&CodeDefinition> {
        let needle = if case_sensitive {
            query.to_string()
        } else {
            query.to_lowercase()
        };
        self.defs
            .iter()
            .filter(|d| root.map(|r| d.file.starts_with(r)).unwrap_or(true))
            .filter(|d| ext_matches(&d.file, exts))
            .filter(|d| {
                let (name, file) = if case_sensitive {
                    (d.name.clone(), d.file.clone())
                } else {
                    (d.name.to_lowercase(), d.file.to_lowercase())
                };
                name.contains(&needle) || file.contains(&needle)
            })
            .take(limit)
            .collect()
    }
}

fn ext_matches(file: &str, exts: Option<&[String]>) -> bool {
    let Some(exts) = exts else {
        return true;
    };
    if exts.is_empty() {
        return true;
    }
    exts.iter().any(|e| {
        let e = e.trim_start_matches('.');
        file.rsplit('.').next().map(|f| f.eq_ignore_ascii_case(e)) == Some(true)
    })
}
