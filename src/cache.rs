//! Session and tool-result caches.
//!
//! The tool-result cache is per-workflow: keys embed the tool name, the
//! canonicalized arguments, and the fingerprints the result depends on.
//! Entries die on TTL expiry or when a dependent fingerprint changes.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default TTL for structure reads (scene graph queries).
pub const STRUCTURE_TTL: Duration = Duration::from_secs(600);
/// Shorter TTL for code reads while editors are active.
pub const CODE_TTL: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Tool-result cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: JsonValue,
    pub stored_at: DateTime<Utc>,
    created: Instant,
    ttl: Duration,
    fingerprints: Vec<String>,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }
}

#[derive(Debug, Default)]
pub struct ToolResultCache {
    entries: HashMap<String, CacheEntry>,
}

impl ToolResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key: `tool|canonical-args|fp1,fp2`. Canonicalization sorts object
    /// keys recursively so argument order never splits the cache.
    pub fn key(tool: &str, args: &JsonValue, fingerprints: &[String]) -> String {
        format!(
            "{}|{}|{}",
            tool,
            canonical_json(args),
            fingerprints.join(",")
        )
    }

    pub fn get(&mut self, key: &str) -> Option<&JsonValue> {
        if self.entries.get(key).map(|e| e.expired()).unwrap_or(false) {
            self.entries.remove(key);
        }
        self.entries.get(key).map(|e| &e.result)
    }

    pub fn set(&mut self, key: String, result: JsonValue, ttl: Duration, fingerprints: &[String]) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: Utc::now(),
                created: Instant::now(),
                ttl,
                fingerprints: fingerprints.to_vec(),
            },
        );
    }

    /// Drop every entry that depends on `fingerprint` (e.g. a changed
    /// `beforeHash` or `placeHash`).
    pub fn invalidate_fingerprint(&mut self, fingerprint: &str) {
        self.entries
            .retain(|_, e| !e.fingerprints.iter().any(|f| f == fingerprint));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serialize with recursively sorted object keys.
pub fn canonical_json(value: &JsonValue) -> String {
    fn sort(value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for k in keys {
                    out.insert(k.clone(), sort(&map[k]));
                }
                JsonValue::Object(out)
            }
            JsonValue::Array(items) => JsonValue::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionEntry {
    pub last_tool: Option<(String, JsonValue)>,
    pub workflow_id: Option<String>,
}

/// Process-wide per-project session slots, used for heuristic continuation.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, SessionEntry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_tool(&mut self, project_id: &str, name: &str, result: JsonValue) {
        self.sessions
            .entry(project_id.to_string())
            .or_default()
            .last_tool = Some((name.to_string(), result));
    }

    pub fn set_workflow(&mut self, project_id: &str, workflow_id: &str) {
        self.sessions
            .entry(project_id.to_string())
            .or_default()
            .workflow_id = Some(workflow_id.to_string());
    }

    pub fn get_session(&self, project_id: &str) -> Option<&SessionEntry> {
        self.sessions.get(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = serde_json::json!({ "b": 1, "a": { "d": 2, "c": 3 } });
        let b = serde_json::json!({ "a": { "c": 3, "d": 2 }, "b": 1 });
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn key_embeds_fingerprints() {
        let args = serde_json::json!({ "parentPath": "game.Workspace" });
        let k1 = ToolResultCache::key("list_children", &args, &["ph1".to_string()]);
        let k2 = ToolResultCache::key("list_children", &args, &["ph2".to_string()]);
        assert_ne!(k1, k2);
        assert!(k1.starts_with("list_children|"));
    }

    #[test]
    fn get_set_roundtrip() {
        let mut cache = ToolResultCache::new();
        let key = "t|{}|fp".to_string();
        cache.set(
            key.clone(),
            serde_json::json!([1, 2, 3]),
            STRUCTURE_TTL,
            &["fp".to_string()],
        );
        assert_eq!(cache.get(&key), Some(&serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn ttl_expiry_evicts() {
        let mut cache = ToolResultCache::new();
        let key = "t|{}|".to_string();
        cache.set(key.clone(), serde_json::json!(1), Duration::ZERO, &[]);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn fingerprint_invalidation() {
        let mut cache = ToolResultCache::new();
        cache.set(
            "a".to_string(),
            serde_json::json!(1),
            STRUCTURE_TTL,
            &["ph1".to_string()],
        );
        cache.set(
            "b".to_string(),
            serde_json::json!(2),
            STRUCTURE_TTL,
            &["other".to_string()],
        );
        cache.invalidate_fingerprint("ph1");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn session_last_tool_slot() {
        let mut store = SessionStore::new();
        store.set_last_tool("proj", "list_selection", serde_json::json!([]));
        store.set_workflow("proj", "wf-1");
        let session = store.get_session("proj").unwrap();
        assert_eq!(session.last_tool.as_ref().unwrap().0, "list_selection");
        assert_eq!(session.workflow_id.as_deref(), Some("wf-1"));
    }
}
