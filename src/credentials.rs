use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Persisted format: ~/.vector/credentials.json
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct CredentialEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Credentials {
    /// Keyed by provider ID (e.g. "openai-main", "anthropic").
    #[serde(flatten)]
    pub entries: HashMap<String, CredentialEntry>,
}

impl Credentials {
    /// Load from `~/.vector/credentials.json`. Returns empty if missing or invalid.
    pub fn load(file: &Path) -> Self {
        if !file.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(file) {
            Ok(content) => match serde_json::from_str::<Credentials>(&content) {
                Ok(creds) => creds,
                Err(e) => {
                    warn!("Failed to parse credentials.json: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read credentials.json: {}", e);
                Self::default()
            }
        }
    }

    /// Save to disk. Creates parent directories if needed.
    pub fn save(&self, file: &Path) -> anyhow::Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(file, json)?;
        Ok(())
    }

    pub fn get_api_key(&self, provider_id: &str) -> Option<&str> {
        self.entries
            .get(provider_id)
            .and_then(|e| e.api_key.as_deref())
    }

    pub fn set_api_key(&mut self, provider_id: &str, api_key: Option<String>) {
        if let Some(key) = api_key {
            self.entries
                .entry(provider_id.to_string())
                .or_default()
                .api_key = Some(key);
        } else {
            self.entries.remove(provider_id);
        }
    }
}

/// Default credentials file path: `~/.vector/credentials.json`.
pub fn credentials_file() -> PathBuf {
    crate::paths::credentials_file()
}

/// Resolve the effective API key for a provider.
/// Priority: 1) TOML config api_key  2) credentials.json  3) env var VECTOR_API_KEY_{ID}
pub fn resolve_api_key(
    provider_id: &str,
    config_api_key: Option<&str>,
    credentials: &Credentials,
) -> Option<String> {
    if let Some(key) = config_api_key {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    if let Some(key) = credentials.get_api_key(provider_id) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    // Environment variable: VECTOR_API_KEY_OPENAI_MAIN (hyphens → underscores, uppercase)
    let env_name = format!(
        "VECTOR_API_KEY_{}",
        provider_id.to_uppercase().replace('-', "_")
    );
    if let Ok(key) = std::env::var(&env_name) {
        if !key.is_empty() {
            return Some(key);
        }
    }
    None
}
