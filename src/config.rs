use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    pub id: String,
    /// "openai" (OpenAI-compatible chat completions), "anthropic", or "scripted".
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub model: String,
    pub api_key: Option<String>,
    /// Per-provider timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Canned responses for the "scripted" kind.
    #[serde(default)]
    pub responses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cap on Plan/Act iterations per request.
    pub max_turns: usize,
    /// When true, refuse to synthesize fallback proposals.
    pub disable_fallbacks: bool,
    /// Permit assistant prose preceding the single tool tag.
    pub allow_text_before_tool: bool,
    /// Warn if prose follows the tool tag.
    pub enforce_tool_at_end: bool,
    /// Per-call provider timeout in milliseconds.
    pub provider_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_ms: u64,
    /// Root label for `search_files` over the mirrored code snapshot.
    pub workspace_root: Option<PathBuf>,
    /// Provider priority override.
    pub default_provider: Option<String>,
    /// Hard cap on mutating steps per workflow.
    pub max_mutating_steps: usize,
    /// Effective context window (estimated tokens) for compaction.
    pub context_window_tokens: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: 4,
            disable_fallbacks: false,
            allow_text_before_tool: true,
            enforce_tool_at_end: false,
            provider_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_max_ms: 10_000,
            workspace_root: None,
            default_provider: None,
            max_mutating_steps: 50,
            context_window_tokens: 128_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    /// When false, `search_assets` maps to a manual-fallback proposal.
    pub enabled: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl Config {
    /// Load `vector.toml` from the given path or the working directory,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| Path::new("vector.toml"));
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides for the recognized orchestrator knobs.
    pub fn apply_env(&mut self) {
        let o = &mut self.orchestrator;
        if let Some(v) = env_parse::<usize>("MAX_TURNS") {
            o.max_turns = v.max(1);
        }
        if let Ok(v) = std::env::var("DISABLE_FALLBACKS") {
            o.disable_fallbacks = v == "1";
        }
        if let Ok(v) = std::env::var("ALLOW_TEXT_BEFORE_TOOL") {
            o.allow_text_before_tool = v != "0";
        }
        if let Ok(v) = std::env::var("ENFORCE_TOOL_AT_END") {
            o.enforce_tool_at_end = v == "1";
        }
        if let Some(v) = env_parse::<u64>("PROVIDER_TIMEOUT_MS") {
            o.provider_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_RETRIES") {
            o.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("RETRY_DELAY_MS") {
            o.retry_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("RETRY_MAX_MS") {
            o.retry_max_ms = v;
        }
        if let Ok(v) = std::env::var("WORKSPACE_ROOT") {
            if !v.is_empty() {
                o.workspace_root = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_PROVIDER") {
            if !v.is_empty() {
                o.default_provider = Some(v);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig {
                id: "openai-main".to_string(),
                kind: "openai".to_string(),
                url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                timeout_ms: None,
                responses: Vec::new(),
            }],
            orchestrator: OrchestratorConfig::default(),
            catalog: CatalogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.orchestrator.max_turns, 4);
        assert_eq!(cfg.orchestrator.provider_timeout_ms, 30_000);
        assert_eq!(cfg.orchestrator.max_retries, 3);
        assert_eq!(cfg.orchestrator.max_mutating_steps, 50);
        assert!(cfg.catalog.enabled);
        assert!(!cfg.orchestrator.disable_fallbacks);
    }

    #[test]
    fn toml_roundtrip() {
        let toml_src = r#"
[[providers]]
id = "scripted"
kind = "scripted"
responses = ["<list_selection />"]

[orchestrator]
max_turns = 6
disable_fallbacks = true
allow_text_before_tool = true
enforce_tool_at_end = false
provider_timeout_ms = 5000
max_retries = 1
retry_delay_ms = 100
retry_max_ms = 500
max_mutating_steps = 10
context_window_tokens = 32000

[catalog]
enabled = false
"#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].kind, "scripted");
        assert_eq!(cfg.orchestrator.max_turns, 6);
        assert!(cfg.orchestrator.disable_fallbacks);
        assert!(!cfg.catalog.enabled);
    }
}
