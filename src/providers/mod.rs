//! Provider gateway: one `call` across every configured LLM provider, with
//! per-call timeout, transient-error retry with exponential backoff, and
//! cancellation. Adapters own their wire formats; the gateway only sees
//! plain `{role, content}` turns.

mod anthropic;
mod openai;
mod scripted;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

use crate::config::{OrchestratorConfig, ProviderConfig};
use crate::credentials::{self, Credentials};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Plain chat turns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: Option<usize>,
    pub output: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CallResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

pub struct CallRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [ChatMessage],
    pub model_override: Option<&'a str>,
    pub provider_override: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ProviderError {
    /// Transient failure (timeout, 429, 5xx) that survived every retry.
    Transient(String),
    /// Non-retryable failure: 4xx, empty or safety-truncated completion.
    Fatal(String),
    /// The cancel signal fired while the call was outstanding.
    Cancelled,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "provider transient error: {msg}"),
            Self::Fatal(msg) => write!(f, "provider error: {msg}"),
            Self::Cancelled => write!(f, "provider call cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Timeouts, connection resets, 429 and 5xx responses warrant a retry.
/// Adapters embed the HTTP status as `(NNN)` in their error strings.
fn is_transient_error(msg: &str) -> bool {
    if let Some(code) = status_code_in(msg) {
        if code == 429 || (500..=599).contains(&code) {
            return true;
        }
    }
    let lower = msg.to_lowercase();
    lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("error sending request")
}

fn status_code_in(msg: &str) -> Option<u16> {
    msg.match_indices('(').find_map(|(i, _)| {
        let rest = &msg[i + 1..];
        let end = rest.find(')')?;
        rest[..end]
            .parse::<u16>()
            .ok()
            .filter(|c| (100..=599).contains(c))
    })
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

enum ProviderClient {
    OpenAi(OpenAiClient),
    Anthropic(AnthropicClient),
    Scripted(ScriptedClient),
}

pub struct ProviderInstance {
    pub config: ProviderConfig,
    client: ProviderClient,
}

impl ProviderInstance {
    fn has_credentials(&self) -> bool {
        matches!(self.client, ProviderClient::Scripted(_)) || self.config.api_key.is_some()
    }

    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CallResponse> {
        match &self.client {
            ProviderClient::OpenAi(c) => c.complete(model, system, messages).await,
            ProviderClient::Anthropic(c) => c.complete(model, system, messages).await,
            ProviderClient::Scripted(c) => c.complete(messages),
        }
    }
}

pub struct ProviderGateway {
    providers: Vec<ProviderInstance>,
    default_provider: Option<String>,
    timeout_ms: u64,
    max_retries: u32,
    retry_delay_ms: u64,
    retry_max_ms: u64,
}

impl ProviderGateway {
    pub fn new(configs: Vec<ProviderConfig>, creds: &Credentials, orch: &OrchestratorConfig) -> Self {
        let mut providers = Vec::new();
        for mut cfg in configs {
            // Resolve effective API key: TOML > credentials.json > env var.
            cfg.api_key = credentials::resolve_api_key(&cfg.id, cfg.api_key.as_deref(), creds);
            let client = match cfg.kind.as_str() {
                "anthropic" => {
                    ProviderClient::Anthropic(AnthropicClient::new(cfg.url.clone(), cfg.api_key.clone()))
                }
                "scripted" => ProviderClient::Scripted(ScriptedClient::new(cfg.responses.clone())),
                // Everything else (openai, groq, deepseek, ...) speaks the
                // OpenAI-compatible chat completions API.
                _ => ProviderClient::OpenAi(OpenAiClient::new(cfg.url.clone(), cfg.api_key.clone())),
            };
            providers.push(ProviderInstance { config: cfg, client });
        }
        Self {
            providers,
            default_provider: orch.default_provider.clone(),
            timeout_ms: orch.provider_timeout_ms,
            max_retries: orch.max_retries,
            retry_delay_ms: orch.retry_delay_ms,
            retry_max_ms: orch.retry_max_ms,
        }
    }

    /// Deterministic provider choice:
    /// explicit per-request override > configured default > first with credentials.
    pub fn choose(&self, override_id: Option<&str>) -> Result<&ProviderInstance> {
        if let Some(id) = override_id {
            return self
                .providers
                .iter()
                .find(|p| p.config.id == id)
                .ok_or_else(|| anyhow::anyhow!("provider '{}' is not configured", id));
        }
        if let Some(id) = &self.default_provider {
            if let Some(p) = self.providers.iter().find(|p| &p.config.id == id) {
                return Ok(p);
            }
            warn!("default provider '{}' is not configured; falling through", id);
        }
        self.providers
            .iter()
            .find(|p| p.has_credentials())
            .ok_or_else(|| anyhow::anyhow!("no provider with credentials is configured"))
    }

    pub async fn call(
        &self,
        req: CallRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<CallResponse, ProviderError> {
        let instance = self
            .choose(req.provider_override)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let model = req.model_override.unwrap_or(&instance.config.model);
        let timeout = Duration::from_millis(
            instance.config.timeout_ms.unwrap_or(self.timeout_ms).max(1),
        );

        let mut delay = Duration::from_millis(self.retry_delay_ms);
        let max_delay = Duration::from_millis(self.retry_max_ms.max(self.retry_delay_ms));
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                info!(
                    "Retry {}/{} for provider '{}' after transient error (waiting {}ms)",
                    attempt,
                    self.max_retries,
                    instance.config.id,
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(max_delay);
            }

            let fut = instance.complete(model, req.system_prompt, req.messages);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                r = tokio::time::timeout(timeout, fut) => r,
            };

            match outcome {
                Err(_) => {
                    last_err = format!("provider call timed out after {}ms", timeout.as_millis());
                    continue;
                }
                Ok(Ok(resp)) => {
                    if resp.content.trim().is_empty() {
                        // Empty or safety-truncated responses are never fabricated over.
                        return Err(ProviderError::Fatal("empty completion".to_string()));
                    }
                    return Ok(resp);
                }
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    if is_transient_error(&msg) {
                        last_err = msg;
                        continue;
                    }
                    return Err(ProviderError::Fatal(msg));
                }
            }
        }
        Err(ProviderError::Transient(last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn scripted_config(id: &str, responses: Vec<String>) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            kind: "scripted".to_string(),
            url: String::new(),
            model: "scripted".to_string(),
            api_key: None,
            timeout_ms: None,
            responses,
        }
    }

    fn gateway(configs: Vec<ProviderConfig>, default: Option<&str>) -> ProviderGateway {
        let mut orch = Config::default().orchestrator;
        orch.default_provider = default.map(String::from);
        orch.retry_delay_ms = 1;
        orch.retry_max_ms = 2;
        ProviderGateway::new(configs, &Credentials::default(), &orch)
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_error("openai error (429): slow down"));
        assert!(is_transient_error("openai error (503): overloaded"));
        assert!(is_transient_error("provider call timed out after 30000ms"));
        assert!(!is_transient_error("openai error (401): bad key"));
        assert!(!is_transient_error("scripted provider exhausted"));
    }

    #[test]
    fn chooser_priority() {
        let gw = gateway(
            vec![
                scripted_config("a", vec![]),
                scripted_config("b", vec![]),
            ],
            Some("b"),
        );
        assert_eq!(gw.choose(None).unwrap().config.id, "b");
        assert_eq!(gw.choose(Some("a")).unwrap().config.id, "a");
        assert!(gw.choose(Some("missing")).is_err());
    }

    #[test]
    fn chooser_falls_back_to_credentialed() {
        let mut keyless = scripted_config("first", vec![]);
        keyless.kind = "openai".to_string(); // no api key → skipped
        let gw = gateway(vec![keyless, scripted_config("second", vec![])], None);
        assert_eq!(gw.choose(None).unwrap().config.id, "second");
    }

    #[tokio::test]
    async fn call_returns_scripted_content() {
        let gw = gateway(
            vec![scripted_config("s", vec!["<list_selection />".to_string()])],
            None,
        );
        let req = CallRequest {
            system_prompt: "sys",
            messages: &[ChatMessage::new("user", "hi")],
            model_override: None,
            provider_override: None,
        };
        let resp = gw.call(req, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.content, "<list_selection />");
    }

    #[tokio::test]
    async fn exhausted_script_is_fatal() {
        let gw = gateway(vec![scripted_config("s", vec![])], None);
        let req = CallRequest {
            system_prompt: "sys",
            messages: &[],
            model_override: None,
            provider_override: None,
        };
        match gw.call(req, &CancellationToken::new()).await {
            Err(ProviderError::Fatal(msg)) => assert!(msg.contains("exhausted")),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_aborts_call() {
        let gw = gateway(
            vec![scripted_config("s", vec!["x".to_string()])],
            None,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = CallRequest {
            system_prompt: "sys",
            messages: &[],
            model_override: None,
            provider_override: None,
        };
        match gw.call(req, &cancel).await {
            Err(ProviderError::Cancelled) => {}
            other => panic!("expected cancelled, got {other:?}"),
        }
    }
}
