use super::{CallResponse, ChatMessage, TokenUsage};
use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CallResponse> {
        let total_len: usize = messages.iter().map(|m| m.content.len()).sum();
        tracing::info!(
            "Anthropic request: model={}, messages={}, total_chars={}",
            model,
            messages.len(),
            total_len
        );

        let url = format!("{}/v1/messages", self.base_url);
        let req = MsgRequest {
            model: model.to_string(),
            max_tokens: MAX_OUTPUT_TOKENS,
            system: system.to_string(),
            messages: messages
                .iter()
                .map(|m| MsgTurn {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
        };

        let mut rb = self
            .http
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("x-api-key", key);
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("anthropic error ({}): {}", status.as_u16(), text);
        }

        let payload: MsgResponse = resp.json().await?;
        let content: String = payload
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect();
        let usage = payload.usage.map(|u| TokenUsage {
            input: u.input_tokens.map(|v| v as usize),
            output: u.output_tokens.map(|v| v as usize),
        });
        Ok(CallResponse { content, usage })
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct MsgRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<MsgTurn>,
}

#[derive(Debug, Serialize)]
struct MsgTurn {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MsgResponse {
    #[serde(default)]
    content: Vec<MsgBlock>,
    #[serde(default)]
    usage: Option<MsgUsage>,
}

#[derive(Debug, Deserialize)]
struct MsgBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MsgUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}
