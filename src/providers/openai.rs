use super::{CallResponse, ChatMessage, TokenUsage};
use anyhow::Result;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec};

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
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

    /// Streaming chat completion, aggregated into a full response. The SSE
    /// transport keeps long completions from tripping idle proxies; the
    /// gateway only ever sees the final text.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CallResponse> {
        let total_len: usize = messages.iter().map(|m| m.content.len()).sum();
        tracing::info!(
            "OpenAI request: model={}, messages={}, total_chars={}",
            model,
            messages.len(),
            total_len
        );

        let url = format!("{}/chat/completions", self.base_url);
        let mut oai_messages = vec![OaiMessage {
            role: "system".to_string(),
            content: system.to_string(),
        }];
        oai_messages.extend(messages.iter().map(|m| OaiMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        }));
        let req = OaiRequest {
            model: model.to_string(),
            messages: oai_messages,
            stream: true,
            stream_options: Some(OaiStreamOptions { include_usage: true }),
        };

        let mut rb = self.http.post(url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("openai error ({}): {}", status.as_u16(), text);
        }

        // OpenAI streams SSE: "data: {...}\n\n" lines, terminated by "data: [DONE]"
        let byte_stream = resp
            .bytes_stream()
            .map(|item| item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = tokio_util::io::StreamReader::new(byte_stream);
        let mut lines = FramedRead::new(reader, LinesCodec::new());

        let mut content = String::new();
        let mut usage: Option<TokenUsage> = None;
        while let Some(line_result) = lines.next().await {
            let line = line_result.map_err(|e| anyhow::anyhow!("stream error: {}", e))?;
            let trimmed = line.trim();
            let Some(data) = trimmed.strip_prefix("data: ") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                break;
            }
            let chunk: OaiStreamChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    anyhow::bail!("openai json parse error: {} (data: {})", e, data);
                }
            };
            if let Some(u) = chunk.usage {
                usage = Some(TokenUsage {
                    input: u.prompt_tokens.map(|v| v as usize),
                    output: u.completion_tokens.map(|v| v as usize),
                });
            }
            if let Some(delta) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
            {
                content.push_str(&delta);
            }
        }

        Ok(CallResponse { content, usage })
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OaiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OaiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    delta: OaiStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OaiStreamDelta {
    content: Option<String>,
}
