//! Event sink: fire-and-forget progress lines keyed by an opaque stream key.
//!
//! Consumers subscribe through a broadcast channel; pushes never block the
//! Plan/Act loop. A lagging subscriber drops lines rather than applying
//! back-pressure. A bounded per-stream tail is kept for inspection.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Lines kept per stream key for `tail()`.
const TAIL_CAPACITY: usize = 512;

#[derive(Debug, Clone, Serialize)]
pub struct StreamLine {
    pub stream: String,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantPhase {
    Start,
    Update,
    Final,
}

impl AssistantPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "start" => Self::Start,
            "final" => Self::Final,
            _ => Self::Update,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Start => "assistant.start",
            Self::Update => "assistant.update",
            Self::Final => "assistant.final",
        }
    }
}

pub struct EventSink {
    tx: broadcast::Sender<StreamLine>,
    tails: Mutex<HashMap<String, VecDeque<String>>>,
}

impl EventSink {
    pub fn new() -> Self {
        // Bursty during tool turns; a large buffer reduces lag drops.
        let (tx, _) = broadcast::channel(4096);
        Self {
            tx,
            tails: Mutex::new(HashMap::new()),
        }
    }

    /// Append a progress line to a stream. Never blocks; a full broadcast
    /// buffer drops the line for lagging subscribers only.
    pub fn push(&self, stream_key: &str, line: impl Into<String>) {
        let line = line.into();
        if let Ok(mut tails) = self.tails.lock() {
            let tail = tails.entry(stream_key.to_string()).or_default();
            if tail.len() >= TAIL_CAPACITY {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }
        let _ = self.tx.send(StreamLine {
            stream: stream_key.to_string(),
            line,
        });
    }

    /// Push a transient assistant-text event (`assistant.start|update|final`).
    pub fn push_assistant_text(&self, stream_key: &str, phase: AssistantPhase, text: &str) {
        let payload = serde_json::json!({ "text": text });
        self.push(stream_key, format!("{} {}", phase.label(), payload));
    }

    pub fn subscribe(&self) -> BroadcastStream<StreamLine> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Snapshot of the buffered tail for a stream key, oldest first.
    pub fn tail(&self, stream_key: &str) -> Vec<String> {
        self.tails
            .lock()
            .map(|tails| {
                tails
                    .get(stream_key)
                    .map(|t| t.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
