use super::{CallResponse, ChatMessage};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays a fixed queue of canned responses. Used for offline runs and for
/// driving the Plan/Act loop in tests without a network provider.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    pub fn complete(&self, _messages: &[ChatMessage]) -> Result<CallResponse> {
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        match next {
            Some(content) => Ok(CallResponse {
                content,
                usage: None,
            }),
            None => anyhow::bail!("scripted provider exhausted"),
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_in_order_then_fails() {
        let client = ScriptedClient::new(vec!["one".into(), "two".into()]);
        assert_eq!(client.complete(&[]).unwrap().content, "one");
        assert_eq!(client.complete(&[]).unwrap().content, "two");
        assert!(client.complete(&[]).is_err());
        assert_eq!(client.remaining(), 0);
    }
}
