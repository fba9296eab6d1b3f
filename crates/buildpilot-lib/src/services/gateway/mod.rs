// LLM Gateway
//
// The assistant talks to a single HTTP gateway that proxies the model
// provider. `HttpGateway` is the production implementation; tests script
// their own `LlmGateway`.

pub mod error;
pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use error::{GatewayError, GatewayErrorCode, GatewayResult};
pub use http::HttpGateway;
pub use sse::{SseDecoder, StreamEvent};

use crate::models::{Message, MessageRole};

/// Streamed reply tokens. The stream ends after the gateway's terminator;
/// an `Err` item is always the last one.
pub type TokenStream = BoxStream<'static, GatewayResult<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        // The gateway only accepts user/assistant turns; system notices are
        // sent as user context
        let role = match message.role {
            MessageRole::Assistant => "assistant",
            MessageRole::User | MessageRole::System => "user",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatRequest {
    /// System blocks, joined with blank lines on the wire
    pub system: Vec<String>,
    pub messages: Vec<ChatMessage>,
    /// Overrides the configured limit
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(system: Vec<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system,
            messages,
            max_tokens: None,
        }
    }

    pub fn system_prompt(&self) -> Option<String> {
        let blocks: Vec<&str> = self
            .system
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if blocks.is_empty() {
            None
        } else {
            Some(blocks.join("\n\n"))
        }
    }
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Start a streaming chat request
    async fn stream_chat(&self, request: ChatRequest) -> GatewayResult<TokenStream>;

    /// Non-streaming request returning the whole reply
    async fn complete(&self, request: ChatRequest) -> GatewayResult<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Gateway answering from queued replies and recording every request
    #[derive(Default)]
    pub struct ScriptedGateway {
        streams: Mutex<VecDeque<GatewayResult<Vec<GatewayResult<String>>>>>,
        completions: Mutex<VecDeque<GatewayResult<String>>>,
        completion_delay: Mutex<Duration>,
        pub stream_requests: Mutex<Vec<ChatRequest>>,
        pub complete_requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a streamed reply delivered as `tokens`
        pub fn push_stream(&self, tokens: &[&str]) {
            let items = tokens.iter().map(|t| Ok(t.to_string())).collect();
            self.streams.lock().unwrap().push_back(Ok(items));
        }

        /// Queue a stream whose items are given explicitly
        pub fn push_stream_items(&self, items: Vec<GatewayResult<String>>) {
            self.streams.lock().unwrap().push_back(Ok(items));
        }

        /// Queue a stream that fails before the first token
        pub fn push_stream_error(&self, error: GatewayError) {
            self.streams.lock().unwrap().push_back(Err(error));
        }

        pub fn push_completion(&self, reply: GatewayResult<String>) {
            self.completions.lock().unwrap().push_back(reply);
        }

        /// Hold every completion for `delay` before answering
        pub fn delay_completions(&self, delay: Duration) {
            *self.completion_delay.lock().unwrap() = delay;
        }

        pub fn complete_calls(&self) -> usize {
            self.complete_requests.lock().unwrap().len()
        }

        pub fn stream_calls(&self) -> usize {
            self.stream_requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn stream_chat(&self, request: ChatRequest) -> GatewayResult<TokenStream> {
            self.stream_requests.lock().unwrap().push(request);
            let next = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::ApiError("no scripted stream".into())));
            Ok(futures::stream::iter(next?).boxed())
        }

        async fn complete(&self, request: ChatRequest) -> GatewayResult<String> {
            self.complete_requests.lock().unwrap().push(request);
            let delay = *self.completion_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.completions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::ApiError("no scripted completion".into())))
        }
    }
}
