// HTTP gateway client
//
// POSTs a messages request to the configured gateway URL. Streaming replies
// arrive as server-sent events and are decoded by `SseDecoder`.
//
// Completions are bounded by `request_timeout`. Streams have no overall limit,
// only `stream_idle_timeout` between chunks.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::time::Duration;

use super::error::{GatewayError, GatewayResult};
use super::sse::{SseDecoder, StreamEvent};
use super::{ChatMessage, ChatRequest, LlmGateway, TokenStream};
use crate::utils::config::GatewayConfig;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: &'a [ChatMessage],
}

pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("gateway base_url is empty".to_string()));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            model: self.config.model.as_deref(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            stream,
            system: request.system_prompt(),
            messages: &request.messages,
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> GatewayResult<reqwest::Response> {
        let builder = self
            .client
            .post(&self.config.base_url)
            .headers(self.headers())
            .json(&self.body(request, stream));

        let response = if stream {
            tokio::time::timeout(self.config.stream_idle_timeout(), builder.send())
                .await
                .map_err(|_| GatewayError::Timeout)??
        } else {
            builder.timeout(self.config.request_timeout()).send().await?
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("[Gateway] Request failed with {}: {}", status, body);
            return Err(GatewayError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn stream_chat(&self, request: ChatRequest) -> GatewayResult<TokenStream> {
        log::info!(
            "[Gateway] Streaming request with {} message(s)",
            request.messages.len()
        );
        let response = self.send(&request, true).await?;
        Ok(decode_event_stream(
            response.bytes_stream(),
            self.config.stream_idle_timeout(),
        ))
    }

    async fn complete(&self, request: ChatRequest) -> GatewayResult<String> {
        log::info!(
            "[Gateway] Completion request with {} message(s)",
            request.messages.len()
        );
        let response = self.send(&request, false).await?;
        let value: Value = response.json().await?;
        extract_reply_text(&value)
    }
}

/// Tokens from a server-sent event byte stream. Ends with
/// `GatewayError::Timeout` when no chunk arrives within `idle`.
fn decode_event_stream<S, B, E>(bytes: S, idle: Duration) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut bytes = Box::pin(bytes);

        loop {
            let chunk = match tokio::time::timeout(idle, bytes.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    yield Err(GatewayError::StreamAborted(e.to_string()));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!("[Gateway] No stream data for {:?}, giving up", idle);
                    yield Err(GatewayError::Timeout);
                    return;
                }
            };
            for event in decoder.feed(chunk.as_ref()) {
                match event {
                    StreamEvent::Token(token) => yield Ok(token),
                    StreamEvent::Done => return,
                    StreamEvent::Error(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        for event in decoder.finish() {
            match event {
                StreamEvent::Token(token) => yield Ok(token),
                StreamEvent::Done => return,
                StreamEvent::Error(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !decoder.is_finished() {
            log::warn!("[Gateway] Stream closed without a terminator");
            yield Err(GatewayError::StreamAborted(
                "connection closed before the reply finished".to_string(),
            ));
        }
    };
    stream.boxed()
}

/// Text of a non-streaming reply. Accepts the messages format
/// (`content: [{type: "text", text}]`) and a few simpler shapes.
fn extract_reply_text(value: &Value) -> GatewayResult<String> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| error.get("message").and_then(|m| m.as_str()).map(|m| m.to_string()))
            .unwrap_or_else(|| error.to_string());
        return Err(GatewayError::from_stream_payload(message));
    }

    if let Some(blocks) = value.get("content").and_then(|c| c.as_array()) {
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()).unwrap_or("text") == "text")
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();
        return Ok(text);
    }

    value
        .get("text")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| GatewayError::ParseError("reply has no text content".to_string()))
}
