//! OpenAI-compatible chat-completions provider for DeepSeek and Mistral.
//!
//! Both speak the `/chat/completions` wire format; they differ only in
//! endpoint and name.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::SdkError;
use crate::request::{BackendKind, BackendParams, EventStream, Output, RoutedRequest, TokenUsage};

use super::stream::{Unit, UnitMapper, decode_events};
use super::types::{Backend, ensure_routed};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Chat-completions provider bound to one backend
pub struct OpenAiCompatProvider {
    kind: BackendKind,
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn deepseek(client: Client, base_url: Option<String>) -> Self {
        Self {
            kind: BackendKind::DeepSeek,
            client,
            base_url: base_url.unwrap_or_else(|| DEEPSEEK_BASE_URL.to_string()),
        }
    }

    pub fn mistral(client: Client, base_url: Option<String>) -> Self {
        Self {
            kind: BackendKind::Mistral,
            client,
            base_url: base_url.unwrap_or_else(|| MISTRAL_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(params: &BackendParams, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = params.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": params.prompt}));

        let mut body = json!({
            "model": params.model,
            "messages": messages,
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn from_completion(
        kind: BackendKind,
        params: &BackendParams,
        payload: Value,
    ) -> Result<Output, SdkError> {
        let resp = CompletionResponse::deserialize(&payload).map_err(|e| {
            SdkError::api(
                format!("{} error: malformed response body: {}", kind.label(), e),
                kind.as_str(),
            )
        })?;

        let data = resp
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        let usage = resp.usage.map(CompletionUsage::into_tokens);

        Ok(Output::normalized(kind, params, data, usage, payload))
    }

    /// Map one streamed chunk: text from `delta.content`, terminal on `finish_reason`
    fn deepseek_stream_unit(chunk: &Value) -> Result<Option<Unit>, SdkError> {
        Self::chunk_unit(BackendKind::DeepSeek, chunk)
    }

    fn mistral_stream_unit(chunk: &Value) -> Result<Option<Unit>, SdkError> {
        Self::chunk_unit(BackendKind::Mistral, chunk)
    }

    fn chunk_unit(kind: BackendKind, chunk: &Value) -> Result<Option<Unit>, SdkError> {
        // `{"error": {...}}`, or Mistral's flat `{"object": "error", "message": ...}`
        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            return Err(super::stream_error(kind, Some(error)));
        }
        if chunk.get("object").and_then(Value::as_str) == Some("error") {
            return Err(super::stream_error(kind, Some(chunk)));
        }
        let Ok(resp) = CompletionResponse::deserialize(chunk) else {
            return Ok(None);
        };
        let choice = resp.choices.first();
        let text = choice
            .and_then(|c| c.delta.as_ref().or(c.message.as_ref()))
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        Ok(Some(Unit {
            text,
            done: choice.is_some_and(|c| c.finish_reason.is_some()),
            tokens: resp.usage.map(CompletionUsage::into_tokens),
        }))
    }

    fn mapper(&self) -> UnitMapper {
        match self.kind {
            BackendKind::Mistral => Self::mistral_stream_unit,
            _ => Self::deepseek_stream_unit,
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompatProvider {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError> {
        ensure_routed(self.kind, request)?;
        let params = &request.params;

        debug!("{} request: model={}", self.kind.label(), params.model);

        let payload = super::send_json(
            self.kind,
            self.client
                .post(self.endpoint())
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&Self::request_body(params, false)),
        )
        .await?;

        Self::from_completion(self.kind, params, payload)
    }

    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        api_key: &str,
    ) -> Result<EventStream, SdkError> {
        ensure_routed(self.kind, request)?;
        let params = &request.params;

        debug!("{} streaming request: model={}", self.kind.label(), params.model);

        let response = super::open_stream(
            self.kind,
            self.client
                .post(self.endpoint())
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&Self::request_body(params, true)),
        )
        .await?;

        Ok(decode_events(self.kind, response.bytes_stream(), self.mapper()))
    }
}

// ── Chat-completions wire types ──

#[derive(Debug, Clone, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
    delta: Option<CompletionMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

impl CompletionUsage {
    fn into_tokens(self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens, self.total_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_endpoints() {
        let ds = OpenAiCompatProvider::deepseek(Client::new(), None);
        assert_eq!(ds.endpoint(), "https://api.deepseek.com/chat/completions");
        assert_eq!(ds.kind(), BackendKind::DeepSeek);

        let mi = OpenAiCompatProvider::mistral(Client::new(), None);
        assert_eq!(mi.endpoint(), "https://api.mistral.ai/v1/chat/completions");
        assert_eq!(mi.kind(), BackendKind::Mistral);
    }

    #[test]
    fn test_request_body_messages() {
        let params = BackendParams::new("deepseek-chat", "hi")
            .with_system("be kind")
            .with_max_tokens(10);
        let body = OpenAiCompatProvider::request_body(&params, true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["stream"], true);

        let plain = OpenAiCompatProvider::request_body(&BackendParams::new("m", "hi"), false);
        assert_eq!(plain["messages"].as_array().unwrap().len(), 1);
        assert!(plain.get("stream").is_none());
    }

    #[test]
    fn test_from_completion() {
        let payload = json!({
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Bonjour"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
        });
        let params = BackendParams::new("mistral-small-latest", "p").with_raw(true);
        let out = OpenAiCompatProvider::from_completion(BackendKind::Mistral, &params, payload.clone())
            .unwrap();
        assert_eq!(out.data, "Bonjour");
        assert_eq!(out.provider, BackendKind::Mistral);
        assert_eq!(out.usage.unwrap().total, 6);
        assert_eq!(out.raw, Some(payload));
    }

    #[test]
    fn test_from_completion_malformed() {
        let err = OpenAiCompatProvider::from_completion(
            BackendKind::DeepSeek,
            &BackendParams::new("m", "p"),
            json!({"choices": {"oops": true}}),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiError);
        assert_eq!(err.provider, "deepseek");
    }

    fn unit(chunk: Value) -> Unit {
        OpenAiCompatProvider::chunk_unit(BackendKind::DeepSeek, &chunk)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_stream_units() {
        let first = unit(json!({
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
        }));
        assert_eq!(first, Unit::default());

        let mid = unit(json!({
            "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": null}]
        }));
        assert_eq!(mid.text, "Hi");
        assert!(!mid.done);

        let last = unit(json!({
            "choices": [{"index": 0, "delta": {"content": "!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        }));
        assert_eq!(last.text, "!");
        assert!(last.done);
        assert_eq!(last.tokens, Some(TokenUsage::new(5, 3, Some(8))));
    }

    #[test]
    fn test_wrong_shape_chunk_is_skipped() {
        let skipped = OpenAiCompatProvider::chunk_unit(BackendKind::Mistral, &json!({"choices": {}}));
        assert_eq!(skipped.unwrap(), None);
    }

    #[test]
    fn test_error_chunks() {
        let err = OpenAiCompatProvider::chunk_unit(
            BackendKind::DeepSeek,
            &json!({"error": {"message": "Insufficient Balance", "type": "unknown_error"}}),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiError);
        assert_eq!(err.provider, "deepseek");
        assert_eq!(err.message, "Deepseek stream error: Insufficient Balance");

        let flat = OpenAiCompatProvider::chunk_unit(
            BackendKind::Mistral,
            &json!({"object": "error", "message": "Service unavailable", "type": "internal_error"}),
        )
        .unwrap_err();
        assert_eq!(flat.provider, "mistral");
        assert_eq!(flat.message, "Mistral stream error: Service unavailable");
    }

    #[tokio::test]
    async fn test_error_event_mid_stream() {
        use futures::StreamExt;

        let provider = OpenAiCompatProvider::mistral(Client::new(), None);
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Bon\"},\"finish_reason\":null}]}\n\n",
            "data: {\"object\":\"error\",\"message\":\"Service unavailable\"}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks = vec![Ok::<_, std::convert::Infallible>(body.as_bytes().to_vec())];
        let items: Vec<_> = decode_events(
            BackendKind::Mistral,
            futures::stream::iter(chunks),
            provider.mapper(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().text, "Bon");
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.provider, "mistral");
    }
}
