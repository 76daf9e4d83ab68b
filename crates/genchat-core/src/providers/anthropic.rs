//! Anthropic Claude provider (Messages API, non-streaming only)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::SdkError;
use crate::request::{BackendKind, BackendParams, EventStream, Output, RoutedRequest, TokenUsage};

use super::types::{Backend, ensure_routed};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn request_body(params: &BackendParams) -> Value {
        let mut body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": params.prompt}],
        });
        if let Some(system) = params.system.as_deref().filter(|s| !s.trim().is_empty()) {
            body["system"] = json!(system);
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    /// Convert a Messages API payload to the normalized output
    fn from_anthropic_response(params: &BackendParams, payload: Value) -> Result<Output, SdkError> {
        let resp = AnthropicApiResponse::deserialize(&payload).map_err(|e| {
            SdkError::api(
                format!("Anthropic error: malformed response body: {}", e),
                BackendKind::Anthropic.as_str(),
            )
        })?;

        let data = resp
            .content
            .iter()
            .filter(|b| b.r#type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        let usage = resp
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens, None));

        Ok(Output::normalized(
            BackendKind::Anthropic,
            params,
            data,
            usage,
            payload,
        ))
    }
}

#[async_trait]
impl Backend for AnthropicProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError> {
        ensure_routed(BackendKind::Anthropic, request)?;
        if request.is_streaming() {
            return Err(SdkError::streaming_not_supported(BackendKind::Anthropic.as_str()));
        }
        let params = &request.params;

        debug!("Anthropic request: model={}", params.model);

        let payload = super::send_json(
            BackendKind::Anthropic,
            self.client
                .post(self.endpoint())
                .header("x-api-key", api_key)
                .header("anthropic-version", API_VERSION)
                .json(&Self::request_body(params)),
        )
        .await?;

        Self::from_anthropic_response(params, payload)
    }

    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        _api_key: &str,
    ) -> Result<EventStream, SdkError> {
        ensure_routed(BackendKind::Anthropic, request)?;
        Err(SdkError::streaming_not_supported(BackendKind::Anthropic.as_str()))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
