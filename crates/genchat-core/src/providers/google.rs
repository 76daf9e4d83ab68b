//! Google Gemini provider

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::SdkError;
use crate::request::{BackendKind, BackendParams, EventStream, Output, RoutedRequest, TokenUsage};

use super::stream::{Unit, decode_events};
use super::types::{Backend, ensure_routed};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GoogleProvider {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GoogleProvider {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    /// Gemini takes system and prompt as one text part
    fn request_body(params: &BackendParams) -> Value {
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = params.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = params.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }

        let mut body = json!({
            "contents": [{
                "parts": [{ "text": params.combined_input() }],
            }],
        });
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }

    /// Convert a Gemini response payload to the normalized output
    fn from_gemini_response(params: &BackendParams, payload: Value) -> Result<Output, SdkError> {
        let resp = GeminiApiResponse::deserialize(&payload).map_err(|e| {
            SdkError::api(
                format!("Gemini error: malformed response body: {}", e),
                BackendKind::Google.as_str(),
            )
        })?;

        Ok(Output::normalized(
            BackendKind::Google,
            params,
            resp.text(),
            resp.usage(),
            payload,
        ))
    }

    /// Map one streamed chunk. Gemini reports mid-stream failures as an
    /// `error` object in place of candidates.
    fn stream_unit(value: &Value) -> Result<Option<Unit>, SdkError> {
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            return Err(super::stream_error(BackendKind::Google, Some(error)));
        }
        let Ok(resp) = GeminiApiResponse::deserialize(value) else {
            return Ok(None);
        };
        Ok(Some(Unit {
            text: resp.text(),
            done: resp
                .candidates
                .first()
                .is_some_and(|c| c.finish_reason.is_some()),
            tokens: resp.usage(),
        }))
    }
}

#[async_trait]
impl Backend for GoogleProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError> {
        ensure_routed(BackendKind::Google, request)?;
        let params = &request.params;

        debug!("Gemini request: model={}", params.model);

        let payload = super::send_json(
            BackendKind::Google,
            self.client
                .post(self.endpoint(&params.model, "generateContent"))
                .header("x-goog-api-key", api_key)
                .json(&Self::request_body(params)),
        )
        .await?;

        Self::from_gemini_response(params, payload)
    }

    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        api_key: &str,
    ) -> Result<EventStream, SdkError> {
        ensure_routed(BackendKind::Google, request)?;
        let params = &request.params;

        debug!("Gemini streaming request: model={}", params.model);

        let response = super::open_stream(
            BackendKind::Google,
            self.client
                .post(self.endpoint(&params.model, "streamGenerateContent"))
                .query(&[("alt", "sse")])
                .header("x-goog-api-key", api_key)
                .json(&Self::request_body(params)),
        )
        .await?;

        Ok(decode_events(
            BackendKind::Google,
            response.bytes_stream(),
            Self::stream_unit,
        ))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Default, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsageMetadata>,
}

impl GeminiApiResponse {
    /// Text parts of the first candidate, concatenated
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage_metadata.as_ref().map(|u| {
            TokenUsage::new(
                u.prompt_token_count.unwrap_or(0),
                u.candidates_token_count.unwrap_or(0),
                u.total_token_count,
            )
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}
