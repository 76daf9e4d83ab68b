//! OpenAI provider (Responses API)

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::SdkError;
use crate::request::{BackendKind, BackendParams, EventStream, Output, RoutedRequest, TokenUsage};

use super::stream::{Unit, decode_events};
use super::types::{Backend, ensure_routed};
use super::{count, join_texts};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/responses", self.base_url.trim_end_matches('/'))
    }

    fn request_body(params: &BackendParams, stream: bool) -> Value {
        let mut body = json!({
            "model": params.model,
            "input": params.prompt,
        });
        if let Some(system) = params.system.as_deref().filter(|s| !s.trim().is_empty()) {
            body["instructions"] = json!(system);
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// `output_text` when present, otherwise every text block of every output item
    fn output_text(payload: &Value) -> String {
        if let Some(text) = payload.get("output_text").and_then(Value::as_str) {
            return text.to_string();
        }
        payload
            .get("output")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| join_texts(item.get("content"), "text"))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn usage(payload: &Value) -> Option<TokenUsage> {
        let usage = payload.get("usage").filter(|u| u.is_object())?;
        Some(TokenUsage::new(
            count(usage, "input_tokens"),
            count(usage, "output_tokens"),
            usage
                .get("total_tokens")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
        ))
    }

    fn from_openai_response(params: &BackendParams, payload: Value) -> Result<Output, SdkError> {
        if !payload.is_object() {
            return Err(SdkError::api(
                "OpenAI error: malformed response body",
                BackendKind::OpenAi.as_str(),
            ));
        }
        let data = Self::output_text(&payload);
        let usage = Self::usage(&payload);
        Ok(Output::normalized(BackendKind::OpenAi, params, data, usage, payload))
    }

    /// Map one Responses streaming event
    fn stream_unit(event: &Value) -> Result<Option<Unit>, SdkError> {
        let unit = match event.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta") => Unit {
                text: event
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                done: false,
                tokens: None,
            },
            // `error` carries its fields at top level or under `error`
            Some("error") => {
                let error = event.get("error").filter(|e| e.is_object()).unwrap_or(event);
                return Err(super::stream_error(BackendKind::OpenAi, Some(error)));
            }
            Some("response.failed") => {
                let error = event.pointer("/response/error").filter(|e| !e.is_null());
                return Err(super::stream_error(BackendKind::OpenAi, error));
            }
            Some("response.completed" | "response.incomplete") => Unit {
                text: String::new(),
                done: true,
                tokens: event.get("response").and_then(Self::usage),
            },
            Some(_) => Unit::default(),
            // Untyped snapshot carrying the whole output
            None => {
                if let Some(error) = event.get("error").filter(|e| !e.is_null()) {
                    return Err(super::stream_error(BackendKind::OpenAi, Some(error)));
                }
                let complete = event.get("output_text").is_some()
                    || event.pointer("/output/0/content").is_some();
                Unit {
                    text: Self::output_text(event),
                    done: complete,
                    tokens: Self::usage(event),
                }
            }
        };
        Ok(Some(unit))
    }
}

#[async_trait]
impl Backend for OpenAiProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError> {
        ensure_routed(BackendKind::OpenAi, request)?;
        let params = &request.params;

        debug!("OpenAI request: model={}", params.model);

        let payload = super::send_json(
            BackendKind::OpenAi,
            self.client
                .post(self.endpoint())
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&Self::request_body(params, false)),
        )
        .await?;

        Self::from_openai_response(params, payload)
    }

    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        api_key: &str,
    ) -> Result<EventStream, SdkError> {
        ensure_routed(BackendKind::OpenAi, request)?;
        let params = &request.params;

        debug!("OpenAI streaming request: model={}", params.model);

        let response = super::open_stream(
            BackendKind::OpenAi,
            self.client
                .post(self.endpoint())
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&Self::request_body(params, true)),
        )
        .await?;

        Ok(decode_events(
            BackendKind::OpenAi,
            response.bytes_stream(),
            Self::stream_unit,
        ))
    }
}
