//! Backend adapters
//!
//! Google Gemini, OpenAI (Responses API), DeepSeek and Mistral (chat
//! completions), and Anthropic. Every adapter implements [`Backend`] and maps
//! its backend's wire format onto [`crate::Output`] / [`crate::StreamEvent`].

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod openai_compat;
pub mod stream;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use types::Backend;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;

use crate::error::SdkError;
use crate::registration::BackendRegistration;
use crate::request::BackendKind;

/// Build the stock adapter for a backend, honouring any base URL override
pub fn default_backend(
    kind: BackendKind,
    client: reqwest::Client,
    registration: &BackendRegistration,
) -> Arc<dyn Backend> {
    let base_url = registration
        .credentials(kind)
        .and_then(|c| c.base_url.clone());

    match kind {
        BackendKind::Google => Arc::new(GoogleProvider::new(client, base_url)),
        BackendKind::OpenAi => Arc::new(OpenAiProvider::new(client, base_url)),
        BackendKind::DeepSeek => Arc::new(OpenAiCompatProvider::deepseek(client, base_url)),
        BackendKind::Mistral => Arc::new(OpenAiCompatProvider::mistral(client, base_url)),
        BackendKind::Anthropic => Arc::new(AnthropicProvider::new(client, base_url)),
    }
}

/// Send a JSON request and return the parsed JSON body of a 2xx answer
pub(crate) async fn send_json(kind: BackendKind, request: RequestBuilder) -> Result<Value, SdkError> {
    let response = send(kind, request).await?;
    let status = response.status();

    let body = response.text().await.map_err(|e| {
        SdkError::api(
            format!("{} error {}: failed to read body: {}", kind.label(), status, e),
            kind.as_str(),
        )
    })?;

    if !status.is_success() {
        return Err(SdkError::api(error_message(kind, status, &body), kind.as_str()));
    }

    serde_json::from_str(&body).map_err(|e| {
        SdkError::api(
            format!("{} error {}: malformed response body: {}", kind.label(), status, e),
            kind.as_str(),
        )
    })
}

/// Open a streaming response, failing before any byte is decoded on non-2xx
pub(crate) async fn open_stream(
    kind: BackendKind,
    request: RequestBuilder,
) -> Result<Response, SdkError> {
    let response = send(kind, request).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SdkError::api(error_message(kind, status, &body), kind.as_str()));
    }
    Ok(response)
}

async fn send(kind: BackendKind, request: RequestBuilder) -> Result<Response, SdkError> {
    request.send().await.map_err(|e| {
        SdkError::api(
            format!("Failed to send request to {} API: {}", kind.label(), e),
            kind.as_str(),
        )
    })
}

/// Prefer the backend's `error.message`, fall back to the raw body
fn error_message(kind: BackendKind, status: StatusCode, body: &str) -> String {
    let envelope = serde_json::from_str::<Value>(body).ok();
    let message = envelope.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
    });

    match message {
        Some(msg) => format!("{} error {}: {}", kind.label(), status.as_u16(), msg),
        None if body.trim().is_empty() => format!("{} error {}", kind.label(), status.as_u16()),
        None => format!("{} error {}: {}", kind.label(), status.as_u16(), body.trim()),
    }
}

/// Error event sent by a backend inside an open stream. `error` is the
/// backend's error object, or `None` when it reported failure without one.
pub(crate) fn stream_error(kind: BackendKind, error: Option<&Value>) -> SdkError {
    let message = error
        .and_then(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .or_else(|| e.as_str())
                .map(str::to_string)
                .or_else(|| (!e.is_null()).then(|| e.to_string()))
        })
        .unwrap_or_else(|| "stream reported failure".to_string());
    SdkError::api(
        format!("{} stream error: {}", kind.label(), message),
        kind.as_str(),
    )
}

/// Join every string found at `field` across an array of JSON objects
pub(crate) fn join_texts(items: Option<&Value>, field: &str) -> String {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Read a token count that may be absent or null
pub(crate) fn count(value: &Value, field: &str) -> u32 {
    value
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}
