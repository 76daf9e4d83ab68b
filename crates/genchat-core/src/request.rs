//! Backend-agnostic request, response and stream-event shapes

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::error::{CORE_PROVIDER, SdkError};

/// One of the supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Google,
    OpenAi,
    DeepSeek,
    Mistral,
    Anthropic,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        Self::Google,
        Self::OpenAi,
        Self::DeepSeek,
        Self::Mistral,
        Self::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::Anthropic => "anthropic",
        }
    }

    /// Vendor label used in backend error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Google => "Gemini",
            Self::OpenAi => "OpenAI",
            Self::DeepSeek => "Deepseek",
            Self::Mistral => "Mistral",
            Self::Anthropic => "Anthropic",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| SdkError::validation(format!("unknown provider '{}'", s), CORE_PROVIDER))
    }
}

/// Parameters for a single backend call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendParams {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Attach the untouched backend payload to the output
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub stream: bool,
}

impl BackendParams {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// System and prompt folded into one input string, system first
    pub fn combined_input(&self) -> String {
        match self.system.as_deref().map(str::trim) {
            Some(system) if !system.is_empty() => format!("{} {}", system, self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

/// Caller-facing request: one optional section per backend.
///
/// Exactly one section must be populated; [`crate::validate::validate_provider`]
/// turns a valid `Request` into a [`RoutedRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<BackendParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<BackendParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<BackendParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mistral: Option<BackendParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<BackendParams>,
}

impl Request {
    /// A request populated for a single backend
    pub fn for_backend(backend: BackendKind, params: BackendParams) -> Self {
        Self::default().with(backend, params)
    }

    /// Populate (or replace) one backend section
    pub fn with(mut self, backend: BackendKind, params: BackendParams) -> Self {
        *self.slot_mut(backend) = Some(params);
        self
    }

    pub fn get(&self, backend: BackendKind) -> Option<&BackendParams> {
        match backend {
            BackendKind::Google => self.google.as_ref(),
            BackendKind::OpenAi => self.openai.as_ref(),
            BackendKind::DeepSeek => self.deepseek.as_ref(),
            BackendKind::Mistral => self.mistral.as_ref(),
            BackendKind::Anthropic => self.anthropic.as_ref(),
        }
    }

    fn slot_mut(&mut self, backend: BackendKind) -> &mut Option<BackendParams> {
        match backend {
            BackendKind::Google => &mut self.google,
            BackendKind::OpenAi => &mut self.openai,
            BackendKind::DeepSeek => &mut self.deepseek,
            BackendKind::Mistral => &mut self.mistral,
            BackendKind::Anthropic => &mut self.anthropic,
        }
    }

    /// Populated sections in canonical backend order
    pub fn populated(&self) -> impl Iterator<Item = (BackendKind, &BackendParams)> {
        BackendKind::ALL
            .into_iter()
            .filter_map(|k| self.get(k).map(|p| (k, p)))
    }
}

/// A request bound to exactly one backend
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRequest {
    pub backend: BackendKind,
    pub params: BackendParams,
}

impl RoutedRequest {
    pub fn new(backend: BackendKind, params: BackendParams) -> Self {
        Self { backend, params }
    }

    pub fn is_streaming(&self) -> bool {
        self.params.stream
    }
}

impl From<RoutedRequest> for Request {
    fn from(routed: RoutedRequest) -> Self {
        Request::for_backend(routed.backend, routed.params)
    }
}

/// Token counts as reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    /// Build from backend counts, deriving the total when the backend omits it
    pub fn new(prompt: u32, completion: u32, total: Option<u32>) -> Self {
        Self {
            prompt,
            completion,
            total: total.unwrap_or(prompt.saturating_add(completion)),
        }
    }
}

/// Normalized result of a non-streaming call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub data: String,
    pub provider: BackendKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Output {
    /// Assemble an output, keeping `payload` only when the caller asked for it
    pub fn normalized(
        provider: BackendKind,
        params: &BackendParams,
        data: String,
        usage: Option<TokenUsage>,
        payload: Value,
    ) -> Self {
        Self {
            data,
            provider,
            model: params.model.clone(),
            raw: params.raw.then_some(payload),
            usage,
        }
    }
}

/// One decoded unit of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub text: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub raw: Value,
    pub provider: BackendKind,
}

impl StreamEvent {
    /// Terminal event emitted when a backend closes without signalling completion
    pub fn terminal(provider: BackendKind) -> Self {
        Self {
            text: String::new(),
            done: true,
            tokens: None,
            raw: Value::Null,
            provider,
        }
    }
}

/// Lazily decoded stream of events. Dropping it releases the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, SdkError>> + Send>>;

/// What `generate` hands back: a finished output or a live stream
pub enum Generation {
    Complete(Output),
    Stream(EventStream),
}

impl Generation {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn into_output(self) -> Option<Output> {
        match self {
            Self::Complete(output) => Some(output),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<EventStream> {
        match self {
            Self::Complete(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(output) => f.debug_tuple("Complete").field(output).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}
