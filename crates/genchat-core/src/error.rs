//! The single error kind surfaced to callers

use serde::{Deserialize, Serialize};

/// Provider label used for failures that happen before any backend is involved
pub const CORE_PROVIDER: &str = "core";

/// Stable, machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad request or registration shape. Never retried.
    ValidationError,
    /// Adapter invoked without its section populated, or backend has no key on file
    ConfigError,
    /// Backend returned a failure status or an unusable body
    ApiError,
    /// Streaming requested from a backend without a streaming implementation
    StreamingNotSupported,
    /// No backend selected
    NoProvider,
    /// Fallback enabled but no alternate backend registered
    FallbackConfigError,
    /// Every fallback candidate failed without leaving an error behind
    FallbackAllFailed,
    /// Anything else that escaped the dispatch path
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ApiError => "API_ERROR",
            Self::StreamingNotSupported => "STREAMING_NOT_SUPPORTED",
            Self::NoProvider => "NO_PROVIDER",
            Self::FallbackConfigError => "FALLBACK_CONFIG_ERROR",
            Self::FallbackAllFailed => "FALLBACK_ALL_FAILED",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Whether a non-streaming failure with this code may be retried on another backend
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::ApiError | Self::ConfigError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure of the library, tagged with the backend it came from
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("[{provider}] {code}: {message}")]
pub struct SdkError {
    pub message: String,
    /// Backend name, or `"core"` for dispatch/validation failures
    pub provider: String,
    pub code: ErrorCode,
}

impl SdkError {
    pub fn new(message: impl Into<String>, provider: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            provider: provider.into(),
            code,
        }
    }

    pub fn validation(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(message, provider, ErrorCode::ValidationError)
    }

    pub fn config(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(message, provider, ErrorCode::ConfigError)
    }

    pub fn api(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(message, provider, ErrorCode::ApiError)
    }

    pub fn streaming_not_supported(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        Self::new(
            format!("{} does not support streaming", provider),
            provider,
            ErrorCode::StreamingNotSupported,
        )
    }

    pub fn no_provider() -> Self {
        Self::new("no provider selected", CORE_PROVIDER, ErrorCode::NoProvider)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(message, CORE_PROVIDER, ErrorCode::UnexpectedError)
    }

    pub fn is_core(&self) -> bool {
        self.provider == CORE_PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_provider_and_code() {
        let err = SdkError::api("Gemini error 503: overloaded", "google");
        assert_eq!(
            err.to_string(),
            "[google] API_ERROR: Gemini error 503: overloaded"
        );
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::StreamingNotSupported).unwrap();
        assert_eq!(json, "\"STREAMING_NOT_SUPPORTED\"");
        let back: ErrorCode = serde_json::from_str("\"FALLBACK_ALL_FAILED\"").unwrap();
        assert_eq!(back, ErrorCode::FallbackAllFailed);
    }

    #[test]
    fn test_fallback_eligibility() {
        assert!(ErrorCode::ApiError.is_fallback_eligible());
        assert!(ErrorCode::ConfigError.is_fallback_eligible());
        assert!(!ErrorCode::ValidationError.is_fallback_eligible());
        assert!(!ErrorCode::StreamingNotSupported.is_fallback_eligible());
        assert!(!ErrorCode::NoProvider.is_fallback_eligible());
        assert!(!ErrorCode::FallbackAllFailed.is_fallback_eligible());
    }

    #[test]
    fn test_core_constructors() {
        assert!(SdkError::no_provider().is_core());
        assert_eq!(SdkError::unexpected("boom").code, ErrorCode::UnexpectedError);
        let err = SdkError::streaming_not_supported("anthropic");
        assert_eq!(err.provider, "anthropic");
        assert!(!err.is_core());
    }
}
