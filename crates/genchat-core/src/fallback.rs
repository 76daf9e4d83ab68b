//! Retry a failed non-streaming request on the other registered backends

use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{CORE_PROVIDER, ErrorCode, SdkError};
use crate::registration::BackendRegistration;
use crate::request::{BackendKind, BackendParams, Output, RoutedRequest};

/// Fallback priority. Anthropic is never a fallback target.
pub const FALLBACK_ORDER: [BackendKind; 4] = [
    BackendKind::Google,
    BackendKind::OpenAi,
    BackendKind::DeepSeek,
    BackendKind::Mistral,
];

/// Model substituted when a request moves to another backend, since model
/// names do not transfer between vendors
pub fn default_model(backend: BackendKind) -> Option<&'static str> {
    match backend {
        BackendKind::Google => Some("gemini-2.5-flash"),
        BackendKind::OpenAi => Some("gpt-4o-mini"),
        BackendKind::DeepSeek => Some("deepseek-chat"),
        BackendKind::Mistral => Some("mistral-small-latest"),
        BackendKind::Anthropic => None,
    }
}

/// Sequential failover across registered backends
#[derive(Debug, Clone, Default)]
pub struct FallbackEngine;

impl FallbackEngine {
    pub fn new() -> Self {
        Self
    }

    /// Registered fallback targets in priority order, minus the one that failed
    pub fn candidates(registration: &BackendRegistration, failed_provider: &str) -> Vec<BackendKind> {
        FALLBACK_ORDER
            .into_iter()
            .filter(|kind| kind.as_str() != failed_provider)
            .filter(|kind| registration.is_registered(*kind))
            .collect()
    }

    /// Carry the shared fields of `original` over to `candidate` with its default model
    pub fn rewrite(original: &RoutedRequest, candidate: BackendKind) -> Option<RoutedRequest> {
        let model = default_model(candidate)?;
        let shared = &original.params;
        Some(RoutedRequest::new(
            candidate,
            BackendParams {
                model: model.to_string(),
                prompt: shared.prompt.clone(),
                system: shared.system.clone(),
                temperature: shared.temperature,
                max_tokens: shared.max_tokens,
                raw: shared.raw,
                stream: false,
            },
        ))
    }

    /// Try each candidate once, in order, one at a time. The first success
    /// wins; otherwise the last candidate error is returned.
    pub async fn run(
        &self,
        dispatcher: &Dispatcher,
        failed: &SdkError,
        original: &RoutedRequest,
    ) -> Result<Output, SdkError> {
        let candidates = Self::candidates(dispatcher.registration(), &failed.provider);
        if candidates.is_empty() {
            return Err(SdkError::new(
                format!(
                    "fallback enabled but no alternate provider is configured (failed: {})",
                    failed.provider
                ),
                CORE_PROVIDER,
                ErrorCode::FallbackConfigError,
            ));
        }

        let mut last_error = None;

        for (idx, candidate) in candidates.iter().enumerate() {
            let Some(request) = Self::rewrite(original, *candidate) else {
                continue;
            };

            debug!(
                "Fallback attempt {}/{}: {} ({})",
                idx + 1,
                candidates.len(),
                candidate,
                request.params.model
            );

            match dispatcher.invoke(&request).await {
                Ok(output) => {
                    info!(
                        "Request succeeded on fallback provider {} ({}) after {} failed",
                        candidate, request.params.model, failed.provider
                    );
                    return Ok(output);
                }
                Err(e) => {
                    warn!("Fallback provider {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SdkError::new(
                "all fallback providers failed",
                CORE_PROVIDER,
                ErrorCode::FallbackAllFailed,
            )
        }))
    }
}
