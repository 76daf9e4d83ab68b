//! Client facade: one request shape in, one response shape out

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::error::SdkError;
use crate::fallback::FallbackEngine;
use crate::providers::{Backend, default_backend};
use crate::registration::BackendRegistration;
use crate::request::{BackendKind, Generation, Request, RoutedRequest};
use crate::validate::{validate_config, validate_provider};

/// Multi-backend client with optional fallback
#[derive(Debug)]
pub struct GenChat {
    dispatcher: Dispatcher,
    fallback: FallbackEngine,
}

impl GenChat {
    /// Build a client using the stock HTTP adapters for every backend
    pub fn new(registration: BackendRegistration) -> Result<Self, SdkError> {
        let client = reqwest::Client::new();
        let backends: Vec<Arc<dyn Backend>> = BackendKind::ALL
            .into_iter()
            .map(|kind| default_backend(kind, client.clone(), &registration))
            .collect();
        Self::with_backends(registration, backends)
    }

    /// Build a client around caller-supplied adapters
    pub fn with_backends(
        registration: BackendRegistration,
        backends: impl IntoIterator<Item = Arc<dyn Backend>>,
    ) -> Result<Self, SdkError> {
        validate_config(&registration)?;
        Ok(Self {
            dispatcher: Dispatcher::new(registration, backends),
            fallback: FallbackEngine::new(),
        })
    }

    pub fn registration(&self) -> &BackendRegistration {
        self.dispatcher.registration()
    }

    /// Generate a completion or open a stream.
    ///
    /// Non-streaming failures are retried on other backends when fallback is
    /// enabled. Streaming failures always propagate. Every failure, including
    /// a panicking adapter, comes back as an [`SdkError`].
    pub async fn generate(&self, request: &Request) -> Result<Generation, SdkError> {
        AssertUnwindSafe(self.generate_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SdkError::unexpected(panic_message(panic.as_ref()))))
    }

    async fn generate_inner(&self, request: &Request) -> Result<Generation, SdkError> {
        let routed = validate_provider(request)?;

        match self.dispatcher.dispatch(&routed).await {
            Ok(generation) => Ok(generation),
            Err(err) if self.should_fall_back(&routed, &err) => {
                warn!("Provider {} failed, trying fallback: {}", routed.backend, err);
                self.fallback
                    .run(&self.dispatcher, &err, &routed)
                    .await
                    .map(Generation::Complete)
            }
            Err(err) => Err(err),
        }
    }

    fn should_fall_back(&self, request: &RoutedRequest, err: &SdkError) -> bool {
        self.registration().fallback && !request.is_streaming() && err.code.is_fallback_eligible()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("unexpected failure during dispatch: {}", detail)
}
