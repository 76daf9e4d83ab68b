//! Routes a validated request to its backend adapter

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::SdkError;
use crate::providers::Backend;
use crate::registration::BackendRegistration;
use crate::request::{BackendKind, Generation, Output, Request, RoutedRequest};

/// Adapter set plus the keys to call them with
pub struct Dispatcher {
    registration: BackendRegistration,
    backends: HashMap<BackendKind, Arc<dyn Backend>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.backends.keys().collect();
        kinds.sort();
        f.debug_struct("Dispatcher")
            .field("registration", &self.registration)
            .field("backends", &kinds)
            .finish()
    }
}

impl Dispatcher {
    /// Later adapters for the same backend replace earlier ones
    pub fn new(
        registration: BackendRegistration,
        backends: impl IntoIterator<Item = Arc<dyn Backend>>,
    ) -> Self {
        let backends = backends.into_iter().map(|b| (b.kind(), b)).collect();
        Self {
            registration,
            backends,
        }
    }

    pub fn registration(&self) -> &BackendRegistration {
        &self.registration
    }

    /// Invoke the adapter for an already validated request. Streaming
    /// requests return the adapter's stream untouched.
    pub async fn dispatch(&self, request: &RoutedRequest) -> Result<Generation, SdkError> {
        if request.is_streaming() {
            let (backend, api_key) = self.resolve(request.backend)?;
            if !backend.supports_streaming() {
                return Err(SdkError::streaming_not_supported(request.backend.as_str()));
            }
            debug!(
                "Dispatching streaming request to {} (model={})",
                request.backend, request.params.model
            );
            backend
                .invoke_stream(request, api_key)
                .await
                .map(Generation::Stream)
        } else {
            self.invoke(request).await.map(Generation::Complete)
        }
    }

    /// Non-streaming call, whatever the request's `stream` flag says
    pub async fn invoke(&self, request: &RoutedRequest) -> Result<Output, SdkError> {
        let (backend, api_key) = self.resolve(request.backend)?;
        debug!(
            "Dispatching request to {} (model={})",
            request.backend, request.params.model
        );
        backend.invoke(request, api_key).await
    }

    /// A backend without a key on file, or without an adapter, is a configuration fault
    fn resolve(&self, kind: BackendKind) -> Result<(&dyn Backend, &str), SdkError> {
        let api_key = self.registration.api_key(kind).ok_or_else(|| {
            SdkError::config(
                format!("{} is not configured: no apiKey on file", kind),
                kind.as_str(),
            )
        })?;
        let backend = self.backends.get(&kind).ok_or_else(|| {
            SdkError::config(format!("no adapter installed for {}", kind), kind.as_str())
        })?;
        Ok((backend.as_ref(), api_key))
    }
}

/// Bind a request to its first populated backend without validating it.
///
/// [`crate::GenChat::generate`] rejects an empty request during validation,
/// so this only reports `NO_PROVIDER` to callers that drive a [`Dispatcher`]
/// with unvalidated requests.
pub fn select(request: &Request) -> Result<RoutedRequest, SdkError> {
    request
        .populated()
        .next()
        .map(|(kind, params)| RoutedRequest::new(kind, params.clone()))
        .ok_or_else(SdkError::no_provider)
}
