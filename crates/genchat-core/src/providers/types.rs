//! Capability interface shared by every backend adapter

use async_trait::async_trait;

use crate::error::SdkError;
use crate::request::{BackendKind, EventStream, Output, RoutedRequest};

/// Trait that all backend adapters implement
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this adapter talks to
    fn kind(&self) -> BackendKind;

    /// Whether [`Backend::invoke_stream`] is implemented
    fn supports_streaming(&self) -> bool {
        true
    }

    /// One request, one normalized output
    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError>;

    /// Open a streaming connection. Fails before yielding anything when the
    /// backend cannot be reached or answers with a non-2xx status.
    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        api_key: &str,
    ) -> Result<EventStream, SdkError>;
}

/// Guard against being handed a request meant for another backend
pub(crate) fn ensure_routed(backend: BackendKind, request: &RoutedRequest) -> Result<(), SdkError> {
    if request.backend != backend {
        return Err(SdkError::config(
            format!("{} provider config missing", backend),
            backend.as_str(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::request::BackendParams;

    #[test]
    fn test_ensure_routed() {
        let req = RoutedRequest::new(BackendKind::Google, BackendParams::new("m", "p"));
        assert!(ensure_routed(BackendKind::Google, &req).is_ok());

        let err = ensure_routed(BackendKind::Mistral, &req).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
        assert_eq!(err.provider, "mistral");
    }
}
