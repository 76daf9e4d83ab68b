//! Pure request and registration gates, run before any network activity

use crate::error::{CORE_PROVIDER, SdkError};
use crate::registration::BackendRegistration;
use crate::request::{BackendKind, BackendParams, Request, RoutedRequest};

/// Reject a registration with no backends or with a blank API key
pub fn validate_config(registration: &BackendRegistration) -> Result<(), SdkError> {
    if registration.is_empty() {
        return Err(SdkError::validation("no providers configured", CORE_PROVIDER));
    }

    for backend in registration.registered() {
        let key = registration.api_key(backend).unwrap_or_default();
        if key.trim().is_empty() {
            return Err(SdkError::validation(
                format!("{}.apiKey is required", backend),
                backend.as_str(),
            ));
        }
    }

    Ok(())
}

/// Check that exactly one backend is selected and that its section is usable.
///
/// Returns the request bound to the selected backend.
pub fn validate_provider(request: &Request) -> Result<RoutedRequest, SdkError> {
    let mut populated = request.populated();

    let Some((backend, params)) = populated.next() else {
        return Err(SdkError::validation("No provider passed", CORE_PROVIDER));
    };
    if populated.next().is_some() {
        return Err(SdkError::validation("Pass only one provider", CORE_PROVIDER));
    }

    validate_params(backend, params)?;
    Ok(RoutedRequest::new(backend, params.clone()))
}

/// Field rules for one backend section
pub fn validate_params(backend: BackendKind, params: &BackendParams) -> Result<(), SdkError> {
    if params.model.trim().is_empty() {
        return Err(SdkError::validation(
            format!("{}.model is required", backend),
            backend.as_str(),
        ));
    }
    if params.prompt.trim().is_empty() {
        return Err(SdkError::validation(
            format!("{}.prompt is required", backend),
            backend.as_str(),
        ));
    }
    if params.max_tokens == Some(0) {
        return Err(SdkError::validation(
            format!("{}.maxTokens must be at least 1", backend),
            backend.as_str(),
        ));
    }
    Ok(())
}
