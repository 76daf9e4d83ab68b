//! Per-client backend registration (API keys + fallback flag)

use std::collections::BTreeMap;

use crate::request::BackendKind;

/// Credentials for one registered backend
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BackendCredentials {
    pub api_key: String,
    /// Override for the backend's default endpoint root
    pub base_url: Option<String>,
}

impl BackendCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl std::fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Which backends a client may call, and whether failures fall back.
///
/// Built once and handed to [`crate::GenChat::new`], which owns it for the
/// lifetime of the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendRegistration {
    backends: BTreeMap<BackendKind, BackendCredentials>,
    pub fallback: bool,
}

impl BackendRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend by API key
    pub fn with_backend(self, backend: BackendKind, api_key: impl Into<String>) -> Self {
        self.with_credentials(backend, BackendCredentials::new(api_key))
    }

    pub fn with_credentials(mut self, backend: BackendKind, credentials: BackendCredentials) -> Self {
        self.backends.insert(backend, credentials);
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn credentials(&self, backend: BackendKind) -> Option<&BackendCredentials> {
        self.backends.get(&backend)
    }

    pub fn api_key(&self, backend: BackendKind) -> Option<&str> {
        self.credentials(backend).map(|c| c.api_key.as_str())
    }

    pub fn is_registered(&self, backend: BackendKind) -> bool {
        self.backends.contains_key(&backend)
    }

    /// Registered backends in canonical order
    pub fn registered(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.backends.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Mask a secret for display, keeping a short prefix and suffix
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_in_canonical_order() {
        let reg = BackendRegistration::new()
            .with_backend(BackendKind::Mistral, "m-key")
            .with_backend(BackendKind::Google, "g-key");
        let kinds: Vec<_> = reg.registered().collect();
        assert_eq!(kinds, vec![BackendKind::Google, BackendKind::Mistral]);
        assert_eq!(reg.api_key(BackendKind::Google), Some("g-key"));
        assert!(!reg.is_registered(BackendKind::OpenAi));
        assert!(!reg.fallback);
    }

    #[test]
    fn test_debug_hides_keys() {
        let reg = BackendRegistration::new()
            .with_backend(BackendKind::OpenAi, "sk-very-secret-key")
            .with_fallback(true);
        let debug = format!("{:?}", reg);
        assert!(!debug.contains("sk-very-secret-key"));
        assert!(debug.contains("sk-...-key"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("AIzaSyExample1234"), "AIz...1234");
    }
}
