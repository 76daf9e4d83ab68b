use anyhow::{Context, Result};
use genchat_core::{BackendCredentials, BackendKind, BackendRegistration, mask_secret};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenChatConfig {
    /// Retry failed non-streaming requests on the other configured backends
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mistral: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: BackendKind) -> Option<&ProviderConfig> {
        match kind {
            BackendKind::Google => self.google.as_ref(),
            BackendKind::OpenAi => self.openai.as_ref(),
            BackendKind::DeepSeek => self.deepseek.as_ref(),
            BackendKind::Mistral => self.mistral.as_ref(),
            BackendKind::Anthropic => self.anthropic.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: BackendKind) -> &mut Option<ProviderConfig> {
        match kind {
            BackendKind::Google => &mut self.google,
            BackendKind::OpenAi => &mut self.openai,
            BackendKind::DeepSeek => &mut self.deepseek,
            BackendKind::Mistral => &mut self.mistral,
            BackendKind::Anthropic => &mut self.anthropic,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    /// Override the backend's official endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Environment variable holding the API key for a backend
pub fn key_var(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Google => "GOOGLE_API_KEY",
        BackendKind::OpenAi => "OPENAI_API_KEY",
        BackendKind::DeepSeek => "DEEPSEEK_API_KEY",
        BackendKind::Mistral => "MISTRAL_API_KEY",
        BackendKind::Anthropic => "ANTHROPIC_API_KEY",
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".genchat")
}

impl GenChatConfig {
    /// Load `custom_path`, or `~/.genchat/config.toml`. When no default file
    /// exists the backends are taken from the API-key environment variables.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    debug!("No config at {}, reading API keys from environment", path.display());
                    return Ok(Self::from_env());
                }
                path
            }
        };
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        // Refuse files readable by group or other: they hold API keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `genchat init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content, |name| std::env::var(name).ok())
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML, expanding allowlisted `${VAR}` references through `lookup`
    pub fn parse(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let literal: Self = toml::from_str(content)?;
        for kind in BackendKind::ALL {
            if let Some(p) = literal.providers.get(kind) {
                if !p.api_key.is_empty() && !p.api_key.contains("${") {
                    warn!(
                        "{} API key is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                        kind,
                        key_var(kind)
                    );
                }
            }
        }

        let expanded = expand_env_vars(content, lookup);
        Ok(toml::from_str(&expanded)?)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        for kind in BackendKind::ALL {
            if let Some(api_key) = lookup(key_var(kind)).filter(|k| !k.trim().is_empty()) {
                *config.providers.slot_mut(kind) = Some(ProviderConfig {
                    api_key,
                    base_url: None,
                });
            }
        }
        config
    }

    /// Client registration for every backend with a usable key
    pub fn into_registration(self) -> BackendRegistration {
        let mut registration = BackendRegistration::new().with_fallback(self.fallback);
        for kind in BackendKind::ALL {
            let Some(p) = self.providers.get(kind) else {
                continue;
            };
            if p.api_key.trim().is_empty() {
                warn!(
                    "Skipping {}: api_key is empty (is {} set?)",
                    kind,
                    key_var(kind)
                );
                continue;
            }
            let mut credentials = BackendCredentials::new(p.api_key.clone());
            if let Some(base_url) = p.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
                credentials = credentials.with_base_url(base_url);
            }
            registration = registration.with_credentials(kind, credentials);
        }
        registration
    }

    /// Copy with every API key masked, for display
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for kind in BackendKind::ALL {
            if let Some(p) = masked.providers.slot_mut(kind).as_mut() {
                p.api_key = mask_secret(&p.api_key);
            }
        }
        masked
    }
}

/// Only these variables may be expanded in config files
const ALLOWED_ENV_VARS: &[&str] = &[
    "GOOGLE_API_KEY",
    "OPENAI_API_KEY",
    "DEEPSEEK_API_KEY",
    "MISTRAL_API_KEY",
    "ANTHROPIC_API_KEY",
];

fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_expand_allowlisted_only() {
        let lookup = env(&[("GOOGLE_API_KEY", "g-123"), ("HOME", "/root")]);
        assert_eq!(expand_env_vars("${GOOGLE_API_KEY}", &lookup), "g-123");
        assert_eq!(expand_env_vars("${HOME}/x", &lookup), "${HOME}/x");
        assert_eq!(expand_env_vars("${MISTRAL_API_KEY}", &lookup), "");
        assert_eq!(expand_env_vars("${GOOGLE_API_KEY", &lookup), "${GOOGLE_API_KEY");
    }

    #[test]
    fn test_expansion_does_not_recurse() {
        let lookup = env(&[("OPENAI_API_KEY", "${GOOGLE_API_KEY}"), ("GOOGLE_API_KEY", "g")]);
        assert_eq!(
            expand_env_vars("a=${OPENAI_API_KEY} b=${GOOGLE_API_KEY}", &lookup),
            "a=${GOOGLE_API_KEY} b=g"
        );
    }

    #[test]
    fn test_parse_and_register() {
        let toml = r#"
fallback = true

[providers.google]
api_key = "${GOOGLE_API_KEY}"

[providers.mistral]
api_key = "${MISTRAL_API_KEY}"
base_url = "http://localhost:8080/v1"

[providers.openai]
api_key = "${OPENAI_API_KEY}"
"#;
        let lookup = env(&[("GOOGLE_API_KEY", "g-key"), ("MISTRAL_API_KEY", "m-key")]);
        let cfg = GenChatConfig::parse(toml, lookup).unwrap();
        assert!(cfg.fallback);

        let reg = cfg.into_registration();
        assert!(reg.fallback);
        assert_eq!(reg.api_key(BackendKind::Google), Some("g-key"));
        assert_eq!(
            reg.credentials(BackendKind::Mistral).and_then(|c| c.base_url.as_deref()),
            Some("http://localhost:8080/v1")
        );
        // OPENAI_API_KEY unset: dropped rather than registered blank
        assert!(!reg.is_registered(BackendKind::OpenAi));
        assert_eq!(reg.registered().count(), 2);
    }

    #[test]
    fn test_from_lookup_skips_blank_keys() {
        let cfg = GenChatConfig::from_lookup(env(&[
            ("DEEPSEEK_API_KEY", "d-key"),
            ("ANTHROPIC_API_KEY", "  "),
        ]));
        assert!(!cfg.fallback);
        assert_eq!(cfg.providers.deepseek.as_ref().map(|p| p.api_key.as_str()), Some("d-key"));
        assert!(cfg.providers.anthropic.is_none());
        assert!(cfg.providers.google.is_none());
    }

    #[test]
    fn test_masked_hides_keys() {
        let cfg = GenChatConfig::from_lookup(env(&[("OPENAI_API_KEY", "sk-proj-abcdef123456")]));
        let shown = toml::to_string_pretty(&cfg.masked()).unwrap();
        assert!(shown.contains("sk-...3456"));
        assert!(!shown.contains("abcdef"));

        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("abcdef"));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[providers.anthropic]\napi_key = \"literal-key-value\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }

        let cfg = GenChatConfig::load(&Some(path)).unwrap();
        let reg = cfg.into_registration();
        assert_eq!(reg.api_key(BackendKind::Anthropic), Some("literal-key-value"));
        assert!(!reg.fallback);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissive_file_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "fallback = true\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = GenChatConfig::load(&Some(path)).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }

    #[test]
    fn test_missing_custom_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GenChatConfig::load(&Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("genchat init"));
    }

    #[test]
    fn test_default_template_parses() {
        let cfg = GenChatConfig::parse(
            include_str!("../../../config/default.toml"),
            env(&[("GOOGLE_API_KEY", "g")]),
        )
        .unwrap();
        assert!(cfg.into_registration().is_registered(BackendKind::Google));
    }
}
