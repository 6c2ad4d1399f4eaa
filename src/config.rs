use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

const OPENAI_DEFAULT_MODEL: &str = "gpt-5-mini";
const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";
const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/";
const AZURE_DEFAULT_MODEL: &str = "gpt-5-mini";

/// `config.toml`. Everything is optional; environment variables win over the file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Listen address for `serve`.
    pub bind: Option<String>,

    /// Directory with the chat UI, served as the router fallback.
    pub static_dir: Option<PathBuf>,

    /// Upstream TCP connect timeout. There is no overall request deadline.
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub openai: ProviderSection,

    #[serde(default)]
    pub gemini: ProviderSection,

    #[serde(default)]
    pub azure_foundry: ProviderSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderSection {
    pub enabled: Option<bool>,
    pub api_key: Option<ApiKey>,
    pub model: Option<String>,
    pub base_url: Option<String>,

    // Azure Foundry only.
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Provider credential. `Debug` never prints the full value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = &self.0;
        if k.len() > 12 && k.is_ascii() {
            write!(f, "{}...{}", &k[..4], &k[k.len() - 4..])
        } else {
            f.write_str("***")
        }
    }
}

/// Settings for a provider addressed by API key and base URL (OpenAI, Gemini).
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AzureFoundrySettings {
    pub enabled: bool,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
}

/// Process-wide configuration, resolved once at startup and handed to each adapter.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub static_dir: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub openai: ApiSettings,
    pub gemini: ApiSettings,
    pub azure_foundry: AzureFoundrySettings,
}

impl Settings {
    /// Merge the optional file config with environment lookups (`env` wins).
    pub fn resolve(cfg: Option<&Config>, env: impl Fn(&str) -> Option<String>) -> Self {
        let default = Config::default();
        let cfg = cfg.unwrap_or(&default);
        let var = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api = |section: &ProviderSection, prefix: &str, model: &str, base: &str| ApiSettings {
            enabled: section.enabled.unwrap_or(true),
            api_key: var(&format!("{prefix}_API_KEY"))
                .map(ApiKey::new)
                .or_else(|| section.api_key.clone()),
            model: var(&format!("{prefix}_MODEL"))
                .or_else(|| section.model.clone())
                .unwrap_or_else(|| model.to_string()),
            base_url: var(&format!("{prefix}_BASE_URL"))
                .or_else(|| section.base_url.clone())
                .unwrap_or_else(|| base.to_string()),
        };

        let az = &cfg.azure_foundry;
        let azure_foundry = AzureFoundrySettings {
            enabled: az.enabled.unwrap_or(true),
            api_key: var("AZURE_FOUNDRY_API_KEY")
                .map(ApiKey::new)
                .or_else(|| az.api_key.clone()),
            model: var("AZURE_FOUNDRY_MODEL")
                .or_else(|| az.model.clone())
                .unwrap_or_else(|| AZURE_DEFAULT_MODEL.to_string()),
            endpoint: var("AZURE_FOUNDRY_ENDPOINT").or_else(|| az.endpoint.clone()),
            deployment: var("AZURE_FOUNDRY_DEPLOYMENT").or_else(|| az.deployment.clone()),
            api_version: var("AZURE_FOUNDRY_API_VERSION").or_else(|| az.api_version.clone()),
        };

        Self {
            bind: var("BENCHGATE_BIND")
                .or_else(|| cfg.bind.clone())
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            static_dir: cfg.static_dir.clone(),
            connect_timeout: cfg.connect_timeout_secs.map(Duration::from_secs),
            openai: api(&cfg.openai, "OPENAI", OPENAI_DEFAULT_MODEL, OPENAI_DEFAULT_BASE),
            gemini: api(&cfg.gemini, "GEMINI", GEMINI_DEFAULT_MODEL, GEMINI_DEFAULT_BASE),
            azure_foundry,
        }
    }
}
