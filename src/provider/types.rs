use crate::error::ValidationError;
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    AzureFoundry,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::AzureFoundry => "azure_foundry",
        }
    }

    /// Human-facing name for cards and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::AzureFoundry => "Azure Foundry",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary reasoning preset; each provider maps it to its own native knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    #[default]
    Off,
    On,
}

impl FromStr for ThinkingMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ThinkingMode::Off),
            "on" => Ok(ThinkingMode::On),
            other => Err(ValidationError::UnknownThinkingMode(other.to_string())),
        }
    }
}

/// The reasoning setting actually sent upstream: an effort label or a token budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ThinkingBudget {
    Effort(&'static str),
    Tokens(u32),
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub provider: ProviderKind,
    pub model: String,
    pub prompt: String,
    pub thinking_mode: ThinkingMode,
}

/// One provider's final answer, as streamed to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutcome {
    pub provider: ProviderKind,
    pub model: String,
    pub response_text: String,
    pub metrics: Option<Metrics>,
    pub is_error: bool,
}

impl ProviderOutcome {
    pub fn success(provider: ProviderKind, model: String, response_text: String, metrics: Metrics) -> Self {
        Self {
            provider,
            model,
            response_text,
            metrics: Some(metrics),
            is_error: false,
        }
    }

    pub fn failure(provider: ProviderKind, model: String, message: String) -> Self {
        Self {
            provider,
            model,
            response_text: message,
            metrics: None,
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Connected,
    FirstToken,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub provider: ProviderKind,
    pub model: String,
    pub stage: Stage,
    pub elapsed_ms: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thinking_mode_parses_only_known_values() {
        assert_eq!("on".parse::<ThinkingMode>(), Ok(ThinkingMode::On));
        assert_eq!("off".parse::<ThinkingMode>(), Ok(ThinkingMode::Off));
        assert_eq!(
            "high".parse::<ThinkingMode>(),
            Err(ValidationError::UnknownThinkingMode("high".into()))
        );
    }

    #[test]
    fn wire_names() {
        assert_eq!(serde_json::to_value(ProviderKind::OpenAi).unwrap(), json!("openai"));
        assert_eq!(
            serde_json::to_value(ProviderKind::AzureFoundry).unwrap(),
            json!("azure_foundry")
        );
        assert_eq!(serde_json::to_value(Stage::FirstToken).unwrap(), json!("first_token"));
        assert_eq!(serde_json::to_value(ThinkingBudget::Tokens(0)).unwrap(), json!(0));
        assert_eq!(
            serde_json::to_value(ThinkingBudget::Effort("minimal")).unwrap(),
            json!("minimal")
        );
    }

    #[test]
    fn failure_outcome_has_no_metrics() {
        let o = ProviderOutcome::failure(ProviderKind::Gemini, "g".into(), "boom".into());
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(
            v,
            json!({
                "provider": "gemini",
                "model": "g",
                "responseText": "boom",
                "metrics": null,
                "isError": true
            })
        );
    }
}
