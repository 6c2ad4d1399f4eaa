use super::{EventUpdate, Provider, ProviderKind, ProviderRequest, ThinkingBudget, ThinkingMode};
use crate::config::AzureFoundrySettings;
use crate::error::ProviderError;
use crate::metrics::Usage;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

/// Azure AI Foundry deployment speaking the chat-completions API.
#[derive(Debug, Clone)]
pub struct AzureFoundryProvider {
    http: reqwest::Client,
    settings: AzureFoundrySettings,
}

/// Everything needed to address a deployment, once validated.
struct Target<'a> {
    api_key: &'a str,
    endpoint: &'a str,
    deployment: &'a str,
    api_version: &'a str,
}

impl AzureFoundryProvider {
    pub fn new(http: reqwest::Client, settings: AzureFoundrySettings) -> Self {
        Self { http, settings }
    }

    fn target(&self) -> Result<Target<'_>, ProviderError> {
        let s = &self.settings;
        let fields = [
            ("AZURE_FOUNDRY_API_KEY", s.api_key.as_ref().map(|k| k.expose())),
            ("AZURE_FOUNDRY_ENDPOINT", s.endpoint.as_deref()),
            ("AZURE_FOUNDRY_DEPLOYMENT", s.deployment.as_deref()),
            ("AZURE_FOUNDRY_API_VERSION", s.api_version.as_deref()),
        ];

        match fields {
            [(_, Some(api_key)), (_, Some(endpoint)), (_, Some(deployment)), (_, Some(api_version))] => Ok(Target {
                api_key,
                endpoint,
                deployment,
                api_version,
            }),
            _ => {
                let missing: Vec<&str> = fields
                    .iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                Err(ProviderError::Configuration(format!("missing {}", missing.join(", "))))
            }
        }
    }

    fn request(&self, req: &ProviderRequest, stream: bool) -> Result<RequestBuilder, ProviderError> {
        let t = self.target()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            t.endpoint.trim_end_matches('/'),
            t.deployment
        );

        let body = ChatCompletionRequest {
            model: &req.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &req.prompt,
            }],
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
            reasoning_effort: reasoning_effort(req.thinking_mode),
        };

        Ok(self
            .http
            .post(url)
            .query(&[("api-version", t.api_version)])
            .header("api-key", t.api_key)
            .json(&body))
    }
}

fn reasoning_effort(mode: ThinkingMode) -> &'static str {
    match mode {
        ThinkingMode::Off => "minimal",
        ThinkingMode::On => "medium",
    }
}

impl Provider for AzureFoundryProvider {
    type Event = ChatCompletionChunk;

    const KIND: ProviderKind = ProviderKind::AzureFoundry;

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    fn check_config(&self) -> Result<(), ProviderError> {
        self.target().map(|_| ())
    }

    fn thinking_budget(&self, mode: ThinkingMode) -> ThinkingBudget {
        ThinkingBudget::Effort(reasoning_effort(mode))
    }

    fn stream_request(&self, req: &ProviderRequest) -> Result<RequestBuilder, ProviderError> {
        self.request(req, true)
    }

    fn completion_request(&self, req: &ProviderRequest) -> Result<Option<RequestBuilder>, ProviderError> {
        self.request(req, false).map(Some)
    }

    fn on_event(&self, event: ChatCompletionChunk) -> EventUpdate {
        let choice = event.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let text = choice.and_then(|c| c.delta).and_then(|d| d.content);

        let mut usage = event.usage.map(ChatUsage::into_usage).unwrap_or_default();
        usage.finish_reason = finish_reason;
        EventUpdate { text, usage }
    }

    fn parse_completion(&self, body: &[u8]) -> Result<EventUpdate, ProviderError> {
        let completion: ChatCompletion = serde_json::from_slice(body)?;
        let choice = completion.choices.into_iter().next();

        let mut usage = completion.usage.map(ChatUsage::into_usage).unwrap_or_default();
        usage.finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        Ok(EventUpdate {
            text: choice.and_then(|c| c.message.content),
            usage,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    reasoning_effort: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// One `chat.completion.chunk`. The trailing `[DONE]` sentinel never decodes into this.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

impl ChatUsage {
    fn into_usage(self) -> Usage {
        let reasoning = self
            .completion_tokens_details
            .and_then(|d| d.reasoning_tokens)
            .unwrap_or(0);
        Usage {
            input_tokens: self.prompt_tokens,
            visible_output_tokens: self.completion_tokens.map(|c| c.saturating_sub(reasoning)),
            billed_output_tokens: self.completion_tokens,
            finish_reason: None,
        }
    }
}
