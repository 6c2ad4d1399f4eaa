use super::{EventUpdate, Provider, ProviderKind, ProviderRequest, ThinkingBudget, ThinkingMode};
use crate::config::ApiSettings;
use crate::error::ProviderError;
use crate::metrics::Usage;
use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};

/// Gemini Generative Language API (`models/{model}:streamGenerateContent`).
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    settings: ApiSettings,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, settings: ApiSettings) -> Self {
        Self { http, settings }
    }

    fn build_url(&self, model: &str, stream: bool) -> Result<Url, ProviderError> {
        let key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Configuration("GEMINI_API_KEY is not set".into()))?;

        let invalid = |e: String| {
            ProviderError::Configuration(format!("invalid Gemini base URL {:?}: {e}", self.settings.base_url))
        };
        // A base without a trailing slash would lose its last path segment on join.
        let base = format!("{}/", self.settings.base_url.trim_end_matches('/'));
        let base = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;

        // streamGenerateContent speaks Server-Sent Events with alt=sse; generateContent returns one JSON body.
        let method = if stream { "streamGenerateContent" } else { "generateContent" };
        let mut url = base
            .join(&format!("v1beta/models/{model}:{method}"))
            .map_err(|e| invalid(e.to_string()))?;

        url.query_pairs_mut().append_pair("key", key.expose());
        if stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url)
    }

    fn request(&self, req: &ProviderRequest, stream: bool) -> Result<RequestBuilder, ProviderError> {
        let url = self.build_url(&req.model, stream)?;
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(req.prompt.clone()),
                    thought: None,
                }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: thinking_tokens(req.thinking_mode),
                },
            },
        };
        Ok(self.http.post(url).json(&body))
    }
}

fn thinking_tokens(mode: ThinkingMode) -> u32 {
    match mode {
        ThinkingMode::Off => 0,
        ThinkingMode::On => 1024,
    }
}

impl Provider for GeminiProvider {
    type Event = GenerateContentResponse;

    const KIND: ProviderKind = ProviderKind::Gemini;

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    fn check_config(&self) -> Result<(), ProviderError> {
        match &self.settings.api_key {
            Some(_) => Ok(()),
            None => Err(ProviderError::Configuration("GEMINI_API_KEY is not set".into())),
        }
    }

    fn thinking_budget(&self, mode: ThinkingMode) -> ThinkingBudget {
        ThinkingBudget::Tokens(thinking_tokens(mode))
    }

    fn stream_request(&self, req: &ProviderRequest) -> Result<RequestBuilder, ProviderError> {
        self.request(req, true)
    }

    fn completion_request(&self, req: &ProviderRequest) -> Result<Option<RequestBuilder>, ProviderError> {
        self.request(req, false).map(Some)
    }

    fn on_event(&self, event: GenerateContentResponse) -> EventUpdate {
        EventUpdate {
            text: extract_text(&event),
            usage: usage_of(&event),
        }
    }

    fn parse_completion(&self, body: &[u8]) -> Result<EventUpdate, ProviderError> {
        let response: GenerateContentResponse = serde_json::from_slice(body)?;
        Ok(self.on_event(response))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

/// One streamed chunk, or the whole non-streaming body; Gemini uses the same shape for both.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    /// Thought summaries are flagged and never shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    thoughts_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

fn extract_text(r: &GenerateContentResponse) -> Option<String> {
    // Concatenate the visible text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in content.parts.iter().filter(|p| p.thought != Some(true)) {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

fn usage_of(r: &GenerateContentResponse) -> Usage {
    let meta = r.usage_metadata.clone().unwrap_or_default();
    Usage {
        input_tokens: meta.prompt_token_count,
        visible_output_tokens: meta.candidates_token_count,
        billed_output_tokens: billed_tokens(&meta),
        finish_reason: r.candidates.first().and_then(|c| c.finish_reason.clone()),
    }
}

/// Candidate plus thought tokens, capped by `total - prompt` when both are reported so a
/// model that already folds thoughts into the candidate count is not charged twice.
fn billed_tokens(meta: &UsageMetadata) -> Option<u64> {
    let summed = match (meta.candidates_token_count, meta.thoughts_token_count) {
        (None, None) => return None,
        (c, t) => c.unwrap_or(0).saturating_add(t.unwrap_or(0)),
    };
    match (meta.total_token_count, meta.prompt_token_count) {
        (Some(total), Some(prompt)) => Some(summed.min(total.saturating_sub(prompt))),
        _ => Some(summed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{drain, request, sink, sse, stages};
    use crate::provider::{Adapter, Stage};
    use mockito::Matcher;
    use serde_json::json;

    const STREAM_PATH: &str = "/v1beta/models/gemini-test:streamGenerateContent";
    const UNARY_PATH: &str = "/v1beta/models/gemini-test:generateContent";

    fn provider(base_url: String) -> GeminiProvider {
        GeminiProvider::new(
            reqwest::Client::new(),
            ApiSettings {
                enabled: true,
                api_key: Some(crate::config::ApiKey::new("g-key")),
                model: "gemini-test".into(),
                base_url,
            },
        )
    }

    #[tokio::test]
    async fn streams_visible_parts_and_skips_thoughts() {
        let mut server = mockito::Server::new_async().await;
        let body = sse(&[
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"planning...","thought":true}]}}]}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi "}]}}]}"#,
            concat!(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"there"}]},"finishReason":"STOP"}],"#,
                r#""usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"thoughtsTokenCount":20,"totalTokenCount":25}}"#,
            ),
        ]);
        let mock = server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("key".into(), "g-key".into()),
                Matcher::UrlEncoded("alt".into(), "sse".into()),
            ]))
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {"thinkingConfig": {"thinkingBudget": 1024}}
            })))
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let p = provider(server.url());
        let req = request(ProviderKind::Gemini, "gemini-test", "hello", ThinkingMode::On);
        let (progress, mut rx) = sink(ProviderKind::Gemini, "gemini-test");

        let outcome = p.invoke(&req, progress).await.unwrap();
        mock.assert_async().await;

        assert_eq!(outcome.response_text, "Hi there");
        let m = outcome.metrics.unwrap();
        assert_eq!(m.visible_output_tokens, Some(2));
        assert_eq!(m.billed_output_tokens, Some(22));
        assert_eq!(m.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(m.thinking_budget, ThinkingBudget::Tokens(1024));
        assert_eq!(
            stages(&drain(&mut rx)),
            vec![Stage::Started, Stage::Connected, Stage::FirstToken, Stage::Completed]
        );
    }

    #[tokio::test]
    async fn metadata_only_stream_uses_generate_content_fallback() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::Any)
            .with_body(sse(&[
                r#"{"usageMetadata":{"promptTokenCount":3}}"#,
                r#"{"candidates":[{"finishReason":"STOP"}]}"#,
            ]))
            .create_async()
            .await;
        let unary = server
            .mock("POST", UNARY_PATH)
            .match_query(Matcher::UrlEncoded("key".into(), "g-key".into()))
            .with_body(
                json!({
                    "candidates": [{"content": {"parts": [{"text": "from fallback"}]}, "finishReason": "STOP"}],
                    "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let p = provider(server.url());
        let req = request(ProviderKind::Gemini, "gemini-test", "hello", ThinkingMode::Off);
        let (progress, mut rx) = sink(ProviderKind::Gemini, "gemini-test");

        let outcome = p.invoke(&req, progress).await.unwrap();
        unary.assert_async().await;

        assert_eq!(outcome.response_text, "from fallback");
        let m = outcome.metrics.unwrap();
        assert!(!m.streaming_enabled);
        assert_eq!(m.first_visible_token_ms, None);
        assert!(m.ttft_ms.is_some());
        assert_eq!(m.billed_output_tokens, Some(2));
        assert_eq!(m.thinking_budget, ThinkingBudget::Tokens(0));
        // No first_token: the fallback is outside the streaming path.
        assert_eq!(
            stages(&drain(&mut rx)),
            vec![Stage::Started, Stage::Connected, Stage::Completed]
        );
    }

    #[test]
    fn billed_tokens_do_not_double_count_folded_thoughts() {
        let meta = UsageMetadata {
            prompt_token_count: Some(4),
            candidates_token_count: Some(30),
            thoughts_token_count: Some(20),
            total_token_count: Some(34),
        };
        assert_eq!(billed_tokens(&meta), Some(30));
        assert_eq!(billed_tokens(&UsageMetadata::default()), None);
    }

    #[test]
    fn billed_tokens_saturate_on_huge_counts() {
        let meta = UsageMetadata {
            candidates_token_count: Some(u64::MAX),
            thoughts_token_count: Some(5),
            ..UsageMetadata::default()
        };
        assert_eq!(billed_tokens(&meta), Some(u64::MAX));
    }

    #[test]
    fn base_url_path_prefix_is_kept() {
        for base in ["https://proxy.example.com/gemini", "https://proxy.example.com/gemini/"] {
            let url = provider(base.to_string()).build_url("m", true).unwrap();
            assert_eq!(
                url.as_str(),
                "https://proxy.example.com/gemini/v1beta/models/m:streamGenerateContent?key=g-key&alt=sse"
            );
        }

        let url = provider("https://generativelanguage.googleapis.com".into())
            .build_url("m", false)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/m:generateContent?key=g-key"
        );
    }
}
