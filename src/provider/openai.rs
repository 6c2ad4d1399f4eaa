use super::{EventUpdate, Provider, ProviderKind, ProviderRequest, ThinkingBudget, ThinkingMode};
use crate::config::ApiSettings;
use crate::error::ProviderError;
use crate::metrics::Usage;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

/// OpenAI Responses API (`POST /v1/responses`).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    settings: ApiSettings,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, settings: ApiSettings) -> Self {
        Self { http, settings }
    }

    fn request(&self, req: &ProviderRequest, stream: bool) -> Result<RequestBuilder, ProviderError> {
        let key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Configuration("OPENAI_API_KEY is not set".into()))?;

        let url = format!("{}/v1/responses", self.settings.base_url.trim_end_matches('/'));
        let body = ResponsesRequest {
            model: &req.model,
            input: &req.prompt,
            stream,
            reasoning: Reasoning {
                effort: reasoning_effort(req.thinking_mode),
            },
        };

        Ok(self.http.post(url).bearer_auth(key.expose()).json(&body))
    }
}

fn reasoning_effort(mode: ThinkingMode) -> &'static str {
    match mode {
        ThinkingMode::Off => "minimal",
        ThinkingMode::On => "medium",
    }
}

impl Provider for OpenAiProvider {
    type Event = ResponsesEvent;

    const KIND: ProviderKind = ProviderKind::OpenAi;

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    fn check_config(&self) -> Result<(), ProviderError> {
        match &self.settings.api_key {
            Some(_) => Ok(()),
            None => Err(ProviderError::Configuration("OPENAI_API_KEY is not set".into())),
        }
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

    fn on_event(&self, event: ResponsesEvent) -> EventUpdate {
        match event {
            ResponsesEvent::OutputTextDelta { delta } => EventUpdate {
                text: Some(delta),
                usage: Usage::default(),
            },
            ResponsesEvent::Completed { response } | ResponsesEvent::Incomplete { response } => EventUpdate {
                text: None,
                usage: response.usage(),
            },
            ResponsesEvent::Other => EventUpdate::default(),
        }
    }

    fn parse_completion(&self, body: &[u8]) -> Result<EventUpdate, ProviderError> {
        let response: ResponseBody = serde_json::from_slice(body)?;
        Ok(EventUpdate {
            text: Some(response.output_text()),
            usage: response.usage(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    stream: bool,
    reasoning: Reasoning,
}

#[derive(Debug, Serialize)]
struct Reasoning {
    effort: &'static str,
}

/// Streaming events, keyed by their `type` field. Only the ones we read are spelled out.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },

    #[serde(rename = "response.completed")]
    Completed { response: ResponseBody },

    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponseBody },

    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct OutputTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponseBody {
    fn usage(&self) -> Usage {
        let usage = self.usage.as_ref();
        let output = usage.and_then(|u| u.output_tokens);
        let reasoning = usage
            .and_then(|u| u.output_tokens_details.as_ref())
            .and_then(|d| d.reasoning_tokens)
            .unwrap_or(0);

        Usage {
            input_tokens: usage.and_then(|u| u.input_tokens),
            // Reasoning tokens are billed as output but never shown.
            visible_output_tokens: output.map(|o| o.saturating_sub(reasoning)),
            billed_output_tokens: output,
            finish_reason: self
                .incomplete_details
                .as_ref()
                .and_then(|d| d.reason.clone())
                .or_else(|| self.status.clone()),
        }
    }

    fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| &item.content)
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{drain, request, sink, sse, stages};
    use crate::provider::{Adapter, Stage};
    use mockito::Matcher;
    use serde_json::json;

    fn settings(base_url: String, key: Option<&str>) -> ApiSettings {
        ApiSettings {
            enabled: true,
            api_key: key.map(crate::config::ApiKey::new),
            model: "gpt-test".into(),
            base_url,
        }
    }

    fn completed(output_tokens: u64, reasoning: u64) -> String {
        json!({
            "type": "response.completed",
            "response": {
                "status": "completed",
                "usage": {
                    "input_tokens": 5,
                    "output_tokens": output_tokens,
                    "output_tokens_details": {"reasoning_tokens": reasoning}
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn streams_deltas_and_reads_usage() {
        let mut server = mockito::Server::new_async().await;
        let body = sse(&[
            r#"{"type":"response.created","response":{"status":"in_progress"}}"#,
            r#"{"type":"response.output_text.delta","delta":"Hello"}"#,
            r#"{"type":"response.output_text.delta","delta":" world"}"#,
            &completed(12, 10),
        ]);
        let mock = server
            .mock("POST", "/v1/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-test",
                "input": "hi",
                "stream": true,
                "reasoning": {"effort": "medium"}
            })))
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), Some("sk-test")));
        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::On);
        let (progress, mut rx) = sink(ProviderKind::OpenAi, "gpt-test");

        let outcome = provider.invoke(&req, progress).await.unwrap();
        mock.assert_async().await;

        assert!(!outcome.is_error);
        assert_eq!(outcome.response_text, "Hello world");
        let m = outcome.metrics.unwrap();
        assert_eq!(m.input_tokens, Some(5));
        assert_eq!(m.billed_output_tokens, Some(12));
        assert_eq!(m.visible_output_tokens, Some(2));
        assert_eq!(m.finish_reason.as_deref(), Some("completed"));
        assert_eq!(m.thinking_budget, ThinkingBudget::Effort("medium"));
        assert!(m.streaming_enabled);

        let (c, f, d) = (
            m.ttft_ms.unwrap(),
            m.first_visible_token_ms.unwrap(),
            m.total_latency_ms.unwrap(),
        );
        assert!(c <= f && f <= d);

        let events = drain(&mut rx);
        assert_eq!(
            stages(&events),
            vec![Stage::Started, Stage::Connected, Stage::FirstToken, Stage::Completed]
        );
    }

    #[tokio::test]
    async fn http_error_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/responses")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), Some("sk-test")));
        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
        let (progress, mut rx) = sink(ProviderKind::OpenAi, "gpt-test");

        let err = provider.invoke(&req, progress).await.unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stages(&drain(&mut rx)), vec![Stage::Started]);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

        let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), None));
        assert!(!provider.is_configured());

        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
        let (progress, mut rx) = sink(ProviderKind::OpenAi, "gpt-test");
        let err = provider.invoke(&req, progress).await.unwrap_err();

        assert!(err.is_configuration());
        assert!(drain(&mut rx).is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_stream_falls_back_to_non_streaming_call() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/responses")
            .match_body(Matcher::PartialJson(json!({"stream": true})))
            .with_body(sse(&[&completed(9, 9)]))
            .create_async()
            .await;
        server
            .mock("POST", "/v1/responses")
            .match_body(Matcher::PartialJson(json!({"stream": false})))
            .with_body(
                json!({
                    "status": "completed",
                    "output": [
                        {"type": "reasoning", "content": []},
                        {"type": "message", "content": [{"type": "output_text", "text": "late answer"}]}
                    ],
                    "usage": {"input_tokens": 5, "output_tokens": 14}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), Some("sk-test")));
        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
        let (progress, _rx) = sink(ProviderKind::OpenAi, "gpt-test");

        let outcome = provider.invoke(&req, progress).await.unwrap();
        assert_eq!(outcome.response_text, "late answer");
        let m = outcome.metrics.unwrap();
        assert!(!m.streaming_enabled);
        assert_eq!(m.first_visible_token_ms, None);
        assert_eq!(m.billed_output_tokens, Some(14));
    }

    #[tokio::test]
    async fn failed_or_blank_fallback_keeps_streaming_result() {
        let fallbacks = [
            (500, "upstream exploded".to_string()),
            (
                200,
                json!({
                    "status": "completed",
                    "output": [{"type": "message", "content": [{"type": "output_text", "text": "  "}]}]
                })
                .to_string(),
            ),
        ];

        for (status, body) in fallbacks {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("POST", "/v1/responses")
                .match_body(Matcher::PartialJson(json!({"stream": true})))
                .with_body(sse(&[&completed(9, 9)]))
                .create_async()
                .await;
            let unary = server
                .mock("POST", "/v1/responses")
                .match_body(Matcher::PartialJson(json!({"stream": false})))
                .with_status(status)
                .with_body(body)
                .create_async()
                .await;

            let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), Some("sk-test")));
            let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
            let (progress, _rx) = sink(ProviderKind::OpenAi, "gpt-test");

            let outcome = provider.invoke(&req, progress).await.unwrap();
            unary.assert_async().await;

            assert!(!outcome.is_error);
            assert_eq!(outcome.response_text, "");
            let m = outcome.metrics.unwrap();
            assert!(m.streaming_enabled);
            assert_eq!(m.billed_output_tokens, Some(9));
            assert_eq!(m.visible_output_tokens, Some(0));
        }
    }

    #[tokio::test]
    async fn incomplete_response_reports_its_reason() {
        let mut server = mockito::Server::new_async().await;
        let incomplete = json!({
            "type": "response.incomplete",
            "response": {
                "status": "incomplete",
                "incomplete_details": {"reason": "max_output_tokens"},
                "usage": {"input_tokens": 2, "output_tokens": 16}
            }
        })
        .to_string();
        server
            .mock("POST", "/v1/responses")
            .with_body(sse(&[
                r#"{"type":"response.output_text.delta","delta":"cut sho"}"#,
                &incomplete,
            ]))
            .create_async()
            .await;

        let provider = OpenAiProvider::new(reqwest::Client::new(), settings(server.url(), Some("sk-test")));
        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
        let (progress, _rx) = sink(ProviderKind::OpenAi, "gpt-test");

        let outcome = provider.invoke(&req, progress).await.unwrap();
        assert_eq!(outcome.response_text, "cut sho");
        let m = outcome.metrics.unwrap();
        assert_eq!(m.finish_reason.as_deref(), Some("max_output_tokens"));
        assert_eq!(m.billed_output_tokens, Some(16));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let provider = OpenAiProvider::new(
            reqwest::Client::new(),
            settings(format!("http://{addr}"), Some("sk-test")),
        );
        let req = request(ProviderKind::OpenAi, "gpt-test", "hi", ThinkingMode::Off);
        let (progress, mut rx) = sink(ProviderKind::OpenAi, "gpt-test");

        let err = provider.invoke(&req, progress).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)), "unexpected error: {err}");
        assert_eq!(stages(&drain(&mut rx)), vec![Stage::Started]);
    }
}
