pub mod azure;
pub mod gemini;
pub mod openai;
mod types;

pub use types::*;

use crate::error::ProviderError;
use crate::metrics::{Metrics, Milestones, Usage};
use crate::sse::SseDecoder;
use futures_core::future::BoxFuture;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// What a single decoded provider event (or a non-streaming body) contributes.
#[derive(Debug, Default)]
pub struct EventUpdate {
    pub text: Option<String>,
    pub usage: Usage,
}

/// Wire-level description of one provider API.
///
/// Implementations only shape requests and map their own event schema; the shared
/// streaming driver owns timing, progress, accumulation and fallback.
pub trait Provider: Send + Sync + 'static {
    type Event: DeserializeOwned + Send;

    const KIND: ProviderKind;

    fn model_id(&self) -> &str;

    /// Fails with [`ProviderError::Configuration`] when credentials or endpoints are missing.
    fn check_config(&self) -> Result<(), ProviderError>;

    fn thinking_budget(&self, mode: ThinkingMode) -> ThinkingBudget;

    fn stream_request(&self, req: &ProviderRequest) -> Result<RequestBuilder, ProviderError>;

    /// Non-streaming variant of the same call, if the API has one.
    fn completion_request(&self, _req: &ProviderRequest) -> Result<Option<RequestBuilder>, ProviderError> {
        Ok(None)
    }

    fn on_event(&self, event: Self::Event) -> EventUpdate;

    fn parse_completion(&self, body: &[u8]) -> Result<EventUpdate, ProviderError>;
}

/// Object-safe face of a provider, as seen by the fan-out.
pub trait Adapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn is_configured(&self) -> bool;

    fn invoke<'a>(
        &'a self,
        request: &'a ProviderRequest,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<ProviderOutcome, ProviderError>>;
}

impl<P: Provider> Adapter for P {
    fn kind(&self) -> ProviderKind {
        P::KIND
    }

    fn model(&self) -> &str {
        self.model_id()
    }

    fn is_configured(&self) -> bool {
        self.check_config().is_ok()
    }

    fn invoke<'a>(
        &'a self,
        request: &'a ProviderRequest,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<ProviderOutcome, ProviderError>> {
        Box::pin(stream_once(self, request, progress))
    }
}

/// Progress reporter handed to one adapter invocation.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    provider: ProviderKind,
    model: String,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(provider: ProviderKind, model: impl Into<String>, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            provider,
            model: model.into(),
            tx,
        }
    }

    pub fn emit(&self, stage: Stage, elapsed_ms: f64, message: impl Into<String>) {
        // A closed receiver means nobody is listening anymore; the call still completes.
        let _ = self.tx.send(ProgressEvent {
            provider: self.provider,
            model: self.model.clone(),
            stage,
            elapsed_ms,
            message: message.into(),
        });
    }
}

#[derive(Default)]
struct Accumulator {
    text: String,
    usage: Usage,
}

impl Accumulator {
    fn absorb(&mut self, update: EventUpdate, clock: &mut Milestones, progress: &ProgressSink) {
        if let Some(delta) = update.text.filter(|t| !t.is_empty()) {
            if let Some(at) = clock.mark_first_token() {
                progress.emit(Stage::FirstToken, at, "first visible token");
            }
            self.text.push_str(&delta);
        }
        self.usage.merge(update.usage);
    }
}

async fn stream_once<P: Provider>(
    provider: &P,
    request: &ProviderRequest,
    progress: ProgressSink,
) -> Result<ProviderOutcome, ProviderError> {
    provider.check_config()?;
    let budget = provider.thinking_budget(request.thinking_mode);

    let mut clock = Milestones::start();
    progress.emit(Stage::Started, 0.0, format!("requesting {}", request.model));

    let resp = provider.stream_request(request)?.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let mut acc = Accumulator::default();
    let mut decoder = SseDecoder::<P::Event>::new();
    let mut body = resp.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        if let Some(at) = clock.mark_connected() {
            progress.emit(Stage::Connected, at, "first byte received");
        }
        for event in decoder.push(&chunk) {
            acc.absorb(provider.on_event(event), &mut clock, &progress);
        }
    }

    if !clock.is_connected() {
        return Err(ProviderError::EmptyBody {
            status: status.as_u16(),
        });
    }
    for event in decoder.finish() {
        acc.absorb(provider.on_event(event), &mut clock, &progress);
    }

    let at = clock.mark_completed();
    progress.emit(Stage::Completed, at, format!("{} chars streamed", acc.text.len()));

    let mut streaming_enabled = true;
    if acc.text.trim().is_empty() {
        tracing::debug!(provider = %P::KIND, model = %request.model, "stream produced no text; trying non-streaming call");
        if let Some(update) = fallback(provider, request).await {
            acc.text = update.text.unwrap_or_default();
            acc.usage = update.usage;
            streaming_enabled = false;
            clock.mark_completed();
        }
    }

    let metrics = Metrics::compute(clock.offsets(), &acc.usage, &acc.text, budget, streaming_enabled);
    Ok(ProviderOutcome::success(
        P::KIND,
        request.model.clone(),
        acc.text,
        metrics,
    ))
}

/// One non-streaming attempt. Only a non-blank answer is returned; failures are logged and dropped
/// so the (empty) streaming result stands.
async fn fallback<P: Provider>(provider: &P, request: &ProviderRequest) -> Option<EventUpdate> {
    match complete_once(provider, request).await {
        Ok(Some(update)) if update.text.as_deref().is_some_and(|t| !t.trim().is_empty()) => Some(update),
        Ok(_) => {
            tracing::debug!(provider = %P::KIND, "non-streaming call returned no text either");
            None
        }
        Err(e) => {
            tracing::warn!(provider = %P::KIND, error = %e, "non-streaming fallback failed");
            None
        }
    }
}

async fn complete_once<P: Provider>(
    provider: &P,
    request: &ProviderRequest,
) -> Result<Option<EventUpdate>, ProviderError> {
    let Some(builder) = provider.completion_request(request)? else {
        return Ok(None);
    };

    let resp = builder.send().await?;
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    provider.parse_completion(&body).map(Some)
}
