//! Concurrent fan-out of one prompt to every adapter, merged in completion order.

use crate::provider::{
    Adapter, ProgressEvent, ProgressSink, ProviderKind, ProviderOutcome, ProviderRequest, ThinkingMode,
};
use futures_core::stream::BoxStream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One line of the multiplexed output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanOutEvent {
    Progress { progress: ProgressEvent },
    Result { result: ProviderOutcome },
    /// Always last. `success` is false when every provider failed.
    Done { success: bool },
}

#[derive(Clone)]
pub struct FanOut {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl FanOut {
    pub fn new(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self { adapters }
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Launch every adapter and return the merged event stream.
    ///
    /// Progress is forwarded as it arrives, each outcome as soon as its adapter settles, then
    /// a single `Done`. The calls run to completion even if the stream is dropped early.
    pub fn run(&self, prompt: &str, thinking_mode: ThinkingMode) -> BoxStream<'static, FanOutEvent> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(self.adapters.clone(), prompt.to_string(), thinking_mode, out_tx));
        Box::pin(UnboundedReceiverStream::new(out_rx))
    }
}

async fn drive(
    adapters: Vec<Arc<dyn Adapter>>,
    prompt: String,
    thinking_mode: ThinkingMode,
    out: mpsc::UnboundedSender<FanOutEvent>,
) {
    tracing::info!(providers = adapters.len(), ?thinking_mode, "fan-out started");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    // Who each task speaks for, so a task that dies still gets its one result.
    let mut owners: HashMap<tokio::task::Id, (ProviderKind, String)> = HashMap::new();

    for adapter in adapters {
        let request = ProviderRequest {
            provider: adapter.kind(),
            model: adapter.model().to_string(),
            prompt: prompt.clone(),
            thinking_mode,
        };
        let sink = ProgressSink::new(request.provider, request.model.clone(), progress_tx.clone());
        let owner = (request.provider, request.model.clone());
        let handle = tasks.spawn(settle(adapter, request, sink));
        owners.insert(handle.id(), owner);
    }
    drop(progress_tx);

    // Sole writer to `out`, so lines never interleave.
    let mut any_success = false;
    while !tasks.is_empty() {
        tokio::select! {
            // Progress first: an adapter's events are queued before its task finishes,
            // so they always reach the client ahead of its result.
            biased;

            Some(progress) = progress_rx.recv() => {
                let _ = out.send(FanOutEvent::Progress { progress });
            }
            Some(joined) = tasks.join_next_with_id() => {
                let result = match joined {
                    Ok((id, result)) => {
                        owners.remove(&id);
                        result
                    }
                    Err(e) => {
                        let Some((provider, model)) = owners.remove(&e.id()) else {
                            tracing::error!(error = %e, "unknown fan-out task failed");
                            continue;
                        };
                        tracing::error!(%provider, error = %e, "provider task aborted");
                        ProviderOutcome::failure(
                            provider,
                            model,
                            format!("{}: call aborted: {e}", provider.display_name()),
                        )
                    }
                };
                any_success |= !result.is_error;
                tracing::info!(
                    provider = %result.provider,
                    model = %result.model,
                    is_error = result.is_error,
                    total_ms = ?result.metrics.as_ref().and_then(|m| m.total_latency_ms),
                    "provider settled"
                );
                let _ = out.send(FanOutEvent::Result { result });
            }
            else => break,
        }
    }

    while let Ok(progress) = progress_rx.try_recv() {
        let _ = out.send(FanOutEvent::Progress { progress });
    }

    tracing::info!(success = any_success, "fan-out finished");
    let _ = out.send(FanOutEvent::Done { success: any_success });
}

/// Run one adapter to an outcome. Errors become error outcomes; panics surface as join errors.
async fn settle(adapter: Arc<dyn Adapter>, request: ProviderRequest, sink: ProgressSink) -> ProviderOutcome {
    let provider = request.provider;
    match adapter.invoke(&request, sink).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_configuration() {
                tracing::warn!(%provider, error = %e, "provider skipped");
            } else {
                tracing::warn!(%provider, error = %e, "provider call failed");
            }
            ProviderOutcome::failure(provider, request.model, format!("{}: {e}", provider.display_name()))
        }
    }
}
