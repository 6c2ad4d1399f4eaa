use crate::config::Settings;
use crate::fanout::{FanOut, FanOutEvent};
use crate::gateway::{self, AppState};
use crate::provider::azure::AzureFoundryProvider;
use crate::provider::gemini::GeminiProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::{Adapter, ThinkingMode};
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;

pub fn build_http(settings: &Settings) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = settings.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Every enabled provider, in a fixed order. Unconfigured ones are kept so they report why.
pub fn build_fanout(http: &reqwest::Client, settings: &Settings) -> FanOut {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
    if settings.openai.enabled {
        adapters.push(Arc::new(OpenAiProvider::new(http.clone(), settings.openai.clone())));
    }
    if settings.gemini.enabled {
        adapters.push(Arc::new(GeminiProvider::new(http.clone(), settings.gemini.clone())));
    }
    if settings.azure_foundry.enabled {
        adapters.push(Arc::new(AzureFoundryProvider::new(
            http.clone(),
            settings.azure_foundry.clone(),
        )));
    }

    for a in &adapters {
        tracing::debug!(provider = %a.kind(), model = a.model(), configured = a.is_configured(), "provider enabled");
    }
    FanOut::new(adapters)
}

pub async fn cmd_ask(fanout: &FanOut, prompt: &str, mode: ThinkingMode) -> anyhow::Result<()> {
    let mut events = fanout.run(prompt, mode);
    let mut out = std::io::stdout();
    let mut success = false;

    while let Some(event) = events.next().await {
        if let FanOutEvent::Done { success: s } = event {
            success = s;
        }
        let line = gateway::encode_line(event).context("failed to encode event")?;
        out.write_all(&line).context("failed to write to stdout")?;
        out.flush().ok();
    }

    if !success {
        anyhow::bail!("no provider returned a successful response");
    }
    Ok(())
}

pub fn cmd_providers(fanout: &FanOut) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    for info in gateway::describe_providers(fanout) {
        let status = if info.configured { "configured" } else { "missing credentials" };
        writeln!(out, "{:<14} {:<32} {status}", info.provider.as_str(), info.label)?;
    }
    Ok(())
}

pub async fn cmd_serve(
    fanout: FanOut,
    settings: &Settings,
    bind: Option<String>,
    static_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| settings.bind.clone());
    let static_dir = static_dir.or_else(|| settings.static_dir.clone());
    if let Some(dir) = &static_dir {
        tracing::info!(dir = %dir.display(), "serving static files");
    }

    let app = gateway::router(AppState { fanout }, static_dir);
    gateway::serve(&bind, app).await
}
