mod app;
mod cli;
mod config;
mod error;
mod fanout;
mod gateway;
mod metrics;
mod paths;
mod provider;
mod sse;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => paths::config_file()?,
    };
    let cfg = config::Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let settings = config::Settings::resolve(cfg.as_ref(), |name| std::env::var(name).ok());
    let http = app::build_http(&settings)?;
    let fanout = app::build_fanout(&http, &settings);

    match args.cmd {
        Some(cli::Command::Serve { bind, static_dir }) => {
            return app::cmd_serve(fanout, &settings, bind, static_dir).await;
        }
        Some(cli::Command::Providers) => {
            return app::cmd_providers(&fanout);
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: benchgate \"Hello\" or `benchgate serve`");
    }

    app::cmd_ask(&fanout, &prompt, args.thinking).await
}
