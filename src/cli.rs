use crate::provider::ThinkingMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Send one prompt to several LLM providers at once and compare latency.
#[derive(Debug, Parser)]
#[command(name = "benchgate")]
#[command(version)]
#[command(about = "Multi-provider LLM streaming benchmark gateway", long_about = None)]
pub struct Args {
    /// Config file (default: <config dir>/config.toml)
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Reasoning preset for a one-shot prompt: "off" or "on"
    #[arg(long = "thinking", default_value = "off")]
    pub thinking: ThinkingMode,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (used when no subcommand is given); events are printed as NDJSON
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Listen address (default: config `bind`, BENCHGATE_BIND, or 127.0.0.1:3000)
        #[arg(long = "bind", value_name = "ADDR")]
        bind: Option<String>,

        /// Serve the chat UI from this directory
        #[arg(long = "static-dir", value_name = "DIR")]
        static_dir: Option<PathBuf>,
    },

    /// List enabled providers and whether their credentials are present
    Providers,
}
