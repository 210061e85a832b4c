use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcpchat::agent::{Agent, AgentSettings};
use mcpchat::client::LlmClient;
use mcpchat::config::{Config, ConfigStore, ProviderKind};

mod input;
mod session;
mod tools;

use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Provider to use (openai or anthropic), overrides the config file
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use, overrides the config file
    #[arg(short, long)]
    model: Option<String>,

    /// Path to the config file (defaults to ~/.config/mcpchat/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send a single message, print the reply and exit
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let store = ConfigStore::new(path);
    let mut config = Config::clone(&*store.get().context("Failed to load configuration")?);

    if let Some(provider) = &cli.provider {
        config.default_provider = provider.parse::<ProviderKind>()?;
    }
    if let Some(model) = cli.model {
        config.default_model = model;
    }

    info!(
        provider = %config.default_provider,
        model = %config.default_model,
        "starting session"
    );
    let client = LlmClient::new(&config).with_context(|| {
        format!(
            "Could not set up the {} provider; set its API key in {} or the environment",
            config.default_provider,
            store.path().display()
        )
    })?;
    let mut agent = Agent::new(
        client,
        Arc::new(tools::local_tools()),
        AgentSettings::from_config(&config),
    );
    agent
        .initialize()
        .await
        .context("Failed to discover tools")?;

    let mut session = Session::new(agent);
    match cli.message {
        Some(message) => session.headless(&message).await,
        None => session.start().await,
    }
}
