//! Open Sonar - Perplexity Sonar compatible answer server
//!
//! Answers chat completions from web search results with citations,
//! backed by Ollama, OpenAI or Anthropic.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use sonar::config::{EnvSource, SonarConfig};
use sonar::error::SonarResult;
use sonar::logging::{self, LogFormat, LogLevel};
use sonar::Server;

#[derive(Parser, Debug)]
#[command(name = "open-sonar")]
#[command(version)]
#[command(about = "Perplexity Sonar compatible answer server", long_about = None)]
struct Args {
    /// Path to JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override HTTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override HTTP server hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log output format (text, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Read variables from this env file
    #[arg(long, conflicts_with = "no_env_file")]
    env_file: Option<String>,

    /// Do not read an env file
    #[arg(long)]
    no_env_file: bool,

    /// Bearer token accepted by the API
    #[arg(long)]
    auth_token: Option<String>,

    /// Default LLM provider (ollama, openai, anthropic)
    #[arg(long)]
    provider: Option<String>,

    /// Answer from the mock LLM and mock search
    #[arg(long)]
    test_mode: bool,
}

fn load_config(args: &Args) -> SonarResult<SonarConfig> {
    let mut config = match &args.config {
        Some(path) => SonarConfig::from_file(path)?,
        None => SonarConfig::new(),
    };

    if let Some(path) = &args.env_file {
        config.env_file_path = path.clone();
    }
    if args.no_env_file {
        config.load_env_file = false;
    }

    let mut env = EnvSource::process();
    if config.load_env_file {
        env = env.with_env_file(&config.env_file_path);
    }
    config.apply_env(&env);

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(hostname) = &args.hostname {
        config.hostname = hostname.clone();
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }
    if let Some(token) = &args.auth_token {
        config.auth_token = Some(token.clone());
    }
    if let Some(provider) = &args.provider {
        config.default_provider = Some(provider.clone());
    }
    if args.test_mode {
        config.test_mode = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> SonarResult<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            logging::init(LogLevel::Info, LogFormat::Text);
            error!("Invalid configuration: {}", e);
            return Err(e);
        }
    };
    logging::init(config.log_level, config.log_format);

    info!("🚀 Starting Open Sonar v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("📋 Configuration loaded from {}", path.display());
    }
    info!(
        "📡 Server will listen on http://{}:{}",
        config.hostname, config.port
    );

    let mut server = Server::new(config);
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }
    Ok(())
}
