use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use switchboard_channels::{ChannelHub, Supervisor};
use switchboard_core::classifier::{load_training_set, optimize};
use switchboard_core::{
    Classifier, KeywordClassifier, LlmClassifier, LlmProvider, OpenAiProvider, OptimizeOutcome,
    SwitchboardContext,
};
use switchboard_gateway::GatewayServer;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{ClassifierBackend, OpenAiProviderConfig, SwitchboardConfig};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard: routes customer chats to the right agent")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agents and the gateway
    Start,

    /// Classify a chat history once and print the routing decision
    Classify {
        /// A chat history, or a single line of user text
        text: String,
    },

    /// Compile the LLM classifier from a labeled training set
    Optimize {
        /// Training set to use instead of the configured one
        #[arg(long)]
        training_set: Option<PathBuf>,

        /// Recompile even if the artifact already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may already be set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Classify { text } => cmd_classify(&cli.config, &text).await,
        Commands::Optimize {
            training_set,
            overwrite,
        } => cmd_optimize(&cli.config, training_set, overwrite).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        restrict_permissions(&config_path).await?;
        info!("Created default config at {}", config_path.display());
    }

    let training_path = config_dir.join("training_set.json");
    if !training_path.exists() {
        tokio::fs::write(&training_path, include_str!("../../../config/training_set.json")).await?;
        info!("Created sample training set at {}", training_path.display());
    }

    println!("Switchboard initialized at {}", config_dir.display());
    println!("Set OPENAI_API_KEY, then run `switchboard optimize` to compile the classifier.");
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    // Debug output masks secrets
    println!("{:#?}", cfg);
    Ok(())
}

async fn cmd_classify(config_path: &Option<PathBuf>, text: &str) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let provider = build_provider(&cfg.providers.openai)?;
    let classifier = build_classifier(&cfg, provider).await?;

    let classification = classifier.classify(&as_chat_history(text)).await?;
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

async fn cmd_optimize(
    config_path: &Option<PathBuf>,
    training_set: Option<PathBuf>,
    overwrite: bool,
) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    if !cfg.providers.openai.has_key() {
        bail!("OPENAI_API_KEY is not set; the optimizer needs a model to bootstrap demos");
    }
    let provider = build_provider(&cfg.providers.openai)?;

    let training_path = training_set.unwrap_or_else(|| cfg.classifier.training_set());
    let examples = load_training_set(&training_path)
        .await
        .with_context(|| format!("Failed to read training set {}", training_path.display()))?;

    let artifact_path = cfg.classifier.artifact_path();
    let outcome = optimize(
        provider,
        &examples,
        &artifact_path,
        overwrite,
        &cfg.classifier.optimizer,
    )
    .await
    .context("Optimization failed")?;

    match outcome {
        OptimizeOutcome::Skipped { path } => {
            println!(
                "{} already exists; pass --overwrite to recompile.",
                path.display()
            );
        }
        OptimizeOutcome::Compiled {
            path,
            bootstrapped,
            labeled,
            errors,
        } => {
            println!(
                "Compiled {} bootstrapped and {} labeled demos into {} ({} failed predictions).",
                bootstrapped,
                labeled,
                path.display(),
                errors
            );
        }
    }
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    info!("Starting switchboard...");

    let provider = build_provider(&cfg.providers.openai)?;
    let classifier = build_classifier(&cfg, provider.clone()).await?;

    let hub = ChannelHub::new();
    let mut ctx = SwitchboardContext::new(hub.clone(), classifier)
        .with_routing(cfg.routing)
        .with_channel_names(cfg.channels.clone());
    if cfg.providers.openai.has_key() {
        ctx = ctx.with_provider(provider);
    } else {
        warn!("OPENAI_API_KEY is not set: LLM classification will fail and policy answers are canned");
    }
    info!("Runtime context: {:?}", ctx);

    let mut supervisor = Supervisor::new(hub);
    for agent in ctx.build_agents()? {
        supervisor.add_agent(agent);
    }

    if cfg.gateway.enabled {
        let addr = cfg.gateway.socket_addr()?;
        let server = GatewayServer::new(addr, cfg.gateway.auth_token.clone(), ctx.human()?);
        supervisor.add_agent(server.relay_agent(&ctx.agents()?)?);
        supervisor = supervisor.with_server(server.run());
        info!("Gateway enabled on {}", addr);
    }

    info!("Agents: {}", supervisor.agent_names().join(", "));

    let report = supervisor
        .run_until(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        })
        .await;

    println!("Switchboard stopped.");
    report.into_result()
}

/// Built even without a key; the provider rejects calls until one is set
fn build_provider(cfg: &OpenAiProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider = OpenAiProvider::new(
        cfg.api_key.trim().to_string(),
        cfg.model.clone(),
        cfg.base_url.clone(),
        cfg.max_tokens,
        cfg.timeout(),
    )?;
    Ok(Arc::new(provider))
}

async fn build_classifier(
    cfg: &SwitchboardConfig,
    provider: Arc<dyn LlmProvider>,
) -> Result<Arc<dyn Classifier>> {
    match cfg.classifier.backend {
        ClassifierBackend::Keyword => Ok(Arc::new(KeywordClassifier::new())),
        ClassifierBackend::Llm => {
            let path = cfg.classifier.artifact_path();
            let classifier = LlmClassifier::load(provider, &path)
                .await
                .context("Failed to load the LLM classifier")?;
            info!(
                "Loaded classifier from {} ({} demos)",
                path.display(),
                classifier.program().demos.len()
            );
            Ok(Arc::new(classifier))
        }
    }
}

/// Treat plain text as a single user turn
fn as_chat_history(text: &str) -> String {
    let text = text.trim();
    if text.lines().any(|line| line.starts_with("User:")) {
        text.to_string()
    } else {
        format!("User: {}", text)
    }
}
