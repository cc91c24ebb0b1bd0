mod logging;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use compass_agents::{ExtractOptions, MetadataPolicy, ProviderRegistry, extract_with};
use compass_config::{AppConfig, ConfigLoader};
use compass_db::Database;
use compass_gateway::{AppState, GatewayServer};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "compass", version, about = "College Compass counseling service")]
struct Cli {
    /// Directory holding models.yaml and prompts.yaml
    #[arg(long, env = "COMPASS_CONFIG_DIR", default_value = "config", global = true)]
    config_dir: PathBuf,

    /// Environment section of models.yaml to load
    #[arg(long = "env", env = "APP_ENV", default_value = "development", global = true)]
    environment: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create or upgrade the database schema
    Migrate,
    /// Load and validate configuration, then report agents and provider health
    CheckConfig,
    /// Extract actionable items from a counselor reply (file or stdin)
    Extract {
        file: Option<PathBuf>,
        /// Drop items without metadata
        #[arg(long)]
        strict: bool,
        /// Bold item text in the display string
        #[arg(long)]
        emphasize: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }

    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Command::Serve { port } => {
            let mut config = load_config(&cli.config_dir, &cli.environment)?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Command::Migrate => {
            let config = load_config(&cli.config_dir, &cli.environment)?;
            open_database(&config)?;
            info!("database schema is up to date");
            Ok(())
        }
        Command::CheckConfig => {
            let config = load_config(&cli.config_dir, &cli.environment)?;
            check_config(&config).await
        }
        Command::Extract {
            file,
            strict,
            emphasize,
        } => extract(file.as_deref(), strict, emphasize),
    }
}

fn load_config(config_dir: &Path, environment: &str) -> Result<AppConfig> {
    ConfigLoader::new(config_dir)
        .with_environment(environment)
        .load()
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))
}

fn open_database(config: &AppConfig) -> Result<Database> {
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db = Database::open(&config.database.path, config.database.pool_size)?;
    Ok(db)
}

async fn serve(config: AppConfig) -> Result<()> {
    let db = open_database(&config)?;
    let registry = Arc::new(ProviderRegistry::from_config(&config));
    if registry.provider_ids().is_empty() {
        warn!("no LLM providers configured; chat requests will fail");
    }

    let state = AppState::new(config, db, registry)?;
    GatewayServer::new(Arc::new(state)).run().await?;
    Ok(())
}

async fn check_config(config: &AppConfig) -> Result<()> {
    let mut agents: Vec<_> = config.agents.iter().collect();
    agents.sort_by(|a, b| a.0.cmp(b.0));
    for (name, agent) in agents {
        let fallback = agent
            .fallback
            .as_ref()
            .map(|f| format!(" (fallback {}/{})", f.provider, f.model_name))
            .unwrap_or_default();
        println!(
            "agent {name}: {}/{} temperature={}{fallback}",
            agent.model.provider, agent.model.model_name, agent.model.temperature
        );
        if config.prompt(&agent.system_prompt_template).is_empty() {
            println!("  warning: prompt template '{}' is empty", agent.system_prompt_template);
        }
    }

    let registry = ProviderRegistry::from_config(config);
    let mut unhealthy = 0;
    for (id, healthy) in registry.health_check_all().await {
        println!("provider {id}: {}", if healthy { "ok" } else { "unreachable" });
        if !healthy {
            unhealthy += 1;
        }
    }
    if unhealthy > 0 {
        bail!("{unhealthy} provider(s) failed the health check");
    }
    Ok(())
}

fn extract(file: Option<&Path>, strict: bool, emphasize: bool) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let options = ExtractOptions {
        policy: if strict {
            MetadataPolicy::Strict
        } else {
            MetadataPolicy::Lenient
        },
        emphasize,
    };
    let extraction = extract_with(&text, &options);
    let output = serde_json::json!({
        "display": extraction.display,
        "items": extraction.items,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
