mod config;
mod parse_cmd;
mod serve_cmd;

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};

use planloom_core::ai::{GeminiClient, NullRetriever};
use planloom_core::plan::model::ReviewPolicy;
use planloom_core::service::PlannerService;
use planloom_core::store::{ArtifactCache, PlanStore};

use config::PlanloomConfig;
use parse_cmd::ParseOutput;

#[derive(Parser)]
#[command(name = "planloom", about = "Plan-first coding assistant service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a planloom config file
    Init {
        /// API key for the hosted model
        #[arg(long)]
        api_key: String,
        /// Model name
        #[arg(long, default_value = "gemini-2.0-flash")]
        model: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP API server (plans live in memory for the server's lifetime)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 7420)]
        port: u16,
        /// Count approved instead of completed steps as reviewed
        #[arg(long)]
        approval: bool,
    },
    /// Parse captured model output with the plan grammar and print the plan
    Parse {
        /// Path to the plan text file, or `-` for stdin
        file: String,
        /// Fallback title when the text has no PLAN: line
        #[arg(long)]
        title: Option<String>,
        /// Print the full plan tree as JSON instead of an outline
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Execute the `planloom init` command: write the config file.
fn cmd_init(api_key: &str, model: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        llm: config::LlmSection {
            api_key: api_key.to_owned(),
            model: Some(model.to_owned()),
            base_url: None,
        },
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  llm.model = {model}");
    println!();
    println!("Next: run `planloom serve` to start the API.");
    Ok(())
}

/// Execute the `planloom serve` command: wire the service and run the API.
async fn cmd_serve(bind: &str, port: u16, approval: bool) -> anyhow::Result<()> {
    let resolved = PlanloomConfig::resolve()?;

    let mut client = GeminiClient::new(resolved.api_key).with_model(resolved.model);
    if let Some(base_url) = resolved.base_url {
        client = client.with_base_url(base_url);
    }

    let policy = if approval {
        ReviewPolicy::Approval
    } else {
        ReviewPolicy::Execution
    };
    let store = Arc::new(PlanStore::new(policy, ArtifactCache::new()));
    let service = PlannerService::new(store, Arc::new(client), Arc::new(NullRetriever));

    serve_cmd::run_serve(service, bind, port).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            api_key,
            model,
            force,
        } => {
            cmd_init(&api_key, &model, force)?;
        }
        Commands::Serve {
            bind,
            port,
            approval,
        } => {
            cmd_serve(&bind, port, approval).await?;
        }
        Commands::Parse { file, title, json } => {
            let output = if json {
                ParseOutput::Json
            } else {
                ParseOutput::Outline
            };
            parse_cmd::run_parse(&file, title.as_deref(), output)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_owned();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        }
    }

    Ok(())
}
