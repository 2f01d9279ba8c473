//! # Deployer CLI
//!
//! Command-line front end for the deployment orchestrator. Events are
//! printed to stdout as JSON lines while a command runs; the final result is
//! printed as pretty JSON.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use deployer_core::catalog::Catalog;
use deployer_core::config::SettingsLoader;
use deployer_core::events::SubscriptionId;
use deployer_core::logging::init_structured_logging;
use deployer_core::models::ConfigUpdate;
use deployer_core::orchestration::{CommandClusterProbe, Orchestrator};
use deployer_core::state_machine::JobStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Deploy catalog components to a cluster")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Settings file (default: config/deployer.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay to load (default: DEPLOYER_ENV or development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Do not stream events while the command runs
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show configuration (masked), component states and the catalog
    Status,

    /// Deploy a single component and wait for its job
    Deploy {
        /// Component id
        component: String,
    },

    /// Deploy every component in catalog order
    DeployAll,

    /// Deploy the components of one offer
    DeployOffer {
        /// Offer id
        offer: String,
    },

    /// Remove namespaces and reset component state
    Cleanup {
        /// Component id; omit to clean up everything
        component: Option<String>,

        /// Clean up an offer's components instead
        #[arg(long, conflicts_with = "component")]
        offer: Option<String>,
    },

    /// Update the cluster connection and secrets
    Config {
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        namespace: Option<String>,

        #[arg(long)]
        repo_url: Option<String>,

        /// Secret as NAME=VALUE; an empty value removes the secret
        #[arg(long = "secret", value_parser = parse_secret)]
        secrets: Vec<(String, String)>,
    },

    /// Reconcile component state with the cluster
    Refresh,

    /// Push the current workload token into deployed components
    RotateTokens,
}

fn parse_secret(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err("secret name must not be empty".to_string());
    }
    Ok((name.trim().to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print every event as one JSON line until unsubscribed
fn stream_events(orchestrator: &Orchestrator) -> (SubscriptionId, JoinHandle<()>) {
    let (id, mut events) = orchestrator.subscribe_channel("cli");
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("unprintable event: {e}"),
            }
        }
    });
    (id, printer)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let mut loader = SettingsLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_file(path);
    }
    if let Some(environment) = &cli.environment {
        loader = loader.with_environment(environment);
    }
    let settings = loader.load().context("loading settings")?;
    let catalog = Catalog::from_path(&settings.catalog_path).context("loading catalog")?;
    let probe = CommandClusterProbe::new(settings.cluster.clone());

    let orchestrator = Orchestrator::builder(catalog)
        .with_settings(settings)
        .build()
        .context("starting orchestrator")?;

    let stream = (!cli.quiet).then(|| stream_events(&orchestrator));
    let outcome = run(&orchestrator, &probe, cli.command).await;

    if let Some((id, printer)) = stream {
        orchestrator.unsubscribe(id);
        let _ = printer.await;
    }
    outcome
}

async fn run(orchestrator: &Orchestrator, probe: &CommandClusterProbe, command: Commands) -> Result<()> {
    match command {
        Commands::Status => print_json(&orchestrator.state()),

        Commands::Deploy { component } => {
            let ticket = orchestrator.start_deploy(&component)?;
            info!(job_id = %ticket.job_id, component_id = %ticket.component_id, "Deploy started");
            let status = orchestrator
                .wait_for_job(ticket.job_id)
                .await
                .ok_or_else(|| anyhow!("job {} disappeared", ticket.job_id))?;
            print_json(&orchestrator.component(&component))?;
            if status != JobStatus::Completed {
                bail!("deploy of {component} ended {status}");
            }
            Ok(())
        }

        Commands::DeployAll => {
            let report = orchestrator.deploy_all().await?;
            print_json(&report)?;
            if let Some(stopped) = report.stopped_at {
                bail!("batch stopped at required component {stopped}");
            }
            Ok(())
        }

        Commands::DeployOffer { offer } => {
            let report = orchestrator.deploy_offer(&offer).await?;
            print_json(&report)?;
            if let Some(stopped) = report.stopped_at {
                bail!("offer {offer} stopped at required component {stopped}");
            }
            Ok(())
        }

        Commands::Cleanup { component, offer } => {
            let report = match (component, offer) {
                (Some(component), _) => orchestrator.cleanup_component(&component).await?,
                (None, Some(offer)) => orchestrator.cleanup_offer(&offer).await?,
                (None, None) => orchestrator.cleanup_all().await?,
            };
            print_json(&report)?;
            if !report.success {
                bail!("{}", report.summary);
            }
            Ok(())
        }

        Commands::Config {
            api_url,
            token,
            namespace,
            repo_url,
            secrets,
        } => {
            let secrets: BTreeMap<String, String> = secrets.into_iter().collect();
            let masked = orchestrator.update_config(ConfigUpdate {
                api_url,
                token,
                namespace,
                repo_url,
                secrets: (!secrets.is_empty()).then_some(secrets),
            });
            print_json(&masked)
        }

        Commands::Refresh => {
            let report = orchestrator.refresh_status(probe).await?;
            print_json(&report)
        }

        Commands::RotateTokens => {
            let entries = orchestrator.refresh_tokens(probe).await?;
            print_json(&entries)
        }
    }
}
