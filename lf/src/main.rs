//! LeadFlow - lead lifecycle orchestrator
//!
//! CLI entry point for runs, the scheduled loop and lead management.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use leadflow::calendar::{SlotRules, create_calendar};
use leadflow::cli::{
    Cli, Command, OutputFormat, get_log_path, render_import_report, render_lead, render_leads, render_run_report,
    render_stage_report,
};
use leadflow::config::Config;
use leadflow::credentials::CredentialPool;
use leadflow::domain::{IdResolver, LeadStatus};
use leadflow::import::import_file;
use leadflow::lifecycle::Stage;
use leadflow::llm::create_client;
use leadflow::mail::create_mailer;
use leadflow::orchestrator::Orchestrator;
use leadflow::prompts::PromptLoader;
use leadflow::ratelimit::RateLimiter;
use leadflow::reasoning::{LlmReasoner, ReasonerProfile};
use leadflow::stages::Collaborators;
use leadflow::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(model = %config.llm.model, store = %config.storage.expanded_dir().display(), "LeadFlow loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { format } => cmd_run(&config, format).await,
        Command::Stage { stage, format } => cmd_stage(&config, stage, format).await,
        Command::Serve => cmd_serve(&config).await,
        Command::Import { file } => cmd_import(&config, &file).await,
        Command::Leads { status, format } => cmd_leads(&config, status, format).await,
        Command::Show { id } => cmd_show(&config, &id).await,
    }
}

fn open_store(config: &Config) -> Result<(StateManager, PathBuf)> {
    let store_dir = config.storage.expanded_dir();
    let manager = StateManager::spawn(&store_dir)
        .with_context(|| format!("Failed to open lead store at {}", store_dir.display()))?;
    Ok((manager, store_dir))
}

/// Wire storage, credentials and collaborators into an orchestrator
fn build_orchestrator(config: &Config, storage: StateManager, store_dir: &Path) -> Result<Orchestrator> {
    debug!("build_orchestrator: called");
    let pool = Arc::new(CredentialPool::from_env(&config.credentials).context("Failed to load credentials")?);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.max_per_minute, config.rate_limit.scope));

    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let reasoning = Arc::new(LlmReasoner::new(
        client,
        PromptLoader::new(store_dir.join("prompts")),
        ReasonerProfile::from_config(config)?,
    ));
    let mailer = create_mailer(&config.mail).context("Failed to create mailer")?;
    let rules = SlotRules::from_config(&config.pipeline)?;
    let calendar = create_calendar(&config.calendar, rules).context("Failed to create calendar")?;

    let collaborators = Collaborators {
        reasoning,
        mailer,
        calendar,
    };
    Ok(Orchestrator::new(config.clone(), Arc::new(storage), collaborators, pool, limiter).with_lock_dir(store_dir))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_run: called");
    let (storage, store_dir) = open_store(config)?;
    let orchestrator = build_orchestrator(config, storage, &store_dir)?;
    let report = orchestrator.run_once().await?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print!("{}", render_run_report(&report));
            Ok(())
        }
    }
}

async fn cmd_stage(config: &Config, stage: Stage, format: OutputFormat) -> Result<()> {
    debug!(%stage, %format, "cmd_stage: called");
    let (storage, store_dir) = open_store(config)?;
    let orchestrator = build_orchestrator(config, storage, &store_dir)?;
    let report = orchestrator.run_stage(stage).await?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("{}", render_stage_report(&report));
            Ok(())
        }
    }
}

async fn cmd_serve(config: &Config) -> Result<()> {
    debug!("cmd_serve: called");
    let (storage, store_dir) = open_store(config)?;
    let orchestrator = Arc::new(build_orchestrator(config, storage.clone(), &store_dir)?);
    let interval = Duration::from_secs(config.schedule.interval_minutes * 60);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let serve_handle = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.serve(interval, shutdown_rx).await }
    });

    println!(
        "LeadFlow serving every {} minute(s). Press Ctrl+C to stop.",
        config.schedule.interval_minutes
    );
    info!("Serving. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                debug!("cmd_serve: SIGINT received, initiating shutdown");
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                debug!("cmd_serve: SIGTERM received, initiating shutdown");
                warn!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("cmd_serve: waiting for ctrl_c (non-Unix)");
        tokio::signal::ctrl_c().await?;
    }

    let _ = shutdown_tx.send(()).await;
    info!("Shutting down after the current run...");

    // The in-flight run finishes before the loop sees the signal
    serve_handle.await.context("Scheduler task panicked")??;
    storage.shutdown().await?;
    debug!("cmd_serve: shutdown complete");
    Ok(())
}

async fn cmd_import(config: &Config, file: &Path) -> Result<()> {
    debug!(file = %file.display(), "cmd_import: called");
    let (storage, _) = open_store(config)?;
    let report = import_file(&storage, file).await?;
    print!("{}", render_import_report(&report));
    Ok(())
}

async fn cmd_leads(config: &Config, status: Option<LeadStatus>, format: OutputFormat) -> Result<()> {
    debug!(?status, %format, "cmd_leads: called");
    let (storage, _) = open_store(config)?;
    let leads = storage.list_leads(status).await?;
    match format {
        OutputFormat::Json => print_json(&leads),
        OutputFormat::Text => {
            print!("{}", render_leads(&leads));
            Ok(())
        }
    }
}

async fn cmd_show(config: &Config, reference: &str) -> Result<()> {
    debug!(%reference, "cmd_show: called");
    let (storage, _) = open_store(config)?;
    let ids: HashMap<String, String> = storage
        .list_leads(None)
        .await?
        .iter()
        .map(|lead| (lead.id().to_string(), lead.display_name().to_string()))
        .collect();

    let id = match IdResolver::new(&ids).resolve(reference) {
        Ok(Some(id)) => id,
        Ok(None) => return Err(eyre!("No lead matches '{}'", reference)),
        Err(candidates) => {
            return Err(eyre!(
                "'{}' is ambiguous; candidates: {}",
                reference,
                candidates.join(", ")
            ));
        }
    };

    let lead = storage.get_lead_required(&id).await?;
    print!("{}", render_lead(&lead));
    Ok(())
}
