//! composerd - engine session coordinator
//!
//! CLI entry point: runs a session over the in-memory reference engine.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use composerd::cli::{Cli, Command, get_log_path};
use composerd::config::Config;
use composerd::domain::CandidateItem;
use composerd::engine::memory::{EngineProbe, MemoryEngine};
use composerd::events::{Event, spawn_event_logger};
use composerd::repl;
use composerd::session::Session;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
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

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

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

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Dispatch command
    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None | Some(Command::Repl) => {
            debug!("main: matched Repl command");
            cmd_repl(&config).await
        }
        Some(Command::Simulate { sequence, json }) => {
            debug!(%sequence, json, "main: matched Simulate command");
            cmd_simulate(&config, &sequence, json).await
        }
        Some(Command::Schemas) => {
            debug!("main: matched Schemas command");
            cmd_schemas(&config).await
        }
        Some(Command::Config) => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

/// Start a session over the in-memory engine and wait until it is ready
async fn start_session(config: &Config) -> Result<Session> {
    debug!("start_session: called");
    let session = Session::new(
        config.session.clone(),
        config.engine.to_startup_params(),
        MemoryEngine::factory(EngineProbe::new()),
    );
    session.start();

    if session.wait_ready().await.is_err() {
        let reason = session
            .last_failure()
            .map(|f| f.reason)
            .unwrap_or_else(|| "session stopped before becoming ready".to_string());
        return Err(eyre::eyre!("Engine failed to start: {}", reason));
    }
    info!(schema = %session.status().schema_id, "Engine session ready");
    Ok(session)
}

async fn stop_session(session: &Session) {
    if let Some(report) = session.stop().await
        && !report.teardown_completed
    {
        warn!(cycle = report.cycle, "Session stopped without a clean teardown");
    }
}

async fn cmd_repl(config: &Config) -> Result<()> {
    let session = start_session(config).await?;
    let event_log = get_log_path().with_file_name("events.jsonl");
    let logger = spawn_event_logger(session.bus(), &event_log);
    info!(path = %event_log.display(), "Event log enabled");

    let result = repl::run_interactive(session.clone()).await;
    stop_session(&session).await;
    logger.abort();
    result
}

/// Outcome of `composerd simulate`
#[derive(Debug, Serialize)]
struct SimulateOutput {
    accepted: bool,
    commit: Option<String>,
    preedit: String,
    raw_input: String,
    candidates: Vec<CandidateItem>,
}

async fn cmd_simulate(config: &Config, sequence: &str, json: bool) -> Result<()> {
    let session = start_session(config).await?;
    let mut events = session.subscribe();

    let result = session.simulate_key_sequence(sequence).await;
    let accepted = match result {
        Ok(accepted) => accepted,
        Err(e) => {
            stop_session(&session).await;
            return Err(e).context("Failed to simulate key sequence");
        }
    };

    let mut commit = None;
    while let Some(event) = events.try_recv() {
        if let Event::Response { commit: Some(c), .. } = event {
            commit = Some(c.text);
        }
    }

    let snapshot = session.snapshot();
    let output = SimulateOutput {
        accepted,
        commit,
        preedit: snapshot.composition.preedit.clone(),
        raw_input: snapshot.raw_input.clone(),
        candidates: snapshot.menu.candidates.clone(),
    };
    stop_session(&session).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if !output.accepted {
        println!("{}", "Sequence not accepted".yellow());
    }
    if let Some(text) = &output.commit {
        println!("{} {}", "commit:".bright_green(), text);
    }
    if !output.preedit.is_empty() {
        println!("{} {}", "preedit:".cyan(), output.preedit);
    }
    for (i, candidate) in output.candidates.iter().enumerate() {
        println!("  {}. {}", i + 1, candidate.text);
    }
    Ok(())
}

async fn cmd_schemas(config: &Config) -> Result<()> {
    let session = start_session(config).await?;
    let listing = async {
        let available = session.available_schemas().await?;
        let enabled = session.enabled_schemas().await?;
        let current = session.current_schema().await?;
        Ok::<_, composerd::SessionError>((available, enabled, current))
    }
    .await;
    stop_session(&session).await;

    let (available, enabled, current) = listing.context("Failed to list schemas")?;
    for schema in available {
        let marker = if schema.id == current {
            "*"
        } else if enabled.contains(&schema) {
            "+"
        } else {
            " "
        };
        println!("{} {}", marker, schema);
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
