use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use symposium::checkpoint::CheckpointManager;
use symposium::cli::{Cli, Commands, Display, spawn_interrupt_repl};
use symposium::config::SymposiumConfig;
use symposium::error::Result;
use symposium::orchestrator::Engine;
use symposium::session::ExecutionMode;
use symposium::{ScriptedProvider, SessionStatus, TextProvider};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("symposium=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("symposium=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let display = Display::new();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("config.toml"));
    let config = SymposiumConfig::load(&config_path).await?;
    let checkpoints = checkpoint_manager(&cli.data_dir, &config)?;

    match cli.command {
        Commands::Run {
            request,
            autonomous,
            max_iterations,
            quality_threshold,
        } => {
            let mut config = config;
            if autonomous {
                config.engine.mode = ExecutionMode::Autonomous;
            }
            if let Some(max) = max_iterations {
                config.engine.max_iterations = max;
            }
            if let Some(threshold) = quality_threshold {
                config.engine.quality_threshold = threshold;
            }
            config.validate()?;

            let provider = default_provider();
            let engine = Engine::new(&request, config, provider, checkpoints);
            drive(engine, &display).await
        }
        Commands::Resume {
            session_id,
            autonomous,
        } => {
            let mut config = config;
            if autonomous {
                config.engine.mode = ExecutionMode::Autonomous;
            }
            let snapshot = checkpoints.load_latest(&session_id)?;
            let provider = default_provider();
            let engine = Engine::resume(snapshot, config, provider, checkpoints)?;
            drive(engine, &display).await
        }
        Commands::List => {
            let sessions = checkpoints.list_sessions()?;
            display.print_sessions(&sessions);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { session_id } => {
            let snapshot = checkpoints.load_latest(&session_id)?;
            display.print_session_detail(&snapshot);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn checkpoint_manager(data_dir: &Path, config: &SymposiumConfig) -> Result<CheckpointManager> {
    CheckpointManager::new(
        data_dir.join("checkpoints.db"),
        config.checkpoint.retain_per_session,
    )
}

/// The deterministic offline backend. Real providers plug in behind the
/// `TextProvider` seam.
fn default_provider() -> Arc<dyn TextProvider> {
    Arc::new(ScriptedProvider::new())
}

async fn drive(mut engine: Engine, display: &Display) -> Result<ExitCode> {
    let mut events = engine.subscribe();
    let printer = {
        let display = Display::new();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                display.print_event(&event);
            }
        })
    };

    let interactive = engine.store().snapshot().session.mode == ExecutionMode::Interactive;
    let repl = interactive.then(|| spawn_interrupt_repl(engine.interrupts()));

    let report = engine.run().await;
    printer.abort();
    if let Some(repl) = repl {
        repl.abort();
    }

    let report = report?;
    display.print_report(&report);

    match report.status {
        SessionStatus::Aborted => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}
