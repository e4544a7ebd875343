use anyhow::{bail, Context, Result};
use leadflow::cli::commands::{ClearCommand, RunCommand, StatusCommand, ValidateCommand};
use leadflow::cli::input::{read_rows, write_rows};
use leadflow::cli::output::*;
use leadflow::cli::{Cli, Command};
use leadflow::core::config::{PipelineConfig, DEFAULT_STORAGE_KEY};
use leadflow::persistence::{InMemoryStorage, StatePersistence, Storage};
use leadflow::{PipelineOrchestrator, RunStatus, ServiceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Status(cmd) => show_status(cmd, &cli).await?,
        Command::Clear(cmd) => clear_state(cmd, &cli).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_storage(db: Option<&str>) -> Result<Arc<dyn Storage>> {
    use leadflow::persistence::SqliteStorage;

    let store = match db {
        Some(path) => SqliteStorage::new(path).await?,
        None => SqliteStorage::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_storage(_db: Option<&str>) -> Result<Arc<dyn Storage>> {
    tracing::warn!("Built without the sqlite feature; run state is kept in memory only");
    Ok(Arc::new(InMemoryStorage::new()))
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file)
        .context("Failed to load pipeline config")?;

    println!(
        "{} Loaded pipeline: {}",
        INFO,
        style(&config.name).bold()
    );

    // Set up persistence
    let storage: Arc<dyn Storage> = if cmd.no_persist {
        Arc::new(InMemoryStorage::new())
    } else {
        open_storage(cli.db.as_deref()).await?
    };

    let services = ServiceRegistry::from_services(&config.services);
    let orchestrator = PipelineOrchestrator::builder(services)
        .storage(storage)
        .storage_key(config.options.storage_key.clone())
        .batch_size(cmd.batch_size.unwrap_or(config.options.batch_size))
        .step_delay(Duration::from_millis(config.options.step_delay_ms))
        .build()
        .await?;

    if cmd.resume {
        let state = orchestrator.get_state();
        let total = orchestrator.steps().len();
        if total == 0 || state.status.is_terminal() {
            bail!(
                "No unfinished run stored under '{}' to resume",
                config.options.storage_key
            );
        }
        println!(
            "{} Resuming run {} at step {}/{}",
            INFO,
            style(&state.run_id.to_string()[..8]).dim(),
            state.current_step_index + 1,
            total
        );
    } else {
        let input = cmd.input.as_deref().context("--input is required to start a run")?;
        let rows = read_rows(input)?;
        println!(
            "{} Read {} rows from {}",
            INFO,
            style(rows.len()).cyan(),
            style(input).dim()
        );
        orchestrator
            .initialize(rows, config.steps.clone())
            .await
            .context("Failed to initialize run")?;
    }

    // Render run events while the steps execute
    let progress = create_progress_bar();
    let mut events = orchestrator.subscribe();
    let bar = progress.clone();
    let renderer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render_event(&bar, &event);
        }
    });

    let cancel = orchestrator.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!("{} Running {} steps", ROCKET, orchestrator.steps().len());
    let status = orchestrator.run_to_completion().await;
    interrupt.abort();

    let state = orchestrator.get_state();
    let steps = orchestrator.steps();
    let summary = orchestrator.summary();
    let rows = orchestrator.rows();
    drop(orchestrator);
    let _ = renderer.await;
    progress.finish_and_clear();

    // Results are exportable whatever the outcome
    write_rows(&cmd.output, &rows)?;
    println!(
        "{} Wrote {} rows to {}",
        INFO,
        style(rows.len()).cyan(),
        style(&cmd.output).dim()
    );

    println!();
    for line in format_step_lines(&steps, &state) {
        println!("{}", line);
    }
    println!();
    for line in format_summary(&summary) {
        println!("  {}", line);
    }

    match status {
        RunStatus::Complete => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&config.name).bold(),
                style("successfully").green()
            );
        }
        RunStatus::Cancelled => {
            println!(
                "\n{} {} {}; partial results were written",
                WARN,
                style(&config.name).bold(),
                style("cancelled").yellow()
            );
        }
        _ => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&config.name).bold(),
                style("halted").red()
            );
            if let Some(err) = &state.error {
                error!("Step {} failed: {}", err.step_id, err.message);
            }
            if !cmd.no_persist {
                println!(
                    "  Retry the failed step with: leadflow run --file {} --output {} --resume",
                    cmd.file, cmd.output
                );
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Services: {}", style(config.services.len()).cyan());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            for step in &config.steps {
                let rules = step.filter.as_ref().map_or(0, |f| f.rules.len());
                println!(
                    "    {} ({}) - {} filter rules",
                    style(step.display_name()).bold(),
                    style(step.service_id()).dim(),
                    rules
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_status(cmd: &StatusCommand, cli: &Cli) -> Result<()> {
    let storage = open_storage(cli.db.as_deref()).await?;
    let key = cmd.key.as_deref().unwrap_or(DEFAULT_STORAGE_KEY);
    let persistence = StatePersistence::new(storage, key);

    let Some(run) = persistence.load().await else {
        println!("{} No run stored under '{}'", INFO, key);
        return Ok(());
    };

    let state = &run.state;
    let summary = state.analytics.summary(state.eligible_count());

    if cmd.json {
        let data = serde_json::json!({
            "runId": state.run_id,
            "status": state.status,
            "currentStepIndex": state.current_step_index,
            "totalSteps": run.steps.len(),
            "stepStatus": state.step_status,
            "error": state.error,
            "savedAt": run.saved_at,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(state.run_id).cyan());
    println!("  Status: {}", format_status(state.status));
    if let Some(started) = state.started_at {
        println!("  Started: {}", style(started.to_rfc3339()).dim());
    }
    println!("  Saved: {}", style(run.saved_at.to_rfc3339()).dim());
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", state.progress(run.steps.len()) * 100.0)).cyan(),
        state.current_step_index,
        run.steps.len()
    );
    if let Some(err) = &state.error {
        println!("  Error: {} ({})", style(&err.message).red(), err.step_id);
    }

    println!();
    for line in format_step_lines(&run.steps, state) {
        println!("{}", line);
    }
    println!();
    for line in format_summary(&summary) {
        println!("  {}", line);
    }

    Ok(())
}

async fn clear_state(cmd: &ClearCommand, cli: &Cli) -> Result<()> {
    let storage = open_storage(cli.db.as_deref()).await?;
    let key = cmd.key.as_deref().unwrap_or(DEFAULT_STORAGE_KEY);
    let persistence = StatePersistence::new(storage, key);

    if persistence.clear().await {
        println!("{} Cleared run stored under '{}'", CHECK, key);
    } else {
        println!("{} No run stored under '{}'", INFO, key);
    }
    Ok(())
}
