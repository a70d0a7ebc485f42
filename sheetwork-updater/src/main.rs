//! Sheetwork updater
//!
//! Command-line driver for the self-update pipeline: checks the release
//! manifest, stages a newer release and hands over to the install script.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sheetwork_core::db::UpdateOutcome;
use sheetwork_core::update::{
    BundledResources, DownloadProgress, HttpTransport, SystemLauncher, UpdateCoordinator,
    UpdateState,
};
use sheetwork_core::{Database, UpdateSettings};

#[derive(Parser, Debug)]
#[command(name = "sheetwork-update")]
#[command(about = "Check for and install Sheetwork updates", long_about = None)]
struct Cli {
    /// Database file holding settings and update history.
    #[arg(long)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a newer release is available.
    Check {
        /// Check even if the last check is recent.
        #[arg(long)]
        force: bool,
    },
    /// Download, verify and install the latest release.
    Install {
        /// Do not ask for confirmation.
        #[arg(long, short)]
        yes: bool,
    },
    /// Show recent update attempts.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sheetwork_core=debug".parse()?)
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!("Sheetwork updater v{}", sheetwork_core::VERSION);

    let db = match &cli.database {
        Some(path) => Database::open_at(path.clone()),
        None => Database::open(),
    }
    .context("Failed to open database")?;
    db.migrate()?;

    match cli.command {
        Commands::Check { force } => check(&db, force).await,
        Commands::Install { yes } => install(&db, yes).await,
        Commands::History { limit } => history(&db, limit),
    }
}

fn build_coordinator(settings: &UpdateSettings) -> Result<UpdateCoordinator> {
    let transport = HttpTransport::new(Duration::from_secs(settings.request_timeout_secs))?
        .with_progress(Arc::new(report_progress));

    Ok(UpdateCoordinator::new(
        settings.updater_config()?,
        Arc::new(transport),
        Arc::new(BundledResources),
    )
    .with_listener(|state| tracing::info!("{}", state.status_message())))
}

fn report_progress(progress: DownloadProgress) {
    if let Some(percent) = progress.percent {
        eprint!("\r  {:>5.1}% ({} bytes)", percent, progress.bytes_downloaded);
        if percent >= 100.0 {
            eprintln!();
        }
    }
}

/// Runs a manifest check and persists the check date.
async fn run_check(
    db: &Database,
    settings: &mut UpdateSettings,
    coordinator: &mut UpdateCoordinator,
) -> Result<()> {
    coordinator.check_for_update()?;
    coordinator.run_until_idle().await;

    if coordinator.last_successful_check() != settings.last_manifest_check {
        settings.last_manifest_check = coordinator.last_successful_check();
        settings.save(db)?;
    }
    Ok(())
}

async fn check(db: &Database, force: bool) -> Result<()> {
    let mut settings = UpdateSettings::load(db);
    let mut coordinator = build_coordinator(&settings)?;

    let today = chrono::Local::now().date_naive();
    if !force && !coordinator.is_check_due(today) {
        println!(
            "Last checked on {}; checks run every {} day(s). Use --force to check now.",
            settings
                .last_manifest_check
                .map(|d| d.to_string())
                .unwrap_or_default(),
            settings.check_interval_days
        );
        return Ok(());
    }

    run_check(db, &mut settings, &mut coordinator).await?;
    finish(db, &coordinator)
}

async fn install(db: &Database, yes: bool) -> Result<()> {
    let mut settings = UpdateSettings::load(db);
    let mut coordinator = build_coordinator(&settings)?;

    run_check(db, &mut settings, &mut coordinator).await?;
    let version = match coordinator.state() {
        UpdateState::UpdateAvailable { version } => *version,
        _ => return finish(db, &coordinator),
    };

    if !yes && !confirm(&format!("Install Sheetwork {}?", version))? {
        println!("Update skipped.");
        return Ok(());
    }

    coordinator.accept_update()?;
    loop {
        let interrupted = tokio::select! {
            _ = coordinator.run_until_idle() => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        if !interrupted || coordinator.cancel() {
            break;
        }
        tracing::warn!("Download finished; the update can no longer be cancelled");
    }

    if !matches!(coordinator.state(), UpdateState::ReadyToRestart) {
        return finish(db, &coordinator);
    }

    let version = version.to_string();
    match coordinator.restart(&SystemLauncher) {
        Ok(handoff) => {
            db.record_update_outcome(Some(&version), UpdateOutcome::Staged, None, None)?;
            println!("Installing Sheetwork {}; the application will restart.", version);
            handoff.exit()
        }
        Err(e) => {
            db.record_update_outcome(
                Some(&version),
                UpdateOutcome::Failed,
                Some("restart"),
                Some(&e.to_string()),
            )?;
            // No retry from the command line; drop the staged files.
            coordinator.abandon();
            let status = e.status_message();
            Err(anyhow::Error::new(e).context(status))
        }
    }
}

/// Reports and records a session that ended without a restart.
fn finish(db: &Database, coordinator: &UpdateCoordinator) -> Result<()> {
    let version = coordinator
        .latest_manifest()
        .and_then(|m| m.version())
        .map(|v| v.to_string());

    match coordinator.state() {
        UpdateState::UpToDate { .. } => {
            db.record_update_outcome(version.as_deref(), UpdateOutcome::UpToDate, None, None)?;
            println!("Sheetwork {} is up to date.", sheetwork_core::VERSION);
        }
        UpdateState::UpdateAvailable { version } => {
            println!(
                "Sheetwork {} is available (running {}). Run `sheetwork-update install` to update.",
                version,
                sheetwork_core::VERSION
            );
        }
        UpdateState::Cancelled => {
            db.record_update_outcome(version.as_deref(), UpdateOutcome::Cancelled, None, None)?;
            println!("Update cancelled.");
        }
        UpdateState::Failed { stage, error } => {
            let stage = stage.to_string();
            db.record_update_outcome(
                version.as_deref(),
                UpdateOutcome::Failed,
                Some(&stage),
                Some(&error.to_string()),
            )?;
            bail!("{} ({} failed: {})", error.status_message(), stage, error);
        }
        state => bail!("Update stopped unexpectedly: {}", state.status_message()),
    }
    Ok(())
}

fn history(db: &Database, limit: usize) -> Result<()> {
    let records = db.recent_update_outcomes(limit)?;
    if records.is_empty() {
        println!("No update attempts recorded.");
        return Ok(());
    }

    for record in records {
        let when = chrono::DateTime::from_timestamp(record.finished_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| record.finished_at.to_string());
        println!(
            "{}  {:<10} {:<8} {}",
            when,
            record.outcome.as_str(),
            record.version.as_deref().unwrap_or("-"),
            match (&record.stage, &record.message) {
                (Some(stage), Some(message)) => format!("{}: {}", stage, message),
                (None, Some(message)) => message.clone(),
                (Some(stage), None) => stage.clone(),
                (None, None) => String::new(),
            }
        );
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
