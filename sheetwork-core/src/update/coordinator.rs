//! Update coordinator: the state machine that drives an update session.
//!
//! ```text
//! Idle -> CheckingManifest -> UpToDate
//!                          -> UpdateAvailable -> Downloading -> Verifying
//!                             -> Extracting -> ProvisioningInstructions
//!                             -> ReadyToRestart
//! any working state -> Failed { stage }
//! Downloading -> Cancelled
//! ```
//!
//! Each stage runs on a spawned task that owns the session's
//! [`UpdateExecutor`]. When the stage finishes, the task hands the executor
//! back together with the result over an unbounded channel, and the
//! coordinator starts the next stage only after handling that event. Stages
//! therefore never overlap, and a cancelled session simply never reports back.
//!
//! Events are consumed with [`UpdateCoordinator::next_event`] (async callers)
//! or [`UpdateCoordinator::pump`] (frame loops).

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::build_info::BuildInfo;
use super::error::UpdateError;
use super::executor::{create_executor, CancelHandle, DownloadOutcome, ExecutorContext, UpdateExecutor};
use super::launcher::{HandOff, ProcessLauncher};
use super::manifest::UpdateManifest;
use super::platform::OperatingSystem;
use super::transport::{ResourceBundle, Transport};
use super::version::Version;

// ============================================================================
// Configuration
// ============================================================================

/// Everything the coordinator needs to know about this installation.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub app_name: String,
    /// Locator of the release manifest.
    pub manifest_url: String,
    /// Base locator for packages and remote install scripts.
    pub release_base_url: String,
    /// Parent directory for session directories.
    pub temp_base: PathBuf,
    /// Installed application directory.
    pub install_dir: PathBuf,
    pub build: BuildInfo,
    /// Host platform, resolved once at startup.
    pub os: OperatingSystem,
    /// Minimum days between automatic checks.
    pub check_interval_days: u32,
    /// Date of the last successful check as `YYYYMMDD`.
    pub last_check: Option<u32>,
}

impl UpdaterConfig {
    fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            app_name: self.app_name.clone(),
            resource_base: self.release_base_url.clone(),
            temp_base: self.temp_base.clone(),
            install_dir: self.install_dir.clone(),
            build: self.build.clone(),
        }
    }
}

// ============================================================================
// States and Stages
// ============================================================================

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    ManifestCheck,
    Setup,
    Download,
    Verify,
    Extract,
    ProvisionInstructions,
    Restart,
}

impl std::fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ManifestCheck => "manifest check",
            Self::Setup => "setup",
            Self::Download => "download",
            Self::Verify => "verification",
            Self::Extract => "extraction",
            Self::ProvisionInstructions => "install script provisioning",
            Self::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// Observable coordinator state.
#[derive(Debug, Clone)]
pub enum UpdateState {
    Idle,
    CheckingManifest,
    /// No newer release. `latest` is the manifest version, when it had one.
    UpToDate { latest: Option<Version> },
    UpdateAvailable { version: Version },
    Downloading,
    Verifying,
    Extracting,
    ProvisioningInstructions,
    ReadyToRestart,
    Failed {
        stage: UpdateStage,
        error: Arc<UpdateError>,
    },
    Cancelled,
}

impl UpdateState {
    /// True while a stage task is outstanding.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            Self::CheckingManifest
                | Self::Downloading
                | Self::Verifying
                | Self::Extracting
                | Self::ProvisioningInstructions
        )
    }

    /// Short user-facing description.
    pub fn status_message(&self) -> String {
        match self {
            Self::Idle => "Idle".to_string(),
            Self::CheckingManifest => "Checking for updates...".to_string(),
            Self::UpToDate { .. } => "Up to date".to_string(),
            Self::UpdateAvailable { version } => format!("Version {} is available", version),
            Self::Downloading => "Downloading update...".to_string(),
            Self::Verifying => "Verifying download...".to_string(),
            Self::Extracting => "Unpacking update...".to_string(),
            Self::ProvisioningInstructions => "Preparing installer...".to_string(),
            Self::ReadyToRestart => "Ready to restart".to_string(),
            Self::Failed { error, .. } => error.status_message().to_string(),
            Self::Cancelled => "Update cancelled".to_string(),
        }
    }
}

/// State-change listener.
pub type StateListener = Box<dyn Fn(&UpdateState) + Send + Sync>;

// ============================================================================
// Stage Events
// ============================================================================

enum StageResult {
    ManifestChecked(Result<UpdateManifest, UpdateError>),
    Downloaded(Box<UpdateExecutor>, Result<(), UpdateError>),
    Verified(Box<UpdateExecutor>, Result<(), UpdateError>),
    Extracted(Box<UpdateExecutor>, Result<(), UpdateError>),
    InstructionsReady(Box<UpdateExecutor>, Result<(), UpdateError>),
}

struct StageEvent {
    session: u64,
    result: StageResult,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct UpdateCoordinator {
    config: UpdaterConfig,
    transport: Arc<dyn Transport>,
    bundle: Arc<dyn ResourceBundle>,
    listener: Option<StateListener>,

    state: UpdateState,
    manifest: Option<Arc<UpdateManifest>>,
    /// Executor parked between the last stage and restart.
    ready: Option<Box<UpdateExecutor>>,

    session: u64,
    active_task: Option<AbortHandle>,
    cancel_handle: Option<CancelHandle>,
    events_tx: mpsc::UnboundedSender<StageEvent>,
    events_rx: mpsc::UnboundedReceiver<StageEvent>,
}

impl UpdateCoordinator {
    pub fn new(
        config: UpdaterConfig,
        transport: Arc<dyn Transport>,
        bundle: Arc<dyn ResourceBundle>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            bundle,
            listener: None,
            state: UpdateState::Idle,
            manifest: None,
            ready: None,
            session: 0,
            active_task: None,
            cancel_handle: None,
            events_tx,
            events_rx,
        }
    }

    /// Registers a listener called on every state change.
    pub fn with_listener(mut self, listener: impl Fn(&UpdateState) + Send + Sync + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn is_executing(&self) -> bool {
        self.state.is_working()
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Manifest from the most recent successful check.
    pub fn latest_manifest(&self) -> Option<&UpdateManifest> {
        self.manifest.as_deref()
    }

    /// Date of the last successful manifest check as `YYYYMMDD`.
    pub fn last_successful_check(&self) -> Option<u32> {
        self.config.last_check
    }

    /// Whether an automatic check is due on `today`.
    pub fn is_check_due(&self, today: NaiveDate) -> bool {
        let Some(last) = self.config.last_check.and_then(date_from_stamp) else {
            return true;
        };
        (today - last).num_days() >= i64::from(self.config.check_interval_days)
    }

    fn set_state(&mut self, state: UpdateState) {
        debug!(?state, "Update state changed");
        self.state = state;
        if let Some(listener) = &self.listener {
            listener(&self.state);
        }
    }

    fn fail(&mut self, stage: UpdateStage, err: UpdateError, executor: Option<Box<UpdateExecutor>>) {
        error!(%stage, "Update failed: {}", err);
        if let Some(mut executor) = executor {
            executor.discard();
        }
        self.active_task = None;
        self.cancel_handle = None;
        self.set_state(UpdateState::Failed {
            stage,
            error: Arc::new(err),
        });
    }

    fn spawn_stage<F>(&mut self, stage: F)
    where
        F: Future<Output = Option<StageResult>> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let session = self.session;
        let handle = tokio::spawn(async move {
            if let Some(result) = stage.await {
                // The receiver lives as long as the coordinator.
                let _ = tx.send(StageEvent { session, result });
            }
        });
        self.active_task = Some(handle.abort_handle());
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Starts a manifest check.
    ///
    /// On an unsupported platform this fails immediately without touching the
    /// network.
    pub fn check_for_update(&mut self) -> Result<(), UpdateError> {
        if self.is_executing() || matches!(self.state, UpdateState::ReadyToRestart) {
            return Err(UpdateError::InvalidState(format!(
                "cannot check for updates while {}",
                self.state.status_message()
            )));
        }

        if let OperatingSystem::Unsupported(name) = &self.config.os {
            let err = UpdateError::UnsupportedPlatform(name.clone());
            self.fail(UpdateStage::Setup, err, None);
            return Ok(());
        }

        self.session += 1;
        self.manifest = None;
        self.set_state(UpdateState::CheckingManifest);

        let transport = self.transport.clone();
        let manifest_url = self.config.manifest_url.clone();
        info!("Checking for updates at {}", manifest_url);

        self.spawn_stage(async move {
            let response = transport.fetch(&manifest_url).await;
            let reason = response.describe();
            let result = match response.into_payload() {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    UpdateManifest::parse(&text).map_err(UpdateError::from)
                }
                None => Err(UpdateError::transport(&manifest_url, reason)),
            };
            Some(StageResult::ManifestChecked(result))
        });
        Ok(())
    }

    /// Accepts the available update and starts the download.
    pub fn accept_update(&mut self) -> Result<(), UpdateError> {
        let (UpdateState::UpdateAvailable { .. }, Some(manifest)) = (&self.state, &self.manifest)
        else {
            return Err(UpdateError::InvalidState(
                "no update is available".to_string(),
            ));
        };

        let executor = match create_executor(
            &self.config.os,
            manifest.clone(),
            self.config.executor_context(),
            self.transport.clone(),
            self.bundle.clone(),
        ) {
            Ok(executor) => executor,
            Err(e) => {
                self.fail(UpdateStage::Setup, e, None);
                return Ok(());
            }
        };

        self.session += 1;
        self.cancel_handle = Some(executor.cancel_handle());
        self.set_state(UpdateState::Downloading);

        let mut executor = Box::new(executor);
        self.spawn_stage(async move {
            let outcome = executor.download_package().await;
            match outcome {
                Ok(DownloadOutcome::Cancelled) => None,
                result => Some(StageResult::Downloaded(executor, result.map(|_| ()))),
            }
        });
        Ok(())
    }

    /// Cancels an outstanding download. Returns false outside `Downloading`.
    ///
    /// No further events are delivered for the cancelled session.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.state, UpdateState::Downloading) {
            return false;
        }

        if let Some(handle) = self.cancel_handle.take() {
            handle.cancel();
        }
        if let Some(task) = self.active_task.take() {
            task.abort();
        }
        // Anything still queued for the old session is ignored.
        self.session += 1;

        info!("Update download cancelled");
        self.set_state(UpdateState::Cancelled);
        true
    }

    /// Launches the install script. The caller exits via [`HandOff::exit`].
    ///
    /// The staged session is handed off at most once. On a launch failure it
    /// stays ready so the restart can be retried or abandoned.
    pub fn restart(&mut self, launcher: &dyn ProcessLauncher) -> Result<HandOff, UpdateError> {
        let Some(executor) = self.ready.take() else {
            return Err(UpdateError::InvalidState(
                "update is not ready to install".to_string(),
            ));
        };
        match executor.do_update(launcher) {
            Ok(handoff) => Ok(handoff),
            Err(e) => {
                error!(stage = %UpdateStage::Restart, "Failed to start install script: {}", e);
                self.ready = Some(executor);
                Err(e)
            }
        }
    }

    /// Drops a staged update without installing it and removes its session
    /// directory. Returns false when nothing is staged.
    pub fn abandon(&mut self) -> bool {
        let Some(mut executor) = self.ready.take() else {
            return false;
        };
        executor.discard();
        info!("Staged update abandoned");
        self.set_state(UpdateState::Idle);
        true
    }

    // ------------------------------------------------------------------------
    // Event Handling
    // ------------------------------------------------------------------------

    /// Waits for the next stage event and applies it.
    ///
    /// Returns `None` when no stage is running.
    pub async fn next_event(&mut self) -> Option<&UpdateState> {
        while self.is_executing() {
            let event = self.events_rx.recv().await?;
            if self.handle_event(event) {
                return Some(&self.state);
            }
        }
        None
    }

    /// Applies all events that are already queued. Returns how many changed
    /// the state.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.handle_event(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Drives the session until no stage is running.
    pub async fn run_until_idle(&mut self) -> &UpdateState {
        while self.next_event().await.is_some() {}
        &self.state
    }

    fn handle_event(&mut self, event: StageEvent) -> bool {
        if event.session != self.session {
            debug!(session = event.session, "Dropping event from stale session");
            return false;
        }
        self.active_task = None;

        let expected = match &event.result {
            StageResult::ManifestChecked(_) => matches!(self.state, UpdateState::CheckingManifest),
            StageResult::Downloaded(..) => matches!(self.state, UpdateState::Downloading),
            StageResult::Verified(..) => matches!(self.state, UpdateState::Verifying),
            StageResult::Extracted(..) => matches!(self.state, UpdateState::Extracting),
            StageResult::InstructionsReady(..) => {
                matches!(self.state, UpdateState::ProvisioningInstructions)
            }
        };
        if !expected {
            warn!(state = ?self.state, "Ignoring stage event that does not match the current state");
            return false;
        }

        match event.result {
            StageResult::ManifestChecked(result) => self.on_manifest(result),
            StageResult::Downloaded(executor, result) => {
                self.cancel_handle = None;
                self.advance(UpdateStage::Download, executor, result, |mut ex| {
                    (UpdateState::Verifying, async move {
                        let result = ex.verify_download().await;
                        Some(StageResult::Verified(ex, result))
                    })
                })
            }
            StageResult::Verified(executor, result) => {
                self.advance(UpdateStage::Verify, executor, result, |mut ex| {
                    (UpdateState::Extracting, async move {
                        let result = ex.extract_package().await.map(|_| ());
                        Some(StageResult::Extracted(ex, result))
                    })
                })
            }
            StageResult::Extracted(executor, result) => {
                self.advance(UpdateStage::Extract, executor, result, |mut ex| {
                    (UpdateState::ProvisioningInstructions, async move {
                        let result = ex.setup_instructions().await.map(|_| ());
                        Some(StageResult::InstructionsReady(ex, result))
                    })
                })
            }
            StageResult::InstructionsReady(executor, result) => match result {
                Ok(()) => {
                    info!("Update staged; ready to restart");
                    self.ready = Some(executor);
                    self.set_state(UpdateState::ReadyToRestart);
                }
                Err(e) => self.fail(UpdateStage::ProvisionInstructions, e, Some(executor)),
            },
        }
        true
    }

    fn on_manifest(&mut self, result: Result<UpdateManifest, UpdateError>) {
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => return self.fail(UpdateStage::ManifestCheck, e, None),
        };

        self.config.last_check = Some(date_stamp(Local::now().date_naive()));

        let running = self.config.build.version;
        let latest = manifest.version();
        let newer = manifest.is_newer_than(&running);
        self.manifest = Some(Arc::new(manifest));

        match latest {
            Some(version) if newer => {
                info!(%running, %version, "Update available");
                self.set_state(UpdateState::UpdateAvailable { version });
            }
            _ => {
                info!(%running, "No newer release");
                self.set_state(UpdateState::UpToDate { latest });
            }
        }
    }

    /// Completes `stage` and, on success, starts the next one.
    fn advance<N, F>(
        &mut self,
        stage: UpdateStage,
        executor: Box<UpdateExecutor>,
        result: Result<(), UpdateError>,
        next: N,
    ) where
        N: FnOnce(Box<UpdateExecutor>) -> (UpdateState, F),
        F: Future<Output = Option<StageResult>> + Send + 'static,
    {
        if let Err(e) = result {
            return self.fail(stage, e, Some(executor));
        }
        let (state, task) = next(executor);
        self.set_state(state);
        self.spawn_stage(task);
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.active_task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Check Dates
// ============================================================================

/// Encodes a date as `YYYYMMDD`.
pub fn date_stamp(date: NaiveDate) -> u32 {
    let year = u32::try_from(date.year()).unwrap_or(0);
    year * 10_000 + date.month() * 100 + date.day()
}

/// Decodes a `YYYYMMDD` value. Returns `None` for impossible dates.
pub fn date_from_stamp(stamp: u32) -> Option<NaiveDate> {
    let year = i32::try_from(stamp / 10_000).ok()?;
    NaiveDate::from_ymd_opt(year, (stamp / 100) % 100, stamp % 100)
}
