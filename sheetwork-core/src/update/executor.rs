//! Update executor: one update session, five strictly ordered operations.
//!
//! ```text
//! download_package -> verify_download -> extract_package
//!                  -> setup_instructions -> do_update
//! ```
//!
//! An executor serves exactly one update attempt. Each operation checks that
//! its predecessor succeeded, so calling them out of order is an
//! [`UpdateError::InvalidState`] rather than undefined behavior. Blocking work
//! (hashing, unpacking, writing scripts) runs on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::build_info::BuildInfo;
use super::checksum::verify_sha256;
use super::error::UpdateError;
use super::extractor::{create_temp_root, extract_zip_bytes, write_executable};
use super::launcher::{HandOff, ProcessLauncher};
use super::manifest::{InstructionKind, UpdateManifest};
use super::platform::{OperatingSystem, PackageType};
use super::targets::{LinuxTarget, PlatformTarget, WindowsTarget};
use super::transport::{FetchResponse, FetchStatus, ResourceBundle, Transport, INSTRUCTIONS_DIR};

// ============================================================================
// Session Inputs
// ============================================================================

/// Inputs an executor needs besides the manifest and collaborators.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    /// Prefix of the session directory name.
    pub app_name: String,
    /// Base locator that package and script locators are built from.
    pub resource_base: String,
    /// Directory the session directory is created in.
    pub temp_base: PathBuf,
    /// Directory the running application is installed in.
    pub install_dir: PathBuf,
    pub build: BuildInfo,
}

/// Outcome of [`UpdateExecutor::download_package`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Package stored in the session.
    Completed { bytes: usize },
    /// The download was cancelled; the session should be dropped silently.
    Cancelled,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation for an in-flight package download.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Requests cancellation. Calling it more than once has no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

// ============================================================================
// Executor Factory
// ============================================================================

/// Builds the executor for the host operating system.
///
/// Returns [`UpdateError::UnsupportedPlatform`] for hosts without a target.
pub fn create_executor(
    os: &OperatingSystem,
    manifest: Arc<UpdateManifest>,
    context: ExecutorContext,
    transport: Arc<dyn Transport>,
    bundle: Arc<dyn ResourceBundle>,
) -> Result<UpdateExecutor, UpdateError> {
    let target: Box<dyn PlatformTarget> = match os {
        OperatingSystem::Linux => Box::new(LinuxTarget),
        OperatingSystem::Windows => Box::new(WindowsTarget),
        OperatingSystem::Unsupported(name) => {
            return Err(UpdateError::UnsupportedPlatform(name.clone()))
        }
    };

    Ok(UpdateExecutor::new(target, manifest, context, transport, bundle))
}

// ============================================================================
// Update Executor
// ============================================================================

/// Drives a single update session.
pub struct UpdateExecutor {
    target: Box<dyn PlatformTarget>,
    manifest: Arc<UpdateManifest>,
    context: ExecutorContext,
    transport: Arc<dyn Transport>,
    bundle: Arc<dyn ResourceBundle>,
    package_type: PackageType,

    downloaded_package: Option<Arc<[u8]>>,
    verified: bool,
    tmp_root: Option<PathBuf>,
    tmp_package_root_name: Option<String>,
    script_path: Option<PathBuf>,

    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
}

impl UpdateExecutor {
    pub fn new(
        target: Box<dyn PlatformTarget>,
        manifest: Arc<UpdateManifest>,
        context: ExecutorContext,
        transport: Arc<dyn Transport>,
        bundle: Arc<dyn ResourceBundle>,
    ) -> Self {
        let package_type =
            PackageType::for_runtime(manifest.runtime_id(), context.build.runtime_id);
        let (cancel, cancel_rx) = CancelHandle::new();

        debug!(
            os = %target.os(),
            package = %package_type,
            "Created update executor"
        );

        Self {
            target,
            manifest,
            context,
            transport,
            bundle,
            package_type,
            downloaded_package: None,
            verified: false,
            tmp_root: None,
            tmp_package_root_name: None,
            script_path: None,
            cancel,
            cancel_rx,
        }
    }

    pub fn os(&self) -> OperatingSystem {
        self.target.os()
    }

    /// Package type chosen from the manifest runtime id.
    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    /// Session directory, once extraction has created it.
    pub fn tmp_root(&self) -> Option<&Path> {
        self.tmp_root.as_deref()
    }

    /// Top-level directory name of the extracted package.
    pub fn package_root_name(&self) -> Option<&str> {
        self.tmp_package_root_name.as_deref()
    }

    /// Provisioned install script, once instructions are set up.
    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Aborts an outstanding download. No-op at any other point.
    pub fn cancel(&self) {
        if self.downloaded_package.is_none() {
            self.cancel.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // 1. Download
    // ------------------------------------------------------------------------

    /// Fetches the release package for this host.
    pub async fn download_package(&mut self) -> Result<DownloadOutcome, UpdateError> {
        if self.downloaded_package.is_some() {
            return Err(UpdateError::InvalidState(
                "package already downloaded".to_string(),
            ));
        }

        let resource = self
            .target
            .package_resource(&self.context.resource_base, self.package_type);
        info!(package = %self.package_type, "Downloading update package from {}", resource);

        let response = self.fetch_cancellable(&resource).await;
        if response.status == FetchStatus::Cancelled {
            info!("Update package download cancelled");
            return Ok(DownloadOutcome::Cancelled);
        }

        let reason = response.describe();
        let bytes = response
            .into_payload()
            .ok_or_else(|| UpdateError::transport(&resource, reason))?;

        let size = bytes.len();
        self.downloaded_package = Some(Arc::from(bytes));
        info!("Downloaded update package ({} bytes)", size);
        Ok(DownloadOutcome::Completed { bytes: size })
    }

    async fn fetch_cancellable(&self, resource: &str) -> FetchResponse {
        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = *cancel_rx.borrow();
        if cancelled {
            return FetchResponse::cancelled();
        }

        let cancellation = async move {
            let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
        };

        tokio::select! {
            response = self.transport.fetch(resource) => response,
            _ = cancellation => FetchResponse::cancelled(),
        }
    }

    // ------------------------------------------------------------------------
    // 2. Verify
    // ------------------------------------------------------------------------

    /// Checks the downloaded package against the manifest checksum.
    pub async fn verify_download(&mut self) -> Result<(), UpdateError> {
        let data = self
            .downloaded_package
            .clone()
            .ok_or_else(|| UpdateError::InvalidState("no package downloaded".to_string()))?;

        let os = self.target.os();
        let expected = self.manifest.checksum_for(&os, self.package_type);
        verify_sha256(data, expected, "update package").await?;

        self.verified = true;
        info!("Update package checksum verified");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 3. Extract
    // ------------------------------------------------------------------------

    /// Unpacks the verified package into a fresh session directory.
    pub async fn extract_package(&mut self) -> Result<PathBuf, UpdateError> {
        if !self.verified {
            return Err(UpdateError::InvalidState(
                "package has not been verified".to_string(),
            ));
        }
        if self.tmp_root.is_some() {
            return Err(UpdateError::InvalidState(
                "package already extracted".to_string(),
            ));
        }
        let data = self
            .downloaded_package
            .clone()
            .ok_or_else(|| UpdateError::InvalidState("no package downloaded".to_string()))?;

        let temp_base = self.context.temp_base.clone();
        let app_name = self.context.app_name.clone();

        let (root, extracted) = tokio::task::spawn_blocking(move || {
            let root = create_temp_root(&temp_base, &app_name)?;
            let extracted = extract_zip_bytes(&data, &root);
            Ok::<_, UpdateError>((root, extracted))
        })
        .await
        .map_err(|e| UpdateError::Archive(format!("extraction task failed: {}", e)))??;

        self.tmp_root = Some(root.clone());
        let extracted = extracted?;

        info!(
            root = %extracted.root_name,
            files = extracted.files_written,
            "Extracted update package to {}",
            root.display()
        );
        self.tmp_package_root_name = Some(extracted.root_name);
        Ok(root)
    }

    // ------------------------------------------------------------------------
    // 4. Instructions
    // ------------------------------------------------------------------------

    /// Places the platform install script into the session directory.
    pub async fn setup_instructions(&mut self) -> Result<PathBuf, UpdateError> {
        let tmp_root = match (&self.tmp_root, &self.tmp_package_root_name) {
            (Some(root), Some(_)) => root.clone(),
            _ => {
                return Err(UpdateError::InvalidState(
                    "package has not been extracted".to_string(),
                ))
            }
        };

        let os = self.target.os();
        let instruction = self
            .manifest
            .instruction_for(&os)
            .cloned()
            .ok_or_else(|| UpdateError::InstructionsUnavailable(os.to_string()))?;

        let script_path = tmp_root.join(self.target.script_name());
        let local_id = self.target.current_instruction_id(&self.context.build);

        match instruction.kind {
            Some(InstructionKind::CopyLocal) => self.copy_local(&script_path).await?,
            Some(InstructionKind::CopyRemote) if instruction.id == Some(local_id) => {
                debug!(id = local_id, "Remote install script matches bundled revision");
                self.copy_local(&script_path).await?
            }
            Some(InstructionKind::CopyRemote) => {
                self.copy_remote(&script_path, instruction.checksum.as_deref())
                    .await?
            }
            None => return Err(UpdateError::InstructionsUnavailable(os.to_string())),
        }

        info!("Install script ready at {}", script_path.display());
        self.script_path = Some(script_path.clone());
        Ok(script_path)
    }

    async fn copy_local(&self, script_path: &Path) -> Result<(), UpdateError> {
        let name = self.target.script_name();
        let contents = self
            .bundle
            .read_bundled_resource(INSTRUCTIONS_DIR, name)
            .ok_or_else(|| {
                UpdateError::InstructionsUnavailable(format!("bundled {} missing", name))
            })?;

        write_script(script_path.to_path_buf(), contents).await
    }

    async fn copy_remote(
        &self,
        script_path: &Path,
        expected: Option<&str>,
    ) -> Result<(), UpdateError> {
        let resource = self.target.instruction_resource(&self.context.resource_base);
        info!("Fetching install script from {}", resource);

        let response = self.transport.fetch(&resource).await;
        let reason = response.describe();
        let contents = response
            .into_payload()
            .ok_or_else(|| UpdateError::transport(&resource, reason))?;

        let contents: Arc<[u8]> = Arc::from(contents);
        verify_sha256(contents.clone(), expected, "install script").await?;

        write_script(script_path.to_path_buf(), contents.to_vec()).await
    }

    // ------------------------------------------------------------------------
    // 5. Finalize
    // ------------------------------------------------------------------------

    /// Starts the install script as `script <source> <target>`.
    ///
    /// The caller exits the process via [`HandOff::exit`]; a launch failure
    /// leaves the process running.
    pub fn do_update(&self, launcher: &dyn ProcessLauncher) -> Result<HandOff, UpdateError> {
        let (Some(tmp_root), Some(root_name), Some(script)) = (
            self.tmp_root.as_deref(),
            self.tmp_package_root_name.as_deref(),
            self.script_path.as_deref(),
        ) else {
            return Err(UpdateError::InvalidState(
                "install instructions are not ready".to_string(),
            ));
        };

        let working_dir = absolute(tmp_root)?;
        let script = absolute(script)?;
        let source = working_dir.join(root_name);
        let target = resolve_target_dir(&self.context.install_dir);

        let request = self
            .target
            .launch_request(&script, &source, &target, &working_dir);

        info!(
            source = %source.display(),
            target = %target.display(),
            "Launching install script {}",
            script.display()
        );

        launcher
            .launch(&request)
            .map_err(|source| UpdateError::ProcessLaunch {
                script: script.clone(),
                source,
            })?;

        Ok(HandOff { request })
    }

    /// Removes the session directory. Used when a session is abandoned.
    pub fn discard(&mut self) {
        if let Some(root) = self.tmp_root.take() {
            match std::fs::remove_dir_all(&root) {
                Ok(()) => debug!("Removed update session directory {}", root.display()),
                Err(e) => warn!(
                    "Failed to remove update session directory {}: {}",
                    root.display(),
                    e
                ),
            }
        }
        self.tmp_package_root_name = None;
        self.script_path = None;
    }
}

impl std::fmt::Debug for UpdateExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateExecutor")
            .field("target", &self.target)
            .field("package_type", &self.package_type)
            .field("downloaded", &self.downloaded_package.as_ref().map(|d| d.len()))
            .field("verified", &self.verified)
            .field("tmp_root", &self.tmp_root)
            .finish_non_exhaustive()
    }
}

async fn write_script(path: PathBuf, contents: Vec<u8>) -> Result<(), UpdateError> {
    tokio::task::spawn_blocking(move || write_executable(&path, &contents))
        .await
        .map_err(|e| UpdateError::InstructionsUnavailable(format!("write task failed: {}", e)))?
}

fn absolute(path: &Path) -> Result<PathBuf, UpdateError> {
    std::path::absolute(path).map_err(|e| UpdateError::io(path, e))
}

/// Directory the install script replaces.
///
/// Installs that nest the application in an `app` directory are replaced
/// from the parent.
pub fn resolve_target_dir(install_dir: &Path) -> PathBuf {
    match (install_dir.file_name(), install_dir.parent()) {
        (Some(name), Some(parent)) if name == "app" => parent.to_path_buf(),
        _ => install_dir.to_path_buf(),
    }
}
