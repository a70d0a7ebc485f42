//! Self-update pipeline.
//!
//! A check fetches the release manifest and compares its version with the
//! running build. An accepted update then runs strictly in order:
//!
//! 1. download the platform package (APP when the runtime id matches, FULL
//!    otherwise)
//! 2. verify its SHA-256 against the manifest
//! 3. unpack it into a fresh session directory, rejecting path traversal
//! 4. provision the platform install script (bundled or fetched and verified)
//! 5. launch the script with the unpacked and installed directories, then exit
//!
//! [`UpdateCoordinator`] owns the state machine; [`UpdateExecutor`] performs
//! the individual stages for one session.

pub mod build_info;
pub mod checksum;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod launcher;
pub mod manifest;
pub mod platform;
pub mod targets;
pub mod transport;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use build_info::BuildInfo;
pub use coordinator::{
    date_from_stamp, date_stamp, StateListener, UpdateCoordinator, UpdateStage, UpdateState,
    UpdaterConfig,
};
pub use error::UpdateError;
pub use executor::{create_executor, CancelHandle, DownloadOutcome, ExecutorContext, UpdateExecutor};
pub use launcher::{HandOff, LaunchRequest, ProcessLauncher, SystemLauncher};
pub use manifest::{Instruction, InstructionKind, ManifestParseError, UpdateManifest};
pub use platform::{OperatingSystem, PackageType};
pub use transport::{
    BundledResources, DownloadProgress, FetchResponse, FetchStatus, HttpTransport,
    ProgressCallback, ResourceBundle, Transport,
};
pub use version::{Version, VersionParseError};
