//! Sheetwork Core Library
//!
//! This crate provides the self-update machinery for Sheetwork, a
//! spreadsheet editor. It includes:
//!
//! - Release manifest parsing and version comparison
//! - Package download, SHA-256 verification and safe extraction
//! - Per-platform install-script provisioning and hand-off
//! - The update coordinator state machine
//! - Configuration management (update settings)
//! - Database layer for settings and update history

pub mod config;
pub mod db;
pub mod update;

// Re-exports for convenience
pub use config::UpdateSettings;
pub use db::{Database, UpdateOutcome, UpdateRecord};

// Re-export the update pipeline entry points
pub use update::{
    create_executor, BuildInfo, HandOff, HttpTransport, OperatingSystem, PackageType,
    SystemLauncher, UpdateCoordinator, UpdateError, UpdateExecutor, UpdateManifest, UpdateStage,
    UpdateState, UpdaterConfig, Version,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
