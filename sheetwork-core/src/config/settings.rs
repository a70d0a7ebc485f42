//! Update settings for Sheetwork.
//!
//! Settings are persisted to the SQLite database as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::update::{BuildInfo, OperatingSystem, UpdaterConfig};

/// Settings key the update settings are stored under.
pub const SETTINGS_KEY: &str = "update_settings";

/// Release manifest served for the current channel.
pub const DEFAULT_MANIFEST_URL: &str = "https://releases.sheetwork.dev/latest/release.xml";

/// Base locator for packages and install scripts.
pub const DEFAULT_RELEASE_BASE_URL: &str = "https://releases.sheetwork.dev/latest";

/// Application name used for session directories.
pub const APP_NAME: &str = "Sheetwork";

// =============================================================================
// Update Settings
// =============================================================================

/// Update settings - persisted to database as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Release manifest locator.
    pub manifest_url: String,

    /// Base locator for packages and remote install scripts.
    pub release_base_url: String,

    /// Days between automatic checks (1 - 365).
    pub check_interval_days: u32,

    /// Check on startup when the last check is stale.
    pub auto_check: bool,

    /// Date of the last successful check as `YYYYMMDD`.
    pub last_manifest_check: Option<u32>,

    /// Overall timeout for a single fetch.
    pub request_timeout_secs: u64,

    /// Installed application directory. Defaults to the directory holding
    /// the executable's `bin/`.
    pub install_dir: Option<PathBuf>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            release_base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            check_interval_days: 7,
            auto_check: true,
            last_manifest_check: None,
            request_timeout_secs: 300,
            install_dir: None,
        }
    }
}

impl UpdateSettings {
    /// Load settings from database, using defaults for missing values.
    ///
    /// If settings don't exist or can't be parsed, returns defaults.
    pub fn load(db: &crate::db::Database) -> Self {
        let mut settings = Self::default();

        if let Ok(Some(json)) = db.get_setting(SETTINGS_KEY) {
            match serde_json::from_str::<UpdateSettings>(&json) {
                Ok(loaded) => settings = loaded,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse update settings, using defaults");
                }
            }
        }

        settings.validate();
        settings
    }

    /// Save settings to database.
    pub fn save(&self, db: &crate::db::Database) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        db.set_setting(SETTINGS_KEY, &json)?;
        Ok(())
    }

    /// Validate and clamp settings to valid ranges.
    pub fn validate(&mut self) {
        self.check_interval_days = self.check_interval_days.clamp(1, 365);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 3600);

        if self.manifest_url.trim().is_empty() {
            self.manifest_url = DEFAULT_MANIFEST_URL.to_string();
        }
        if self.release_base_url.trim().is_empty() {
            self.release_base_url = DEFAULT_RELEASE_BASE_URL.to_string();
        }
    }

    /// Builds the coordinator configuration for this host.
    pub fn updater_config(&self) -> anyhow::Result<UpdaterConfig> {
        let install_dir = match &self.install_dir {
            Some(dir) => dir.clone(),
            None => {
                let exe = std::env::current_exe()?;
                install_root_for_exe(&exe)
                    .ok_or_else(|| anyhow::anyhow!("Executable has no parent directory"))?
            }
        };

        Ok(UpdaterConfig {
            app_name: APP_NAME.to_string(),
            manifest_url: self.manifest_url.clone(),
            release_base_url: self.release_base_url.clone(),
            temp_base: std::env::temp_dir(),
            install_dir,
            build: BuildInfo::current(),
            os: OperatingSystem::detect(),
            check_interval_days: self.check_interval_days,
            last_check: self.last_manifest_check,
        })
    }
}

/// Install root for an executable laid out as `<root>/bin/<exe>`.
///
/// Executables outside a `bin/` directory use their own directory.
fn install_root_for_exe(exe: &Path) -> Option<PathBuf> {
    let dir = exe.parent()?;
    match (dir.file_name(), dir.parent()) {
        (Some(name), Some(root)) if name == "bin" => Some(root.to_path_buf()),
        _ => Some(dir.to_path_buf()),
    }
}

// =============================================================================
// Tests
// =============================================================================
