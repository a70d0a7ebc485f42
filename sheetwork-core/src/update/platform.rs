//! Host platform and package type identifiers.
//!
//! The operating system is resolved once at startup into a closed enum. Hosts
//! the updater cannot serve resolve to [`OperatingSystem::Unsupported`] rather
//! than to a missing value, so callers have to handle them explicitly.

use std::fmt;

// ============================================================================
// Operating System
// ============================================================================

/// Operating systems the update pipeline knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Linux,
    Windows,
    /// Any other host. Carries the reported OS name for diagnostics.
    Unsupported(String),
}

impl OperatingSystem {
    /// Detects the operating system of the running process.
    pub fn detect() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Resolves an OS name as reported by the runtime or a manifest attribute.
    pub fn from_os_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            _ => Self::Unsupported(name.to_string()),
        }
    }

    /// Name used for the `os` attribute in the release manifest.
    pub fn manifest_name(&self) -> &str {
        match self {
            Self::Linux => "Linux",
            Self::Windows => "Windows",
            Self::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(name) => write!(f, "{} (unsupported)", name),
            other => write!(f, "{}", other.manifest_name()),
        }
    }
}

// ============================================================================
// Package Type
// ============================================================================

/// Kind of release artifact to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// Incremental package for installs whose bundled runtime is compatible.
    App,
    /// Complete package including a new runtime.
    Full,
}

impl PackageType {
    /// Chooses the package for a manifest runtime id.
    ///
    /// A missing runtime id never matches, so the full package is chosen.
    pub fn for_runtime(manifest_runtime: Option<u32>, running_runtime: u32) -> Self {
        if manifest_runtime == Some(running_runtime) {
            Self::App
        } else {
            Self::Full
        }
    }

    /// Name used for the `package` attribute in the release manifest.
    pub fn manifest_name(&self) -> &'static str {
        match self {
            Self::App => "APP",
            Self::Full => "FULL",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.manifest_name())
    }
}
