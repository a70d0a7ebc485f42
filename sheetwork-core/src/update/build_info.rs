//! Facts about the running build that the update pipeline compares against.

use super::version::Version;

/// Runtime compatibility id bundled with this build.
///
/// A release whose manifest carries a different id ships a new runtime and
/// must be installed from the full package.
pub const RUNTIME_ID: u32 = 17;

/// Revision of the bundled Linux install script.
pub const LINUX_INSTRUCTION_ID: u32 = 1;

/// Revision of the bundled Windows install script.
pub const WINDOWS_INSTRUCTION_ID: u32 = 1;

/// Compiled-in identity of the running build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: Version,
    pub runtime_id: u32,
    pub linux_instruction_id: u32,
    pub windows_instruction_id: u32,
}

impl BuildInfo {
    /// Build info of the running binary.
    pub fn current() -> Self {
        Self {
            version: Version::parse(crate::VERSION).unwrap_or(Version::new(0, 0, 0)),
            runtime_id: RUNTIME_ID,
            linux_instruction_id: LINUX_INSTRUCTION_ID,
            windows_instruction_id: WINDOWS_INSTRUCTION_ID,
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}
