//! Per-platform specialisation of the update executor.
//!
//! Linux and Windows differ only in the install-script name, the resource
//! locators for packages and scripts, and the way the script is started.
//! Checksums, extraction and path checks are shared.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use super::build_info::BuildInfo;
use super::launcher::LaunchRequest;
use super::platform::{OperatingSystem, PackageType};

/// Platform-specific constants and launch rules.
pub trait PlatformTarget: Send + Sync + fmt::Debug {
    fn os(&self) -> OperatingSystem;

    /// File name of the install script, bundled and remote.
    fn script_name(&self) -> &'static str;

    /// Resource locator of a release package under `base`.
    fn package_resource(&self, base: &str, package: PackageType) -> String;

    /// Resource locator of the remote install script under `base`.
    fn instruction_resource(&self, base: &str) -> String {
        join_resource(base, &format!("{}/{}", self.dir_name(), self.script_name()))
    }

    /// Directory segment used in resource locators.
    fn dir_name(&self) -> &'static str;

    /// Revision of the install script bundled with this build.
    fn current_instruction_id(&self, build: &BuildInfo) -> u32;

    /// Builds the invocation `script <source> <target>` run from `working_dir`.
    fn launch_request(
        &self,
        script: &Path,
        source: &Path,
        target: &Path,
        working_dir: &Path,
    ) -> LaunchRequest;
}

fn join_resource(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn package_file(package: PackageType) -> &'static str {
    match package {
        PackageType::App => "sheetwork-app.zip",
        PackageType::Full => "sheetwork-full.zip",
    }
}

// ============================================================================
// Linux
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxTarget;

impl PlatformTarget for LinuxTarget {
    fn os(&self) -> OperatingSystem {
        OperatingSystem::Linux
    }

    fn script_name(&self) -> &'static str {
        "update.sh"
    }

    fn dir_name(&self) -> &'static str {
        "linux"
    }

    fn package_resource(&self, base: &str, package: PackageType) -> String {
        join_resource(base, &format!("linux/{}", package_file(package)))
    }

    fn current_instruction_id(&self, build: &BuildInfo) -> u32 {
        build.linux_instruction_id
    }

    fn launch_request(
        &self,
        script: &Path,
        source: &Path,
        target: &Path,
        working_dir: &Path,
    ) -> LaunchRequest {
        // The script is executable and carries its own shebang.
        LaunchRequest {
            script: script.to_path_buf(),
            program: script.as_os_str().to_os_string(),
            args: vec![source.as_os_str().into(), target.as_os_str().into()],
            working_dir: working_dir.to_path_buf(),
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        }
    }
}

// ============================================================================
// Windows
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsTarget;

impl PlatformTarget for WindowsTarget {
    fn os(&self) -> OperatingSystem {
        OperatingSystem::Windows
    }

    fn script_name(&self) -> &'static str {
        "update.bat"
    }

    fn dir_name(&self) -> &'static str {
        "windows"
    }

    fn package_resource(&self, base: &str, package: PackageType) -> String {
        join_resource(base, &format!("windows/{}", package_file(package)))
    }

    fn current_instruction_id(&self, build: &BuildInfo) -> u32 {
        build.windows_instruction_id
    }

    fn launch_request(
        &self,
        script: &Path,
        source: &Path,
        target: &Path,
        working_dir: &Path,
    ) -> LaunchRequest {
        // Batch files run through cmd.exe.
        let args: Vec<OsString> = vec![
            "/C".into(),
            script.as_os_str().into(),
            source.as_os_str().into(),
            target.as_os_str().into(),
        ];
        LaunchRequest {
            script: script.to_path_buf(),
            program: "cmd".into(),
            args,
            working_dir: working_dir.to_path_buf(),
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        }
    }
}
