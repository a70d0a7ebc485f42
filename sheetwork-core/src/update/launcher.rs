//! Hand-off to the install script.
//!
//! Launching the script and exiting the process are separate steps: the
//! executor produces a [`HandOff`] once the script is running, and the caller
//! decides when to call [`HandOff::exit`]. Tests can launch through a
//! recording [`ProcessLauncher`] and never exit.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::info;

/// A fully resolved install-script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// The provisioned script inside the session directory.
    pub script: PathBuf,
    /// Program actually executed (the script itself, or its shell).
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Session directory; also the child's working directory.
    pub working_dir: PathBuf,
    /// Unpacked release directory passed as the first script argument.
    pub source: PathBuf,
    /// Installed application directory passed as the second script argument.
    pub target: PathBuf,
}

/// Starts install scripts.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> std::io::Result<()>;
}

/// Launches the script as a detached child of the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, request: &LaunchRequest) -> std::io::Result<()> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group so the script survives our exit.
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn()?;
        info!(pid = child.id(), script = %request.script.display(), "Install script started");
        Ok(())
    }
}

/// Proof that the install script is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandOff {
    pub request: LaunchRequest,
}

impl HandOff {
    /// Terminates the current process so the script can replace it.
    pub fn exit(self) -> ! {
        info!(
            "Exiting for update; installer will copy {} to {}",
            self.request.source.display(),
            self.request.target.display()
        );
        std::process::exit(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_runs_script_detached() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("update.sh");
        let marker = dir.path().join("ran.txt");
        crate::update::extractor::write_executable(
            &script,
            b"#!/bin/sh\necho \"$1 $2\" > ran.txt\n",
        )
        .unwrap();

        let request = LaunchRequest {
            script: script.clone(),
            program: script.clone().into_os_string(),
            args: vec!["src".into(), "dst".into()],
            working_dir: dir.path().to_path_buf(),
            source: "src".into(),
            target: "dst".into(),
        };
        SystemLauncher.launch(&request).unwrap();

        for _ in 0..100 {
            if marker.exists() && std::fs::read_to_string(&marker).unwrap().ends_with('\n') {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "src dst\n");
    }

    #[test]
    fn test_system_launcher_missing_program() {
        let dir = std::env::temp_dir();
        let request = LaunchRequest {
            script: dir.join("no-such-script"),
            program: dir.join("no-such-script").into_os_string(),
            args: Vec::new(),
            working_dir: dir.clone(),
            source: dir.clone(),
            target: dir,
        };
        assert!(SystemLauncher.launch(&request).is_err());
    }
}
