//! Updater Module
//!
//! Selects the external updater for the host platform and starts it as a
//! detached process.
//!
//! The launch is fire-and-forget: the updater is never waited on, its exit
//! status is never read, and there is no retry. The client terminates right
//! after the attempt and the updater takes over from there.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

/// Updater binary shipped with Windows builds
pub const WINDOWS_UPDATER: &str = "RadPlanBio-update.exe";

/// Updater binary shipped with Linux builds
pub const LINUX_UPDATER: &str = "RadPlanBio-update";

/// Script run through the interpreter when no packaged updater exists
pub const FALLBACK_SCRIPT: &str = "mainUpdate.py";

#[cfg(target_os = "windows")]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Linux,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostPlatform::Windows
        } else if cfg!(target_os = "linux") {
            HostPlatform::Linux
        } else {
            HostPlatform::Other
        }
    }
}

/// Where the updater and its leftovers live on disk
#[derive(Debug, Clone)]
pub struct UpdaterLayout {
    pub update_dir: PathBuf,
    pub interpreter: String,
}

impl Default for UpdaterLayout {
    fn default() -> Self {
        Self {
            update_dir: PathBuf::from("update"),
            interpreter: "python".to_string(),
        }
    }
}

impl UpdaterLayout {
    /// Packaged updater for a platform, if that platform ships one
    pub fn packaged_updater(&self, platform: HostPlatform) -> Option<PathBuf> {
        match platform {
            HostPlatform::Windows => Some(self.update_dir.join(WINDOWS_UPDATER)),
            HostPlatform::Linux => Some(self.update_dir.join(LINUX_UPDATER)),
            HostPlatform::Other => None,
        }
    }

    pub fn fallback_script(&self) -> PathBuf {
        self.update_dir.join(FALLBACK_SCRIPT)
    }

    /// Directory the updater stages downloaded releases in
    pub fn staging_dir(&self) -> PathBuf {
        self.update_dir.join("download")
    }
}

/// Command line used to start the updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchPlan {
    pub fn describe(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Pick the updater command for `platform`.
///
/// `exists` decides whether a packaged binary is on disk; it is a parameter
/// so the choice can be made without touching the filesystem.
pub fn resolve_launch_plan<F>(platform: HostPlatform, layout: &UpdaterLayout, exists: F) -> LaunchPlan
where
    F: Fn(&Path) -> bool,
{
    if let Some(binary) = layout.packaged_updater(platform) {
        if exists(&binary) {
            return LaunchPlan {
                program: binary,
                args: Vec::new(),
            };
        }
        debug!("Packaged updater {:?} not found, falling back to script", binary);
    }

    LaunchPlan {
        program: PathBuf::from(&layout.interpreter),
        args: vec![layout.fallback_script().display().to_string()],
    }
}

/// Something that can start the updater
pub trait Launcher {
    /// Start the process and return without waiting for it
    fn launch(&self, plan: &LaunchPlan) -> Result<(), UpdaterError>;
}

/// Starts the updater as an independent OS process
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, plan: &LaunchPlan) -> Result<(), UpdaterError> {
        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group so the updater outlives our terminal session
            command.process_group(0);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn().map_err(|e| UpdaterError::Spawn {
            command: plan.describe(),
            reason: e.to_string(),
        })?;

        info!("Updater started (pid {}): {}", child.id(), plan.describe());
        // dropped without wait(); the child keeps running on its own
        drop(child);
        Ok(())
    }
}

/// Updater errors
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error("Failed to start updater `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> UpdaterLayout {
        UpdaterLayout {
            update_dir: PathBuf::from("update"),
            interpreter: "python".to_string(),
        }
    }

    #[test]
    fn windows_prefers_packaged_exe() {
        let plan = resolve_launch_plan(HostPlatform::Windows, &layout(), |_| true);
        assert_eq!(plan.program, PathBuf::from("update").join(WINDOWS_UPDATER));
        assert!(plan.args.is_empty());
    }

    #[test]
    fn linux_prefers_packaged_binary() {
        let plan = resolve_launch_plan(HostPlatform::Linux, &layout(), |_| true);
        assert_eq!(plan.program, PathBuf::from("update").join(LINUX_UPDATER));
    }

    #[test]
    fn missing_binary_falls_back_to_script() {
        for platform in [HostPlatform::Windows, HostPlatform::Linux] {
            let plan = resolve_launch_plan(platform, &layout(), |_| false);
            assert_eq!(plan.program, PathBuf::from("python"));
            assert_eq!(
                plan.args,
                vec![PathBuf::from("update").join(FALLBACK_SCRIPT).display().to_string()]
            );
        }
    }

    #[test]
    fn other_platforms_always_use_script() {
        let plan = resolve_launch_plan(HostPlatform::Other, &layout(), |_| true);
        assert_eq!(plan.program, PathBuf::from("python"));
    }

    #[test]
    fn packaged_binary_checked_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = UpdaterLayout {
            update_dir: dir.path().to_path_buf(),
            interpreter: "python".to_string(),
        };
        std::fs::write(dir.path().join(LINUX_UPDATER), b"").unwrap();

        let plan = resolve_launch_plan(HostPlatform::Linux, &layout, |p| p.is_file());
        assert_eq!(plan.program, dir.path().join(LINUX_UPDATER));
    }

    #[test]
    fn launching_missing_program_reports_error() {
        let plan = LaunchPlan {
            program: PathBuf::from("definitely-not-an-updater-binary"),
            args: Vec::new(),
        };
        let err = DetachedLauncher.launch(&plan).unwrap_err();
        assert!(err.to_string().contains("definitely-not-an-updater-binary"));
    }
}
