//! Upgrade Module
//!
//! Persisted upgrade flags and the startup decision derived from them.
//!
//! The two flags live in the `[Temp]` section of the settings file so they
//! survive a full process restart. They are read once at the start of every
//! restart cycle and only this module writes them.

use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini};
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::updater::{resolve_launch_plan, HostPlatform, Launcher, UpdaterLayout};

const TEMP_SECTION: &str = "Temp";
const IS_UPGRADING_KEY: &str = "isupgrading";
const UPGRADE_FINISHED_KEY: &str = "upgradefinished";

/// A persisted tri-state marker, stored as the strings `True` / `False`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpgradeFlag {
    #[default]
    Unset,
    True,
    False,
    /// Anything else found in the file
    Other(String),
}

impl UpgradeFlag {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => UpgradeFlag::Unset,
            Some("True") => UpgradeFlag::True,
            Some("False") => UpgradeFlag::False,
            Some(other) => UpgradeFlag::Other(other.to_string()),
        }
    }

    /// Unset and `False` mean the same thing
    pub fn is_cleared(&self) -> bool {
        matches!(self, UpgradeFlag::Unset | UpgradeFlag::False)
    }

    pub fn as_stored(&self) -> Option<&str> {
        match self {
            UpgradeFlag::Unset => None,
            UpgradeFlag::True => Some("True"),
            UpgradeFlag::False => Some("False"),
            UpgradeFlag::Other(value) => Some(value.as_str()),
        }
    }
}

/// The `isUpgrading` / `upgradeFinished` pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeState {
    pub is_upgrading: UpgradeFlag,
    pub upgrade_finished: UpgradeFlag,
}

impl UpgradeState {
    /// Read the flags from the settings file; a missing file means both unset
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file_noescape(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let temp = ini.section(Some(TEMP_SECTION));
        Ok(Self {
            is_upgrading: UpgradeFlag::parse(temp.and_then(|s| s.get(IS_UPGRADING_KEY))),
            upgrade_finished: UpgradeFlag::parse(temp.and_then(|s| s.get(UPGRADE_FINISHED_KEY))),
        })
    }

    /// Write the flags back, leaving every other section untouched
    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = if path.exists() {
            Ini::load_from_file_noescape(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            Ini::new()
        };

        for (key, flag) in [
            (IS_UPGRADING_KEY, &self.is_upgrading),
            (UPGRADE_FINISHED_KEY, &self.upgrade_finished),
        ] {
            match flag.as_stored() {
                Some(value) => {
                    ini.with_section(Some(TEMP_SECTION)).set(key, value);
                }
                None => {
                    ini.delete_from(Some(TEMP_SECTION), key);
                }
            }
        }

        ini.write_to_file_policy(path, EscapePolicy::Nothing)
            .map_err(|e| ConfigError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!("Stored upgrade state {:?} to {:?}", self, path);
        Ok(())
    }

    /// Which way this restart cycle goes
    pub fn startup_path(&self) -> StartupPath {
        if !self.is_upgrading.is_cleared() {
            StartupPath::PendingUpgrade
        } else if self.upgrade_finished == UpgradeFlag::True {
            StartupPath::PostUpgradeNotify
        } else {
            StartupPath::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPath {
    /// Regular login flow
    Normal,
    /// Regular login flow followed by a one-time "upgrade completed" notice
    PostUpgradeNotify,
    /// Hand off to the external updater and exit without showing any UI
    PendingUpgrade,
}

/// Drives the startup decision and the updater handoff
pub struct UpgradeCoordinator {
    config_path: PathBuf,
    layout: UpdaterLayout,
    platform: HostPlatform,
    launcher: Box<dyn Launcher + Send + Sync>,
}

impl UpgradeCoordinator {
    pub fn new(
        config_path: PathBuf,
        layout: UpdaterLayout,
        platform: HostPlatform,
        launcher: Box<dyn Launcher + Send + Sync>,
    ) -> Self {
        Self {
            config_path,
            layout,
            platform,
            launcher,
        }
    }

    /// Read the flags and act on them.
    ///
    /// For [`StartupPath::PendingUpgrade`] the updater has already been
    /// started (or failed to start) when this returns; either way the caller
    /// must terminate. For [`StartupPath::PostUpgradeNotify`] leftovers are
    /// removed and `upgradeFinished` is cleared so the notice shows once.
    pub fn begin_cycle(&self) -> StartupPath {
        let state = match UpgradeState::load(&self.config_path) {
            Ok(state) => state,
            Err(e) => {
                warn!("Cannot read upgrade state, assuming normal startup: {}", e);
                UpgradeState::default()
            }
        };

        let path = state.startup_path();
        info!("Startup path: {:?} ({:?})", path, state);

        match path {
            StartupPath::Normal => {}
            StartupPath::PostUpgradeNotify => self.finish_upgrade(state),
            StartupPath::PendingUpgrade => self.hand_off(),
        }

        path
    }

    /// Persist `isUpgrading=True` so the next cycle hands off to the updater
    pub fn request_upgrade(&self) -> Result<(), ConfigError> {
        let mut state = UpgradeState::load(&self.config_path)?;
        state.is_upgrading = UpgradeFlag::True;
        state.upgrade_finished = UpgradeFlag::False;
        state.store(&self.config_path)?;
        info!("Upgrade requested, updater will run on relaunch");
        Ok(())
    }

    fn finish_upgrade(&self, mut state: UpgradeState) {
        let staging = self.layout.staging_dir();
        if staging.exists() {
            match std::fs::remove_dir_all(&staging) {
                Ok(()) => info!("Removed upgrade leftovers in {:?}", staging),
                Err(e) => warn!("Failed to remove upgrade leftovers in {:?}: {}", staging, e),
            }
        }

        state.upgrade_finished = UpgradeFlag::Unset;
        if let Err(e) = state.store(&self.config_path) {
            error!("Failed to clear upgrade-finished flag: {}", e);
        }
    }

    fn hand_off(&self) {
        let plan = resolve_launch_plan(self.platform, &self.layout, |p| p.is_file());
        info!("Handing off to updater: {}", plan.describe());
        if let Err(e) = self.launcher.launch(&plan) {
            error!("{}", e);
        }
    }
}
