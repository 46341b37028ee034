//! Session Module
//!
//! Per-cycle user session state.

use serde::Serialize;
use tracing::{info, warn};

use crate::shell::Shell;

/// Primary backend login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Account on the secondary backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecondaryAccount {
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub connected: bool,
}

/// State of the signed-in user for one restart cycle.
///
/// Created after login and dropped when the cycle ends; never carried
/// across a relaunch.
#[derive(Debug)]
pub struct UserSession {
    credentials: Credentials,
    secondary: SecondaryAccount,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl UserSession {
    pub fn new(credentials: Credentials) -> Self {
        info!("Session started for user: {}", credentials.username);
        Self {
            credentials,
            secondary: SecondaryAccount::default(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    /// Time since login
    pub fn elapsed(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }

    pub fn secondary(&self) -> &SecondaryAccount {
        &self.secondary
    }

    /// Record a verified secondary backend login
    pub fn set_secondary(&mut self, username: String, password_hash: String) {
        info!("Secondary backend connected as {}", username);
        self.secondary = SecondaryAccount {
            username,
            password_hash,
            connected: true,
        };
    }

    /// Drop back to degraded mode
    pub fn clear_secondary(&mut self) {
        if self.secondary.connected {
            info!("Secondary backend disconnected");
        }
        self.secondary = SecondaryAccount::default();
    }

    pub fn is_secondary_connected(&self) -> bool {
        self.secondary.connected
    }

    /// Gate for features that need the secondary backend.
    ///
    /// Warns the user and returns `false` in degraded mode. Called by the
    /// window layer before study listing, upload and download actions.
    pub fn require_secondary(&self, shell: &mut dyn Shell) -> bool {
        if self.secondary.connected {
            return true;
        }

        warn!("Secondary backend required but not connected");
        shell.warn(
            "Error",
            "Cannot connect to RadPlanBio - OpenClinica SOAP services!",
        );
        false
    }
}
