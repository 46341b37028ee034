//! RadPlanBio Client Library
//!
//! Lifecycle of the desktop client: restart loop, self-upgrade handoff and
//! the connection bootstrap that runs before the main window is shown.

pub mod ae;
pub mod app;
pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod secondary;
pub mod session;
pub mod shell;
pub mod supervisor;
pub mod transport;
pub mod updater;
pub mod upgrade;
pub mod version;

pub use app::{BackendFactory, ClientApp, HttpBackends};
pub use config::ConfigSnapshot;
pub use supervisor::{SessionOutcome, EXIT_CODE_RESTART};
