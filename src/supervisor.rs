//! Supervisor Module
//!
//! Outer restart loop of the client process.

use async_trait::async_trait;
use tracing::info;

/// Exit code reserved by the UI layer for "relaunch the session"
pub const EXIT_CODE_RESTART: i32 = -123_456_789;

/// How a session cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Tear the session down and start a fresh one in this process
    Relaunch,
    /// Leave the loop and exit the process with this code
    Terminate(i32),
}

impl SessionOutcome {
    /// Map an event loop exit code, honouring the restart sentinel
    pub fn from_exit_code(code: i32) -> Self {
        if code == EXIT_CODE_RESTART {
            SessionOutcome::Relaunch
        } else {
            SessionOutcome::Terminate(code)
        }
    }
}

/// One full session: login, main window, event loop
#[async_trait]
pub trait SessionRunner: Send {
    async fn run_session(&mut self, cycle: u32) -> SessionOutcome;
}

/// Run sessions until one terminates; returns its exit code.
///
/// There is no restart limit. Each session is awaited to completion, and
/// everything it owns dropped, before the next one starts.
pub async fn run(runner: &mut dyn SessionRunner) -> i32 {
    let mut cycle: u32 = 0;
    loop {
        cycle = cycle.wrapping_add(1);
        match runner.run_session(cycle).await {
            SessionOutcome::Relaunch => {
                info!("Session {} requested relaunch", cycle);
            }
            SessionOutcome::Terminate(code) => {
                info!("Session {} terminated with exit code {}", cycle, code);
                return code;
            }
        }
    }
}
