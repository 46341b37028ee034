//! Shell Module
//!
//! The user-facing surface the lifecycle drives: login prompt, main window,
//! notices and the event loop. The desktop UI implements [`Shell`]; the
//! console implementation keeps the client runnable without one.

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::{ConfigSnapshot, ServerEndpoint};
use crate::session::{Credentials, UserSession};

#[async_trait]
pub trait Shell: Send {
    /// Ask for primary backend credentials; `None` means the user cancelled
    async fn login(&mut self, server: &ServerEndpoint) -> Option<Credentials>;

    fn show_main_window(&mut self, session: &UserSession, config: &ConfigSnapshot);

    /// Informational notice the user acknowledges
    fn inform(&mut self, title: &str, message: &str);

    /// Blocking warning
    fn warn(&mut self, title: &str, message: &str);

    /// Offer an upgrade; `true` when the user accepts
    fn offer_upgrade(&mut self, current: &str, latest: &str) -> bool;

    /// Run until the user quits; returns the exit code
    async fn run_event_loop(&mut self, session: &UserSession) -> i32;
}

/// Terminal shell: credentials from the environment or stdin, quits on Ctrl-C
pub struct ConsoleShell {
    env_credentials_tried: bool,
    interactive: bool,
}

impl ConsoleShell {
    pub fn new() -> Self {
        Self {
            env_credentials_tried: false,
            interactive: std::io::stdin().is_terminal(),
        }
    }

    fn env_credentials() -> Option<Credentials> {
        let username = std::env::var("RPB_USERNAME").ok()?;
        let password = std::env::var("RPB_PASSWORD").ok()?;
        Some(Credentials { username, password })
    }
}

impl Default for ConsoleShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Shell for ConsoleShell {
    async fn login(&mut self, server: &ServerEndpoint) -> Option<Credentials> {
        if !self.env_credentials_tried {
            self.env_credentials_tried = true;
            if let Some(credentials) = Self::env_credentials() {
                return Some(credentials);
            }
        }

        if !self.interactive {
            info!("No terminal attached, login cancelled");
            return None;
        }

        let target = format!("{}:{}/{}", server.host, server.port, server.application);
        match tokio::task::spawn_blocking(move || prompt_credentials(&target)).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Login prompt failed: {}", e);
                None
            }
        }
    }

    fn show_main_window(&mut self, session: &UserSession, config: &ConfigSnapshot) {
        let secondary = if session.is_secondary_connected() {
            "connected"
        } else {
            "not connected"
        };
        println!(
            "[{}]@{}/{}:{} ready (OpenClinica {}). Press Ctrl-C to quit.",
            session.username(),
            config.server.host,
            config.server.application,
            config.server.port,
            secondary
        );
    }

    fn inform(&mut self, title: &str, message: &str) {
        info!("{}: {}", title, message);
        println!("{}: {}", title, message);
    }

    fn warn(&mut self, title: &str, message: &str) {
        warn!("{}: {}", title, message);
        eprintln!("{}: {}", title, message);
    }

    fn offer_upgrade(&mut self, current: &str, latest: &str) -> bool {
        if !self.interactive {
            info!("Upgrade {} -> {} available, not prompting without a terminal", current, latest);
            return false;
        }

        let answer = prompt(&format!(
            "A new version {} is available (running {}). Upgrade now? [y/N] ",
            latest, current
        ));
        matches!(answer.as_deref().map(str::trim), Some("y") | Some("Y") | Some("yes"))
    }

    async fn run_event_loop(&mut self, _session: &UserSession) -> i32 {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Quit requested");
                0
            }
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {}", e);
                1
            }
        }
    }
}

fn prompt(label: &str) -> Option<String> {
    print!("{}", label);
    std::io::stdout().flush().ok()?;

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

fn prompt_credentials(target: &str) -> Option<Credentials> {
    println!("Login to {}", target);
    let username = prompt("Username: ")?;
    if username.trim().is_empty() {
        return None;
    }
    let password = prompt("Password: ")?;
    Some(Credentials {
        username: username.trim().to_string(),
        password,
    })
}
