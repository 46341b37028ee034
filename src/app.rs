//! Application Module
//!
//! One restart cycle of the client: upgrade decision, login, connection
//! bootstrap, main window and event loop.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::ae::{application_entity_title, LocalHost};
use crate::bootstrap::{log_proxy_diagnostics, Bootstrapper, ProbeMode};
use crate::config::ConfigSnapshot;
use crate::secondary::{SecondaryConnector, SoapConnector};
use crate::session::UserSession;
use crate::shell::Shell;
use crate::supervisor::{SessionOutcome, SessionRunner};
use crate::transport::{HttpConnection, PrimaryBackend, TransportError};
use crate::upgrade::{StartupPath, UpgradeCoordinator};
use crate::version;

const UPGRADE_COMPLETED_TITLE: &str = "Upgrade completed";
const UPGRADE_COMPLETED_MESSAGE: &str = "RadPlanBio client has been successfully upgraded";

/// Creates the backend connections for a cycle
pub trait BackendFactory: Send + Sync {
    fn primary(&self, config: &ConfigSnapshot) -> Result<Arc<dyn PrimaryBackend>, TransportError>;

    fn secondary(&self, config: &ConfigSnapshot) -> Arc<dyn SecondaryConnector>;
}

/// HTTP primary backend and SOAP secondary backend
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpBackends;

impl BackendFactory for HttpBackends {
    fn primary(&self, config: &ConfigSnapshot) -> Result<Arc<dyn PrimaryBackend>, TransportError> {
        Ok(Arc::new(HttpConnection::new(config)?))
    }

    fn secondary(&self, config: &ConfigSnapshot) -> Arc<dyn SecondaryConnector> {
        Arc::new(SoapConnector {
            timeout: config.request_timeout,
        })
    }
}

/// The client as seen by the restart loop
pub struct ClientApp<S: Shell> {
    config_path: PathBuf,
    coordinator: UpgradeCoordinator,
    backends: Box<dyn BackendFactory>,
    shell: S,
    local_host: LocalHost,
}

impl<S: Shell> ClientApp<S> {
    pub fn new(
        config_path: PathBuf,
        coordinator: UpgradeCoordinator,
        backends: Box<dyn BackendFactory>,
        shell: S,
    ) -> Self {
        Self {
            config_path,
            coordinator,
            backends,
            shell,
            local_host: LocalHost::detect(),
        }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    fn load_config(&self) -> ConfigSnapshot {
        match ConfigSnapshot::load(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}, using defaults", e);
                ConfigSnapshot::default()
            }
        }
    }

    fn log_startup(&self, config: &ConfigSnapshot) {
        info!("RPB desktop client version: {}", config.version);
        info!(
            "RadPlanBio host: {}:{}/{}",
            config.server.host, config.server.port, config.server.application
        );
        log_proxy_diagnostics(config);
        debug!(
            "Configuration: {}",
            serde_json::to_string(config).unwrap_or_default()
        );

        match application_entity_title(&config.local_ae, &self.local_host) {
            Some(title) => info!("Local application entity {} on port {}", title, config.local_ae.port),
            None => debug!("No local application entity configured"),
        }
        for remote in &config.remote_aes {
            debug!("Remote application entity {:?}", remote);
        }
    }

    /// Prompt until the primary backend accepts a login or the user cancels
    async fn login(
        &mut self,
        primary: &dyn PrimaryBackend,
        config: &ConfigSnapshot,
    ) -> Option<UserSession> {
        loop {
            let credentials = self.shell.login(&config.server).await?;

            match primary.sign_in(&credentials).await {
                Ok(()) => return Some(UserSession::new(credentials)),
                Err(TransportError::Rejected(reason)) => {
                    warn!("Login rejected: {}", reason);
                    self.shell.warn("Error", "Wrong username or password!");
                }
                Err(e) => {
                    warn!("Login failed: {}", e);
                    self.shell
                        .warn("Error", &format!("Cannot reach the RadPlanBio server: {}", e));
                }
            }
        }
    }

    /// Returns `true` when the user accepted an upgrade and it was scheduled
    async fn check_for_update(
        &mut self,
        primary: &dyn PrimaryBackend,
        config: &ConfigSnapshot,
    ) -> bool {
        let latest = match primary.latest_software(&config.identifier).await {
            Ok(release) => release.map(|release| release.version),
            Err(e) => {
                warn!("Update check failed: {}", e);
                None
            }
        };

        if !version::upgrade_available(&config.version, latest.as_deref()) {
            info!("Client {} is up to date", config.version);
            return false;
        }

        let latest = latest.unwrap_or_default();
        info!("Newer client available: {} -> {}", config.version, latest);
        if !self.shell.offer_upgrade(&config.version, &latest) {
            return false;
        }

        match self.coordinator.request_upgrade() {
            Ok(()) => true,
            Err(e) => {
                error!("Cannot schedule upgrade: {}", e);
                self.shell.warn("Error", "The upgrade could not be scheduled.");
                false
            }
        }
    }
}

#[async_trait]
impl<S: Shell> SessionRunner for ClientApp<S> {
    async fn run_session(&mut self, cycle: u32) -> SessionOutcome {
        info!("Starting session cycle {}", cycle);
        let config = self.load_config();

        let path = self.coordinator.begin_cycle();
        if path == StartupPath::PendingUpgrade {
            info!("Updater takes over, closing the client");
            return SessionOutcome::Terminate(0);
        }

        self.log_startup(&config);

        let primary = match self.backends.primary(&config) {
            Ok(primary) => primary,
            Err(e) => {
                error!("Cannot create primary connection: {}", e);
                return SessionOutcome::Terminate(1);
            }
        };

        let Some(mut session) = self.login(primary.as_ref(), &config).await else {
            info!("Login cancelled");
            return SessionOutcome::Terminate(0);
        };

        let bootstrapper =
            Bootstrapper::new(primary.clone(), self.backends.secondary(&config), &config);
        bootstrapper
            .establish(&mut session, ProbeMode::Background, &mut self.shell)
            .await;

        self.shell.show_main_window(&session, &config);

        if path == StartupPath::PostUpgradeNotify {
            self.shell
                .inform(UPGRADE_COMPLETED_TITLE, UPGRADE_COMPLETED_MESSAGE);
        }

        if config.startup_update_check && self.check_for_update(primary.as_ref(), &config).await {
            return SessionOutcome::Relaunch;
        }

        let code = self.shell.run_event_loop(&session).await;
        info!(
            "Session of {} ended after {}s with code {}",
            session.username(),
            session.elapsed().num_seconds(),
            code
        );
        SessionOutcome::from_exit_code(code)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::bootstrap::tests::{FakeConnector, FakePrimary};
    use crate::session::Credentials;
    use crate::shell::tests::ScriptedShell;
    use crate::supervisor::{self, EXIT_CODE_RESTART};
    use crate::transport::SoftwareRelease;
    use crate::updater::{HostPlatform, UpdaterLayout};
    use crate::upgrade::tests::RecordingLauncher;
    use crate::upgrade::{UpgradeFlag, UpgradeState};

    struct FakeBackends {
        primary: Option<Arc<FakePrimary>>,
        connector: Arc<FakeConnector>,
    }

    impl BackendFactory for FakeBackends {
        fn primary(
            &self,
            _config: &ConfigSnapshot,
        ) -> Result<Arc<dyn PrimaryBackend>, TransportError> {
            match &self.primary {
                Some(primary) => Ok(primary.clone()),
                None => Err(TransportError::Build("no TLS backend".to_string())),
            }
        }

        fn secondary(&self, _config: &ConfigSnapshot) -> Arc<dyn SecondaryConnector> {
            self.connector.clone()
        }
    }

    fn alice() -> Credentials {
        Credentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        }
    }

    fn app(
        config_path: &Path,
        primary: Option<FakePrimary>,
        shell: ScriptedShell,
        launcher: RecordingLauncher,
    ) -> ClientApp<ScriptedShell> {
        let layout = UpdaterLayout {
            update_dir: config_path.with_file_name("update"),
            interpreter: "python".to_string(),
        };
        let coordinator = UpgradeCoordinator::new(
            config_path.to_path_buf(),
            layout,
            HostPlatform::Linux,
            Box::new(launcher),
        );
        let backends = FakeBackends {
            primary: primary.map(Arc::new),
            connector: Arc::new(FakeConnector::default()),
        };
        ClientApp::new(config_path.to_path_buf(), coordinator, Box::new(backends), shell)
    }

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("client.cfg");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[tokio::test]
    async fn normal_cycle_runs_event_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[General]\nstartupupdatecheck = False\n");
        let shell = ScriptedShell {
            logins: [alice()].into(),
            exit_code: 3,
            ..Default::default()
        };

        let mut app = app(&path, Some(FakePrimary::linked()), shell, RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(3));

        let shell = app.shell();
        assert_eq!(shell.windows_shown, 1);
        assert!(shell.notices.is_empty());
        assert!(shell.warnings.is_empty());
    }

    #[tokio::test]
    async fn cancelled_login_terminates_without_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");

        let mut app = app(
            &path,
            Some(FakePrimary::linked()),
            ScriptedShell::default(),
            RecordingLauncher::default(),
        );
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(0));
        assert_eq!(app.shell().windows_shown, 0);
    }

    #[tokio::test]
    async fn rejected_login_prompts_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[General]\nstartupupdatecheck = False\n");
        let primary = FakePrimary {
            reject_sign_in: true,
            ..FakePrimary::linked()
        };
        let shell = ScriptedShell {
            logins: [alice()].into(),
            ..Default::default()
        };

        let mut app = app(&path, Some(primary), shell, RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(0));
        assert_eq!(app.shell().login_prompts, 2);
        assert_eq!(app.shell().warnings, vec!["Wrong username or password!".to_string()]);
    }

    #[tokio::test]
    async fn primary_construction_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");

        let mut app = app(&path, None, ScriptedShell::default(), RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(1));
        assert_eq!(app.shell().login_prompts, 0);
    }

    #[tokio::test]
    async fn degraded_secondary_still_shows_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[General]\nstartupupdatecheck = False\n");
        let shell = ScriptedShell {
            logins: [alice()].into(),
            ..Default::default()
        };

        let mut app = app(&path, Some(FakePrimary::default()), shell, RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(0));
        assert_eq!(app.shell().windows_shown, 1);
    }

    #[tokio::test]
    async fn pending_upgrade_skips_ui_and_launches_updater() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[Temp]\nisupgrading = True\n");
        let launcher = RecordingLauncher::default();

        let mut app = app(&path, Some(FakePrimary::linked()), ScriptedShell::default(), launcher.clone());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(0));
        assert_eq!(app.shell().login_prompts, 0);
        assert_eq!(launcher.plans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_upgrade_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[General]\nstartupupdatecheck = False\n[Temp]\nisupgrading = False\nupgradefinished = True\n",
        );
        let shell = ScriptedShell {
            logins: [alice(), alice()].into(),
            exit_code: EXIT_CODE_RESTART,
            ..Default::default()
        };

        let mut app = app(&path, Some(FakePrimary::linked()), shell, RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Relaunch);
        assert_eq!(app.run_session(2).await, SessionOutcome::Relaunch);

        assert_eq!(app.shell().notices, vec![UPGRADE_COMPLETED_TITLE.to_string()]);
        assert_eq!(UpgradeState::load(&path).unwrap().upgrade_finished, UpgradeFlag::Unset);
    }

    #[tokio::test]
    async fn accepted_upgrade_relaunches_into_updater() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");
        let primary = FakePrimary {
            latest: Some(SoftwareRelease {
                identifier: "RadPlanBio-client".to_string(),
                version: "999.0.0".to_string(),
            }),
            ..FakePrimary::linked()
        };
        let shell = ScriptedShell {
            logins: [alice()].into(),
            accept_upgrade: true,
            ..Default::default()
        };
        let launcher = RecordingLauncher::default();

        let mut app = app(&path, Some(primary), shell, launcher.clone());
        assert_eq!(supervisor::run(&mut app).await, 0);

        assert_eq!(app.shell().upgrade_offers.len(), 1);
        assert_eq!(app.shell().upgrade_offers[0].1, "999.0.0");
        assert_eq!(app.shell().login_prompts, 1);
        assert_eq!(launcher.plans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_release_record_offers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");
        let shell = ScriptedShell {
            logins: [alice()].into(),
            accept_upgrade: true,
            ..Default::default()
        };

        let mut app = app(&path, Some(FakePrimary::linked()), shell, RecordingLauncher::default());
        assert_eq!(app.run_session(1).await, SessionOutcome::Terminate(0));
        assert!(app.shell().upgrade_offers.is_empty());
    }
}
