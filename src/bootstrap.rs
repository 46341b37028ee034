//! Bootstrap Module
//!
//! Turns a signed-in primary connection into a secondary backend session.
//!
//! Every step after sign-in may fail. Failures come back as a
//! [`SecondaryStatus`] instead of an error: the client keeps running with
//! the secondary backend disconnected.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ConfigSnapshot;
use crate::secondary::{SecondaryConnectInfo, SecondaryConnector};
use crate::session::UserSession;
use crate::shell::Shell;
use crate::transport::{DefaultAccount, PrimaryBackend, ProxySettings, TransportError};

/// Who triggered the secondary probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Automatic startup: failures are only logged
    Background,
    /// Explicit user action: credential failures are shown to the user
    Interactive,
}

/// Outcome of the secondary connection attempt
#[derive(Debug, Clone)]
pub enum SecondaryStatus {
    Connected {
        username: String,
        password_hash: String,
        study_count: usize,
    },
    /// The profile carries no secondary username
    NotLinked,
    /// The default account could not be fetched
    ProfileUnavailable(TransportError),
    /// Credentials, endpoint or the liveness probe failed
    Failed(TransportError),
}

impl SecondaryStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, SecondaryStatus::Connected { .. })
    }
}

pub struct Bootstrapper {
    primary: Arc<dyn PrimaryBackend>,
    connector: Arc<dyn SecondaryConnector>,
    proxy: Option<ProxySettings>,
    step_timeout: Duration,
}

impl Bootstrapper {
    pub fn new(
        primary: Arc<dyn PrimaryBackend>,
        connector: Arc<dyn SecondaryConnector>,
        config: &ConfigSnapshot,
    ) -> Self {
        Self {
            primary,
            connector,
            proxy: ProxySettings::from_config(&config.proxy),
            step_timeout: config.request_timeout,
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Fetch the profile, the linked credentials and probe the secondary backend
    pub async fn probe_secondary(&self) -> SecondaryStatus {
        let account = match self.step("default account", self.primary.default_account()).await {
            Ok(account) => account,
            Err(e) => {
                warn!("Primary backend profile unavailable: {}", e);
                return SecondaryStatus::ProfileUnavailable(e);
            }
        };

        match self.connect_linked(&account).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                info!("No secondary backend account linked to {}", account.username);
                SecondaryStatus::NotLinked
            }
            Err(e) => {
                warn!("Secondary backend communication failed: {}", e);
                SecondaryStatus::Failed(e)
            }
        }
    }

    async fn connect_linked(
        &self,
        account: &DefaultAccount,
    ) -> Result<Option<SecondaryStatus>, TransportError> {
        let Some(username) = account.linked_edc_username() else {
            return Ok(None);
        };

        let password_hash = self
            .step("password hash", self.primary.edc_password_hash())
            .await?;
        let base_url = account
            .edc_soap_url()
            .ok_or_else(|| TransportError::Parse("profile has no secondary endpoint".to_string()))?;

        let info = SecondaryConnectInfo {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password_hash,
        };
        debug!("Connecting to secondary backend {:?}", info);

        let service = self.connector.connect(&info, self.proxy.as_ref())?;
        let studies = self.step("study listing", service.list_all_studies()).await?;

        Ok(Some(SecondaryStatus::Connected {
            username: info.username,
            password_hash: info.password_hash,
            study_count: studies.len(),
        }))
    }

    async fn step<T, F>(&self, name: &str, future: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.step_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "{} did not answer within {:?}",
                name, self.step_timeout
            ))),
        }
    }

    /// Probe and record the result in `session`.
    ///
    /// In [`ProbeMode::Interactive`] a failed login is reported to the user.
    pub async fn establish(
        &self,
        session: &mut UserSession,
        mode: ProbeMode,
        shell: &mut dyn Shell,
    ) -> SecondaryStatus {
        let status = self.probe_secondary().await;

        match &status {
            SecondaryStatus::Connected {
                username,
                password_hash,
                ..
            } => session.set_secondary(username.clone(), password_hash.clone()),
            SecondaryStatus::Failed(_) => {
                session.clear_secondary();
                if mode == ProbeMode::Interactive {
                    shell.warn("Error", "Wrong username or password!");
                }
            }
            SecondaryStatus::NotLinked | SecondaryStatus::ProfileUnavailable(_) => {
                session.clear_secondary();
            }
        }

        status
    }

    /// User-triggered retry of the secondary connection.
    ///
    /// Backs the window layer's "reconnect" action; the startup path uses
    /// [`Bootstrapper::establish`] in background mode instead.
    pub async fn reconnect_secondary(
        &self,
        session: &mut UserSession,
        shell: &mut dyn Shell,
    ) -> SecondaryStatus {
        info!("Reconnecting secondary backend for {}", session.username());
        self.establish(session, ProbeMode::Interactive, shell).await
    }
}

/// Log the configured proxy and the proxy variables of the process environment
pub fn log_proxy_diagnostics(config: &ConfigSnapshot) {
    info!(
        "Partner site proxy: {}:{} [{}]",
        config.proxy.host, config.proxy.port, config.proxy.enabled
    );
    for name in ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY", "http_proxy", "https_proxy", "no_proxy"] {
        if let Ok(value) = std::env::var(name) {
            info!("Environment {}={}", name, value);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::secondary::{StudyService, StudySummary};
    use crate::session::Credentials;
    use crate::shell::tests::ScriptedShell;
    use crate::transport::{EdcEndpoint, PartnerSite, SoftwareRelease};

    /// In-memory primary backend
    #[derive(Default)]
    pub(crate) struct FakePrimary {
        pub account: Option<DefaultAccount>,
        pub password_hash: Option<String>,
        pub latest: Option<SoftwareRelease>,
        pub reject_sign_in: bool,
        pub hang: bool,
    }

    impl FakePrimary {
        pub(crate) fn linked() -> Self {
            Self {
                account: Some(DefaultAccount {
                    username: "alice".to_string(),
                    edc_username: Some("alice_oc".to_string()),
                    partner_site: Some(PartnerSite {
                        name: "DD".to_string(),
                        edc: Some(EdcEndpoint {
                            soap_base_url: "https://edc.example.org/OpenClinica-ws".to_string(),
                        }),
                    }),
                }),
                password_hash: Some("5baa61e4".to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PrimaryBackend for FakePrimary {
        async fn sign_in(&self, _credentials: &Credentials) -> Result<(), TransportError> {
            if self.reject_sign_in {
                return Err(TransportError::Rejected("bad login".to_string()));
            }
            Ok(())
        }

        async fn default_account(&self) -> Result<DefaultAccount, TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.account
                .clone()
                .ok_or_else(|| TransportError::Network("connection refused".to_string()))
        }

        async fn edc_password_hash(&self) -> Result<String, TransportError> {
            self.password_hash
                .clone()
                .ok_or_else(|| TransportError::Server("no hash".to_string()))
        }

        async fn latest_software(
            &self,
            _identifier: &str,
        ) -> Result<Option<SoftwareRelease>, TransportError> {
            Ok(self.latest.clone())
        }
    }

    /// Connector whose study listing succeeds or fails on demand
    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub fail_listing: bool,
        pub connections: Mutex<Vec<SecondaryConnectInfo>>,
        pub proxies: Mutex<Vec<Option<ProxySettings>>>,
    }

    struct FakeStudies {
        fail: bool,
    }

    #[async_trait]
    impl StudyService for FakeStudies {
        async fn list_all_studies(&self) -> Result<Vec<StudySummary>, TransportError> {
            if self.fail {
                return Err(TransportError::Rejected("Fail".to_string()));
            }
            Ok(vec![StudySummary {
                identifier: "HNPrime".to_string(),
                name: "Head and Neck Prime".to_string(),
            }])
        }
    }

    impl SecondaryConnector for FakeConnector {
        fn connect(
            &self,
            info: &SecondaryConnectInfo,
            proxy: Option<&ProxySettings>,
        ) -> Result<Arc<dyn StudyService>, TransportError> {
            self.connections.lock().unwrap().push(info.clone());
            self.proxies.lock().unwrap().push(proxy.cloned());
            Ok(Arc::new(FakeStudies {
                fail: self.fail_listing,
            }))
        }
    }

    fn session() -> UserSession {
        UserSession::new(Credentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        })
    }

    fn bootstrapper(primary: FakePrimary, connector: Arc<FakeConnector>) -> Bootstrapper {
        Bootstrapper::new(Arc::new(primary), connector, &ConfigSnapshot::default())
    }

    #[tokio::test]
    async fn all_steps_succeed_connects_session() {
        let connector = Arc::new(FakeConnector::default());
        let boot = bootstrapper(FakePrimary::linked(), connector.clone());
        let mut session = session();
        let mut shell = ScriptedShell::default();

        let status = boot
            .establish(&mut session, ProbeMode::Background, &mut shell)
            .await;

        assert!(status.is_connected());
        assert!(session.is_secondary_connected());
        assert_eq!(session.secondary().username, "alice_oc");
        assert_eq!(session.secondary().password_hash, "5baa61e4");

        let connections = connector.connections.lock().unwrap();
        assert_eq!(connections[0].base_url, "https://edc.example.org/OpenClinica-ws");
    }

    #[tokio::test]
    async fn secondary_connection_uses_configured_proxy() {
        let config = ConfigSnapshot::from_ini_str(concat!(
            "[Proxy]\nenabled = True\nhost = proxy.local\nport = 3128\nnoproxy = localhost\n",
            "[Proxy-auth]\nenabled = True\nlogin = bob\npassword = hunter2\n",
        ))
        .unwrap();
        let connector = Arc::new(FakeConnector::default());
        let boot = Bootstrapper::new(Arc::new(FakePrimary::linked()), connector.clone(), &config);

        assert!(boot.probe_secondary().await.is_connected());

        let proxies = connector.proxies.lock().unwrap();
        assert_eq!(
            proxies[0],
            Some(ProxySettings {
                host: "proxy.local".to_string(),
                port: 3128,
                no_proxy: "localhost".to_string(),
                auth: Some(("bob".to_string(), "hunter2".to_string())),
            })
        );
    }

    #[tokio::test]
    async fn disabled_proxy_connects_directly() {
        let config =
            ConfigSnapshot::from_ini_str("[Proxy]\nenabled = False\nhost = proxy.local\n").unwrap();
        let connector = Arc::new(FakeConnector::default());
        let boot = Bootstrapper::new(Arc::new(FakePrimary::linked()), connector.clone(), &config);

        assert!(boot.probe_secondary().await.is_connected());
        assert_eq!(*connector.proxies.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn profile_failure_degrades_without_error() {
        let boot = bootstrapper(FakePrimary::default(), Arc::new(FakeConnector::default()));
        let mut session = session();
        let mut shell = ScriptedShell::default();

        let status = boot
            .establish(&mut session, ProbeMode::Interactive, &mut shell)
            .await;

        assert!(matches!(status, SecondaryStatus::ProfileUnavailable(_)));
        assert!(!session.is_secondary_connected());
        assert!(shell.warnings.is_empty());
    }

    #[tokio::test]
    async fn unlinked_profile_is_not_an_error() {
        let mut primary = FakePrimary::linked();
        if let Some(account) = primary.account.as_mut() {
            account.edc_username = None;
        }
        let boot = bootstrapper(primary, Arc::new(FakeConnector::default()));

        assert!(matches!(boot.probe_secondary().await, SecondaryStatus::NotLinked));
    }

    #[tokio::test]
    async fn failed_probe_warns_only_when_interactive() {
        let connector = Arc::new(FakeConnector {
            fail_listing: true,
            ..Default::default()
        });
        let boot = bootstrapper(FakePrimary::linked(), connector);

        let mut session = session();
        let mut shell = ScriptedShell::default();
        let status = boot
            .establish(&mut session, ProbeMode::Background, &mut shell)
            .await;
        assert!(matches!(status, SecondaryStatus::Failed(TransportError::Rejected(_))));
        assert!(shell.warnings.is_empty());

        boot.establish(&mut session, ProbeMode::Interactive, &mut shell)
            .await;
        assert_eq!(shell.warnings, vec!["Wrong username or password!".to_string()]);
        assert!(!session.is_secondary_connected());
    }

    #[tokio::test]
    async fn reconnect_reports_failures_to_user() {
        let connector = Arc::new(FakeConnector {
            fail_listing: true,
            ..Default::default()
        });
        let boot = bootstrapper(FakePrimary::linked(), connector.clone());
        let mut session = session();
        let mut shell = ScriptedShell::default();

        let status = boot.reconnect_secondary(&mut session, &mut shell).await;

        assert!(!status.is_connected());
        assert_eq!(shell.warnings.len(), 1);
        assert_eq!(connector.connections.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_password_hash_fails_probe() {
        let mut primary = FakePrimary::linked();
        primary.password_hash = None;
        let boot = bootstrapper(primary, Arc::new(FakeConnector::default()));

        assert!(matches!(
            boot.probe_secondary().await,
            SecondaryStatus::Failed(TransportError::Server(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out() {
        let primary = FakePrimary {
            hang: true,
            ..FakePrimary::linked()
        };
        let boot = bootstrapper(primary, Arc::new(FakeConnector::default()))
            .with_step_timeout(Duration::from_secs(5));

        assert!(matches!(
            boot.probe_secondary().await,
            SecondaryStatus::ProfileUnavailable(TransportError::Timeout(_))
        ));
    }
}
