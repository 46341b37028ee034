//! Transport Module
//!
//! HTTP communication with the primary RadPlanBio backend.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigSnapshot, ProxyConfig};
use crate::session::Credentials;

/// Proxy settings shared by the primary and secondary transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub no_proxy: String,
    pub auth: Option<(String, String)>,
}

impl ProxySettings {
    /// `None` when the proxy is disabled
    pub fn from_config(proxy: &ProxyConfig) -> Option<Self> {
        if !proxy.enabled {
            return None;
        }

        let auth = proxy
            .auth
            .enabled
            .then(|| (proxy.auth.login.clone(), proxy.auth.password.clone()));

        Some(Self {
            host: proxy.host.clone(),
            port: proxy.port,
            no_proxy: proxy.no_proxy.clone(),
            auth,
        })
    }

    pub fn url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Build a reqwest client with the client identity, timeout and optional proxy
pub fn build_http_client(
    timeout: Duration,
    proxy: Option<&ProxySettings>,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(format!("{}/{}", crate::config::CLIENT_IDENTIFIER, env!("CARGO_PKG_VERSION")));

    match proxy {
        Some(settings) => {
            let mut proxy = reqwest::Proxy::all(settings.url())
                .map_err(|e| TransportError::Build(e.to_string()))?;
            if let Some((login, password)) = &settings.auth {
                proxy = proxy.basic_auth(login, password);
            }
            proxy = proxy.no_proxy(reqwest::NoProxy::from_string(&settings.no_proxy));
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    builder.build().map_err(|e| TransportError::Build(e.to_string()))
}

/// Operations the client needs from the primary backend
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Remember the credentials and check them against the server
    async fn sign_in(&self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Default account of the signed-in user
    async fn default_account(&self) -> Result<DefaultAccount, TransportError>;

    /// Password hash for the secondary backend account linked to this user
    async fn edc_password_hash(&self) -> Result<String, TransportError>;

    /// Latest released client software, `None` when the server has no record
    async fn latest_software(&self, identifier: &str)
        -> Result<Option<SoftwareRelease>, TransportError>;
}

/// Primary backend session over HTTP
pub struct HttpConnection {
    base_url: String,
    client: reqwest::Client,
    credentials: RwLock<Option<Credentials>>,
}

impl HttpConnection {
    /// Bind a connection to the configured server
    pub fn new(config: &ConfigSnapshot) -> Result<Self, TransportError> {
        let proxy = ProxySettings::from_config(&config.proxy);
        let client = build_http_client(config.request_timeout, proxy.as_ref())?;
        let base_url = config.server.base_url();

        debug!("Primary connection bound to {}", base_url);

        Ok(Self {
            base_url,
            client,
            credentials: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn current_credentials(&self) -> Option<Credentials> {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.get(path).await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some(credentials) = self.current_credentials() {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        request.send().await.map_err(network_error)
    }
}

#[async_trait]
impl PrimaryBackend for HttpConnection {
    async fn sign_in(&self, credentials: &Credentials) -> Result<(), TransportError> {
        match self.credentials.write() {
            Ok(mut guard) => *guard = Some(credentials.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(credentials.clone()),
        }

        let response = self.get("api/v1/accounts/me").await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        info!("Signed in to primary backend as {}", credentials.username);
        Ok(())
    }

    async fn default_account(&self) -> Result<DefaultAccount, TransportError> {
        self.get_json("api/v1/accounts/me/default").await
    }

    async fn edc_password_hash(&self) -> Result<String, TransportError> {
        let response: PasswordHashResponse =
            self.get_json("api/v1/accounts/me/edc-password-hash").await?;
        Ok(response.password_hash)
    }

    async fn latest_software(
        &self,
        identifier: &str,
    ) -> Result<Option<SoftwareRelease>, TransportError> {
        let response = self
            .get(&format!("api/v1/software/latest?identifier={}", identifier))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json::<SoftwareRelease>()
            .await
            .map(Some)
            .map_err(|e| TransportError::Parse(e.to_string()))
    }
}

pub(crate) fn network_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

async fn error_from_response(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| format!("Status: {}", status));

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("Primary backend rejected credentials: {}", message);
        TransportError::Rejected(message)
    } else {
        TransportError::Server(message)
    }
}

// Response types

/// Default account profile of the signed-in user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultAccount {
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "ocusername")]
    pub edc_username: Option<String>,
    #[serde(default, rename = "partnersite")]
    pub partner_site: Option<PartnerSite>,
}

impl DefaultAccount {
    /// Linked secondary backend username, if any
    pub fn linked_edc_username(&self) -> Option<&str> {
        self.edc_username.as_deref().filter(|name| !name.is_empty())
    }

    pub fn edc_soap_url(&self) -> Option<&str> {
        self.partner_site
            .as_ref()
            .and_then(|site| site.edc.as_ref())
            .map(|edc| edc.soap_base_url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartnerSite {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub edc: Option<EdcEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdcEndpoint {
    #[serde(default, rename = "soapbaseurl")]
    pub soap_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoftwareRelease {
    pub identifier: String,
    pub version: String,
}

#[derive(Deserialize)]
struct PasswordHashResponse {
    #[serde(rename = "passwordhash")]
    password_hash: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Transport errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Cannot build HTTP client: {0}")]
    Build(String),
}
