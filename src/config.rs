//! Configuration Module
//!
//! Reads the client settings file into an immutable snapshot.
//!
//! Every section and option is optional: whatever the file does not mention
//! keeps its built-in default. Values that are present but malformed are
//! logged and ignored the same way. Option names match regardless of case.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Identifier the primary backend knows this client by
pub const CLIENT_IDENTIFIER: &str = "RadPlanBio-client";

/// Settings file looked up in the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "radplanbio-client.cfg";

/// Immutable view of the configuration file, built once per restart cycle
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub identifier: String,
    pub version: String,
    pub server: ServerEndpoint,
    pub proxy: ProxyConfig,
    pub gui: GuiConfig,
    pub dicom: DicomPolicy,
    pub local_ae: LocalAeConfig,
    pub remote_aes: Vec<RemoteAe>,
    pub sanity: SanityTests,
    pub startup_update_check: bool,
    #[serde(skip)]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub application: String,
}

impl ServerEndpoint {
    /// Base URL of the primary backend application
    pub fn base_url(&self) -> String {
        let application = self.application.trim_matches('/');
        if application.is_empty() {
            format!("http://{}:{}/", self.host, self.port)
        } else {
            format!("http://{}:{}/{}/", self.host, self.port, application)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Comma separated hosts that bypass the proxy
    pub no_proxy: String,
    pub auth: ProxyAuthConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyAuthConfig {
    pub enabled: bool,
    pub login: String,
    #[serde(skip)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuiConfig {
    pub width: u32,
    pub height: u32,
}

/// Imaging transfer policy applied when de-identifying and downloading studies
#[derive(Debug, Clone, Default, Serialize)]
pub struct DicomPolicy {
    pub replace_patient_name_with: String,
    pub const_patient_name: String,
    pub allow_multiple_patient_ids: bool,
    pub retain_patient_characteristics: bool,
    pub retain_study_date: bool,
    pub retain_study_time: bool,
    pub retain_series_date: bool,
    pub retain_series_time: bool,
    pub retain_study_series_descriptions: bool,
    pub auto_rtstruct_match: bool,
    pub auto_rtstruct_ref: bool,
    pub download_patient_folder_name: String,
    pub download_study_folder_name: String,
}

/// How the local application entity title is decorated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AetSuffix {
    #[default]
    None,
    Host,
    Fqdn,
}

impl AetSuffix {
    /// Anything other than `host` or `fqdn` means no suffix
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "host" => AetSuffix::Host,
            "fqdn" => AetSuffix::Fqdn,
            _ => AetSuffix::None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalAeConfig {
    pub name: String,
    pub port: u16,
    pub suffix: AetSuffix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteAe {
    pub address: String,
    pub port: Option<u16>,
    pub aet: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SanityTests {
    pub patient_gender_match: bool,
    pub patient_dob_match: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            identifier: CLIENT_IDENTIFIER.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerEndpoint {
                host: "localhost".to_string(),
                port: 80,
                application: "RadPlanBioServer".to_string(),
            },
            proxy: ProxyConfig::default(),
            gui: GuiConfig {
                width: 1024,
                height: 768,
            },
            dicom: DicomPolicy::default(),
            local_ae: LocalAeConfig {
                name: "RPBClient".to_string(),
                port: 104,
                suffix: AetSuffix::None,
            },
            remote_aes: Vec::new(),
            sanity: SanityTests::default(),
            startup_update_check: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ConfigSnapshot {
    /// Load the snapshot from an INI file.
    ///
    /// A missing file yields the defaults; only an unreadable or
    /// unparsable file is reported as an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file_noescape(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        config.apply(&ini);
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse a snapshot from INI text
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str_noescape(text).map_err(|e| ConfigError::Read {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        config.apply(&ini);
        Ok(config)
    }

    fn apply(&mut self, ini: &Ini) {
        if let Some(section) = Section::lookup(ini, "RadPlanBioServer") {
            section.string("host", &mut self.server.host);
            section.number("port", &mut self.server.port);
            section.string("application", &mut self.server.application);
        }

        if let Some(section) = Section::lookup(ini, "Proxy") {
            section.flag("enabled", &mut self.proxy.enabled);
            section.string("host", &mut self.proxy.host);
            section.number("port", &mut self.proxy.port);
            section.string("noproxy", &mut self.proxy.no_proxy);
        }

        if let Some(section) = Section::lookup(ini, "Proxy-auth") {
            section.flag("enabled", &mut self.proxy.auth.enabled);
            section.string("login", &mut self.proxy.auth.login);
            section.string("password", &mut self.proxy.auth.password);
        }

        if let Some(section) = Section::lookup(ini, "GUI") {
            section.number("main.width", &mut self.gui.width);
            section.number("main.height", &mut self.gui.height);
        }

        if let Some(section) = Section::lookup(ini, "DICOM") {
            let dicom = &mut self.dicom;
            section.string("replacepatientnamewith", &mut dicom.replace_patient_name_with);
            section.string("constpatientname", &mut dicom.const_patient_name);
            section.flag("allowmultiplepatientids", &mut dicom.allow_multiple_patient_ids);
            section.flag(
                "retainpatientcharacteristicsoption",
                &mut dicom.retain_patient_characteristics,
            );
            section.flag("retainstudydate", &mut dicom.retain_study_date);
            section.flag("retainstudytime", &mut dicom.retain_study_time);
            section.flag("retainseriesdate", &mut dicom.retain_series_date);
            section.flag("retainseriestime", &mut dicom.retain_series_time);
            section.flag(
                "retainstudyseriesdescriptions",
                &mut dicom.retain_study_series_descriptions,
            );
            section.flag("autortstructmatch", &mut dicom.auto_rtstruct_match);
            section.flag("autortstructref", &mut dicom.auto_rtstruct_ref);
            section.string(
                "downloaddicompatientfoldername",
                &mut dicom.download_patient_folder_name,
            );
            section.string(
                "downloaddicomstudyfoldername",
                &mut dicom.download_study_folder_name,
            );
        }

        if let Some(section) = Section::lookup(ini, "AE") {
            section.string("name", &mut self.local_ae.name);
            section.number("port", &mut self.local_ae.port);
            if let Some(suffix) = section.get("aetsuffix") {
                self.local_ae.suffix = AetSuffix::parse(suffix);
            }
        }

        let mut remote_count: usize = 0;
        if let Some(section) = Section::lookup(ini, "RemoteAEs") {
            section.number("count", &mut remote_count);
        }

        for i in 0..remote_count {
            let name = format!("RemoteAE{}", i);
            let Some(section) = Section::lookup(ini, &name) else {
                debug!("Remote AE section [{}] missing, skipping", name);
                continue;
            };

            let mut remote = RemoteAe {
                address: String::new(),
                port: None,
                aet: String::new(),
            };
            section.string("address", &mut remote.address);
            let mut port: u16 = 0;
            if section.number("port", &mut port) {
                remote.port = Some(port);
            }
            section.string("aet", &mut remote.aet);
            self.remote_aes.push(remote);
        }

        if let Some(section) = Section::lookup(ini, "SanityTests") {
            section.flag("patientgendermatch", &mut self.sanity.patient_gender_match);
            section.flag("patientdobmatch", &mut self.sanity.patient_dob_match);
        }

        if let Some(section) = Section::lookup(ini, "General") {
            section.flag("startupupdatecheck", &mut self.startup_update_check);
        }
    }
}

/// Borrowed INI section with "assign only if present and valid" helpers
struct Section<'a> {
    name: &'a str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn lookup(ini: &'a Ini, name: &'a str) -> Option<Self> {
        ini.section(Some(name)).map(|props| Self { name, props })
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.get(key)
    }

    fn string(&self, key: &str, slot: &mut String) -> bool {
        match self.get(key) {
            Some(value) => {
                *slot = value.to_string();
                true
            }
            None => false,
        }
    }

    fn flag(&self, key: &str, slot: &mut bool) -> bool {
        let Some(value) = self.get(key) else {
            return false;
        };
        match parse_bool(value) {
            Some(parsed) => {
                *slot = parsed;
                true
            }
            None => {
                warn!("[{}] {} = {:?} is not a boolean, keeping {}", self.name, key, value, slot);
                false
            }
        }
    }

    fn number<T>(&self, key: &str, slot: &mut T) -> bool
    where
        T: FromStr + std::fmt::Display,
    {
        let Some(value) = self.get(key) else {
            return false;
        };
        match value.trim().parse::<T>() {
            Ok(parsed) => {
                *slot = parsed;
                true
            }
            Err(_) => {
                warn!("[{}] {} = {:?} is not a valid number, keeping {}", self.name, key, value, slot);
                false
            }
        }
    }
}

/// Boolean spellings accepted in the settings file
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Cannot write config {path}: {reason}")]
    Write { path: String, reason: String },
}
