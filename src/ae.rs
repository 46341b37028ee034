//! Application Entity Module
//!
//! Naming of the client's local imaging endpoint.

use tracing::debug;

use crate::config::{AetSuffix, LocalAeConfig};

/// Host identity used for title suffixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalHost {
    pub name: String,
    pub domain: String,
}

impl LocalHost {
    /// Look up the local host and domain name
    pub fn detect() -> Self {
        let name = whoami::fallible::hostname().unwrap_or_default();
        let domain = local_domain_name();
        debug!("Local host {:?}, domain {:?}", name, domain);
        Self { name, domain }
    }
}

/// Title for the local application entity, or `None` when no base name is configured
pub fn application_entity_title(config: &LocalAeConfig, host: &LocalHost) -> Option<String> {
    let base = config.name.trim();
    if base.is_empty() {
        return None;
    }

    let title = match config.suffix {
        AetSuffix::None => base.to_string(),
        AetSuffix::Host => format!("{}{}", base, host.name),
        AetSuffix::Fqdn => format!("{}{}.{}", base, host.name, host.domain),
    };
    Some(title)
}

#[cfg(unix)]
fn local_domain_name() -> String {
    std::fs::read_to_string("/etc/resolv.conf")
        .map(|text| domain_from_resolv_conf(&text))
        .unwrap_or_default()
}

#[cfg(windows)]
fn local_domain_name() -> String {
    std::env::var("USERDNSDOMAIN").unwrap_or_default()
}

#[cfg(not(any(unix, windows)))]
fn local_domain_name() -> String {
    String::new()
}

/// `domain` wins over the first `search` entry, as the resolver does
#[cfg_attr(not(unix), allow(dead_code))]
fn domain_from_resolv_conf(text: &str) -> String {
    let mut search = None;
    for line in text.lines() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("domain") => {
                if let Some(domain) = words.next() {
                    return domain.to_string();
                }
            }
            Some("search") if search.is_none() => {
                search = words.next().map(str::to_string);
            }
            _ => {}
        }
    }
    search.unwrap_or_default()
}
