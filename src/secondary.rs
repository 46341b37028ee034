//! Secondary Backend Module
//!
//! SOAP study service of the clinical data management system, reached with
//! credentials issued by the primary backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::{escape, resolve_predefined_entity};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

use crate::transport::{build_http_client, network_error, ProxySettings, TransportError};

const STUDY_NAMESPACE: &str = "http://openclinica.org/ws/study/v1";
const WSSE_NAMESPACE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const PASSWORD_TEXT_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

/// Where and as whom to reach the secondary backend
#[derive(Clone, PartialEq, Eq)]
pub struct SecondaryConnectInfo {
    pub base_url: String,
    pub username: String,
    pub password_hash: String,
}

impl std::fmt::Debug for SecondaryConnectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryConnectInfo")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudySummary {
    pub identifier: String,
    pub name: String,
}

/// Study listing of a connected secondary session
#[async_trait]
pub trait StudyService: Send + Sync {
    async fn list_all_studies(&self) -> Result<Vec<StudySummary>, TransportError>;
}

/// Opens secondary backend sessions
pub trait SecondaryConnector: Send + Sync {
    fn connect(
        &self,
        info: &SecondaryConnectInfo,
        proxy: Option<&ProxySettings>,
    ) -> Result<Arc<dyn StudyService>, TransportError>;
}

/// Connector producing [`SoapStudyClient`]s
#[derive(Debug, Clone)]
pub struct SoapConnector {
    pub timeout: Duration,
}

impl SecondaryConnector for SoapConnector {
    fn connect(
        &self,
        info: &SecondaryConnectInfo,
        proxy: Option<&ProxySettings>,
    ) -> Result<Arc<dyn StudyService>, TransportError> {
        let client = build_http_client(self.timeout, proxy)?;
        Ok(Arc::new(SoapStudyClient {
            endpoint: format!("{}/ws/study/v1", info.base_url.trim_end_matches('/')),
            client,
            info: info.clone(),
        }))
    }
}

/// Study web service client speaking WS-Security SOAP
pub struct SoapStudyClient {
    endpoint: String,
    client: reqwest::Client,
    info: SecondaryConnectInfo,
}

impl SoapStudyClient {
    fn list_all_envelope(&self) -> String {
        format!(
            concat!(
                r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:v1="{ns}">"#,
                r#"<soapenv:Header>"#,
                r#"<wsse:Security soapenv:mustUnderstand="1" xmlns:wsse="{wsse}">"#,
                r#"<wsse:UsernameToken>"#,
                r#"<wsse:Username>{user}</wsse:Username>"#,
                r#"<wsse:Password Type="{pwtype}">{hash}</wsse:Password>"#,
                r#"</wsse:UsernameToken>"#,
                r#"</wsse:Security>"#,
                r#"</soapenv:Header>"#,
                r#"<soapenv:Body><v1:listAllRequest/></soapenv:Body>"#,
                r#"</soapenv:Envelope>"#,
            ),
            ns = STUDY_NAMESPACE,
            wsse = WSSE_NAMESPACE,
            pwtype = PASSWORD_TEXT_TYPE,
            user = escape(self.info.username.as_str()),
            hash = escape(self.info.password_hash.as_str()),
        )
    }
}

#[async_trait]
impl StudyService for SoapStudyClient {
    async fn list_all_studies(&self) -> Result<Vec<StudySummary>, TransportError> {
        debug!("Listing studies at {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(self.list_all_envelope())
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;
        if !status.is_success() {
            return Err(TransportError::Server(format!("Status: {}", status)));
        }

        let studies = parse_list_all_response(&body)?;
        info!("Secondary backend lists {} studies", studies.len());
        Ok(studies)
    }
}

/// Extract studies from a `listAllResponse`; anything but `Success` is a rejection
pub fn parse_list_all_response(xml: &str) -> Result<Vec<StudySummary>, TransportError> {
    let mut reader = Reader::from_str(xml);
    let decoder = reader.decoder();

    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut result: Option<String> = None;
    let mut current: Option<StudySummary> = None;
    let mut studies = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => {
                let name = local_name(start.local_name().as_ref())?;
                if name == "study" && current.is_none() {
                    current = Some(StudySummary::default());
                }
                path.push(name);
                text.clear();
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();

                let in_study = path.last().map(String::as_str) == Some("study");
                match name.as_str() {
                    "result" if result.is_none() => result = Some(value),
                    "study" => studies.extend(current.take()),
                    "identifier" | "name" if in_study => {
                        if let Some(study) = current.as_mut() {
                            if name == "identifier" {
                                study.identifier = value;
                            } else {
                                study.name = value;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(chunk) => text.push_str(&decoder.decode(&chunk).map_err(xml_error)?),
            Event::CData(chunk) => text.push_str(&decoder.decode(&chunk).map_err(xml_error)?),
            Event::GeneralRef(entity) => {
                let name = decoder.decode(&entity).map_err(xml_error)?;
                text.push_str(&resolve_entity(&name)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let result = result
        .ok_or_else(|| TransportError::Parse("listAll response without result".to_string()))?;
    if result != "Success" {
        return Err(TransportError::Rejected(result));
    }

    Ok(studies)
}

fn local_name(bytes: &[u8]) -> Result<String, TransportError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(xml_error)
}

/// Predefined entity or numeric character reference, without `&` and `;`
fn resolve_entity(name: &str) -> Result<String, TransportError> {
    if let Some(value) = resolve_predefined_entity(name) {
        return Ok(value.to_string());
    }

    let code = match name.strip_prefix('#') {
        Some(hex) if hex.starts_with('x') || hex.starts_with('X') => {
            u32::from_str_radix(&hex[1..], 16).ok()
        }
        Some(decimal) => decimal.parse().ok(),
        None => None,
    };

    code.and_then(char::from_u32)
        .map(String::from)
        .ok_or_else(|| TransportError::Parse(format!("unknown entity &{};", name)))
}

fn xml_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Parse(e.to_string())
}
