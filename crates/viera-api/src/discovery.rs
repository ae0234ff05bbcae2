// SSDP discovery and UPnP descriptor resolution
//
// A scan is two phases: collect unicast M-SEARCH responses until the
// timeout, then fetch each distinct device's descriptors over HTTP. A
// timeout is the normal end of a scan; a device whose descriptor cannot
// be parsed is logged and skipped.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::soap;
use crate::television::DEFAULT_PORT;
use crate::transport::TransportConfig;

/// SSDP multicast group and port.
pub const SSDP_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Search request for the VIERA network-control service.
pub const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
ST: urn:panasonic-com:service:p00NetworkControl:1\r\n\
MX: 1\r\n\
\r\n";

/// Action whose presence in the specs document marks an encrypted device.
const ENCRYPT_SESSION_ACTION: &str = "X_GetEncryptSessionId";

/// Length of the `uuid:` prefix stripped from `UDN` to form the serial.
const UDN_PREFIX_LEN: usize = 5;

// ── Types ────────────────────────────────────────────────────────────

/// An installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
}

/// An HDMI input selectable with `NRC_HDMI{id}-ONOFF`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdmiInput {
    pub id: u8,
    pub label: String,
}

impl HdmiInput {
    /// The four inputs every VIERA model exposes through the remote.
    pub fn standard() -> Vec<Self> {
        (1..=4)
            .map(|id| Self {
                id,
                label: format!("HDMI {id}"),
            })
            .collect()
    }
}

/// A television found on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identifier: String,
    pub ip: IpAddr,
    pub port: u16,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub serial: String,
    pub encrypted: bool,
    pub applications: Vec<Application>,
    pub hdmi: Vec<HdmiInput>,
}

impl DeviceDescriptor {
    /// Build a descriptor from the device description (`ddd.xml`) and the
    /// optional specs document (`sdd_0.xml`).
    pub fn from_documents(
        identifier: impl Into<String>,
        location: &Url,
        description: &str,
        specs: Option<&str>,
    ) -> Result<Self, Error> {
        let ip = match location.host() {
            Some(url::Host::Ipv4(v4)) => IpAddr::V4(v4),
            Some(url::Host::Ipv6(v6)) => IpAddr::V6(v6),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "descriptor location has no IP host: {location}"
                )));
            }
        };

        let udn = soap::require_text(description, "UDN")?;
        let serial = udn
            .get(UDN_PREFIX_LEN..)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::xml(format!("UDN too short: {udn}")))?
            .to_owned();

        let model_name = soap::require_text(description, "modelName")?;
        let model = match soap::element_text(description, "modelNumber")? {
            Some(number) if !number.is_empty() => format!("{model_name} {number}"),
            _ => model_name,
        };

        Ok(Self {
            identifier: identifier.into(),
            ip,
            port: location.port().unwrap_or(DEFAULT_PORT),
            name: soap::require_text(description, "friendlyName")?,
            model,
            manufacturer: soap::require_text(description, "manufacturer")?,
            serial,
            encrypted: specs.is_some_and(declares_encrypted_session),
            applications: Vec::new(),
            hdmi: HdmiInput::standard(),
        })
    }

    /// Override the encryption flag after a capability probe.
    pub fn refine_encryption(&mut self, encrypted: bool) {
        if self.encrypted != encrypted {
            debug!(device = %self.identifier, encrypted, "encryption flag refined");
            self.encrypted = encrypted;
        }
    }
}

fn declares_encrypted_session(specs: &str) -> bool {
    match soap::element_texts(specs, "name") {
        Ok(names) => names.iter().any(|n| n == ENCRYPT_SESSION_ACTION),
        Err(e) => {
            warn!(error = %e, "unreadable specs document, assuming plain control");
            false
        }
    }
}

// ── SSDP responses ───────────────────────────────────────────────────

/// The two headers of an M-SEARCH response that matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub location: Url,
    pub usn: String,
}

impl SsdpResponse {
    /// Parse an HTTP-over-UDP response; header names are case-insensitive.
    pub fn parse(datagram: &str) -> Option<Self> {
        let mut lines = datagram.lines();
        if !lines.next()?.trim_start().starts_with("HTTP/") {
            return None;
        }

        let mut location = None;
        let mut usn = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("location") {
                location = Url::parse(value).ok();
            } else if name.trim().eq_ignore_ascii_case("usn") {
                usn = Some(value.to_owned());
            }
        }

        Some(Self {
            location: location?,
            usn: usn.filter(|u| !u.is_empty())?,
        })
    }

    /// Device identifier: the UUID in `USN`, before any `::` suffix.
    pub fn identifier(&self) -> &str {
        let head = self.usn.split("::").next().unwrap_or(&self.usn);
        head.strip_prefix("uuid:").unwrap_or(head)
    }
}

/// Collapse responses to one per identifier, keeping the last one seen in
/// the position the identifier first appeared.
pub fn deduplicate(responses: impl IntoIterator<Item = SsdpResponse>) -> Vec<SsdpResponse> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<SsdpResponse> = Vec::new();
    for response in responses {
        match index.get(response.identifier()) {
            Some(&slot) => unique[slot] = response,
            None => {
                index.insert(response.identifier().to_owned(), unique.len());
                unique.push(response);
            }
        }
    }
    unique
}

// ── Discovery ────────────────────────────────────────────────────────

/// SSDP scanner plus descriptor fetcher.
#[derive(Debug, Clone)]
pub struct Discovery {
    http: reqwest::Client,
}

impl Discovery {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Scan for `timeout` and return every resolvable device.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, Error> {
        let responses = self.probe(timeout, &CancellationToken::new()).await?;
        Ok(self.resolve(responses).await)
    }

    /// Scan and stream each resolved device into `tx`.
    ///
    /// Stops at `timeout`, when `cancel` fires, or when the receiver is
    /// dropped. Returns the number of devices delivered.
    pub async fn run(
        &self,
        timeout: Duration,
        tx: mpsc::Sender<DeviceDescriptor>,
        cancel: CancellationToken,
    ) -> Result<usize, Error> {
        let responses = self.probe(timeout, &cancel).await?;
        let mut delivered = 0;
        for response in responses {
            if cancel.is_cancelled() {
                break;
            }
            let Some(device) = self.describe_logged(&response).await else {
                continue;
            };
            if tx.send(device).await.is_err() {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Send the M-SEARCH and gather distinct responses until `timeout`.
    pub async fn probe(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SsdpResponse>, Error> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.send_to(M_SEARCH.as_bytes(), SSDP_ADDR).await?;
        debug!(?timeout, "M-SEARCH sent");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; 2048];
        let mut responses = Vec::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!(error = %e, "SSDP receive failed");
                            continue;
                        }
                    };
                    let text = String::from_utf8_lossy(buf.get(..len).unwrap_or_default());
                    match SsdpResponse::parse(&text) {
                        Some(response) => responses.push(response),
                        None => debug!(%src, "ignoring non-SSDP datagram"),
                    }
                }
            }
        }

        let unique = deduplicate(responses);
        info!(devices = unique.len(), "SSDP scan finished");
        Ok(unique)
    }

    /// Resolve descriptors for already-collected responses.
    pub async fn resolve(&self, responses: Vec<SsdpResponse>) -> Vec<DeviceDescriptor> {
        let mut devices = Vec::new();
        for response in deduplicate(responses) {
            if let Some(device) = self.describe_logged(&response).await {
                devices.push(device);
            }
        }
        devices
    }

    /// Fetch and parse the descriptors behind one response.
    pub async fn describe(&self, response: &SsdpResponse) -> Result<DeviceDescriptor, Error> {
        let description = self.fetch(response.location.clone()).await?;

        let specs_url = response.location.join("sdd_0.xml")?;
        let specs = match self.fetch(specs_url).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(device = response.identifier(), error = %e, "specs document unavailable");
                None
            }
        };

        DeviceDescriptor::from_documents(
            response.identifier(),
            &response.location,
            &description,
            specs.as_deref(),
        )
    }

    async fn describe_logged(&self, response: &SsdpResponse) -> Option<DeviceDescriptor> {
        match self.describe(response).await {
            Ok(device) => {
                info!(device = %device.identifier, ip = %device.ip, model = %device.model, "device discovered");
                Some(device)
            }
            Err(e) => {
                warn!(location = %response.location, error = %e, "skipping device");
                None
            }
        }
    }

    async fn fetch(&self, url: Url) -> Result<String, Error> {
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::TelevisionApiCall {
                message: format!("GET {url} failed"),
                status: Some(status.as_u16()),
            });
        }
        Ok(resp.text().await?)
    }
}
