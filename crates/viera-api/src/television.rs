// Television command client
//
// Routes every control primitive (IRCC key, app launch, HDMI switch,
// volume/mute) through one `call` path that transparently wraps the
// network-control service in the encrypted envelope when the device
// requires it. The session lives behind an async mutex that is only held
// while reserving a sequence number, never across network I/O.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::crypto::{self, SessionKeys};
use crate::discovery::Application;
use crate::error::Error;
use crate::keys::Key;
use crate::pairing::{self, AuthorizationResult, Pairing};
use crate::session::{self, Session};
use crate::soap::{self, Service, SoapClient};
use crate::transport::TransportConfig;

/// Default control port of the VIERA network remote.
pub const DEFAULT_PORT: u16 = 55000;

/// A command the television can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Press a remote-control key.
    Key(Key),
    /// Launch an installed application by product id.
    LaunchApp(String),
    /// Switch to HDMI input 1-4.
    SwitchHdmi(u8),
    /// Set absolute volume 0-100.
    SetVolume(u8),
    /// Mute or unmute.
    SetMute(bool),
}

/// Client for one television.
pub struct Television {
    soap: SoapClient,
    encrypted: bool,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

impl Television {
    /// Create a client for the television at `host:port`.
    pub fn new(
        host: IpAddr,
        port: u16,
        encrypted: bool,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let soap = SoapClient::new(base_url(host, port)?, transport)?;
        Ok(Self::from_soap(soap, encrypted))
    }

    /// Create a client around an existing SOAP client.
    pub fn from_soap(soap: SoapClient, encrypted: bool) -> Self {
        Self {
            soap,
            encrypted,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn soap(&self) -> &SoapClient {
        &self.soap
    }

    /// Address of the television, if the base URL holds a literal IP.
    pub fn host(&self) -> Option<IpAddr> {
        match self.soap.base_url().host()? {
            url::Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
            url::Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
            url::Host::Domain(name) => name.parse().ok(),
        }
    }

    /// Whether the network-control service requires the encrypted envelope.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Start a new pin-code handshake against this television.
    pub fn pairing(&self) -> Pairing {
        Pairing::new(self.soap.clone())
    }

    /// Install a freshly negotiated session, discarding any previous one.
    ///
    /// Returns the generation assigned to the new session.
    pub async fn install_session(&self, session: Session) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.session.lock().await = Some(session.with_generation(generation));
        debug!(generation, "session installed");
        generation
    }

    /// Re-create a session from stored pairing credentials.
    pub async fn restore_session(
        &self,
        application_id: &str,
        encryption_key: SecretString,
    ) -> Result<u64, Error> {
        let authorization = AuthorizationResult {
            application_id: application_id.to_owned(),
            encryption_key,
        };
        let session = pairing::request_session(&self.soap, &authorization).await?;
        Ok(self.install_session(session).await)
    }

    /// Drop the current session unconditionally.
    pub async fn invalidate_session(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("session invalidated");
        }
    }

    /// Whether commands can be sent right now without pairing.
    pub async fn has_session(&self) -> bool {
        !self.encrypted || self.session.lock().await.is_some()
    }

    /// Drop the session only if it is still the one that failed.
    async fn invalidate_generation(&self, generation: u64) {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(|s| s.generation() == generation) {
            *guard = None;
            warn!(generation, "session invalidated after verification failure");
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Execute a high-level [`Action`].
    pub async fn send(&self, action: &Action) -> Result<(), Error> {
        match action {
            Action::Key(key) => self.send_key(*key).await,
            Action::LaunchApp(app_id) => self.launch_app(app_id).await,
            Action::SwitchHdmi(input) => self.send_key(Key::hdmi(*input)?).await,
            Action::SetVolume(volume) => self.set_volume(*volume).await,
            Action::SetMute(mute) => self.set_mute(*mute).await,
        }
    }

    pub async fn send_key(&self, key: Key) -> Result<(), Error> {
        let args = format!("<X_KeyEvent>{}</X_KeyEvent>", key.code());
        self.call(Service::NetworkControl, "X_SendKey", &args)
            .await
            .map(drop)
    }

    pub async fn launch_app(&self, app_id: &str) -> Result<(), Error> {
        if app_id.is_empty() {
            return Err(Error::InvalidArgument("application id is empty".into()));
        }
        let args = format!(
            "<X_AppType>vc_app</X_AppType><X_LaunchKeyword>product_id={}</X_LaunchKeyword>",
            soap::escape(app_id)
        );
        self.call(Service::NetworkControl, "X_LaunchApp", &args)
            .await
            .map(drop)
    }

    /// Applications installed on the television.
    pub async fn applications(&self) -> Result<Vec<Application>, Error> {
        let response = self
            .call(Service::NetworkControl, "X_GetAppList", "")
            .await?;
        let list = soap::element_text(&response, "X_AppList")?.unwrap_or_default();
        Ok(parse_app_list(&list))
    }

    pub async fn volume(&self) -> Result<u8, Error> {
        let response = self
            .call(
                Service::RenderingControl,
                "GetVolume",
                "<InstanceID>0</InstanceID><Channel>Master</Channel>",
            )
            .await?;
        let raw = soap::require_text(&response, "CurrentVolume")?;
        raw.trim()
            .parse()
            .map_err(|_| Error::xml(format!("CurrentVolume is not a number: {raw}")))
    }

    pub async fn set_volume(&self, volume: u8) -> Result<(), Error> {
        if volume > 100 {
            return Err(Error::InvalidArgument(format!(
                "volume must be 0-100, got {volume}"
            )));
        }
        let args = format!(
            "<InstanceID>0</InstanceID><Channel>Master</Channel><DesiredVolume>{volume}</DesiredVolume>"
        );
        self.call(Service::RenderingControl, "SetVolume", &args)
            .await
            .map(drop)
    }

    pub async fn is_muted(&self) -> Result<bool, Error> {
        let response = self
            .call(
                Service::RenderingControl,
                "GetMute",
                "<InstanceID>0</InstanceID><Channel>Master</Channel>",
            )
            .await?;
        Ok(soap::require_text(&response, "CurrentMute")?.trim() == "1")
    }

    pub async fn set_mute(&self, mute: bool) -> Result<(), Error> {
        let args = format!(
            "<InstanceID>0</InstanceID><Channel>Master</Channel><DesiredMute>{}</DesiredMute>",
            u8::from(mute)
        );
        self.call(Service::RenderingControl, "SetMute", &args)
            .await
            .map(drop)
    }

    /// Reachability probe used by polling.
    ///
    /// A television in standby drops its rendering-control service, so a
    /// transient failure reads as "off" rather than an error.
    pub async fn is_turned_on(&self) -> Result<bool, Error> {
        match self.volume().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "television not answering");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ── Transport ────────────────────────────────────────────────────

    /// Invoke `action` on `service`, encrypting when required.
    ///
    /// Returns the response body (decrypted inner payload for encrypted
    /// calls).
    pub async fn call(&self, service: Service, action: &str, args: &str) -> Result<String, Error> {
        if !self.encrypted || service != Service::NetworkControl {
            return self.soap.call(service, action, args).await;
        }

        let (generation, application_id, keys, sequence, inner) = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(Error::SessionRequired)?;
            let session_id = session
                .session_id()
                .ok_or_else(|| Error::encrypt("session has no session id"))?
                .to_owned();
            let sequence = session.next_sequence()?;
            let inner = format!(
                "<X_SessionId>{session_id}</X_SessionId>\
                 <X_SequenceNumber>{}</X_SequenceNumber>\
                 <X_OriginalCommand>{}</X_OriginalCommand>",
                session::format_sequence(sequence),
                soap::action_element(service, action, args),
            );
            (
                session.generation(),
                session.application_id().to_owned(),
                session.keys().clone(),
                sequence,
                inner,
            )
        };

        debug!(action, sequence, "encrypted call");

        let result = self
            .encrypted_round_trip(&application_id, &keys, sequence, &inner)
            .await;

        if let Err(ref e) = result {
            if e.is_session_invalid() {
                self.invalidate_generation(generation).await;
            }
        }
        result
    }

    async fn encrypted_round_trip(
        &self,
        application_id: &str,
        keys: &SessionKeys,
        sequence: u32,
        inner: &str,
    ) -> Result<String, Error> {
        let enc_info = crypto::encrypt(inner, keys)?;
        let args = format!(
            "<X_ApplicationId>{}</X_ApplicationId><X_EncInfo>{enc_info}</X_EncInfo>",
            soap::escape(application_id)
        );

        let response = self
            .soap
            .call(Service::NetworkControl, "X_EncryptedCommand", &args)
            .await?;

        open_response(&response, keys, sequence)
    }
}

/// Decrypt an `X_EncResult` and check its echoed sequence number.
fn open_response(response: &str, keys: &SessionKeys, sequence: u32) -> Result<String, Error> {
    let enc_result = soap::element_text(response, "X_EncResult")
        .map_err(|e| Error::decrypt(format!("unreadable encrypted response: {e}")))?
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::decrypt("response is not encrypted"))?;

    let plain = crypto::decrypt(&enc_result, keys)?;

    if let Some(echoed) = soap::element_text(&plain, "X_SequenceNumber").ok().flatten() {
        match echoed.trim().parse::<u32>() {
            Ok(n) if n == sequence => {}
            _ => {
                return Err(Error::decrypt(format!(
                    "sequence mismatch: sent {sequence}, got {echoed}"
                )));
            }
        }
    }

    Ok(plain)
}

/// Parse the `'`-delimited `X_AppList` blob into applications.
///
/// Entries look like `vc_app'product_id=0387878700000014'Netflix'1'url'`.
pub(crate) fn parse_app_list(list: &str) -> Vec<Application> {
    list.split("vc_app")
        .skip(1)
        .filter_map(|entry| {
            let mut fields = entry.split('\'').filter(|f| !f.is_empty());
            let id = fields.next()?.strip_prefix("product_id=")?;
            let name = fields.next()?;
            Some(Application {
                id: id.to_owned(),
                name: name.to_owned(),
            })
        })
        .collect()
}

fn base_url(host: IpAddr, port: u16) -> Result<Url, Error> {
    let host = match host {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Ok(Url::parse(&format!("http://{host}:{port}/"))?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_app_list() {
        let list = "vc_app'product_id=0387878700000014'Netflix'1'https://netflix'\
                    vc_app'product_id=0070000200180001'YouTube'1''\
                    vc_app'broken'";
        let apps = parse_app_list(list);
        assert_eq!(
            apps,
            vec![
                Application {
                    id: "0387878700000014".into(),
                    name: "Netflix".into()
                },
                Application {
                    id: "0070000200180001".into(),
                    name: "YouTube".into()
                },
            ]
        );
    }

    #[test]
    fn builds_bracketed_ipv6_urls() {
        let v4 = base_url("10.10.0.10".parse().unwrap(), DEFAULT_PORT).unwrap();
        assert_eq!(v4.as_str(), "http://10.10.0.10:55000/");
        let v6 = base_url("fe80::1".parse().unwrap(), 55000).unwrap();
        assert_eq!(v6.as_str(), "http://[fe80::1]:55000/");
    }

    #[test]
    fn host_comes_back_from_base_url() {
        let host: IpAddr = "fe80::1".parse().unwrap();
        let tv = Television::new(host, DEFAULT_PORT, false, &TransportConfig::default()).unwrap();
        assert_eq!(tv.host(), Some(host));
    }

    #[test]
    fn open_response_checks_echoed_sequence() {
        let keys = SessionKeys::from_encryption_key("AAECAwQFBgcICQoLDA0ODw==").unwrap();
        let wrap = |inner: &str| {
            format!(
                "<s:Envelope><s:Body><u:X_EncryptedCommandResponse><X_EncResult>{}</X_EncResult></u:X_EncryptedCommandResponse></s:Body></s:Envelope>",
                crypto::encrypt(inner, &keys).unwrap()
            )
        };

        let ok = wrap("<X_SequenceNumber>00000007</X_SequenceNumber><X_OriginalResult/>");
        assert!(open_response(&ok, &keys, 7).is_ok());

        let replayed = wrap("<X_SequenceNumber>00000006</X_SequenceNumber>");
        assert!(matches!(
            open_response(&replayed, &keys, 7),
            Err(Error::Decrypt { .. })
        ));

        let unsequenced = wrap("<X_OriginalResult/>");
        assert!(open_response(&unsequenced, &keys, 7).is_ok());

        assert!(matches!(
            open_response("<s:Envelope/>", &keys, 7),
            Err(Error::Decrypt { .. })
        ));
    }

    #[test]
    fn action_serializes_with_tag() {
        let json = serde_json::to_string(&Action::SetVolume(20)).unwrap();
        assert_eq!(json, r#"{"action":"set_volume","value":20}"#);
        let key: Action = serde_json::from_str(r#"{"action":"key","value":"volume_up"}"#).unwrap();
        assert_eq!(key, Action::Key(Key::VolumeUp));
    }
}
