// UPnP GENA event subscriptions
//
// The television pushes state changes (screen power, input mode, volume,
// mute) as NOTIFY requests to a callback URL registered with SUBSCRIBE.
// `Subscription` owns the SUBSCRIBE/renew/UNSUBSCRIBE side and
// `EventListener` runs the small HTTP server that receives the NOTIFYs.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::Router;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::soap::{self, Service, SoapClient};

/// Largest NOTIFY body accepted from a television.
const MAX_BODY: usize = 64 * 1024;

/// One normalized state change carried by a NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyChange {
    /// `X_ScreenState`: panel on or off.
    ScreenState(bool),
    /// `X_InputMode`: active source as reported by the television.
    InputMode(String),
    Volume(u8),
    Mute(bool),
}

/// A decoded NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelevisionEvent {
    pub source: IpAddr,
    pub sid: Option<String>,
    pub changes: Vec<PropertyChange>,
}

// ── Subscription ─────────────────────────────────────────────────────

/// An active GENA subscription on one service.
#[derive(Debug, Clone)]
pub struct Subscription {
    http: reqwest::Client,
    url: Url,
    service: Service,
    sid: String,
    timeout: Duration,
}

impl Subscription {
    /// SUBSCRIBE to `service`, asking for NOTIFYs at `callback`.
    pub async fn subscribe(
        soap: &SoapClient,
        service: Service,
        callback: &Url,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let url = soap.url(service.event_path())?;
        let resp = soap
            .http()
            .request(gena_method("SUBSCRIBE")?, url.clone())
            .header("CALLBACK", format!("<{callback}>"))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout.as_secs()))
            .send()
            .await?;

        let resp = check_status(resp, "SUBSCRIBE")?;
        let sid = header(&resp, "SID")
            .ok_or_else(|| Error::Runtime("SUBSCRIBE response carried no SID".into()))?;
        let granted = header(&resp, "TIMEOUT")
            .and_then(|t| parse_timeout(&t))
            .unwrap_or(timeout);

        info!(?service, %sid, ?granted, "event subscription active");
        Ok(Self {
            http: soap.http().clone(),
            url,
            service,
            sid,
            timeout: granted,
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Timeout granted by the television.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When to renew: halfway through the granted timeout.
    pub fn renew_after(&self) -> Duration {
        (self.timeout / 2).max(Duration::from_secs(1))
    }

    /// Extend the subscription before it expires.
    pub async fn renew(&mut self) -> Result<(), Error> {
        let resp = self
            .http
            .request(gena_method("SUBSCRIBE")?, self.url.clone())
            .header("SID", &self.sid)
            .header("TIMEOUT", format!("Second-{}", self.timeout.as_secs()))
            .send()
            .await?;

        let resp = check_status(resp, "SUBSCRIBE renewal")?;
        if let Some(granted) = header(&resp, "TIMEOUT").and_then(|t| parse_timeout(&t)) {
            self.timeout = granted;
        }
        debug!(sid = %self.sid, "event subscription renewed");
        Ok(())
    }

    pub async fn unsubscribe(self) -> Result<(), Error> {
        let resp = self
            .http
            .request(gena_method("UNSUBSCRIBE")?, self.url.clone())
            .header("SID", &self.sid)
            .send()
            .await?;
        check_status(resp, "UNSUBSCRIBE")?;
        debug!(sid = %self.sid, "event subscription cancelled");
        Ok(())
    }
}

fn gena_method(name: &str) -> Result<Method, Error> {
    Method::from_bytes(name.as_bytes()).map_err(|e| Error::Runtime(format!("{name}: {e}")))
}

fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(Error::TelevisionApiCall {
            message: format!("{what} rejected"),
            status: Some(status.as_u16()),
        })
    }
}

fn header(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_owned())
}

/// Parse a GENA `Second-N` timeout. `infinite` is not honored.
fn parse_timeout(value: &str) -> Option<Duration> {
    let (prefix, secs) = value.trim().split_at_checked(7)?;
    if !prefix.eq_ignore_ascii_case("second-") {
        return None;
    }
    secs.parse().ok().map(Duration::from_secs)
}

// ── Callback listener ────────────────────────────────────────────────

/// HTTP endpoint receiving NOTIFY callbacks.
#[derive(Debug)]
pub struct EventListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

#[derive(Clone)]
struct ListenerState {
    tx: mpsc::Sender<TelevisionEvent>,
    cancel: CancellationToken,
}

impl EventListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "event listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Callback URL to hand to a television at `television`.
    pub async fn callback_url(&self, television: IpAddr) -> Result<Url, Error> {
        callback_url(self.local_addr, television).await
    }

    /// Serve NOTIFYs until `cancel` fires, forwarding decoded events.
    pub async fn run(self, tx: mpsc::Sender<TelevisionEvent>, cancel: CancellationToken) {
        let state = ListenerState {
            tx,
            cancel: cancel.clone(),
        };
        // televisions post to whatever path the callback URL carried
        let app = Router::new()
            .fallback(notify)
            .layer(DefaultBodyLimit::max(MAX_BODY))
            .with_state(state);

        let served = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await;
        if let Err(e) = served {
            warn!(local_addr = %self.local_addr, error = %e, "event listener failed");
        }
        debug!(local_addr = %self.local_addr, "event listener stopped");
    }
}

async fn notify(
    State(state): State<ListenerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if !method.as_str().eq_ignore_ascii_case("NOTIFY") {
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let changes = match parse_property_set(&body) {
        Ok(changes) => changes,
        Err(e) => {
            debug!(%peer, error = %e, "malformed NOTIFY body");
            return StatusCode::BAD_REQUEST;
        }
    };
    trace!(%peer, ?changes, "NOTIFY received");

    if changes.is_empty() || state.cancel.is_cancelled() {
        return StatusCode::OK;
    }
    let event = TelevisionEvent {
        // dual-stack listeners see IPv4 televisions as mapped addresses
        source: peer.ip().to_canonical(),
        sid: headers
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned()),
        changes,
    };
    // receiver gone means the connector stopped
    let _ = state.tx.send(event).await;
    StatusCode::OK
}

/// Decode a GENA `e:propertyset` body into property changes.
pub fn parse_property_set(body: &str) -> Result<Vec<PropertyChange>, Error> {
    let mut changes = Vec::new();

    if let Some(state) = soap::element_text(body, "X_ScreenState")? {
        match state.trim() {
            s if s.eq_ignore_ascii_case("on") => changes.push(PropertyChange::ScreenState(true)),
            s if s.eq_ignore_ascii_case("off") => changes.push(PropertyChange::ScreenState(false)),
            other => debug!(state = other, "unknown screen state"),
        }
    }

    if let Some(mode) = soap::element_text(body, "X_InputMode")?.filter(|m| !m.is_empty()) {
        changes.push(PropertyChange::InputMode(mode));
    }

    if let Some(last_change) = soap::element_text(body, "LastChange")? {
        // escaped inner document is the norm; some firmware inlines it
        let document = if last_change.trim().is_empty() {
            body
        } else {
            last_change.as_str()
        };
        if let Some(volume) = soap::element_attr(document, "Volume", "val")? {
            match volume.trim().parse::<u8>() {
                Ok(v) => changes.push(PropertyChange::Volume(v.min(100))),
                Err(_) => debug!(%volume, "unparseable volume"),
            }
        }
        if let Some(mute) = soap::element_attr(document, "Mute", "val")? {
            let mute = mute.trim();
            changes.push(PropertyChange::Mute(
                mute == "1" || mute.eq_ignore_ascii_case("true"),
            ));
        }
    }

    Ok(changes)
}

/// Callback URL for a listener bound at `local_addr`, as seen from
/// `television`.
///
/// An unspecified bind address is replaced with the local interface
/// address that routes to the television.
pub async fn callback_url(local_addr: SocketAddr, television: IpAddr) -> Result<Url, Error> {
    let ip = if local_addr.ip().is_unspecified() {
        local_ip_for(television).await?
    } else {
        local_addr.ip()
    };
    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Ok(Url::parse(&format!("http://{host}:{}/", local_addr.port()))?)
}

/// Local address the OS would use to reach `target`.
pub async fn local_ip_for(target: IpAddr) -> Result<IpAddr, Error> {
    let bind: SocketAddr = match target {
        IpAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        IpAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };
    let socket = UdpSocket::bind(bind).await?;
    // connecting a datagram socket only selects a route
    socket.connect(SocketAddr::new(target, 1900)).await?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    const NRC_NOTIFY: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><X_ScreenState>on</X_ScreenState></e:property>
  <e:property><X_InputMode>hdmi2</X_InputMode></e:property>
</e:propertyset>"#;

    const DMR_NOTIFY: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <LastChange>&lt;Event xmlns=&quot;urn:schemas-upnp-org:metadata-1-0/RCS/&quot;&gt;&lt;InstanceID val=&quot;0&quot;&gt;&lt;Volume channel=&quot;Master&quot; val=&quot;23&quot;/&gt;&lt;Mute channel=&quot;Master&quot; val=&quot;1&quot;/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
  </e:property>
</e:propertyset>"#;

    #[test]
    fn parses_network_control_properties() {
        let changes = parse_property_set(NRC_NOTIFY).unwrap();
        assert_eq!(
            changes,
            vec![
                PropertyChange::ScreenState(true),
                PropertyChange::InputMode("hdmi2".into()),
            ]
        );
    }

    #[test]
    fn parses_escaped_last_change() {
        let changes = parse_property_set(DMR_NOTIFY).unwrap();
        assert_eq!(
            changes,
            vec![PropertyChange::Volume(23), PropertyChange::Mute(true)]
        );
    }

    #[test]
    fn parses_gena_timeouts() {
        assert_eq!(parse_timeout("Second-300"), Some(Duration::from_secs(300)));
        assert_eq!(parse_timeout("second-60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_timeout("infinite"), None);
        assert_eq!(parse_timeout("Second-"), None);
    }

    #[tokio::test]
    async fn callback_url_uses_bound_address() {
        let url = callback_url("192.168.1.5:8090".parse().unwrap(), [192, 168, 1, 20].into())
            .await
            .unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.5:8090/");
    }

    /// Serve on `bind` and return the address, the event receiver and the
    /// shutdown handles.
    async fn spawn_listener(
        bind: &str,
    ) -> std::io::Result<(
        SocketAddr,
        mpsc::Receiver<TelevisionEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    )> {
        let listener = EventListener::bind(bind.parse().unwrap())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let addr = listener.local_addr();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(tx, cancel.clone()));
        Ok((addr, rx, cancel, task))
    }

    /// Write a raw request and read the reply until the server closes.
    async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn listener_acknowledges_and_forwards_notify() {
        let (addr, mut rx, cancel, task) = spawn_listener("127.0.0.1:0").await.unwrap();

        let request = format!(
            "NOTIFY / HTTP/1.1\r\nHOST: {addr}\r\nCONTENT-TYPE: text/xml\r\nNT: upnp:event\r\nNTS: upnp:propchange\r\nSID: uuid:sub-1\r\nSEQ: 0\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{NRC_NOTIFY}",
            NRC_NOTIFY.len()
        );
        let reply = exchange(addr, request.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(event.sid.as_deref(), Some("uuid:sub-1"));
        assert_eq!(event.changes.len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn listener_accepts_chunked_notify() {
        let (addr, mut rx, cancel, task) = spawn_listener("127.0.0.1:0").await.unwrap();

        let (head, tail) = DMR_NOTIFY.split_at(DMR_NOTIFY.len() / 2);
        let request = format!(
            "NOTIFY /dmr HTTP/1.1\r\nHOST: {addr}\r\nSID: uuid:sub-2\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{head}\r\n{:x}\r\n{tail}\r\n0\r\n\r\n",
            head.len(),
            tail.len()
        );
        let reply = exchange(addr, request.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.sid.as_deref(), Some("uuid:sub-2"));
        assert_eq!(
            event.changes,
            vec![PropertyChange::Volume(23), PropertyChange::Mute(true)]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dual_stack_listener_reports_ipv4_source() {
        // hosts without IPv6 cannot bind the unspecified v6 address
        let Ok((addr, mut rx, cancel, task)) = spawn_listener("[::]:0").await else {
            return;
        };

        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));
        let request = format!(
            "NOTIFY / HTTP/1.1\r\nHOST: {target}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{NRC_NOTIFY}",
            NRC_NOTIFY.len()
        );
        let reply = exchange(target, request.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, IpAddr::from([127, 0, 0, 1]));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn listener_rejects_malformed_body() {
        let (addr, mut rx, cancel, task) = spawn_listener("127.0.0.1:0").await.unwrap();

        let body = "<e:propertyset><X_ScreenState>on</X_InputMode></e:propertyset>";
        let request = format!(
            "NOTIFY / HTTP/1.1\r\nHOST: {addr}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let reply = exchange(addr, request.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 400"), "{reply}");

        cancel.cancel();
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listener_rejects_other_methods() {
        let (addr, mut rx, cancel, task) = spawn_listener("127.0.0.1:0").await.unwrap();

        let reply = exchange(
            addr,
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 405"), "{reply}");

        cancel.cancel();
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
