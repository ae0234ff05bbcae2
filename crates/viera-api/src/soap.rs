// SOAP/UPnP control transport
//
// Wraps `reqwest::Client` with envelope construction, SOAPACTION headers,
// and UPnP fault parsing. Also hosts the small XML readers every other
// module uses to pull fields out of descriptors and responses.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// UPnP services exposed by the television.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Panasonic network remote control (keys, apps, pairing).
    NetworkControl,
    /// Standard UPnP rendering control (volume, mute).
    RenderingControl,
}

impl Service {
    pub fn urn(self) -> &'static str {
        match self {
            Self::NetworkControl => "panasonic-com:service:p00NetworkControl:1",
            Self::RenderingControl => "schemas-upnp-org:service:RenderingControl:1",
        }
    }

    pub fn control_path(self) -> &'static str {
        match self {
            Self::NetworkControl => "nrc/control_0",
            Self::RenderingControl => "dmr/control_0",
        }
    }

    pub fn event_path(self) -> &'static str {
        match self {
            Self::NetworkControl => "nrc/event_0",
            Self::RenderingControl => "dmr/event_0",
        }
    }
}

/// Raw SOAP client for one television.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct SoapClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SoapClient {
    /// Create a client for `http://{host}:{port}/` from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// POST `action` to `service` and return the raw response body.
    ///
    /// `args` is the already-serialized inner XML of the action element.
    pub async fn call(&self, service: Service, action: &str, args: &str) -> Result<String, Error> {
        let url = self.url(service.control_path())?;
        debug!(%url, action, "SOAP call");

        let resp = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("Accept", "text/xml")
            .header("SOAPACTION", format!("\"urn:{}#{action}\"", service.urn()))
            .body(envelope(service, action, args))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        if let Some(fault) = parse_fault(&body) {
            return Err(fault);
        }

        Err(Error::TelevisionApiCall {
            message: format!("{action} rejected"),
            status: Some(status.as_u16()),
        })
    }
}

/// Build the SOAP envelope for an action invocation.
pub(crate) fn envelope(service: Service, action: &str, args: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <s:Body>{}</s:Body></s:Envelope>",
        action_element(service, action, args)
    )
}

/// `<u:Action xmlns:u="urn:...">args</u:Action>`
pub(crate) fn action_element(service: Service, action: &str, args: &str) -> String {
    format!(
        "<u:{action} xmlns:u=\"urn:{urn}\">{args}</u:{action}>",
        urn = service.urn()
    )
}

/// Escape caller-supplied text before embedding it in an XML body.
pub(crate) fn escape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

fn parse_fault(body: &str) -> Option<Error> {
    let code = element_text(body, "errorCode").ok().flatten();
    let message = element_text(body, "errorDescription").ok().flatten();
    let fault = element_text(body, "faultstring").ok().flatten();

    if code.is_none() && fault.is_none() {
        return None;
    }

    Some(Error::Soap {
        code: code.unwrap_or_else(|| "unknown".into()),
        message: message.or(fault).unwrap_or_default(),
    })
}

// ── XML readers ──────────────────────────────────────────────────────

/// Text content of every element whose local name is `name`.
///
/// Namespace prefixes are ignored. Text of nested children is not
/// included. Entities are unescaped.
pub(crate) fn element_texts(xml: &str, name: &str) -> Result<Vec<String>, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut found = Vec::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if current.is_some() {
                    depth += 1;
                } else if e.local_name().as_ref() == name.as_bytes() {
                    current = Some(String::new());
                    depth = 0;
                }
            }
            Event::Empty(e) => {
                if current.is_none() && e.local_name().as_ref() == name.as_bytes() {
                    found.push(String::new());
                }
            }
            Event::Text(t) => {
                if let (Some(buf), 0) = (current.as_mut(), depth) {
                    buf.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let (Some(buf), 0) = (current.as_mut(), depth) {
                    buf.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(_) => {
                if depth > 0 {
                    depth -= 1;
                } else if let Some(text) = current.take() {
                    found.push(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        return Err(Error::xml(format!("unterminated <{name}> element")));
    }

    Ok(found)
}

/// Text content of the first element named `name`, if any.
pub(crate) fn element_text(xml: &str, name: &str) -> Result<Option<String>, Error> {
    Ok(element_texts(xml, name)?.into_iter().next())
}

/// Like [`element_text`] but a missing element is an error.
pub(crate) fn require_text(xml: &str, name: &str) -> Result<String, Error> {
    element_text(xml, name)?.ok_or_else(|| Error::xml(format!("missing <{name}> element")))
}

/// Value of attribute `attr` on the first element named `element`.
pub(crate) fn element_attr(xml: &str, element: &str, attr: &str) -> Result<Option<String>, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == element.as_bytes() => {
                for attribute in e.attributes() {
                    let attribute = attribute?;
                    if attribute.key.local_name().as_ref() == attr.as_bytes() {
                        return Ok(Some(attribute.unescape_value()?.into_owned()));
                    }
                }
                return Ok(None);
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}
