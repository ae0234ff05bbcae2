//! Pin-code pairing handshake.
//!
//! Televisions that require encryption only accept commands from an
//! application that has been authorized by a human reading a 4-digit pin
//! off the screen:
//!
//! ```text
//! Idle ──request_pin──▶ ChallengeRequested ──▶ PinDisplayed ──authorize──▶ Authorized
//!   │                          │                    │
//!   └──────────────────────────┴────────────────────┴──(any error)──▶ Failed
//! ```
//!
//! Each step is a single call triggered by the caller. Nothing retries on
//! its own; a `Failed` or `Authorized` handshake must be replaced by a new
//! [`Pairing`] to start over.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::crypto::{self, SessionKeys};
use crate::error::Error;
use crate::session::Session;
use crate::soap::{self, Service, SoapClient};

/// Observable handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    ChallengeRequested,
    PinDisplayed,
    Authorized,
    Failed,
}

/// Challenge token returned by `X_DisplayPinCode`.
///
/// Firmware without encrypted pairing returns an empty token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChallenge {
    challenge_key: Option<String>,
}

impl PinChallenge {
    pub fn challenge_key(&self) -> Option<&str> {
        self.challenge_key.as_deref()
    }
}

/// Credentials granted once the pin is accepted.
///
/// Store these to re-create the session later via
/// [`Television::restore_session`](crate::Television::restore_session)
/// without bothering the user again.
#[derive(Debug, Clone)]
pub struct AuthorizationResult {
    pub application_id: String,
    pub encryption_key: SecretString,
}

/// One pin-code handshake against one television.
#[derive(Debug)]
pub struct Pairing {
    soap: SoapClient,
    state: PairingState,
    challenge: Option<PinChallenge>,
}

impl Pairing {
    pub fn new(soap: SoapClient) -> Self {
        Self {
            soap,
            state: PairingState::Idle,
            challenge: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Ask the television to display a pin for `device_name`.
    pub async fn request_pin(&mut self, device_name: &str) -> Result<&PinChallenge, Error> {
        self.expect(PairingState::Idle)?;
        self.state = PairingState::ChallengeRequested;

        let args = format!(
            "<X_DeviceName>{}</X_DeviceName>",
            soap::escape(device_name)
        );
        let response = match self
            .soap
            .call(Service::NetworkControl, "X_DisplayPinCode", &args)
            .await
        {
            Ok(body) => body,
            Err(e) => return Err(self.fail(e)),
        };

        let challenge_key = match soap::element_text(&response, "X_ChallengeKey") {
            Ok(key) => key.filter(|k| !k.trim().is_empty()),
            Err(e) => return Err(self.fail(e)),
        };

        debug!(encrypted = challenge_key.is_some(), "pin displayed on television");
        self.state = PairingState::PinDisplayed;
        Ok(self.challenge.insert(PinChallenge { challenge_key }))
    }

    /// Submit the pin shown on screen and establish a session.
    ///
    /// Consumes the challenge; on any failure the handshake moves to
    /// [`PairingState::Failed`] and no session is produced.
    pub async fn authorize(&mut self, pin: &str) -> Result<(Session, AuthorizationResult), Error> {
        self.expect(PairingState::PinDisplayed)?;
        validate_pin(pin)?;

        let challenge = self.challenge.take();
        match self.exchange(pin, challenge).await {
            Ok(result) => {
                self.state = PairingState::Authorized;
                info!(application_id = %result.1.application_id, "pairing authorized");
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn exchange(
        &self,
        pin: &str,
        challenge: Option<PinChallenge>,
    ) -> Result<(Session, AuthorizationResult), Error> {
        let pin_xml = format!("<X_PinCode>{pin}</X_PinCode>");

        let auth_xml = match challenge.and_then(|c| c.challenge_key) {
            Some(challenge_key) => {
                let keys = SessionKeys::from_challenge(&challenge_key)?;
                let auth_info = crypto::encrypt(&pin_xml, &keys)?;
                let response = self
                    .soap
                    .call(
                        Service::NetworkControl,
                        "X_RequestAuth",
                        &format!("<X_AuthInfo>{auth_info}</X_AuthInfo>"),
                    )
                    .await?;
                let result = soap::require_text(&response, "X_AuthResult")?;
                crypto::decrypt(&result, &keys)?
            }
            None => {
                self.soap
                    .call(Service::NetworkControl, "X_RegisterPinCode", &pin_xml)
                    .await?
            }
        };

        let authorization = AuthorizationResult {
            application_id: soap::require_text(&auth_xml, "X_ApplicationId")?,
            encryption_key: SecretString::from(soap::require_text(&auth_xml, "X_Keyword")?),
        };

        let session = request_session(&self.soap, &authorization).await?;
        Ok((session, authorization))
    }

    fn expect(&self, state: PairingState) -> Result<(), Error> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "pairing step requires state {state:?}, handshake is {:?}",
                self.state
            )))
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(error = %error, state = ?self.state, "pairing failed");
        self.state = PairingState::Failed;
        self.challenge = None;
        error
    }
}

/// Derive session keys from stored credentials and obtain a session id.
pub(crate) async fn request_session(
    soap: &SoapClient,
    authorization: &AuthorizationResult,
) -> Result<Session, Error> {
    let keys = SessionKeys::from_encryption_key(authorization.encryption_key.expose_secret())?;
    let app_id = soap::escape(&authorization.application_id);

    let enc_info = crypto::encrypt(
        &format!("<X_ApplicationId>{app_id}</X_ApplicationId>"),
        &keys,
    )?;
    let response = soap
        .call(
            Service::NetworkControl,
            "X_GetEncryptSessionId",
            &format!(
                "<X_ApplicationId>{app_id}</X_ApplicationId><X_EncInfo>{enc_info}</X_EncInfo>"
            ),
        )
        .await?;

    let enc_result = soap::element_text(&response, "X_EncResult")?
        .ok_or_else(|| Error::decrypt("session response is missing X_EncResult"))?;
    let plain = crypto::decrypt(&enc_result, &keys)?;
    let session_id = soap::require_text(&plain, "X_SessionId")?;

    debug!(%session_id, "encrypted session established");
    Ok(Session::new(keys, authorization.application_id.clone()).with_session_id(session_id))
}

fn validate_pin(pin: &str) -> Result<(), Error> {
    if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(
            "pin must be exactly 4 digits".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_validation() {
        assert!(validate_pin("0420").is_ok());
        assert!(validate_pin("042").is_err());
        assert!(validate_pin("04201").is_err());
        assert!(validate_pin("04a0").is_err());
        assert!(validate_pin("٠١٢٣").is_err());
    }

    #[tokio::test]
    async fn authorize_before_request_is_rejected() {
        let soap = SoapClient::with_client(
            reqwest::Client::new(),
            url::Url::parse("http://127.0.0.1:9/").expect("static url"),
        );
        let mut pairing = Pairing::new(soap);

        let result = pairing.authorize("1234").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        // protocol misuse does not poison the handshake
        assert_eq!(pairing.state(), PairingState::Idle);
    }
}
