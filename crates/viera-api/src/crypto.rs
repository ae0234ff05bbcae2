//! Key schedule and payload envelope for the VIERA encrypted remote protocol.
//!
//! Every encrypted payload is framed as
//!
//! ```text
//! [12 random bytes][u32 BE payload length][payload][zero padding to 16]
//! ```
//!
//! encrypted with AES-128-CBC, then signed with HMAC-SHA256 over the
//! ciphertext. The 32-byte signature is appended to the ciphertext and the
//! pair travels base64-encoded inside `X_AuthInfo`, `X_EncInfo`, or
//! `X_EncResult`. Inbound payloads are verified before they are decrypted.

use std::fmt;

use aes::Aes128;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const BLOCK: usize = 16;
const HEADER: usize = 16;
const SIGNATURE: usize = 32;

/// Fixed mask mixed into the challenge key to produce the handshake HMAC key.
const HMAC_KEY_MASK: [u8; 32] = [
    0x15, 0xC9, 0x5A, 0xC2, 0xB0, 0x8A, 0xA7, 0xEB, 0x4E, 0x22, 0x8F, 0x81, 0x1E, 0x34, 0xD0, 0x4F,
    0xA5, 0x4B, 0xA7, 0xDC, 0xAC, 0x98, 0x79, 0xFA, 0x8A, 0xCD, 0xA3, 0xFC, 0x24, 0x4F, 0x38, 0x54,
];

/// Symmetric key material for one direction-agnostic envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub hmac_key: [u8; 32],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Keys protecting the pin submission, derived from the challenge key
    /// the television returns from `X_DisplayPinCode`.
    pub fn from_challenge(challenge_key: &str) -> Result<Self, Error> {
        let iv = decode_block(challenge_key, "challenge key")?;

        let mut key = [0u8; 16];
        for i in (0..16).step_by(4) {
            key[i] = !iv[i + 3];
            key[i + 1] = !iv[i + 2];
            key[i + 2] = !iv[i + 1];
            key[i + 3] = !iv[i];
        }

        let mut hmac_key = [0u8; 32];
        for i in (0..32).step_by(4) {
            hmac_key[i] = HMAC_KEY_MASK[i] ^ iv[(i + 2) & 0xF];
            hmac_key[i + 1] = HMAC_KEY_MASK[i + 1] ^ iv[(i + 3) & 0xF];
            hmac_key[i + 2] = HMAC_KEY_MASK[i + 2] ^ iv[i & 0xF];
            hmac_key[i + 3] = HMAC_KEY_MASK[i + 3] ^ iv[(i + 1) & 0xF];
        }

        Ok(Self { key, iv, hmac_key })
    }

    /// Keys for the long-lived session, derived from the encryption key
    /// (`X_Keyword`) granted by `X_RequestAuth`.
    pub fn from_encryption_key(encryption_key: &str) -> Result<Self, Error> {
        let iv = decode_block(encryption_key, "encryption key")?;

        let mut key = [0u8; 16];
        for i in (0..16).step_by(4) {
            key[i] = iv[i + 2];
            key[i + 1] = iv[i + 3];
            key[i + 2] = iv[i];
            key[i + 3] = iv[i + 1];
        }

        let mut hmac_key = [0u8; 32];
        hmac_key[..16].copy_from_slice(&iv);
        hmac_key[16..].copy_from_slice(&iv);

        Ok(Self { key, iv, hmac_key })
    }
}

fn decode_block(encoded: &str, what: &str) -> Result<[u8; 16], Error> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::encrypt(format!("{what} is not valid base64: {e}")))?;
    <[u8; 16]>::try_from(raw.as_slice())
        .map_err(|_| Error::encrypt(format!("{what} must decode to 16 bytes, got {}", raw.len())))
}

/// Encrypt and sign `plaintext`, returning the base64 envelope blob.
pub fn encrypt(plaintext: &str, keys: &SessionKeys) -> Result<String, Error> {
    let payload = plaintext.as_bytes();
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::encrypt("payload exceeds u32 length field"))?;

    let mut frame = Vec::with_capacity(HEADER + payload.len() + BLOCK);
    frame.extend_from_slice(&rand::random::<[u8; 12]>());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    let padded = frame.len().div_ceil(BLOCK) * BLOCK;
    frame.resize(padded, 0);

    let cipher = Aes128CbcEnc::new_from_slices(&keys.key, &keys.iv)
        .map_err(|e| Error::encrypt(e.to_string()))?;
    let mut blob = cipher.encrypt_padded_vec_mut::<NoPadding>(&frame);

    let signature = sign(&blob, &keys.hmac_key)?;
    blob.extend_from_slice(&signature);

    Ok(STANDARD.encode(blob))
}

/// Verify and decrypt a base64 envelope blob produced by [`encrypt`] or by
/// the television.
pub fn decrypt(encoded: &str, keys: &SessionKeys) -> Result<String, Error> {
    let blob = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::decrypt(format!("payload is not valid base64: {e}")))?;

    if blob.len() < HEADER + SIGNATURE || (blob.len() - SIGNATURE) % BLOCK != 0 {
        return Err(Error::decrypt(format!(
            "payload has invalid length {}",
            blob.len()
        )));
    }

    let (ciphertext, signature) = blob.split_at(blob.len() - SIGNATURE);
    verify(ciphertext, signature, &keys.hmac_key)?;

    let cipher = Aes128CbcDec::new_from_slices(&keys.key, &keys.iv)
        .map_err(|e| Error::decrypt(e.to_string()))?;
    let frame = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| Error::decrypt(e.to_string()))?;

    let (header, body) = frame.split_at(HEADER);
    let declared = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let declared = usize::try_from(declared).unwrap_or(usize::MAX);

    // Some firmware leaves the length field zeroed or random in responses.
    let payload = if declared > 0 && declared <= body.len() {
        &body[..declared]
    } else {
        let end = body.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        &body[..end]
    };

    String::from_utf8(payload.to_vec())
        .map_err(|_| Error::decrypt("decrypted payload is not UTF-8"))
}

/// HMAC-SHA256 of `data` under `hmac_key`.
pub fn sign(data: &[u8], hmac_key: &[u8]) -> Result<[u8; 32], Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(hmac_key)
        .map_err(|e| Error::encrypt(e.to_string()))?;
    mac.update(data);
    let mut signature = [0u8; 32];
    signature.copy_from_slice(&mac.finalize().into_bytes());
    Ok(signature)
}

/// Constant-time signature check.
pub fn verify(data: &[u8], signature: &[u8], hmac_key: &[u8]) -> Result<(), Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(hmac_key)
        .map_err(|e| Error::decrypt(e.to_string()))?;
    mac.update(data);
    mac.verify_slice(signature)
        .map_err(|_| Error::decrypt("HMAC signature mismatch"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // 16 bytes 0x00..0x0F
    const SAMPLE_KEY: &str = "AAECAwQFBgcICQoLDA0ODw==";

    fn keys() -> SessionKeys {
        SessionKeys::from_encryption_key(SAMPLE_KEY).unwrap()
    }

    #[test]
    fn session_key_schedule_swaps_word_halves() {
        let keys = keys();
        assert_eq!(
            keys.key,
            [2, 3, 0, 1, 6, 7, 4, 5, 10, 11, 8, 9, 14, 15, 12, 13]
        );
        assert_eq!(keys.iv, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(&keys.hmac_key[..16], &keys.iv);
        assert_eq!(&keys.hmac_key[16..], &keys.iv);
    }

    #[test]
    fn challenge_key_schedule_inverts_and_masks() {
        let keys = SessionKeys::from_challenge(SAMPLE_KEY).unwrap();
        assert_eq!(keys.iv[0], 0x00);
        // key word 0 is the reversed, inverted first iv word
        assert_eq!(&keys.key[..4], &[!3u8, !2u8, !1u8, !0u8]);
        assert_eq!(keys.hmac_key[0], 0x15 ^ 2);
        assert_eq!(keys.hmac_key[1], 0xC9 ^ 3);
        assert_eq!(keys.hmac_key[2], 0x5A);
        assert_eq!(keys.hmac_key[3], 0xC2 ^ 1);
        // second half wraps around the 16-byte iv
        assert_eq!(keys.hmac_key[16], 0xA5 ^ 2);
    }

    #[test]
    fn rejects_key_material_of_wrong_length() {
        assert!(matches!(
            SessionKeys::from_encryption_key("AAEC"),
            Err(Error::Encrypt { .. })
        ));
        assert!(matches!(
            SessionKeys::from_challenge("not base64!"),
            Err(Error::Encrypt { .. })
        ));
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let keys = keys();
        for plaintext in [
            "",
            "<X_PinCode>1234</X_PinCode>",
            "exactly sixteen!",
            "<X_SessionId>42</X_SessionId><X_SequenceNumber>00000001</X_SequenceNumber>",
        ] {
            let blob = encrypt(plaintext, &keys).unwrap();
            assert_eq!(decrypt(&blob, &keys).unwrap(), plaintext);
        }
    }

    #[test]
    fn encryption_is_randomized_by_header() {
        let keys = keys();
        let a = encrypt("<X_PinCode>1234</X_PinCode>", &keys).unwrap();
        let b = encrypt("<X_PinCode>1234</X_PinCode>", &keys).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let keys = keys();
        let blob = encrypt("<X_ApplicationId>app</X_ApplicationId>", &keys).unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();

        for index in [0, 17, raw.len() - SIGNATURE - 1, raw.len() - 1] {
            raw[index] ^= 0x01;
            let tampered = STANDARD.encode(&raw);
            match decrypt(&tampered, &keys) {
                Err(Error::Decrypt { message }) => assert!(message.contains("HMAC")),
                other => panic!("byte {index}: expected Decrypt error, got {other:?}"),
            }
            raw[index] ^= 0x01;
        }

        assert!(decrypt(&STANDARD.encode(&raw), &keys).is_ok());
    }

    #[test]
    fn wrong_keys_fail_verification() {
        let blob = encrypt("payload", &keys()).unwrap();
        let other = SessionKeys::from_challenge(SAMPLE_KEY).unwrap();
        assert!(matches!(decrypt(&blob, &other), Err(Error::Decrypt { .. })));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(matches!(
            decrypt("AAAA", &keys()),
            Err(Error::Decrypt { .. })
        ));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let rendered = format!("{:?}", keys());
        assert_eq!(rendered, "SessionKeys { .. }");
    }
}
