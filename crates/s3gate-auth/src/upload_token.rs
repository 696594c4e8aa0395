//! Self-authenticating multipart upload ids.
//!
//! A token is `base64url(msgpack(bucket, key, identity)) "." base64url(tag)` where the tag
//! is HMAC-SHA256 over the msgpack bytes. Nothing about an upload is stored server side;
//! whoever holds a token with a valid tag may continue the upload it names.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use s3gate_common::S3GateError;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadToken {
    pub bucket: String,
    pub key: String,
    pub identity: Option<String>,
}

impl UploadToken {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, identity: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            identity,
        }
    }

    /// A token only applies to the path it was issued for, and only for the same caller.
    pub fn matches(&self, bucket: &str, key: &str, identity: Option<&str>) -> bool {
        self.bucket == bucket && self.key == key && self.identity.as_deref() == identity
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed upload token")]
    Malformed,
    #[error("upload token tag mismatch")]
    TagMismatch,
    #[error("failed to encode upload token: {0}")]
    Encode(String),
}

impl From<TokenError> for S3GateError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(msg) => S3GateError::InternalError(msg),
            TokenError::Malformed | TokenError::TagMismatch => S3GateError::TokenInvalid,
        }
    }
}

/// Issues tokens with the current secret; redeems with the current secret or any
/// previous one still configured, so secrets can be rotated without breaking uploads
/// already in flight.
#[derive(Clone)]
pub struct UploadTokenCodec {
    current: Vec<u8>,
    previous: Vec<Vec<u8>>,
}

impl fmt::Debug for UploadTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTokenCodec")
            .field("previous_secrets", &self.previous.len())
            .finish_non_exhaustive()
    }
}

impl UploadTokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            current: secret.into(),
            previous: Vec::new(),
        }
    }

    pub fn with_previous_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.previous.push(secret.into());
        self
    }

    pub fn issue(&self, token: &UploadToken) -> Result<String, TokenError> {
        let payload = rmp_serde::to_vec(token).map_err(|err| TokenError::Encode(err.to_string()))?;
        let tag = tag(&self.current, &payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    pub fn redeem(&self, token: &str) -> Result<UploadToken, TokenError> {
        let (payload, tag) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| TokenError::Malformed)?;

        let authentic = std::iter::once(&self.current)
            .chain(self.previous.iter())
            .any(|secret| verify_tag(secret, &payload, &tag));
        if !authentic {
            return Err(TokenError::TagMismatch);
        }

        rmp_serde::from_slice(&payload).map_err(|_| TokenError::Malformed)
    }
}

fn tag(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn verify_tag(secret: &[u8], payload: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{TokenError, UploadToken, UploadTokenCodec};

    fn token() -> UploadToken {
        UploadToken::new("photos", "2024/cat.jpg", Some("AKIDEXAMPLE".to_string()))
    }

    #[test]
    fn round_trips() {
        let codec = UploadTokenCodec::new("operator-secret");
        let issued = codec.issue(&token()).unwrap();
        assert_eq!(codec.redeem(&issued).unwrap(), token());
    }

    #[test]
    fn round_trips_anonymous_identity() {
        let codec = UploadTokenCodec::new("operator-secret");
        let anonymous = UploadToken::new("public", "a/b/c", None);
        let issued = codec.issue(&anonymous).unwrap();
        assert_eq!(codec.redeem(&issued).unwrap(), anonymous);
    }

    #[test]
    fn token_is_query_safe() {
        let codec = UploadTokenCodec::new("operator-secret");
        let issued = codec.issue(&token()).unwrap();
        assert!(
            issued
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        );
    }

    #[test]
    fn rejects_other_secret() {
        let issued = UploadTokenCodec::new("operator-secret").issue(&token()).unwrap();
        let err = UploadTokenCodec::new("another-secret")
            .redeem(&issued)
            .unwrap_err();
        assert!(matches!(err, TokenError::TagMismatch));
    }

    #[test]
    fn rejects_every_single_byte_flip() {
        let codec = UploadTokenCodec::new("operator-secret");
        let issued = codec.issue(&token()).unwrap();
        for i in 0..issued.len() {
            let mut bytes = issued.clone().into_bytes();
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(codec.redeem(&tampered).is_err(), "accepted flip at byte {i}");
        }
    }

    #[test]
    fn rejects_truncation() {
        let codec = UploadTokenCodec::new("operator-secret");
        let issued = codec.issue(&token()).unwrap();
        for len in 0..issued.len() {
            assert!(codec.redeem(&issued[..len]).is_err(), "accepted prefix of {len} bytes");
        }
    }

    #[test]
    fn previous_secret_still_redeems() {
        let issued = UploadTokenCodec::new("old-secret").issue(&token()).unwrap();
        let rotated = UploadTokenCodec::new("new-secret").with_previous_secret("old-secret");
        assert_eq!(rotated.redeem(&issued).unwrap(), token());

        let reissued = rotated.issue(&token()).unwrap();
        assert!(UploadTokenCodec::new("old-secret").redeem(&reissued).is_err());
    }

    #[test]
    fn matches_path_and_identity() {
        let token = token();
        assert!(token.matches("photos", "2024/cat.jpg", Some("AKIDEXAMPLE")));
        assert!(!token.matches("photos2", "2024/cat.jpg", Some("AKIDEXAMPLE")));
        assert!(!token.matches("photos", "2024/dog.jpg", Some("AKIDEXAMPLE")));
        assert!(!token.matches("photos", "2024/cat.jpg", Some("someone-else")));
        assert!(!token.matches("photos", "2024/cat.jpg", None));
    }
}
