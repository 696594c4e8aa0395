use s3gate_common::S3GateError;
use thiserror::Error;

use crate::signature_v4::ALGORITHM;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone)]
pub struct ParsedAuthHeader {
    pub access_key: String,
    pub date: String,
    pub region: String,
    /// `SignedHeaders` exactly as sent; it is part of the canonical request.
    pub signed_headers: String,
    pub signature: Vec<u8>,
}

/// Lowercased header names from a `SignedHeaders` list, in the order given.
pub fn signed_header_names(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(';')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported authorization algorithm")]
    UnsupportedAlgorithm,
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid credential scope")]
    InvalidCredentialScope,
    #[error("signature is not valid hex")]
    InvalidSignature,
    #[error("missing request timestamp")]
    MissingTimestamp,
    #[error("invalid authorization header format")]
    InvalidFormat,
}

impl From<ParseError> for S3GateError {
    fn from(err: ParseError) -> Self {
        S3GateError::MalformedAuth(err.to_string())
    }
}

pub fn parse_auth_header(auth_header: &str) -> Result<ParsedAuthHeader> {
    let parts = auth_header
        .trim()
        .strip_prefix(ALGORITHM)
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .ok_or(ParseError::UnsupportedAlgorithm)?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in parts.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or(ParseError::InvalidFormat)?;
        match key.trim() {
            "Credential" => credential = Some(value.trim().to_string()),
            "SignedHeaders" => signed_headers = Some(value.trim().to_string()),
            "Signature" => signature = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let credential = credential.ok_or(ParseError::MissingField("Credential"))?;
    let signature = signature.ok_or(ParseError::MissingField("Signature"))?;
    let signed_headers = signed_headers.ok_or(ParseError::MissingField("SignedHeaders"))?;

    let scope: Vec<&str> = credential.split('/').collect();
    if scope.len() < 3 || scope[..3].iter().any(|segment| segment.is_empty()) {
        return Err(ParseError::InvalidCredentialScope);
    }

    if signed_headers.is_empty() {
        return Err(ParseError::MissingField("SignedHeaders"));
    }

    let signature = hex::decode(&signature).map_err(|_| ParseError::InvalidSignature)?;

    Ok(ParsedAuthHeader {
        access_key: scope[0].to_string(),
        date: scope[1].to_string(),
        region: scope[2].to_string(),
        signed_headers,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::{ParseError, parse_auth_header, signed_header_names};

    const HEADER: &str = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=0a1b2c3d";

    #[test]
    fn parses_all_fields() {
        let parsed = parse_auth_header(HEADER).unwrap();
        assert_eq!(parsed.access_key, "AKIDEXAMPLE");
        assert_eq!(parsed.date, "20240102");
        assert_eq!(parsed.region, "us-east-1");
        assert_eq!(parsed.signed_headers, "host;x-amz-content-sha256;x-amz-date");
        assert_eq!(parsed.signature, vec![0x0a, 0x1b, 0x2c, 0x3d]);
        assert_eq!(
            signed_header_names(&parsed.signed_headers).collect::<Vec<_>>(),
            vec!["host", "x-amz-content-sha256", "x-amz-date"]
        );
    }

    #[test]
    fn signed_header_names_are_trimmed_and_lowercased() {
        assert_eq!(
            signed_header_names(" Host ;;X-Amz-Date;").collect::<Vec<_>>(),
            vec!["host", "x-amz-date"]
        );
    }

    #[test]
    fn accepts_fields_without_spaces() {
        let header = "AWS4-HMAC-SHA256 Credential=key/20240102/eu-west-1,SignedHeaders=host,Signature=ff";
        let parsed = parse_auth_header(header).unwrap();
        assert_eq!(parsed.access_key, "key");
        assert_eq!(parsed.region, "eu-west-1");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = parse_auth_header("AWS AKIDEXAMPLE:c2lnbmF0dXJl").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedAlgorithm));
        let err = parse_auth_header("AWS4-HMAC-SHA256X Credential=a/b/c").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedAlgorithm));
    }

    #[test]
    fn rejects_short_credential_scope() {
        let header = "AWS4-HMAC-SHA256 Credential=key/20240102, SignedHeaders=host, Signature=ff";
        let err = parse_auth_header(header).unwrap_err();
        assert!(matches!(err, ParseError::InvalidCredentialScope));
    }

    #[test]
    fn rejects_missing_fields() {
        let header = "AWS4-HMAC-SHA256 Credential=key/20240102/us-east-1, Signature=ff";
        let err = parse_auth_header(header).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("SignedHeaders")));
    }

    #[test]
    fn rejects_non_hex_signature() {
        let header =
            "AWS4-HMAC-SHA256 Credential=key/20240102/us-east-1, SignedHeaders=host, Signature=zz";
        let err = parse_auth_header(header).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSignature));
    }
}
