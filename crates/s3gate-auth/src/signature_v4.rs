use hmac::{Hmac, Mac};
use http::{HeaderMap, Method, Request, Uri, header::AUTHORIZATION};
use sha2::{Digest, Sha256};

use crate::parser::{ParseError, ParsedAuthHeader, parse_auth_header, signed_header_names};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "s3";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const AMZ_DATE_HEADER: &str = "x-amz-date";
const DATE_HEADER: &str = "date";
const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";

pub fn get_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, service.as_bytes());
    hmac_sha256(&service_key, b"aws4_request")
}

/// Raw SigV4 signature of `string_to_sign`.
pub fn sign(secret_key: &str, date: &str, region: &str, service: &str, string_to_sign: &str) -> Vec<u8> {
    let signing_key = get_signing_key(secret_key, date, region, service);
    hmac_sha256(&signing_key, string_to_sign.as_bytes())
}

pub fn credential_scope(date: &str, region: &str) -> String {
    format!("{date}/{region}/{SERVICE}/aws4_request")
}

/// `canonical_headers` carries one `name:value\n` line per signed header.
pub fn get_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{uri}\n{query_string}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

pub fn get_string_to_sign(canonical_request: &str, date_time: &str, scope: &str) -> String {
    let canonical_hash = sha256_hex(canonical_request.as_bytes());
    format!("{ALGORITHM}\n{date_time}\n{scope}\n{canonical_hash}")
}

/// Everything needed to check one request's SigV4 signature.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub key_id: String,
    pub signature: Vec<u8>,
    pub date_stamp: String,
    pub region: String,
    pub signed_headers: String,
    pub timestamp: String,
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
}

impl<'a> SigningContext<'a> {
    /// `Ok(None)` when the request carries no `Authorization` header (anonymous).
    pub fn from_request<B>(req: &'a Request<B>) -> Result<Option<Self>, ParseError> {
        Self::from_parts(req.method(), req.uri(), req.headers())
    }

    pub fn from_parts(
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a HeaderMap,
    ) -> Result<Option<Self>, ParseError> {
        let Some(auth_header) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let auth_header = auth_header.to_str().map_err(|_| ParseError::InvalidFormat)?;
        let ParsedAuthHeader {
            access_key,
            date,
            region,
            signed_headers,
            signature,
        } = parse_auth_header(auth_header)?;

        let timestamp = header_str(headers, AMZ_DATE_HEADER)
            .or_else(|| header_str(headers, DATE_HEADER))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingTimestamp)?;

        Ok(Some(Self {
            key_id: access_key,
            signature,
            date_stamp: date,
            region,
            signed_headers,
            timestamp: timestamp.to_string(),
            method,
            uri,
            headers,
        }))
    }

    /// `None` when a signed header is absent from the request.
    pub fn canonical_request(&self) -> Option<String> {
        let mut canonical_headers = String::new();
        for name in signed_header_names(&self.signed_headers) {
            let value = header_str(self.headers, &name)?;
            canonical_headers.push_str(&name);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            canonical_headers.push('\n');
        }

        let payload_hash = header_str(self.headers, CONTENT_SHA256_HEADER).unwrap_or(UNSIGNED_PAYLOAD);

        Some(get_canonical_request(
            self.method.as_str(),
            self.uri.path(),
            self.uri.query().unwrap_or(""),
            &canonical_headers,
            &self.signed_headers,
            payload_hash,
        ))
    }

    pub fn string_to_sign(&self, canonical_request: &str) -> String {
        let scope = credential_scope(&self.date_stamp, &self.region);
        get_string_to_sign(canonical_request, &self.timestamp, &scope)
    }

    /// Checks the provided signature against one derived from `secret_key`.
    pub fn verify(&self, secret_key: &str) -> bool {
        if !self.timestamp.starts_with(&self.date_stamp) {
            return false;
        }

        let Some(canonical_request) = self.canonical_request() else {
            return false;
        };
        let string_to_sign = self.string_to_sign(&canonical_request);
        let signing_key = get_signing_key(secret_key, &self.date_stamp, &self.region, SERVICE);

        let Ok(mut mac) = HmacSha256::new_from_slice(&signing_key) else {
            return false;
        };
        mac.update(string_to_sign.as_bytes());
        mac.verify_slice(&self.signature).is_ok()
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
