use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: Bucket,
    pub key: String,
    /// Informational only; streams report their own length.
    pub size: u64,
}

impl ObjectRef {
    pub fn new(bucket: Bucket, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket,
            key: key.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: u32,
    pub etag: String,
}

/// Half-open byte range `[start, end)`. `end == None` reads to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parses `bytes=a-b` and `bytes=a-`. Suffix ranges (`bytes=-n`), multiple ranges and
    /// malformed values yield `None`, in which case the full object is served.
    pub fn parse_header(header: &str) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start = start.trim().parse::<u64>().ok()?;
        let end = end.trim();
        if end.is_empty() {
            return Some(Self { start, end: None });
        }

        let last = end.parse::<u64>().ok()?;
        if last < start {
            return None;
        }
        Some(Self {
            start,
            end: Some(last.checked_add(1)?),
        })
    }

    /// Clamps the range to an object of `total` bytes.
    pub fn clamp(&self, total: u64) -> (u64, u64) {
        let end = self.end.unwrap_or(total).min(total);
        let start = self.start.min(end);
        (start, end)
    }
}

/// The entity an access decision is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    None,
    Bucket(Bucket),
    Object(ObjectRef),
}

impl AccessTarget {
    pub fn bucket(&self) -> Option<&Bucket> {
        match self {
            Self::None => None,
            Self::Bucket(bucket) => Some(bucket),
            Self::Object(object) => Some(&object.bucket),
        }
    }
}

/// Identity resolved by the backend for a granted request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessGrant {
    /// Effective identity; `None` for anonymous access to a public target.
    pub identity: Option<String>,
    /// Secret of the supplied key id, used to verify the request signature.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(AccessGrant),
    Denied,
    UnknownIdentity,
}
