//! Process-local backend used by the server binary and the router tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use s3gate_auth::AccessResolver;
use s3gate_common::{
    AccessDecision, AccessGrant, AccessTarget, Bucket, ByteRange, ObjectRef, Part, Result,
    S3GateError,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::stream::{ReadStream, WriteStream};
use crate::traits::ObjectBackend;

const READ_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),
    #[error("bucket {0} already exists")]
    BucketExists(String),
    #[error("bucket {0} is not empty")]
    BucketNotEmpty(String),
    #[error("object {0} does not exist")]
    NoSuchKey(String),
    #[error("no multipart upload in progress for {0}")]
    NoSuchUpload(String),
    #[error("part {0} was not uploaded")]
    InvalidPart(u32),
    #[error("part {0} listed more than once")]
    DuplicatePart(u32),
    #[error("etag of part {0} does not match")]
    PartETagMismatch(u32),
    #[error("received {received} bytes, expected {declared}")]
    IncompleteBody { declared: u64, received: u64 },
    #[error("stream already finalized")]
    Finalized,
}

impl From<MemoryError> for S3GateError {
    fn from(err: MemoryError) -> Self {
        S3GateError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone)]
struct User {
    secret: String,
    /// `None` grants every bucket.
    buckets: Option<HashSet<String>>,
}

type UploadKey = (String, String);

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, Bytes>>,
    uploads: HashMap<UploadKey, BTreeMap<u32, Bytes>>,
}

/// Keeps buckets, objects and multipart parts in memory behind a `tokio` lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    users: HashMap<String, User>,
    public_buckets: HashSet<String>,
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key id with access to every bucket.
    pub fn with_user(mut self, key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.users.insert(
            key_id.into(),
            User {
                secret: secret.into(),
                buckets: None,
            },
        );
        self
    }

    /// Registers a key id limited to `buckets`.
    pub fn with_restricted_user<I, S>(
        mut self,
        key_id: impl Into<String>,
        secret: impl Into<String>,
        buckets: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.insert(
            key_id.into(),
            User {
                secret: secret.into(),
                buckets: Some(buckets.into_iter().map(Into::into).collect()),
            },
        );
        self
    }

    /// Marks `bucket` as readable and writable without credentials. The bucket itself
    /// still has to be created.
    pub fn with_public_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.public_buckets.insert(bucket.into());
        self
    }

    fn may_use(&self, identity: Option<&str>, bucket: &str) -> bool {
        match identity {
            None => self.public_buckets.contains(bucket),
            Some(key_id) => match self.users.get(key_id) {
                Some(user) => user
                    .buckets
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(bucket)),
                None => false,
            },
        }
    }
}

#[async_trait]
impl AccessResolver for InMemoryBackend {
    async fn resolve_access(
        &self,
        key_id: Option<&str>,
        target: &AccessTarget,
    ) -> Result<AccessDecision> {
        let decision = match key_id {
            Some(key_id) => match self.users.get(key_id) {
                None => AccessDecision::UnknownIdentity,
                Some(user) => {
                    let allowed = match (target.bucket(), user.buckets.as_ref()) {
                        (Some(bucket), Some(buckets)) => buckets.contains(&bucket.name),
                        _ => true,
                    };
                    if allowed {
                        AccessDecision::Granted(AccessGrant {
                            identity: Some(key_id.to_string()),
                            secret: Some(user.secret.clone()),
                        })
                    } else {
                        AccessDecision::Denied
                    }
                }
            },
            None => match target.bucket() {
                Some(bucket) if self.public_buckets.contains(&bucket.name) => {
                    AccessDecision::Granted(AccessGrant::default())
                }
                _ => AccessDecision::Denied,
            },
        };
        Ok(decision)
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn create_bucket(&self, identity: Option<&str>, name: &str) -> Result<Bucket> {
        if identity.is_some() && !self.may_use(identity, name) {
            return Err(S3GateError::AccessDenied);
        }

        let mut state = self.state.write().await;
        if state.buckets.contains_key(name) {
            return Err(MemoryError::BucketExists(name.to_string()).into());
        }
        state.buckets.insert(name.to_string(), BTreeMap::new());
        debug!(bucket = %name, "bucket created");
        Ok(Bucket::new(name))
    }

    async fn list_buckets(&self, identity: Option<&str>) -> Result<Vec<Bucket>> {
        let state = self.state.read().await;
        Ok(state
            .buckets
            .keys()
            .filter(|name| self.may_use(identity, name))
            .map(Bucket::new)
            .collect())
    }

    async fn delete_bucket(&self, _identity: Option<&str>, bucket: &Bucket) -> Result<()> {
        let mut state = self.state.write().await;
        let objects = state
            .buckets
            .get(&bucket.name)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.name.clone()))?;
        if !objects.is_empty() {
            return Err(MemoryError::BucketNotEmpty(bucket.name.clone()).into());
        }

        state.buckets.remove(&bucket.name);
        state.uploads.retain(|(name, _), _| *name != bucket.name);
        debug!(bucket = %bucket.name, "bucket deleted");
        Ok(())
    }

    async fn list_objects(
        &self,
        _identity: Option<&str>,
        bucket: &Bucket,
    ) -> Result<Vec<ObjectRef>> {
        let state = self.state.read().await;
        let objects = state
            .buckets
            .get(&bucket.name)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.name.clone()))?;
        Ok(objects
            .iter()
            .map(|(key, data)| ObjectRef::new(bucket.clone(), key.clone(), data.len() as u64))
            .collect())
    }

    async fn open_read_stream(
        &self,
        _identity: Option<&str>,
        object: &ObjectRef,
        range: Option<ByteRange>,
    ) -> Result<Box<dyn ReadStream>> {
        let state = self.state.read().await;
        let data = state
            .buckets
            .get(&object.bucket.name)
            .ok_or_else(|| MemoryError::NoSuchBucket(object.bucket.name.clone()))?
            .get(&object.key)
            .ok_or_else(|| MemoryError::NoSuchKey(object.key.clone()))?
            .clone();

        Ok(Box::new(MemoryReadStream::new(data, range)))
    }

    async fn open_write_stream(
        &self,
        _identity: Option<&str>,
        bucket: &Bucket,
        key: &str,
        declared_size: Option<u64>,
    ) -> Result<Box<dyn WriteStream>> {
        if !self.state.read().await.buckets.contains_key(&bucket.name) {
            return Err(MemoryError::NoSuchBucket(bucket.name.clone()).into());
        }

        Ok(Box::new(MemoryWriteStream::new(
            Arc::clone(&self.state),
            Destination::Object {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            declared_size,
        )))
    }

    async fn delete_object(&self, _identity: Option<&str>, object: &ObjectRef) -> Result<()> {
        let mut state = self.state.write().await;
        let objects = state
            .buckets
            .get_mut(&object.bucket.name)
            .ok_or_else(|| MemoryError::NoSuchBucket(object.bucket.name.clone()))?;
        if objects.remove(&object.key).is_some() {
            debug!(bucket = %object.bucket.name, key = %object.key, "object deleted");
        }
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        _identity: Option<&str>,
        bucket: &Bucket,
        key: &str,
    ) -> Result<ObjectRef> {
        let mut state = self.state.write().await;
        if !state.buckets.contains_key(&bucket.name) {
            return Err(MemoryError::NoSuchBucket(bucket.name.clone()).into());
        }
        // A new upload of a key always starts from an empty part list.
        let upload = (bucket.name.clone(), key.to_string());
        if state.uploads.insert(upload, BTreeMap::new()).is_some() {
            debug!(bucket = %bucket.name, %key, "discarded parts of an unfinished upload");
        }
        Ok(ObjectRef::new(bucket.clone(), key, 0))
    }

    async fn open_part_write_stream(
        &self,
        object: &ObjectRef,
        part_number: u32,
        declared_size: Option<u64>,
    ) -> Result<Box<dyn WriteStream>> {
        let upload = upload_key(object);
        if !self.state.read().await.uploads.contains_key(&upload) {
            return Err(MemoryError::NoSuchUpload(object.key.clone()).into());
        }

        Ok(Box::new(MemoryWriteStream::new(
            Arc::clone(&self.state),
            Destination::Part {
                upload,
                part_number,
            },
            declared_size,
        )))
    }

    async fn complete_multipart_upload(&self, object: &ObjectRef, parts: Vec<Part>) -> Result<()> {
        let mut state = self.state.write().await;
        let upload = upload_key(object);
        let stored = state
            .uploads
            .get(&upload)
            .ok_or_else(|| MemoryError::NoSuchUpload(object.key.clone()))?;

        let mut assembled = BytesMut::new();
        if parts.is_empty() {
            for data in stored.values() {
                assembled.extend_from_slice(data);
            }
        } else {
            let mut previous = None;
            for part in &parts {
                if previous == Some(part.part_number) {
                    return Err(MemoryError::DuplicatePart(part.part_number).into());
                }
                previous = Some(part.part_number);

                let data = stored
                    .get(&part.part_number)
                    .ok_or(MemoryError::InvalidPart(part.part_number))?;
                let expected = hex::encode(Md5::digest(data));
                if !part.etag.trim_matches('"').eq_ignore_ascii_case(&expected) {
                    return Err(MemoryError::PartETagMismatch(part.part_number).into());
                }
                assembled.extend_from_slice(data);
            }
        }

        let objects = state
            .buckets
            .get_mut(&object.bucket.name)
            .ok_or_else(|| MemoryError::NoSuchBucket(object.bucket.name.clone()))?;
        let size = assembled.len();
        objects.insert(object.key.clone(), assembled.freeze());
        state.uploads.remove(&upload);

        debug!(
            bucket = %object.bucket.name,
            key = %object.key,
            size,
            "multipart upload completed"
        );
        Ok(())
    }
}

fn upload_key(object: &ObjectRef) -> UploadKey {
    (object.bucket.name.clone(), object.key.clone())
}

struct MemoryReadStream {
    remaining: Bytes,
    total: u64,
}

impl MemoryReadStream {
    fn new(data: Bytes, range: Option<ByteRange>) -> Self {
        let total = data.len() as u64;
        let remaining = match range {
            Some(range) => {
                let (start, end) = range.clamp(total);
                data.slice(start as usize..end as usize)
            }
            None => data,
        };
        Self { remaining, total }
    }
}

#[async_trait]
impl ReadStream for MemoryReadStream {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        let len = self.remaining.len().min(READ_CHUNK_SIZE);
        Ok(Some(self.remaining.split_to(len)))
    }

    fn supports_range(&self) -> bool {
        true
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.total)
    }
}

enum Destination {
    Object { bucket: String, key: String },
    Part { upload: UploadKey, part_number: u32 },
}

struct MemoryWriteStream {
    state: Arc<RwLock<State>>,
    destination: Destination,
    declared_size: Option<u64>,
    buffer: BytesMut,
    finalized: bool,
}

impl MemoryWriteStream {
    fn new(state: Arc<RwLock<State>>, destination: Destination, declared_size: Option<u64>) -> Self {
        Self {
            state,
            destination,
            declared_size,
            buffer: BytesMut::new(),
            finalized: false,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let received = self.buffer.len() as u64;
        match self.declared_size {
            Some(declared) if declared != received => {
                return Err(MemoryError::IncompleteBody { declared, received }.into());
            }
            _ => {}
        }

        let data = std::mem::take(&mut self.buffer).freeze();
        let mut state = self.state.write().await;
        match &self.destination {
            Destination::Object { bucket, key } => {
                let objects = state
                    .buckets
                    .get_mut(bucket)
                    .ok_or_else(|| MemoryError::NoSuchBucket(bucket.clone()))?;
                objects.insert(key.clone(), data);
                debug!(%bucket, %key, size = received, "object committed");
            }
            Destination::Part {
                upload,
                part_number,
            } => {
                let parts = state
                    .uploads
                    .get_mut(upload)
                    .ok_or_else(|| MemoryError::NoSuchUpload(upload.1.clone()))?;
                parts.insert(*part_number, data);
                debug!(
                    bucket = %upload.0,
                    key = %upload.1,
                    part_number,
                    size = received,
                    "part committed"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WriteStream for MemoryWriteStream {
    async fn write(&mut self, chunk: Option<Bytes>) -> Result<()> {
        if self.finalized {
            return Err(MemoryError::Finalized.into());
        }
        match chunk {
            Some(chunk) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(())
            }
            None => {
                self.finalized = true;
                self.commit().await
            }
        }
    }
}
