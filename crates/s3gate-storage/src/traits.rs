use async_trait::async_trait;
use s3gate_common::{Bucket, ByteRange, ObjectRef, Part, Result};

use crate::stream::{ReadStream, WriteStream};

/// Storage primitives the gateway delegates to. Access has already been checked by the
/// time any of these run; `identity` is passed along for backends that scope data per
/// caller and is `None` for anonymous access to a public bucket.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn create_bucket(&self, identity: Option<&str>, name: &str) -> Result<Bucket>;
    async fn list_buckets(&self, identity: Option<&str>) -> Result<Vec<Bucket>>;
    async fn delete_bucket(&self, identity: Option<&str>, bucket: &Bucket) -> Result<()>;

    async fn list_objects(&self, identity: Option<&str>, bucket: &Bucket)
    -> Result<Vec<ObjectRef>>;

    /// Opens `object` for reading. A stream that reports `supports_range() == false`
    /// ignores `range` and yields the whole object.
    async fn open_read_stream(
        &self,
        identity: Option<&str>,
        object: &ObjectRef,
        range: Option<ByteRange>,
    ) -> Result<Box<dyn ReadStream>>;

    /// Opens a sink for a new object. Nothing is visible until the sink is finalized.
    async fn open_write_stream(
        &self,
        identity: Option<&str>,
        bucket: &Bucket,
        key: &str,
        declared_size: Option<u64>,
    ) -> Result<Box<dyn WriteStream>>;

    async fn delete_object(&self, identity: Option<&str>, object: &ObjectRef) -> Result<()>;

    async fn create_multipart_upload(
        &self,
        identity: Option<&str>,
        bucket: &Bucket,
        key: &str,
    ) -> Result<ObjectRef>;

    async fn open_part_write_stream(
        &self,
        object: &ObjectRef,
        part_number: u32,
        declared_size: Option<u64>,
    ) -> Result<Box<dyn WriteStream>>;

    /// Assembles the upload from `parts`, already sorted by part number. An empty list
    /// means every part uploaded so far.
    async fn complete_multipart_upload(&self, object: &ObjectRef, parts: Vec<Part>) -> Result<()>;
}
