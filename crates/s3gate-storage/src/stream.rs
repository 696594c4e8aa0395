use async_trait::async_trait;
use bytes::Bytes;
use s3gate_common::Result;

/// Pull side of an object transfer. Finite and forward-only; a new range needs a new
/// stream from the backend.
#[async_trait]
pub trait ReadStream: Send {
    /// Next chunk of content, or `None` once the data is exhausted.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Whether the stream honours the range it was opened with. When `false` the full
    /// content is produced.
    fn supports_range(&self) -> bool;

    /// Size of the whole object, not just the requested range.
    fn total_size(&self) -> Option<u64>;
}

/// Push side of an object transfer.
#[async_trait]
pub trait WriteStream: Send {
    /// `Some(chunk)` appends content; `None` finalizes the write. Content written without a
    /// successful finalize must not become visible.
    async fn write(&mut self, chunk: Option<Bytes>) -> Result<()>;

    /// Whether this sink already computes an ETag digest.
    fn computes_digest(&self) -> bool {
        false
    }

    /// Hex digest of everything written, available once finalized.
    fn hex_digest(&self) -> Option<String> {
        None
    }
}

#[async_trait]
impl<W: WriteStream + ?Sized> WriteStream for Box<W> {
    async fn write(&mut self, chunk: Option<Bytes>) -> Result<()> {
        (**self).write(chunk).await
    }

    fn computes_digest(&self) -> bool {
        (**self).computes_digest()
    }

    fn hex_digest(&self) -> Option<String> {
        (**self).hex_digest()
    }
}
