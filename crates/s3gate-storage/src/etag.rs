use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use s3gate_common::{Result, S3GateError};

use crate::stream::WriteStream;

/// Feeds everything written through an MD5 digest before handing it to the inner sink.
/// The digest becomes available only after the inner sink finalized successfully.
pub struct ETagWriteStream<W> {
    inner: W,
    hasher: Option<Md5>,
    digest: Option<String>,
}

impl<W: WriteStream> ETagWriteStream<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Some(Md5::new()),
            digest: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl ETagWriteStream<Box<dyn WriteStream>> {
    /// Wraps `stream` unless it already reports a digest of its own.
    pub fn ensure(stream: Box<dyn WriteStream>) -> Box<dyn WriteStream> {
        if stream.computes_digest() {
            stream
        } else {
            Box::new(Self::new(stream))
        }
    }
}

#[async_trait]
impl<W: WriteStream> WriteStream for ETagWriteStream<W> {
    async fn write(&mut self, chunk: Option<Bytes>) -> Result<()> {
        let Some(hasher) = self.hasher.as_mut() else {
            return Err(S3GateError::InternalError(
                "write to an already finalized stream".to_string(),
            ));
        };

        match chunk {
            Some(chunk) => {
                hasher.update(&chunk);
                self.inner.write(Some(chunk)).await
            }
            None => {
                self.inner.write(None).await?;
                if let Some(hasher) = self.hasher.take() {
                    self.digest = Some(hex::encode(hasher.finalize()));
                }
                Ok(())
            }
        }
    }

    fn computes_digest(&self) -> bool {
        true
    }

    fn hex_digest(&self) -> Option<String> {
        self.digest.clone()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use s3gate_common::{Result, S3GateError};

    use super::ETagWriteStream;
    use crate::stream::WriteStream;

    #[derive(Default)]
    struct Collect {
        data: BytesMut,
        finalized: usize,
        fail_finalize: bool,
    }

    #[async_trait]
    impl WriteStream for Collect {
        async fn write(&mut self, chunk: Option<Bytes>) -> Result<()> {
            match chunk {
                Some(chunk) => self.data.extend_from_slice(&chunk),
                None if self.fail_finalize => {
                    return Err(S3GateError::Backend("commit failed".to_string()));
                }
                None => self.finalized += 1,
            }
            Ok(())
        }
    }

    async fn digest_of(chunks: &[&'static str]) -> String {
        let mut stream = ETagWriteStream::new(Collect::default());
        for chunk in chunks {
            stream.write(Some(Bytes::from_static(chunk.as_bytes()))).await.unwrap();
        }
        stream.write(None).await.unwrap();
        stream.hex_digest().unwrap()
    }

    #[tokio::test]
    async fn digest_is_independent_of_chunk_boundaries() {
        assert_eq!(digest_of(&["ab", "cd"]).await, digest_of(&["abcd"]).await);
        assert_eq!(digest_of(&["abcd"]).await, "e2fc714c4727ee9395f324cd2e7f331f");
    }

    #[tokio::test]
    async fn empty_stream_has_empty_input_digest() {
        assert_eq!(digest_of(&[]).await, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn forwards_bytes_and_finalizes_once() {
        let mut stream = ETagWriteStream::new(Collect::default());
        stream.write(Some(Bytes::from_static(b"hello "))).await.unwrap();
        stream.write(Some(Bytes::from_static(b"world"))).await.unwrap();
        assert!(stream.hex_digest().is_none());
        stream.write(None).await.unwrap();

        assert!(stream.write(None).await.is_err());
        assert!(stream.write(Some(Bytes::from_static(b"!"))).await.is_err());

        let inner = stream.into_inner();
        assert_eq!(&inner.data[..], b"hello world");
        assert_eq!(inner.finalized, 1);
    }

    #[tokio::test]
    async fn failed_finalize_reports_no_digest() {
        let mut stream = ETagWriteStream::new(Collect {
            fail_finalize: true,
            ..Collect::default()
        });
        stream.write(Some(Bytes::from_static(b"data"))).await.unwrap();
        assert!(stream.write(None).await.is_err());
        assert!(stream.hex_digest().is_none());
    }

    #[test]
    fn ensure_wraps_plain_sinks_only() {
        let plain: Box<dyn WriteStream> = Box::new(Collect::default());
        let wrapped = ETagWriteStream::ensure(plain);
        assert!(wrapped.computes_digest());

        let already: Box<dyn WriteStream> = Box::new(ETagWriteStream::new(Collect::default()));
        let kept = ETagWriteStream::ensure(already);
        assert!(kept.computes_digest());
    }
}
