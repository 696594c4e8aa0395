pub mod bucket;
pub mod multipart;
pub mod object;

use axum::{body::Body, response::Response};
use futures::StreamExt;
use http::{HeaderMap, header::CONTENT_LENGTH};
use s3gate_common::{Result, S3GateError};
use s3gate_storage::{ETagWriteStream, WriteStream};
use tracing::debug;

use crate::error::S3Error;

pub(crate) type S3Result = std::result::Result<Response, S3Error>;

/// Forwards the request body into `sink` one chunk at a time and finalizes it once the
/// body ends. Returns the hex digest of what was written.
///
/// A body error stops the transfer before finalize, so the sink is dropped without
/// committing anything.
pub(crate) async fn pipe_body(body: Body, sink: Box<dyn WriteStream>) -> Result<String> {
    let mut sink = ETagWriteStream::ensure(sink);
    let mut chunks = body.into_data_stream();
    let mut received = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| {
            debug!(error = %err, received, "request body aborted");
            S3GateError::InternalError(format!("failed to read request body: {err}"))
        })?;
        if chunk.is_empty() {
            continue;
        }
        received += chunk.len() as u64;
        sink.write(Some(chunk)).await?;
    }
    sink.write(None).await?;

    sink.hex_digest()
        .ok_or_else(|| S3GateError::InternalError("write stream reported no digest".to_string()))
}

pub(crate) fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

pub(crate) fn object_resource(bucket: &str, key: &str) -> String {
    format!("/{bucket}/{key}")
}
