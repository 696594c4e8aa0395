use axum::{
    Extension,
    body::Body,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use futures::stream;
use http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, RANGE},
};
use s3gate_auth::AuthContext;
use s3gate_common::{Bucket, ByteRange, ObjectRef, Result, S3GateError};
use s3gate_storage::ReadStream;
use tracing::{debug, warn};

use super::{S3Result, declared_size, object_resource, pipe_body};
use crate::{error::S3Error, router::S3State, xml::quoted_etag};

pub async fn get_object(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> S3Result {
    let range = headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(ByteRange::parse_header);
    let object = ObjectRef::new(Bucket::new(bucket.as_str()), key.as_str(), 0);

    read_object(&state, auth.identity.as_deref(), &object, range)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))
}

async fn read_object(
    state: &S3State,
    identity: Option<&str>,
    object: &ObjectRef,
    range: Option<ByteRange>,
) -> Result<Response> {
    let mut reader = state.backend.open_read_stream(identity, object, range).await?;

    let mut status = StatusCode::OK;
    let mut response_headers = HeaderMap::new();
    let total = reader.total_size();

    match (range, total) {
        (Some(range), Some(total)) if reader.supports_range() => {
            let (start, end) = range.clamp(total);
            if start < end {
                status = StatusCode::PARTIAL_CONTENT;
                response_headers.insert(
                    CONTENT_RANGE,
                    header_value(&format!("bytes {start}-{}/{total}", end - 1))?,
                );
                response_headers.insert(CONTENT_LENGTH, HeaderValue::from(end - start));
            } else {
                debug!(?range, total, "unsatisfiable range, serving full object");
                reader = state.backend.open_read_stream(identity, object, None).await?;
                response_headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
            }
        }
        (Some(range), _) if reader.supports_range() => {
            // Length is unknown, so the range cannot be described; serve everything.
            debug!(?range, "range without object size, serving full object");
            reader = state.backend.open_read_stream(identity, object, None).await?;
        }
        (_, Some(total)) => {
            response_headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
        }
        (_, None) => {}
    }
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    let resource = object_resource(&object.bucket.name, &object.key);
    Ok((status, response_headers, Body::from_stream(read_chunks(reader, resource))).into_response())
}

/// Adapts a [`ReadStream`] into a body stream. A read failure ends the response early;
/// the client sees a truncated body rather than a success.
fn read_chunks(
    reader: Box<dyn ReadStream>,
    resource: String,
) -> impl futures::Stream<Item = Result<bytes::Bytes>> + Send + 'static {
    stream::try_unfold((reader, resource), |(mut reader, resource)| async move {
        match reader.read().await {
            Ok(Some(chunk)) => Ok(Some((chunk, (reader, resource)))),
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(%resource, error = %err, "read stream failed mid-transfer");
                Err(err)
            }
        }
    })
}

pub async fn put_object(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    write_object(&state, auth.identity.as_deref(), &bucket, &key, &headers, body)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))
}

async fn write_object(
    state: &S3State,
    identity: Option<&str>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let sink = state
        .backend
        .open_write_stream(identity, &Bucket::new(bucket), key, declared_size(headers))
        .await?;
    let etag = pipe_body(body, sink).await?;

    debug!(%bucket, %key, %etag, "object written");
    Ok((StatusCode::OK, [(ETAG, header_value(&quoted_etag(&etag))?)]).into_response())
}

pub async fn delete_object(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
) -> S3Result {
    let object = ObjectRef::new(Bucket::new(bucket.as_str()), key.as_str(), 0);
    state
        .backend
        .delete_object(auth.identity.as_deref(), &object)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))?;

    debug!(%bucket, %key, "object deleted");
    Ok(StatusCode::OK.into_response())
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| S3GateError::InternalError(format!("invalid header value: {err}")))
}
