use std::collections::HashMap;

use axum::{
    Extension,
    body::{Body, to_bytes},
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode, header::ETAG};
use s3gate_auth::{AuthContext, UploadToken};
use s3gate_common::{Bucket, ObjectRef, Result, S3GateError};
use tracing::{debug, info};

use super::{S3Result, declared_size, object_resource, object::header_value, pipe_body};
use crate::{
    error::S3Error,
    router::S3State,
    xml::{
        CompleteMultipartUploadResult, InitiateMultipartUploadResult, parse_complete_parts,
        quoted_etag, xml_response,
    },
};

const MAX_PART_NUMBER: u32 = 10_000;
const MAX_COMPLETE_BODY: usize = 1024 * 1024;

pub async fn create_multipart_upload(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
) -> S3Result {
    initiate(&state, auth.identity, &bucket, &key)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))
}

async fn initiate(
    state: &S3State,
    identity: Option<String>,
    bucket: &str,
    key: &str,
) -> Result<Response> {
    let object = state
        .backend
        .create_multipart_upload(identity.as_deref(), &Bucket::new(bucket), key)
        .await?;
    let token = UploadToken::new(object.bucket.name.as_str(), object.key.as_str(), identity);
    let upload_id = state.tokens.issue(&token)?;

    info!(%bucket, %key, identity = ?token.identity, "multipart upload initiated");
    xml_response(
        StatusCode::OK,
        &InitiateMultipartUploadResult {
            bucket: object.bucket.name,
            key: object.key,
            upload_id,
        },
    )
}

pub async fn upload_part(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    upload_part_inner(&state, &auth, &bucket, &key, &query, &headers, body)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))
}

async fn upload_part_inner(
    state: &S3State,
    auth: &AuthContext,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let object = redeem_upload(state, auth, bucket, key, query)?;
    let part_number = parse_part_number(query)?;

    let sink = state
        .backend
        .open_part_write_stream(&object, part_number, declared_size(headers))
        .await?;
    let etag = pipe_body(body, sink).await?;

    debug!(%bucket, %key, part_number, %etag, "part uploaded");
    Ok((StatusCode::OK, [(ETAG, header_value(&quoted_etag(&etag))?)]).into_response())
}

pub async fn complete_multipart_upload(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Body,
) -> S3Result {
    complete_inner(&state, &auth, &bucket, &key, &query, body)
        .await
        .map_err(|err| S3Error::new(err, object_resource(&bucket, &key)))
}

async fn complete_inner(
    state: &S3State,
    auth: &AuthContext,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: Body,
) -> Result<Response> {
    let object = redeem_upload(state, auth, bucket, key, query)?;

    let body = to_bytes(body, MAX_COMPLETE_BODY).await.map_err(|err| {
        S3GateError::MalformedMultipartRequest(format!("unreadable completion body: {err}"))
    })?;
    let body = std::str::from_utf8(&body).map_err(|_| {
        S3GateError::MalformedMultipartRequest("completion body is not utf-8".to_string())
    })?;
    let parts = parse_complete_parts(body)?;
    if let Some(part) = parts
        .iter()
        .find(|part| !(1..=MAX_PART_NUMBER).contains(&part.part_number))
    {
        return Err(S3GateError::MalformedMultipartRequest(format!(
            "part number {} out of range",
            part.part_number
        )));
    }

    let part_count = parts.len();
    state
        .backend
        .complete_multipart_upload(&object, parts)
        .await?;

    info!(%bucket, %key, part_count, "multipart upload completed");
    xml_response(
        StatusCode::OK,
        &CompleteMultipartUploadResult {
            location: object_resource(bucket, key),
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
    )
}

/// Redeems the `uploadId` query parameter and checks that it was issued for this bucket,
/// key and caller.
fn redeem_upload(
    state: &S3State,
    auth: &AuthContext,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<ObjectRef> {
    let upload_id = query.get("uploadId").ok_or_else(|| {
        S3GateError::MalformedMultipartRequest("missing uploadId".to_string())
    })?;
    let token = state.tokens.redeem(upload_id).inspect_err(|err| {
        debug!(%bucket, %key, error = %err, "upload token rejected");
    })?;

    if !token.matches(bucket, key, auth.identity.as_deref()) {
        debug!(
            %bucket,
            %key,
            token_bucket = %token.bucket,
            token_key = %token.key,
            "upload token issued for another upload"
        );
        return Err(S3GateError::MalformedMultipartRequest(
            "upload id does not belong to this object or caller".to_string(),
        ));
    }

    Ok(ObjectRef::new(Bucket::new(token.bucket), token.key, 0))
}

fn parse_part_number(query: &HashMap<String, String>) -> Result<u32> {
    let raw = query.get("partNumber").ok_or_else(|| {
        S3GateError::MalformedMultipartRequest("missing partNumber".to_string())
    })?;
    raw.parse::<u32>()
        .ok()
        .filter(|n| (1..=MAX_PART_NUMBER).contains(n))
        .ok_or_else(|| {
            S3GateError::MalformedMultipartRequest(format!("invalid partNumber {raw}"))
        })
}
