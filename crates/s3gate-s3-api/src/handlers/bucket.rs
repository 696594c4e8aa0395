use axum::{
    Extension,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use http::{StatusCode, header::LOCATION};
use s3gate_auth::AuthContext;
use s3gate_common::{Bucket, Result};
use tracing::info;

use super::S3Result;
use crate::{
    error::S3Error,
    router::S3State,
    xml::{ListAllMyBucketsResult, ListBucketResult, xml_response},
};

pub async fn list_buckets(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
) -> S3Result {
    let identity = auth.identity.as_deref();
    let buckets = state
        .backend
        .list_buckets(identity)
        .await
        .map_err(|err| S3Error::new(err, "/"))?;
    Ok(xml_response(
        StatusCode::OK,
        &ListAllMyBucketsResult::new(identity, buckets),
    )?)
}

pub async fn create_bucket(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path(bucket): Path<String>,
) -> S3Result {
    let resource = format!("/{bucket}");
    let created = state
        .backend
        .create_bucket(auth.identity.as_deref(), &bucket)
        .await
        .map_err(|err| S3Error::new(err, resource.as_str()))?;

    info!(bucket = %created.name, identity = ?auth.identity, "bucket created");
    Ok((StatusCode::OK, [(LOCATION, resource)]).into_response())
}

pub async fn list_objects(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path(bucket): Path<String>,
) -> S3Result {
    list_objects_inner(&state, auth.identity.as_deref(), Bucket::new(bucket.as_str()))
        .await
        .map_err(|err| S3Error::new(err, format!("/{bucket}")))
}

async fn list_objects_inner(
    state: &S3State,
    identity: Option<&str>,
    bucket: Bucket,
) -> Result<Response> {
    let objects = state.backend.list_objects(identity, &bucket).await?;
    xml_response(StatusCode::OK, &ListBucketResult::new(&bucket, objects))
}

pub async fn delete_bucket(
    State(state): State<S3State>,
    Extension(auth): Extension<AuthContext>,
    Path(bucket): Path<String>,
) -> S3Result {
    state
        .backend
        .delete_bucket(auth.identity.as_deref(), &Bucket::new(bucket.as_str()))
        .await
        .map_err(|err| S3Error::new(err, format!("/{bucket}")))?;

    info!(%bucket, identity = ?auth.identity, "bucket deleted");
    Ok(StatusCode::OK.into_response())
}
