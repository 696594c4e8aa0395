use std::{collections::HashMap, sync::Arc};

use axum::{
    Extension, Router,
    body::Body,
    extract::{Path, Query, State},
    routing::get,
};
use http::HeaderMap;
use s3gate_auth::{AccessResolver, AuthContext, AuthLayer, UploadTokenCodec};
use s3gate_common::S3GateError;
use s3gate_storage::ObjectBackend;
use tower_http::trace::TraceLayer;

use crate::{
    error::S3Error,
    handlers::{self, S3Result, object_resource},
};

/// Shared by every handler: the storage backend and the upload-token codec.
#[derive(Clone)]
pub struct S3State {
    pub backend: Arc<dyn ObjectBackend>,
    pub tokens: Arc<UploadTokenCodec>,
}

async fn put_object_dispatch(
    state: State<S3State>,
    auth: Extension<AuthContext>,
    path: Path<(String, String)>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    if query.contains_key("uploadId") {
        handlers::multipart::upload_part(state, auth, path, query, headers, body).await
    } else {
        handlers::object::put_object(state, auth, path, headers, body).await
    }
}

async fn post_object_dispatch(
    state: State<S3State>,
    auth: Extension<AuthContext>,
    path: Path<(String, String)>,
    query: Query<HashMap<String, String>>,
    body: Body,
) -> S3Result {
    if query.contains_key("uploads") {
        handlers::multipart::create_multipart_upload(state, auth, path).await
    } else if query.contains_key("uploadId") {
        handlers::multipart::complete_multipart_upload(state, auth, path, query, body).await
    } else {
        let Path((bucket, key)) = path;
        Err(S3Error::new(
            S3GateError::MalformedMultipartRequest(
                "POST requires either uploads or uploadId".to_string(),
            ),
            object_resource(&bucket, &key),
        ))
    }
}

/// Builds the S3 router. Every route sits behind [`AuthLayer`], which resolves access
/// through `backend` before any handler runs.
pub fn s3_router<B>(backend: Arc<B>, tokens: UploadTokenCodec) -> Router
where
    B: ObjectBackend + AccessResolver + 'static,
{
    let resolver: Arc<dyn AccessResolver> = backend.clone();
    let state = S3State {
        backend,
        tokens: Arc::new(tokens),
    };

    let app: Router<S3State> = Router::<S3State>::new()
        .route("/", get(handlers::bucket::list_buckets))
        .route(
            "/{bucket}",
            get(handlers::bucket::list_objects)
                .put(handlers::bucket::create_bucket)
                .delete(handlers::bucket::delete_bucket),
        )
        .route(
            "/{bucket}/{*key}",
            get(handlers::object::get_object)
                .put(put_object_dispatch)
                .post(post_object_dispatch)
                .delete(handlers::object::delete_object),
        );

    app.layer(AuthLayer::new(resolver))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
