use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::header::CONTENT_TYPE;
use s3gate_common::S3GateError;
use tracing::{debug, warn};

/// An [`S3GateError`] bound to the resource it was raised for, rendered as an S3 error
/// document.
#[derive(Debug)]
pub struct S3Error {
    pub error: S3GateError,
    pub resource: String,
}

impl S3Error {
    pub fn new(error: S3GateError, resource: impl Into<String>) -> Self {
        Self {
            error,
            resource: resource.into(),
        }
    }
}

impl From<S3GateError> for S3Error {
    fn from(error: S3GateError) -> Self {
        Self::new(error, "/")
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        if self.error.is_protocol_error() {
            debug!(resource = %self.resource, error = %self.error, "request rejected");
        } else {
            warn!(
                resource = %self.resource,
                request_id = %request_id,
                error = %self.error,
                "backend failure"
            );
        }

        let body = self.error.to_xml(&self.resource, &request_id);
        (
            self.error.status_code(),
            [
                (CONTENT_TYPE.as_str(), "application/xml"),
                ("x-amz-request-id", request_id.as_str()),
            ],
            Body::from(body),
        )
            .into_response()
    }
}
