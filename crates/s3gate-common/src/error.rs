use http::StatusCode;
use quick_xml::escape::escape;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum S3GateError {
    #[error("malformed authorization: {0}")]
    MalformedAuth(String),
    #[error("the access key id does not exist")]
    InvalidIdentity,
    #[error("access denied")]
    AccessDenied,
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("malformed multipart request: {0}")]
    MalformedMultipartRequest(String),
    #[error("upload id is not valid")]
    TokenInvalid,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl S3GateError {
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::MalformedAuth(_) => "AuthorizationHeaderMalformed",
            Self::InvalidIdentity => "InvalidAccessKeyId",
            Self::AccessDenied => "AccessDenied",
            Self::SignatureMismatch => "SignatureDoesNotMatch",
            Self::MalformedMultipartRequest(_) => "InvalidRequest",
            Self::TokenInvalid => "NoSuchUpload",
            Self::Backend(_) | Self::InternalError(_) | Self::Io(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedAuth(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidIdentity
            | Self::AccessDenied
            | Self::SignatureMismatch
            | Self::TokenInvalid => StatusCode::FORBIDDEN,
            Self::MalformedMultipartRequest(_) => StatusCode::BAD_REQUEST,
            Self::Backend(_) | Self::InternalError(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Renders the S3 `<Error>` document returned with every failed request.
    pub fn to_xml(&self, resource: &str, request_id: &str) -> String {
        let code = self.s3_error_code();
        let message = self.to_string();
        let message = escape(message.as_str());
        let resource = escape(resource);
        let request_id = escape(request_id);
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{code}</Code>
  <Message>{message}</Message>
  <Resource>{resource}</Resource>
  <RequestId>{request_id}</RequestId>
</Error>"#
        )
    }

    /// Whether the failure was raised by the protocol layer rather than storage.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, Self::Backend(_) | Self::InternalError(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, S3GateError>;
