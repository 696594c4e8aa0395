//! SigV4 request authentication, the access gate and the stateless upload-token codec.

pub mod access;
pub mod middleware;
pub mod parser;
pub mod signature_v4;
pub mod upload_token;

pub use access::{AccessResolver, enforce};
pub use middleware::{AuthContext, AuthLayer};
pub use signature_v4::SigningContext;
pub use upload_token::{UploadToken, UploadTokenCodec};
