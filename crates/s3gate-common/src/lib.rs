pub mod error;
pub mod types;

pub use error::{Result, S3GateError};
pub use types::{AccessDecision, AccessGrant, AccessTarget, Bucket, ByteRange, ObjectRef, Part};
