//! S3 wire protocol: routing, request dispatch, XML documents and error responses.

pub mod error;
pub mod handlers;
pub mod router;
pub mod xml;

pub use router::{S3State, s3_router};
