pub mod etag;
pub mod memory;
pub mod stream;
pub mod traits;

pub use etag::ETagWriteStream;
pub use memory::InMemoryBackend;
pub use stream::{ReadStream, WriteStream};
pub use traits::ObjectBackend;
