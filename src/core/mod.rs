/*!
 * Core Module
 * Fundamental types, byte streams and error handling
 */

pub mod errors;
pub mod stream;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use stream::{shared_stream, ByteStream, MemoryStream, SharedStream};
pub use types::*;
