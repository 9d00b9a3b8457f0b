//! Event stream reader.
//!
//! Opens a chunked HTTP response and turns its body into [`Frame`]s delivered
//! to a [`StreamHandler`], until the body ends, a `close` frame arrives, or
//! the caller's cancellation token fires.
//!
//! [`Frame`]: opstream_core::Frame

mod reader;
mod types;

pub use reader::{EventStreamReader, drive};
pub use types::{StreamError, StreamHandler, StreamRequest};
