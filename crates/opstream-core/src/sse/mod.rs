//! Server-Sent-Events frame decoding.
//!
//! Turns a chunked UTF-8 byte stream into discrete named frames. The decoder
//! is transport-agnostic: the client crate feeds it HTTP body chunks, tests
//! feed it arbitrary splits of the same bytes.

mod decoder;
mod types;

pub use decoder::{FrameDecoder, parse_frame};
pub use types::{DEFAULT_EVENT, Frame, StreamEvent};
