//! opstream Core Library
//!
//! Shared functionality for the opstream components:
//! - Server-Sent-Events frame decoding
//! - Terminal and command-execution wire protocol
//! - Reconnect backoff policy
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod backoff;
pub mod config;
pub mod error;
pub mod protocol;
pub mod sse;
pub mod tracing_init;

pub use backoff::ReconnectPolicy;
pub use config::Config;
pub use error::{Error, Result};
pub use sse::{Frame, FrameDecoder};
