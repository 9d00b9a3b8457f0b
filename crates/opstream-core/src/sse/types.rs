//! Frame types for the event stream wire format.

/// Event name used when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One parsed unit of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Classify the event name against the reserved names.
    pub fn kind(&self) -> StreamEvent {
        StreamEvent::from_name(&self.event)
    }

    /// Whether this frame terminates the read loop.
    pub fn is_close(&self) -> bool {
        self.event == "close"
    }
}

/// Reserved event names interpreted by stream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Informational: the backend accepted the stream.
    Open,
    /// Plain output (`message`, the default name).
    Message,
    /// Operation failed; the payload is caller-defined.
    Error,
    /// Operation succeeded; the payload is caller-defined.
    Success,
    /// End of stream.
    Close,
    /// Any other name, passed through verbatim as output.
    Other,
}

impl StreamEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "open" => Self::Open,
            DEFAULT_EVENT => Self::Message,
            "error" => Self::Error,
            "success" => Self::Success,
            "close" => Self::Close,
            _ => Self::Other,
        }
    }
}
