//! Message source: the signal REST API.

pub mod client;
pub mod types;

pub use client::{MessageSource, SignalClient};
pub use types::{AttachmentDescriptor, DataMessage, Envelope, RawMessage};
