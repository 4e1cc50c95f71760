//! Signal → email bridge.
//!
//! Polls a signal REST API for new messages and forwards each one, with
//! its image attachments, to an email inbox.

pub mod bridge;
pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod signal;

pub use bridge::{Bridge, CycleReport, LoopState, MessageOutcome};
pub use config::BridgeConfig;
pub use error::{Error, Result};
