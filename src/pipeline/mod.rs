//! Message pipeline.
//!
//! Every polled message flows through:
//! 1. `transform::extract()` — decode the envelope, apply the skip rule
//! 2. `transform::resolve_attachments()` — download attachment content
//! 3. `compose::compose()` — subject, body, embedded image parts
//!
//! Delivery is handled by `crate::mail`.

pub mod compose;
pub mod transform;

pub use compose::{EmailPart, OutboundEmail, compose};
pub use transform::{ForwardableMessage, ResolvedAttachment, transform};
