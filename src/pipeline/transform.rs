//! Raw message → forwardable record.
//!
//! Decoding, the skip rule, timestamp rendering and attachment resolution.
//! Attachment download failures never abort the message; they only leave
//! that attachment without content.

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::{AttachmentError, MessageError};
use crate::signal::{AttachmentDescriptor, MessageSource, RawMessage};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A message with content worth forwarding, before attachments are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub source_number: String,
    pub source_name: String,
    pub formatted_timestamp: String,
    pub text: String,
    pub attachments: Vec<AttachmentDescriptor>,
}

/// An attachment descriptor paired with its downloaded content.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub descriptor: AttachmentDescriptor,
    /// `None` when the download failed.
    pub content: Option<Vec<u8>>,
}

/// Everything the composer needs for one email.
#[derive(Debug, Clone)]
pub struct ForwardableMessage {
    pub source_number: String,
    pub source_name: String,
    pub formatted_timestamp: String,
    pub text: String,
    pub attachments: Vec<ResolvedAttachment>,
}

impl ForwardableMessage {
    /// `"Name (+number)"`, or just the number when there is no name.
    pub fn label(&self) -> String {
        sender_label(&self.source_name, &self.source_number)
    }
}

pub(crate) fn sender_label(name: &str, number: &str) -> String {
    if name.is_empty() {
        number.to_string()
    } else {
        format!("{name} ({number})")
    }
}

/// Render epoch milliseconds with second precision in the given offset,
/// or in the local zone when `offset` is `None`.
pub fn format_timestamp(millis: i64, offset: Option<FixedOffset>) -> Option<String> {
    fn render<Tz: TimeZone>(dt: DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        dt.format(TIMESTAMP_FORMAT).to_string()
    }

    match offset {
        Some(offset) => offset.timestamp_millis_opt(millis).single().map(render),
        None => Local.timestamp_millis_opt(millis).single().map(render),
    }
}

/// Decode one raw message and apply the skip rule.
///
/// Returns `Ok(None)` when the message has neither text nor attachments.
pub fn extract(
    raw: &serde_json::Value,
    offset: Option<FixedOffset>,
) -> Result<Option<ExtractedMessage>, MessageError> {
    let message = decode(raw)?;
    let envelope = message.envelope;

    let (text, attachments) = envelope
        .data_message
        .map(|d| (d.message.unwrap_or_default(), d.attachments))
        .unwrap_or_default();

    if text.is_empty() && attachments.is_empty() {
        return Ok(None);
    }

    let timestamp = envelope.timestamp.unwrap_or(0);
    let formatted_timestamp = format_timestamp(timestamp, offset).ok_or_else(|| {
        MessageError::Malformed(format!("timestamp {timestamp} is out of range"))
    })?;

    Ok(Some(ExtractedMessage {
        source_number: envelope
            .source_number
            .unwrap_or_else(|| "Unknown".to_string()),
        source_name: envelope.source_name.unwrap_or_default(),
        formatted_timestamp,
        text,
        attachments,
    }))
}

fn decode(raw: &serde_json::Value) -> Result<RawMessage, MessageError> {
    RawMessage::deserialize(raw).map_err(|e| MessageError::Malformed(e.to_string()))
}

/// Download every attachment in order. Failures are logged and leave the
/// attachment without content.
pub async fn resolve_attachments(
    source: &dyn MessageSource,
    descriptors: Vec<AttachmentDescriptor>,
) -> Vec<ResolvedAttachment> {
    let mut resolved = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let result = match descriptor.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => source.fetch_attachment_content(id).await,
            None => Err(AttachmentError::MissingId),
        };

        let content = match result {
            Ok(bytes) => {
                debug!(
                    id = descriptor.id.as_deref().unwrap_or_default(),
                    bytes = bytes.len(),
                    "Downloaded attachment"
                );
                Some(bytes)
            }
            Err(e) => {
                error!("Failed to download attachment: {e}");
                None
            }
        };

        resolved.push(ResolvedAttachment {
            descriptor,
            content,
        });
    }

    resolved
}

/// Full transform: decode, filter, then resolve attachments.
pub async fn transform(
    raw: &serde_json::Value,
    source: &dyn MessageSource,
    offset: Option<FixedOffset>,
) -> Result<Option<ForwardableMessage>, MessageError> {
    let Some(extracted) = extract(raw, offset)? else {
        return Ok(None);
    };

    let attachments = resolve_attachments(source, extracted.attachments).await;

    Ok(Some(ForwardableMessage {
        source_number: extracted.source_number,
        source_name: extracted.source_name,
        formatted_timestamp: extracted.formatted_timestamp,
        text: extracted.text,
        attachments,
    }))
}
