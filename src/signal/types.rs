//! Wire types for the signal REST API `receive` endpoint.
//!
//! Only the fields the bridge reads are modelled; everything else in the
//! envelope (receipts, typing indicators, sync messages) is ignored.

use serde::{Deserialize, Serialize};

/// One element of the `GET /v1/receive/{number}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub envelope: Envelope,
}

/// Sender, timestamp and payload of one message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub source_number: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data_message: Option<DataMessage>,
}

/// Free text and attachments of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<AttachmentDescriptor>,
}

/// Metadata of an attachment; content is fetched separately by `id`.
///
/// Fields decode leniently: a value of the wrong type only degrades this
/// attachment, never the whole message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    /// Declared size in bytes. Advisory only.
    #[serde(default, deserialize_with = "lenient_size")]
    pub size: Option<u64>,
}

impl AttachmentDescriptor {
    /// Filename for the email part.
    pub fn filename_or_default(&self) -> &str {
        self.filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or("attachment")
    }

    /// Declared content type, if non-empty.
    pub fn declared_type(&self) -> Option<&str> {
        self.content_type.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_image(&self) -> bool {
        self.declared_type()
            .is_some_and(|t| t.starts_with("image/"))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Strings as-is, numbers and booleans rendered; anything else is absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => Some(v.to_string()),
        _ => None,
    })
}

/// Non-negative integers, or strings holding one; anything else is unknown.
fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
