//! Email composition.
//!
//! The body lists every declared attachment; only image attachments whose
//! content was downloaded are embedded as binary parts.

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};

use crate::error::MailError;
use crate::pipeline::transform::ForwardableMessage;

/// A binary part embedded in the outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailPart {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A composed email, independent of any wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub subject: String,
    pub body: String,
    pub parts: Vec<EmailPart>,
}

/// Build the email for one forwardable message.
pub fn compose(message: &ForwardableMessage) -> OutboundEmail {
    OutboundEmail {
        subject: subject(message),
        body: body(message),
        parts: embedded_parts(message),
    }
}

fn subject(message: &ForwardableMessage) -> String {
    format!(
        "Signal Message from {} at {}",
        message.label(),
        message.formatted_timestamp
    )
}

fn body(message: &ForwardableMessage) -> String {
    let text = if message.text.is_empty() {
        "<no message>"
    } else {
        message.text.as_str()
    };

    let mut body = format!(
        "\nFrom: {}\nTime: {}\n\nMessage:\n{}\n\nAttachments:\n",
        message.label(),
        message.formatted_timestamp,
        text
    );

    if message.attachments.is_empty() {
        body.push_str("<no attachments>");
    } else {
        for (idx, att) in message.attachments.iter().enumerate() {
            let descriptor = &att.descriptor;
            let size = descriptor
                .size
                .map_or_else(|| "unknown".to_string(), |s| s.to_string());
            body.push_str(&format!(
                "[{}] Type: {}\n    Size: {} bytes\n",
                idx + 1,
                descriptor.declared_type().unwrap_or("unknown"),
                size
            ));
        }
    }

    body
}

fn embedded_parts(message: &ForwardableMessage) -> Vec<EmailPart> {
    message
        .attachments
        .iter()
        .filter(|att| att.descriptor.is_image())
        .filter_map(|att| {
            let content = att.content.as_ref().filter(|c| !c.is_empty())?;
            Some(EmailPart {
                filename: att.descriptor.filename_or_default().to_string(),
                content_type: att.descriptor.declared_type()?.to_string(),
                content: content.clone(),
            })
        })
        .collect()
}

impl OutboundEmail {
    /// Render as a `multipart/mixed` message: the text body first, then
    /// each embedded part as an attachment.
    pub fn to_message(&self, from: &Mailbox, to: &Mailbox) -> Result<Message, MailError> {
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(self.body.clone()));

        for part in &self.parts {
            let content_type = match ContentType::parse(&part.content_type) {
                Ok(ct) => ct,
                Err(_) => ContentType::parse("application/octet-stream")
                    .map_err(|e| MailError::Build(format!("Invalid content type: {e}")))?,
            };
            multipart = multipart.singlepart(
                Attachment::new(part.filename.clone()).body(part.content.clone(), content_type),
            );
        }

        Message::builder()
            .from(from.clone())
            .to(to.clone())
            .subject(self.subject.clone())
            .multipart(multipart)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}
