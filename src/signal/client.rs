//! HTTP client for the signal REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::error::{AttachmentError, SourceError};

/// Where pending messages and attachment bytes come from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch the pending batch for `account`. Each element is one raw
    /// message, decoded later so a single bad element cannot sink the batch.
    async fn fetch_pending(&self, account: &str) -> Result<Vec<serde_json::Value>, SourceError>;

    /// Download the content of one attachment.
    async fn fetch_attachment_content(&self, attachment_id: &str)
    -> Result<Vec<u8>, AttachmentError>;
}

/// Polls `GET {base}/v1/receive/{number}` and downloads attachments from
/// `GET {base}/v1/attachments/{id}`.
pub struct SignalClient {
    api_url: String,
    client: reqwest::Client,
}

impl SignalClient {
    /// Create a client whose every request is bounded by `timeout`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build `{base}/v1/{endpoint}/{segment}`, escaping the segment.
    fn endpoint_url(&self, endpoint: &str, segment: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.api_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|()| format!("{} cannot be a base URL", self.api_url))?
            .pop_if_empty()
            .extend(["v1", endpoint, segment]);
        Ok(url)
    }

    pub fn receive_url(&self, account: &str) -> Result<Url, SourceError> {
        self.endpoint_url("receive", account)
            .map_err(|reason| SourceError::InvalidUrl {
                url: self.api_url.clone(),
                reason,
            })
    }

    pub fn attachment_url(&self, attachment_id: &str) -> Result<Url, AttachmentError> {
        self.endpoint_url("attachments", attachment_id)
            .map_err(|reason| AttachmentError::InvalidUrl {
                id: attachment_id.to_string(),
                reason,
            })
    }
}

#[async_trait]
impl MessageSource for SignalClient {
    async fn fetch_pending(&self, account: &str) -> Result<Vec<serde_json::Value>, SourceError> {
        let url = self.receive_url(account)?;

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let messages: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        if !messages.is_empty() {
            debug!(
                "Received messages: {}",
                serde_json::to_string_pretty(&messages).unwrap_or_default()
            );
        }

        Ok(messages)
    }

    async fn fetch_attachment_content(
        &self,
        attachment_id: &str,
    ) -> Result<Vec<u8>, AttachmentError> {
        let url = self.attachment_url(attachment_id)?;
        let http_err = |e: reqwest::Error| AttachmentError::Http {
            id: attachment_id.to_string(),
            reason: e.to_string(),
        };

        let resp = self.client.get(url).send().await.map_err(http_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AttachmentError::Status {
                id: attachment_id.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}
