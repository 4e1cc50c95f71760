//! SMTP relay transport via lettre.

use async_trait::async_trait;
use lettre::Transport;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::mail::MailTransport;

pub struct SmtpTransport {
    host: String,
    transport: lettre::SmtpTransport,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.tls {
            lettre::SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| MailError::Smtp(format!("SMTP relay error: {e}")))?
        } else {
            lettre::SmtpTransport::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port).timeout(Some(config.timeout));

        if let Some(username) = &config.username {
            let password = config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            host: config.host.clone(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, envelope: &Envelope, raw_document: &[u8]) -> Result<(), MailError> {
        let transport = self.transport.clone();
        let envelope = envelope.clone();
        let document = raw_document.to_vec();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || transport.send_raw(&envelope, &document))
            .await
            .map_err(|e| MailError::Smtp(format!("SMTP task panicked: {e}")))?
            .map_err(|e| MailError::Smtp(format!("SMTP send via {} failed: {e}", self.host)))?;

        Ok(())
    }
}
