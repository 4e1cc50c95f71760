//! Outbound mail: the `MailTransport` seam and the `Mailer` that renders
//! composed emails and hands them over.

pub mod sendmail;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::message::Mailbox;
use tracing::error;

use crate::config::TransportConfig;
use crate::error::MailError;
use crate::pipeline::compose::OutboundEmail;

pub use sendmail::SendmailTransport;
pub use smtp::SmtpTransport;

/// Something that accepts a fully serialized email and delivers it.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, envelope: &Envelope, raw_document: &[u8]) -> Result<(), MailError>;
}

/// Create the transport selected by configuration.
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    let transport: Arc<dyn MailTransport> = match config {
        TransportConfig::Sendmail {
            program,
            args,
            timeout,
        } => Arc::new(SendmailTransport::new(
            program.clone(),
            args.clone(),
            *timeout,
        )),
        TransportConfig::Smtp(smtp) => Arc::new(SmtpTransport::new(smtp)?),
    };
    Ok(transport)
}

/// Renders `OutboundEmail`s with fixed sender and recipient and delivers
/// them through a transport.
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    from: Mailbox,
    to: Mailbox,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, from: Mailbox, to: Mailbox) -> Self {
        Self {
            transport,
            from,
            to,
        }
    }

    /// Render and deliver. Failures are logged and reported as `false`.
    pub async fn send(&self, email: &OutboundEmail) -> bool {
        match self.try_send(email).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send email: {e}");
                false
            }
        }
    }

    async fn try_send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = email.to_message(&self.from, &self.to)?;
        self.transport
            .deliver(message.envelope(), &message.formatted())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records deliveries; fails when `fail` is set.
    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        delivered: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(
            &self,
            envelope: &Envelope,
            raw_document: &[u8],
        ) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Exit {
                    program: "msmtp".into(),
                    status: "exit status: 1".into(),
                    stderr: String::new(),
                });
            }
            let to = envelope.to().iter().map(ToString::to_string).collect();
            self.delivered
                .lock()
                .unwrap()
                .push((to, raw_document.to_vec()));
            Ok(())
        }
    }

    fn email() -> OutboundEmail {
        OutboundEmail {
            subject: "Signal Message from +1 at 2023-11-14 22:13:20".into(),
            body: "\nFrom: +1\n".into(),
            parts: vec![],
        }
    }

    fn mailer(transport: Arc<RecordingTransport>) -> Mailer {
        Mailer::new(
            transport,
            "signal@example.com".parse().unwrap(),
            "me@example.com".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn send_delivers_to_destination() {
        let transport = Arc::new(RecordingTransport::default());
        assert!(mailer(Arc::clone(&transport)).send(&email()).await);

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, vec!["me@example.com".to_string()]);
        let raw = String::from_utf8_lossy(&delivered[0].1);
        assert!(raw.contains("Subject: Signal Message from +1 at 2023-11-14 22:13:20"));
    }

    #[tokio::test]
    async fn transport_failure_reports_false() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        assert!(!mailer(transport).send(&email()).await);
    }

    #[test]
    fn sendmail_config_creates_transport() {
        let config = TransportConfig::Sendmail {
            program: "msmtp".into(),
            args: vec!["--read-envelope-from".into()],
            timeout: std::time::Duration::from_secs(60),
        };
        assert!(create_transport(&config).is_ok());
    }
}
