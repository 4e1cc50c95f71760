//! Configuration types.

use std::time::Duration;

use chrono::FixedOffset;
use lettre::message::Mailbox;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default interval between the end of one poll cycle and the next.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default timeout applied to every outbound HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a mail command may run before it is killed.
pub const DEFAULT_MAIL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default mail command; the destination address is appended per delivery.
pub const DEFAULT_MAIL_COMMAND: &str = "msmtp --read-envelope-from";

/// Bridge configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the signal REST API, without trailing slash.
    pub api_url: String,
    /// Signal account (phone number) whose messages are forwarded.
    pub account: String,
    /// Destination mailbox for forwarded messages.
    pub email_to: Mailbox,
    /// Sender mailbox used in the `From` header.
    pub email_from: Mailbox,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Timeout for each HTTP request to the signal API.
    pub http_timeout: Duration,
    /// Fixed offset used to render timestamps. `None` means the local zone.
    pub utc_offset: Option<FixedOffset>,
    /// How composed emails leave the process.
    pub transport: TransportConfig,
}

/// Mail transport selection.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Pipe the document into a local sendmail-compatible command.
    Sendmail {
        program: String,
        args: Vec<String>,
        timeout: Duration,
    },
    /// Relay through an SMTP server.
    Smtp(SmtpConfig),
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// STARTTLS relay when true, plaintext connection otherwise.
    pub tls: bool,
    pub timeout: Duration,
}

impl BridgeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let api_url = require("SIGNAL_API_URL")?.trim_end_matches('/').to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "SIGNAL_API_URL".into(),
                message: format!("expected an http(s) URL, got {api_url:?}"),
            });
        }

        let account = require("SIGNAL_NUMBER")?;
        let email_to = parse_mailbox("EMAIL_TO", &require("EMAIL_TO")?)?;
        let email_from = parse_mailbox("EMAIL_FROM", &require("EMAIL_FROM")?)?;

        let poll_interval = parse_secs("POLL_INTERVAL_SECS", get("POLL_INTERVAL_SECS"))?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let http_timeout = parse_secs("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let mail_timeout = parse_secs("MAIL_TIMEOUT_SECS", get("MAIL_TIMEOUT_SECS"))?
            .unwrap_or(DEFAULT_MAIL_TIMEOUT);

        let utc_offset = get("TIMESTAMP_UTC_OFFSET")
            .map(|raw| {
                raw.parse::<FixedOffset>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "TIMESTAMP_UTC_OFFSET".into(),
                        message: format!("{raw:?}: {e}"),
                    })
            })
            .transpose()?;

        let transport = match get("MAIL_TRANSPORT").as_deref().unwrap_or("sendmail") {
            "sendmail" => {
                let command = get("MAIL_COMMAND").unwrap_or_else(|| DEFAULT_MAIL_COMMAND.into());
                let mut words = command.split_whitespace().map(str::to_string);
                let program = words.next().ok_or_else(|| ConfigError::InvalidValue {
                    key: "MAIL_COMMAND".into(),
                    message: "empty command".into(),
                })?;
                TransportConfig::Sendmail {
                    program,
                    args: words.collect(),
                    timeout: mail_timeout,
                }
            }
            "smtp" => {
                let host = get("SMTP_HOST").ok_or_else(|| ConfigError::MissingRequired {
                    key: "SMTP_HOST".into(),
                    hint: "Required when MAIL_TRANSPORT=smtp".into(),
                })?;
                let port = match get("SMTP_PORT") {
                    Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                        key: "SMTP_PORT".into(),
                        message: format!("{raw:?}: {e}"),
                    })?,
                    None => 587,
                };
                let tls = match get("SMTP_TLS").as_deref() {
                    None | Some("true" | "1" | "yes") => true,
                    Some("false" | "0" | "no") => false,
                    Some(other) => {
                        return Err(ConfigError::InvalidValue {
                            key: "SMTP_TLS".into(),
                            message: format!("expected true or false, got {other:?}"),
                        });
                    }
                };
                TransportConfig::Smtp(SmtpConfig {
                    host,
                    port,
                    username: get("SMTP_USERNAME"),
                    password: get("SMTP_PASSWORD").map(SecretString::from),
                    tls,
                    timeout: mail_timeout,
                })
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "MAIL_TRANSPORT".into(),
                    message: format!("expected sendmail or smtp, got {other:?}"),
                });
            }
        };

        Ok(Self {
            api_url,
            account,
            email_to,
            email_from,
            poll_interval,
            http_timeout,
            utc_offset,
            transport,
        })
    }
}

fn parse_mailbox(key: &str, raw: &str) -> Result<Mailbox, ConfigError> {
    raw.parse::<Mailbox>().map_err(|e| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("{raw:?}: {e}"),
    })
}

/// Parse a positive number of seconds.
fn parse_secs(key: &str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
