//! Sendmail-compatible subprocess transport (msmtp by default).
//!
//! The document is written to the child's stdin and the envelope recipients
//! are appended to the configured arguments. Exit status 0 is success.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::Envelope;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use crate::error::MailError;
use crate::mail::MailTransport;

/// Maximum stderr kept in an error, in bytes.
const MAX_STDERR_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SendmailTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Full argument list for one delivery.
    fn command_args(&self, envelope: &Envelope) -> Vec<String> {
        self.args
            .iter()
            .cloned()
            .chain(envelope.to().iter().map(ToString::to_string))
            .collect()
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn deliver(&self, envelope: &Envelope, raw_document: &[u8]) -> Result<(), MailError> {
        let mut child = Command::new(&self.program)
            .args(self.command_args(envelope))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MailError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| MailError::Spawn {
            program: self.program.clone(),
            reason: "stdin not captured".into(),
        })?;

        // A command that exits without reading its input breaks the pipe;
        // its exit status and stderr still say why.
        let result = tokio::time::timeout(self.timeout, async {
            match write_document(stdin, raw_document).await {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                written => {
                    let output = child.wait_with_output().await?;
                    Ok::<_, io::Error>((written, output))
                }
            }
        })
        .await;

        let (written, output) = match result {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => return Err(MailError::Io(e)),
            Err(_) => {
                return Err(MailError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(MailError::Exit {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: truncate_stderr(&output.stderr),
            });
        }

        // Exited cleanly but did not take the whole document.
        written.map_err(MailError::Io)
    }
}

async fn write_document(mut stdin: ChildStdin, raw_document: &[u8]) -> io::Result<()> {
    stdin.write_all(raw_document).await?;
    stdin.shutdown().await
}

/// Lossy UTF-8, trailing whitespace trimmed, cut to `MAX_STDERR_SIZE` bytes
/// on a character boundary.
fn truncate_stderr(raw: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(raw);
    let stderr = stderr.trim_end();
    if stderr.len() <= MAX_STDERR_SIZE {
        return stderr.to_string();
    }

    let mut end = MAX_STDERR_SIZE;
    while !stderr.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &stderr[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use super::*;

    /// Write an executable shell script into `dir`.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn envelope() -> Envelope {
        Envelope::new(
            Some("signal@example.com".parse().unwrap()),
            vec!["me@example.com".parse().unwrap()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn document_reaches_stdin_with_recipient_argument() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.eml");
        let args_file = dir.path().join("args");
        let fake = script(
            dir.path(),
            "fake-msmtp",
            &format!(
                "echo \"$@\" > {}\ncat > {}",
                args_file.display(),
                out.display()
            ),
        );

        let transport = SendmailTransport::new(
            fake.to_string_lossy(),
            vec!["--read-envelope-from".into()],
            Duration::from_secs(5),
        );
        transport
            .deliver(&envelope(), b"Subject: hi\r\n\r\nbody\r\n")
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(&out).unwrap(),
            b"Subject: hi\r\n\r\nbody\r\n"
        );
        assert_eq!(
            std::fs::read_to_string(&args_file).unwrap().trim(),
            "--read-envelope-from me@example.com"
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_error_with_stderr() {
        let dir = TempDir::new().unwrap();
        let fake = script(
            dir.path(),
            "failing",
            "cat > /dev/null\necho 'account not found' >&2\nexit 78",
        );
        let transport = SendmailTransport::new(fake.to_string_lossy(), vec![], Duration::from_secs(5));

        let err = transport.deliver(&envelope(), b"x").await.unwrap_err();
        match err {
            MailError::Exit { stderr, .. } => assert_eq!(stderr, "account not found"),
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_exit_keeps_status_and_stderr() {
        let dir = TempDir::new().unwrap();
        let fake = script(
            dir.path(),
            "misconfigured",
            "echo 'account default not found' >&2\nexit 78",
        );
        let transport = SendmailTransport::new(fake.to_string_lossy(), vec![], Duration::from_secs(5));

        // Larger than any pipe buffer, so the write cannot complete.
        let document = vec![b'x'; 1024 * 1024];
        let err = transport.deliver(&envelope(), &document).await.unwrap_err();
        match err {
            MailError::Exit { status, stderr, .. } => {
                assert!(status.contains("78"), "status was {status}");
                assert_eq!(stderr, "account default not found");
            }
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[test]
    fn stderr_is_cut_by_bytes_on_char_boundary() {
        let long = "é".repeat(MAX_STDERR_SIZE);
        let cut = truncate_stderr(long.as_bytes());
        let kept = cut.strip_suffix("...").unwrap();
        assert_eq!(kept.len(), MAX_STDERR_SIZE);
        assert!(kept.chars().all(|c| c == 'é'));

        assert_eq!(truncate_stderr(b"short\n"), "short");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let transport = SendmailTransport::new(
            "/nonexistent/definitely-not-msmtp",
            vec![],
            Duration::from_secs(5),
        );
        let err = transport.deliver(&envelope(), b"x").await.unwrap_err();
        assert!(matches!(err, MailError::Spawn { .. }));
    }

    #[tokio::test]
    async fn hanging_command_times_out() {
        let dir = TempDir::new().unwrap();
        let fake = script(dir.path(), "hang", "cat > /dev/null\nsleep 10");
        let transport =
            SendmailTransport::new(fake.to_string_lossy(), vec![], Duration::from_millis(200));

        let err = transport.deliver(&envelope(), b"x").await.unwrap_err();
        assert!(matches!(err, MailError::Timeout { .. }));
    }
}
