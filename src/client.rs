//! The external sync client, run as a black box.
//!
//! stdin is closed so the client can never wait for interactive input.
//! stdout and stderr are merged line by line in arrival order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::SyncConfig;

/// What a client run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRun {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Run the client to completion. `Err` means it could not be run at all.
    async fn run(&self) -> Result<ClientRun>;
}

pub struct ExternalSyncClient {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ExternalSyncClient {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.client.clone(), config.client_args(), config.timeout)
    }
}

#[async_trait]
impl SyncClient for ExternalSyncClient {
    async fn run(&self) -> Result<ClientRun> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn sync client `{}`", self.program))?;

        tracing::debug!(pid = child.id().unwrap_or(0), program = %self.program, "sync client started");

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stdout = child.stdout.take().context("Failed to get client stdout")?;
        let stderr = child.stderr.take().context("Failed to get client stderr")?;
        let readers = [
            tokio::spawn(forward_lines(stdout, tx.clone())),
            tokio::spawn(forward_lines(stderr, tx)),
        ];

        // Lines received so far survive a timeout.
        let mut output = String::new();
        let collect = async {
            while let Some(line) = rx.recv().await {
                output.push_str(&line);
                output.push('\n');
            }
            child.wait().await
        };

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(status) => status,
                Err(_) => {
                    for reader in &readers {
                        reader.abort();
                    }
                    while let Ok(line) = rx.try_recv() {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(error = %e, "failed to kill sync client");
                    }
                    tracing::info!(timeout_secs = limit.as_secs(), "sync client timed out");
                    output.push_str(&format!(
                        "synctick: sync client killed after {} s timeout\n",
                        limit.as_secs()
                    ));
                    return Ok(ClientRun {
                        success: false,
                        exit_code: None,
                        output,
                    });
                }
            },
            None => collect.await,
        };
        let status = status.context("Failed to wait for sync client")?;

        Ok(ClientRun {
            success: status.success(),
            exit_code: status.code(),
            output,
        })
    }
}

/// Forwards each line, decoded lossily, until EOF. Keeps draining the pipe
/// even when the receiver is gone so the client never hits a closed pipe.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read sync client output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ExternalSyncClient {
        ExternalSyncClient::new("sh", vec!["-c".into(), script.into()], None)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let run = sh("echo out; echo err >&2; exit 0").run().await.unwrap();
        assert!(run.success);
        assert_eq!(run.exit_code, Some(0));
        assert!(run.output.contains("out\n"));
        assert!(run.output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let run = sh("echo 'Authentication required' >&2; exit 3")
            .run()
            .await
            .unwrap();
        assert!(!run.success);
        assert_eq!(run.exit_code, Some(3));
        assert!(run.output.contains("Authentication required"));
    }

    #[tokio::test]
    async fn test_stdin_is_closed() {
        let run = sh("if read line; then echo got-input; else echo no-input; fi")
            .run()
            .await
            .unwrap();
        assert!(run.output.contains("no-input"));
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let client = ExternalSyncClient::new("/nonexistent/sync-client", vec![], None);
        assert!(client.run().await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_kills_client() {
        let client = ExternalSyncClient::new(
            "sh",
            vec!["-c".into(), "sleep 30".into()],
            Some(Duration::from_secs(1)),
        );
        let started = std::time::Instant::now();
        let run = client.run().await.unwrap();
        assert!(!run.success);
        assert_eq!(run.exit_code, None);
        assert!(run.output.contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_timeout_keeps_output_so_far() {
        let client = ExternalSyncClient::new(
            "sh",
            vec!["-c".into(), "echo before-hang; sleep 30".into()],
            Some(Duration::from_secs(1)),
        );
        let run = client.run().await.unwrap();
        assert!(!run.success);
        assert!(run.output.starts_with("before-hang\n"));
        assert!(run.output.ends_with("killed after 1 s timeout\n"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_capture() {
        let run = sh(
            "printf 'bad \\377 name\\n'; sleep 0.2; \
             i=0; while [ $i -lt 5000 ]; do echo line $i; i=$((i+1)); done; exit 0",
        )
        .run()
        .await
        .unwrap();
        assert!(run.success);
        assert_eq!(run.exit_code, Some(0));
        assert!(run.output.contains("bad \u{FFFD} name\n"));
        assert!(run.output.contains("line 4999\n"));
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_last_line() {
        let run = sh("printf 'one\\r\\ntwo'").run().await.unwrap();
        assert_eq!(run.output, "one\ntwo\n");
    }
}
