//! Face detector sidecar client.
//!
//! The detector model runs in a separate process. It prints `ready` once the
//! model is loaded, then answers each `detect <seq>` line on stdin with one
//! JSON batch line on stdout. A sidecar that echoes `"seq"` in its answer has
//! late replies to timed-out requests discarded; answers without it are taken
//! as they come. A background task forwards stdout lines so a request can be
//! timed out without losing the reader.

use greeter_core::DetectionBatch;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector command is empty")]
    EmptyCommand,
    #[error("failed to spawn detector {command:?}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("detector I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector protocol error: {0}")]
    Protocol(String),
    #[error("detector did not answer within {0:?}")]
    Timeout(Duration),
    #[error("detector process exited")]
    Exited,
}

/// Source of detection batches.
pub trait Detector: Send {
    /// True once the detector can answer requests.
    fn ready(&self) -> bool;

    /// Run one detection. Callers never overlap calls on the same detector.
    fn detect(&mut self) -> impl Future<Output = Result<DetectionBatch, DetectorError>> + Send;
}

/// Detector backed by a long-running sidecar process.
pub struct CommandDetector {
    _child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<String>,
    ready: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    timeout: Duration,
    seq: u64,
}

impl CommandDetector {
    /// Spawn `command` (program and whitespace-separated arguments).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(command: &str, timeout: Duration) -> Result<Self, DetectorError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(DetectorError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DetectorError::Protocol("detector stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DetectorError::Protocol("detector stdout unavailable".into()))?;

        let ready = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let (tx, lines) = mpsc::channel(16);
        tokio::spawn(forward_lines(stdout, tx, ready.clone(), exited.clone()));

        tracing::info!(command, pid = ?child.id(), "detector sidecar spawned");

        Ok(Self {
            _child: child,
            stdin,
            lines,
            ready,
            exited,
            timeout,
            seq: 0,
        })
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

impl Detector for CommandDetector {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn detect(&mut self) -> Result<DetectionBatch, DetectorError> {
        if self.has_exited() {
            return Err(DetectorError::Exited);
        }

        // Answers that arrived after an earlier timeout belong to old requests.
        while let Ok(stale) = self.lines.try_recv() {
            tracing::debug!(line = %stale, "discarding stale detector output");
        }

        self.seq += 1;
        let seq = self.seq;
        self.stdin
            .write_all(format!("detect {seq}\n").as_bytes())
            .await?;
        self.stdin.flush().await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let line = match tokio::time::timeout_at(deadline, self.lines.recv()).await {
                Err(_) => return Err(DetectorError::Timeout(self.timeout)),
                Ok(None) => return Err(DetectorError::Exited),
                Ok(Some(line)) => line,
            };
            let (answered, batch) = parse_answer(&line)?;
            match answered {
                Some(answered) if answered != seq => {
                    tracing::debug!(answered, expected = seq, "discarding late detector answer");
                }
                _ => return Ok(batch),
            }
        }
    }
}

/// Parse one batch line from the sidecar.
pub fn parse_batch(line: &str) -> Result<DetectionBatch, DetectorError> {
    parse_answer(line).map(|(_, batch)| batch)
}

/// Parse one answer line, returning the echoed request number if present.
fn parse_answer(line: &str) -> Result<(Option<u64>, DetectionBatch), DetectorError> {
    let protocol = |e: serde_json::Error| DetectorError::Protocol(format!("{e}: {line:?}"));
    let value: serde_json::Value = serde_json::from_str(line).map_err(protocol)?;
    let seq = value.get("seq").and_then(serde_json::Value::as_u64);
    let batch = serde_json::from_value(value).map_err(protocol)?;
    Ok((seq, batch))
}

async fn forward_lines(
    stdout: ChildStdout,
    tx: mpsc::Sender<String>,
    ready: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "ready" {
                    if !ready.swap(true, Ordering::SeqCst) {
                        tracing::info!("detector ready");
                    }
                    continue;
                }
                if tx.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "reading detector output failed");
                break;
            }
        }
    }
    ready.store(false, Ordering::SeqCst);
    exited.store(true, Ordering::SeqCst);
    tracing::warn!("detector sidecar output closed");
}
