//! Standard I/O transport
//!
//! Spawns the node process and exchanges envelopes over its stdin/stdout.
//! Lines the node writes to stderr are surfaced as `stderr` events.

use super::{Wire, WireSink, WireSource};
use crate::broker::categories;
use crate::error::{BackendError, BackendResult};
use crate::protocol::{Inbound, Outbound, decode_inbound, encode_outbound};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Factory for process-backed wires
pub struct StdioTransport;

impl StdioTransport {
    /// Spawn `program` with `args` and wire up its standard streams
    pub async fn spawn(
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        close_grace: Duration,
    ) -> BackendResult<Wire> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::launch(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::launch("failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::launch("failed to get stdout handle"))?;

        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stderr_tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        debug!("Spawned '{}' with PID {:?}", program, child.id());

        let sink = StdioSink {
            child: Some(child),
            stdin: Some(stdin),
            close_grace,
        };
        let source = StdioSource {
            stdout: BufReader::new(stdout).lines(),
            stderr: stderr_rx,
        };
        Ok(Wire::new(Box::new(sink), Box::new(source)))
    }
}

struct StdioSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    close_grace: Duration,
}

#[async_trait]
impl WireSink for StdioSink {
    async fn send(&mut self, message: &Outbound) -> BackendResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BackendError::connection_closed("stdin already closed"))?;

        let line = encode_outbound(message)?;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write
            .await
            .map_err(|e| BackendError::transport(e.to_string()))
    }

    async fn close(&mut self) -> BackendResult<()> {
        // Closing stdin lets the bridge stop the node on its own
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                result = child.wait() => {
                    let status = result.map_err(|e| BackendError::transport(e.to_string()))?;
                    debug!("Node process exited with {}", status);
                }
                _ = tokio::time::sleep(self.close_grace) => {
                    warn!("Node process did not exit within {:?}, killing it", self.close_grace);
                    child.kill().await.ok();
                }
            }
        }
        Ok(())
    }
}

impl Drop for StdioSink {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

struct StdioSource {
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WireSource for StdioSource {
    async fn receive(&mut self) -> BackendResult<Option<Inbound>> {
        loop {
            tokio::select! {
                line = self.stdout.next_line() => {
                    let line = line.map_err(|e| BackendError::transport(e.to_string()))?;
                    return match line {
                        Some(line) if line.trim().is_empty() => continue,
                        Some(line) => decode_inbound(&line).map(Some),
                        None => Ok(None),
                    };
                }
                Some(text) = self.stderr.recv() => {
                    return Ok(Some(Inbound::event(categories::STDERR, json!(text))));
                }
            }
        }
    }
}
