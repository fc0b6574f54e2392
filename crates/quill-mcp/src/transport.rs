//! Process transport: owns one child process and frames its stdio.
//!
//! Spawns the resolved command and runs background reader/writer tasks. The
//! reader pushes raw stdout chunks through a [`ReadBuffer`] and emits one
//! [`TransportEvent::Message`] per framed message, in stream order. The
//! final event is always `Closed`.

use crate::error::McpError;
use crate::framing::{self, ReadBuffer};
use crate::launch::ResolvedCommand;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

/// Events emitted by a transport. `Closed` is emitted exactly once, last;
/// no `Message` follows it.
#[derive(Debug)]
pub enum TransportEvent {
    /// One framed protocol message, in arrival order.
    Message(serde_json::Value),
    /// A runtime error on the stream.
    Error(McpError),
    /// The process exited, expectedly or not.
    Closed,
}

/// Async stdio transport for one tool-server child process.
#[derive(Debug)]
pub struct ProcessTransport {
    write_tx: mpsc::Sender<String>,
    child: Arc<Mutex<Option<Child>>>,
    closed: AtomicBool,
}

impl ProcessTransport {
    /// Spawn the child process and start the reader/writer tasks.
    ///
    /// Environment contract: an empty override set inherits the full parent
    /// environment; a non-empty set passes exactly those variables and
    /// nothing else.
    pub fn spawn(
        resolved: &ResolvedCommand,
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        let mut cmd = Command::new(&resolved.program);
        cmd.args(&resolved.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !env.is_empty() {
            cmd.env_clear().envs(env);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: resolved.program.clone(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // Writer task: drains the channel and writes pre-framed lines.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = write_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Stderr is not part of the protocol; drain it into the log.
        let program = resolved.program.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("[{} stderr] {}", program, line);
            }
        });

        // Reader task: raw chunks through the frame buffer, then events.
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = ReadBuffer::new();
            let mut chunk = [0u8; 4096];
            'read: loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.append(&chunk[..n]);
                        loop {
                            match buf.read_next() {
                                Ok(Some(message)) => {
                                    if event_tx
                                        .send(TransportEvent::Message(message))
                                        .await
                                        .is_err()
                                    {
                                        // Receiver gone; nothing left to do.
                                        return;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    tracing::warn!("dropping malformed line: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.into())).await;
                        break 'read;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                write_tx,
                child: Arc::new(Mutex::new(Some(child))),
                closed: AtomicBool::new(false),
            },
            event_rx,
        ))
    }

    /// Serialize and write one message to the process's stdin.
    pub async fn send(&self, message: &serde_json::Value) -> Result<(), McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::NotConnected);
        }
        let line = framing::serialize(message)?;
        self.write_tx
            .send(line)
            .await
            .map_err(|_| McpError::NotConnected)
    }

    /// Force-terminate the process. Idempotent; never fails — a kill error
    /// is logged, and the process is reaped by `kill_on_drop` regardless.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill child process: {}", e);
            }
        }
    }
}
