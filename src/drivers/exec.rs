//! Exec driver: bridges a child process to a session
//!
//! The configured command runs under `sh -c` with stdin/stdout piped. A
//! background task pumps the child's stdout into a channel; peer bytes go
//! to the child's stdin. When the child exits, the driver drains and the
//! session tears down.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::drivers::SessionDriver;

const READ_CHUNK: usize = 2048;

pub struct ExecDriver {
    child: Child,
    stdin: Option<ChildStdin>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
    eof: bool,
    closed: bool,
}

impl ExecDriver {
    pub fn spawn(command: &str) -> std::io::Result<Self> {
        log::info!("spawning process: {}", command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let mut stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "child stdout was not piped")
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        log::debug!("child stdout reached EOF");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("child stdout read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            stdin,
            incoming: rx,
            pending: VecDeque::new(),
            eof: false,
            closed: false,
        })
    }

    fn drain_channel(&mut self) {
        loop {
            match self.incoming.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl SessionDriver for ExecDriver {
    async fn data_received(&mut self, data: &[u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(e) = stdin.write_all(data).await {
            log::error!("child stdin write failed: {}", e);
            self.stdin = None;
        }
    }

    fn get_outgoing(&mut self, max: usize) -> Option<Vec<u8>> {
        self.drain_channel();
        if self.pending.is_empty() {
            return None;
        }

        let take = max.min(self.pending.len());
        let out: Vec<u8> = self.pending.drain(..take).collect();
        Some(out)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            log::debug!("child already gone: {}", e);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.closed || (self.eof && self.pending.is_empty())
    }
}
