//! Console driver: bridges the local terminal to a session
//!
//! A background task reads stdin and hands chunks to the driver through a
//! channel, so the event loop never blocks on the terminal. Peer bytes go
//! straight to stdout.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::drivers::SessionDriver;

const READ_CHUNK: usize = 2048;

pub struct ConsoleDriver {
    stdout: tokio::io::Stdout,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
    eof: bool,
    closed: bool,
}

impl ConsoleDriver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) => {
                        log::debug!("stdin reached EOF");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            stdout: tokio::io::stdout(),
            incoming: rx,
            pending: VecDeque::new(),
            eof: false,
            closed: false,
        }
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

impl Default for ConsoleDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionDriver for ConsoleDriver {
    async fn data_received(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        if let Err(e) = self.stdout.write_all(data).await {
            log::error!("stdout write failed: {}", e);
            self.closed = true;
            return;
        }
        if let Err(e) = self.stdout.flush().await {
            log::error!("stdout flush failed: {}", e);
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
        let _ = self.stdout.flush().await;
        self.closed = true;
    }

    fn is_shutdown(&self) -> bool {
        self.closed || (self.eof && self.pending.is_empty())
    }
}
