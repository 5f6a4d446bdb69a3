//! Ping driver: liveness probe
//!
//! Produces one burst of random ASCII data; the server is expected to
//! echo it back verbatim. A matching echo proves the whole path works:
//! resolver, authoritative server, and tunnel decoding.

use async_trait::async_trait;
use rand::Rng;

use crate::drivers::SessionDriver;

const PING_DATA_LEN: usize = 16;

pub struct PingDriver {
    data: String,
    sent: bool,
    done: bool,
}

impl PingDriver {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let data: String = (0..PING_DATA_LEN)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();

        Self {
            data,
            sent: false,
            done: false,
        }
    }
}

impl Default for PingDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionDriver for PingDriver {
    async fn data_received(&mut self, data: &[u8]) {
        if data == self.data.as_bytes() {
            log::info!("ping response matched, the tunnel is up");
            eprintln!("Ping response received! This tunnel seems good.");
        } else {
            log::warn!(
                "ping response did not match: sent {:?}, got {:?}",
                self.data,
                String::from_utf8_lossy(data)
            );
        }
        self.done = true;
    }

    fn get_outgoing(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.sent || max < self.data.len() {
            return None;
        }
        self.sent = true;
        Some(self.data.clone().into_bytes())
    }

    async fn close(&mut self) {
        self.done = true;
    }

    fn is_shutdown(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_completes_the_probe() {
        tokio_test::block_on(async {
            let mut driver = PingDriver::new();
            assert!(!driver.is_shutdown());

            let probe = driver.get_outgoing(64).unwrap();
            assert_eq!(probe.len(), PING_DATA_LEN);
            // Only one burst.
            assert!(driver.get_outgoing(64).is_none());

            driver.data_received(&probe).await;
            assert!(driver.is_shutdown());
        });
    }

    #[test]
    fn mismatched_echo_still_finishes() {
        tokio_test::block_on(async {
            let mut driver = PingDriver::new();
            let _ = driver.get_outgoing(64).unwrap();
            driver.data_received(b"not the probe").await;
            assert!(driver.is_shutdown());
        });
    }
}
