use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use oml_buffer::ChunkChain;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

/// What the egress worker writes bytes to. Implemented over a real TCP
/// connection in production and a fault-injecting stub in tests.
pub trait Transport: Send {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = std::io::Result<usize>> + Send;
    fn reconnect(&mut self) -> impl Future<Output = std::io::Result<()>> + Send;
}

struct Shared {
    chain: Mutex<ChunkChain>,
    meta: Mutex<Vec<u8>>,
    notify: Notify,
    dropped_bytes: AtomicU64,
    closing: AtomicBool,
}

/// A non-blocking, self-draining FIFO fronting one transport connection.
/// Producers call [`Egress::push`]/[`Egress::push_meta`] and return
/// immediately; a background worker drains buffered bytes to the
/// transport, backing off on write failures and reconnecting.
pub struct Egress {
    shared: Arc<Shared>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Egress {
    /// `capacity_bytes` is the chunk chain's total byte budget, and
    /// `chunk_target_size` the size each chunk rotates at.
    pub fn spawn<T>(capacity_bytes: usize, chunk_target_size: usize, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        let shared = Arc::new(Shared {
            chain: Mutex::new(ChunkChain::new(capacity_bytes, chunk_target_size)),
            meta: Mutex::new(Vec::new()),
            notify: Notify::new(),
            dropped_bytes: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        });
        let worker = tokio::spawn(run_worker(shared.clone(), transport));
        Egress {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Appends one complete message to the data chain and wakes the worker.
    pub async fn push(&self, bytes: &[u8]) {
        let mut chain = self.shared.chain.lock().await;
        chain.begin_message();
        let outcome = chain.append(bytes);
        chain.consume_message();
        if let Ok(outcome) = outcome {
            if outcome.dropped_bytes > 0 {
                self.shared
                    .dropped_bytes
                    .fetch_add(outcome.dropped_bytes as u64, Ordering::Relaxed);
                warn!(dropped_bytes = outcome.dropped_bytes, "egress chain full, dropping oldest chunk");
            }
        }
        drop(chain);
        self.shared.notify.notify_one();
    }

    /// Appends to the sidecar buffer that's fully re-sent every time the
    /// transport reconnects (so headers precede data after a reconnect).
    pub async fn push_meta(&self, bytes: &[u8]) {
        self.shared.meta.lock().await.extend_from_slice(bytes);
        self.shared.notify.notify_one();
    }

    pub fn total_dropped_bytes(&self) -> u64 {
        self.shared.dropped_bytes.load(Ordering::Relaxed)
    }

    /// Signals shutdown and waits for the worker to drain remaining data
    /// and exit.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

const MAX_BACKOFF_SECS: u64 = 255;

async fn run_worker<T: Transport>(shared: Arc<Shared>, mut transport: T) {
    let mut backoff_secs: u64 = 0;
    let mut last_failure: Option<Instant> = None;
    let mut connected_once = false;
    let mut needs_reconnect_resend = true;

    loop {
        if let Some(failure_at) = last_failure {
            let remaining = Duration::from_secs(backoff_secs).saturating_sub(Instant::now().duration_since(failure_at));
            if !remaining.is_zero() {
                tokio::select! {
                    () = shared.notify.notified() => {}
                    () = tokio::time::sleep(remaining) => {}
                }
            }
        } else {
            shared.notify.notified().await;
        }

        loop {
            if let Some(failure_at) = last_failure {
                if Instant::now().duration_since(failure_at) < Duration::from_secs(backoff_secs) {
                    break;
                }
            }

            if needs_reconnect_resend {
                match transport.reconnect().await {
                    Ok(()) => {}
                    Err(_) => {
                        record_failure(&mut backoff_secs, &mut last_failure);
                        break;
                    }
                }
                let meta = shared.meta.lock().await.clone();
                if !meta.is_empty() && transport.write(&meta).await.is_err() {
                    record_failure(&mut backoff_secs, &mut last_failure);
                    break;
                }
                needs_reconnect_resend = false;
            }

            match drain_one_round(&shared, &mut transport).await {
                Ok(wrote_any) => {
                    if wrote_any || !connected_once {
                        if backoff_secs > 0 || !connected_once {
                            info!("connected");
                        }
                        connected_once = true;
                    }
                    backoff_secs = 0;
                    last_failure = None;
                }
                Err(()) => {
                    needs_reconnect_resend = true;
                    record_failure(&mut backoff_secs, &mut last_failure);
                    break;
                }
            }

            if shared.closing.load(Ordering::SeqCst) && chain_is_empty(&shared).await {
                return;
            }
            if !chain_has_unread(&shared).await {
                break;
            }
        }

        if shared.closing.load(Ordering::SeqCst) && chain_is_empty(&shared).await {
            return;
        }
    }
}

fn record_failure(backoff_secs: &mut u64, last_failure: &mut Option<Instant>) {
    *backoff_secs = (*backoff_secs * 2).max(1).min(MAX_BACKOFF_SECS);
    *last_failure = Some(Instant::now());
}

async fn chain_is_empty(shared: &Shared) -> bool {
    let mut chain = shared.chain.lock().await;
    chain.next_chunk_to_drain().is_none()
}

async fn chain_has_unread(shared: &Shared) -> bool {
    let mut chain = shared.chain.lock().await;
    chain.next_chunk_to_drain().is_some()
}

/// Drains whatever is currently available, one chunk at a time, stopping
/// once the reader would catch up to the writer. Returns `Ok(true)` if any
/// bytes were written, `Ok(false)` if there was nothing to send, and
/// `Err(())` on the first write failure (the chunk's read cursor is
/// rewound to its last committed message-start so the retry resends the
/// incomplete message from the top).
async fn drain_one_round<T: Transport>(shared: &Shared, transport: &mut T) -> Result<bool, ()> {
    let mut wrote_any = false;
    loop {
        let slot = {
            let mut chain = shared.chain.lock().await;
            match chain.next_chunk_to_drain() {
                Some(slot) => slot,
                None => return Ok(wrote_any),
            }
        };

        loop {
            let mut chain = shared.chain.lock().await;
            if chain.drain_slot_exhausted(slot) {
                chain.finish_draining(slot);
                break;
            }
            let mbuf = chain.chunk_mbuf(slot);
            let available = mbuf.available();
            if available == 0 {
                chain.finish_draining(slot);
                break;
            }
            let bytes = mbuf.peek(available).expect("checked availability above").to_vec();
            drop(chain);

            match transport.write(&bytes).await {
                Ok(0) => return Ok(wrote_any),
                Ok(n) => {
                    let mut chain = shared.chain.lock().await;
                    chain.chunk_mbuf(slot).read(n).expect("n bytes were available to read");
                    wrote_any = true;
                }
                Err(_) => {
                    let mut chain = shared.chain.lock().await;
                    chain.chunk_mbuf(slot).reset_read();
                    return Err(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        written: Arc<StdMutex<Vec<u8>>>,
        fail_writes: Arc<AtomicU64>,
    }

    impl Transport for RecordingTransport {
        async fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail_writes.load(Ordering::SeqCst) > 0 {
                self.fail_writes.fetch_sub(1, Ordering::SeqCst);
                return Err(std::io::Error::other("injected failure"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn reconnect(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pushed_bytes_are_delivered_to_the_transport() {
        let written = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            written: written.clone(),
            fail_writes: Arc::new(AtomicU64::new(0)),
        };
        let egress = Egress::spawn(4096, 1024, transport);
        egress.push(b"hello").await;
        egress.close().await;
        assert_eq!(&*written.lock().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn full_chain_drops_and_counts_bytes() {
        let written = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            written: written.clone(),
            fail_writes: Arc::new(AtomicU64::new(u64::MAX)),
        };
        let egress = Egress::spawn(20, 10, transport);
        egress.push(&[1u8; 10]).await;
        egress.push(&[2u8; 10]).await;
        egress.push(&[3u8; 10]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(egress.total_dropped_bytes() > 0);
        egress.close().await;
    }
}
