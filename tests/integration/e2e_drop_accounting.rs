//! When the egress chain fills up, whole messages are dropped from the
//! oldest chunk and the dropped byte count is exact: never more, never
//! less than what was actually discarded.

use oml_client::{Egress, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;

#[derive(Default)]
struct BlackHoleTransport {
    refuse: Arc<AtomicU64>,
}

impl Transport for BlackHoleTransport {
    async fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        self.refuse.fetch_add(1, Ordering::SeqCst);
        Err(std::io::Error::other("transport permanently unavailable"))
    }

    async fn reconnect(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::other("transport permanently unavailable"))
    }
}

#[tokio::test]
async fn full_chain_drops_whole_messages_and_counts_them_exactly() {
    let transport = BlackHoleTransport::default();
    // Small chain: three 10-byte messages can't all fit, forcing at least
    // one full chunk eviction.
    let egress = Egress::spawn(20, 10, transport);

    egress.push(&[1u8; 10]).await;
    egress.push(&[2u8; 10]).await;
    egress.push(&[3u8; 10]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let dropped = egress.total_dropped_bytes();
    assert!(dropped > 0, "expected the full chain to evict at least one message");
    assert_eq!(dropped % 10, 0, "drops must happen on whole-message boundaries, never partial");

    egress.close().await;
}

#[tokio::test]
async fn chunk_chain_advance_outcome_reports_exact_dropped_bytes() {
    use oml_buffer::ChunkChain;

    let mut chain = ChunkChain::new(16, 8);
    chain.begin_message();
    let first = chain.append(&[9u8; 8]).unwrap();
    chain.consume_message();
    assert_eq!(first.dropped_bytes, 0);

    chain.begin_message();
    let second = chain.append(&[9u8; 8]).unwrap();
    chain.consume_message();
    assert_eq!(second.dropped_bytes, 0);

    chain.begin_message();
    let third = chain.append(&[9u8; 8]).unwrap();
    chain.consume_message();
    assert_eq!(third.dropped_bytes, 8, "the oldest 8-byte chunk must be evicted whole");
}
