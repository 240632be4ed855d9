use crate::chunk::BufferChunk;
use crate::mbuf::{BufferError, MBuffer};

/// Result of an [`ChunkChain::append`] call that may have had to rotate (and
/// possibly drop) a chunk to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Bytes discarded because the chain was full and the reader hadn't
    /// caught up. Zero on the common path.
    pub dropped_bytes: usize,
}

/// A circular chain of [`BufferChunk`]s with a writer cursor and a lagging
/// reader cursor.
///
/// Modeled as an arena of chunk slots plus an integer adjacency list
/// (`next[slot] -> slot`) rather than a raw-pointer circular linked list
/// with a "reading" flag: the writer-advance rule becomes plain index
/// comparisons, and the "currently draining" exclusion is one `Option<usize>`
/// instead of a mutable flag shared with the reader thread.
pub struct ChunkChain {
    arena: Vec<BufferChunk>,
    next: Vec<usize>,
    writer: usize,
    reader: usize,
    /// Slot id the worker currently has checked out for draining, if any.
    /// The writer must never overwrite this slot (§4.3: "forbidden on the
    /// chunk the reader is currently draining").
    draining: Option<usize>,
    target_size: usize,
    capacity_bytes: usize,
    total_dropped_bytes: u64,
}

impl ChunkChain {
    /// `initial_chunks = max(2, capacity_bytes / chunk_target_size)` (§4.3).
    pub fn new(capacity_bytes: usize, chunk_target_size: usize) -> Self {
        let chunk_target_size = chunk_target_size.max(1);
        let initial_chunks = (capacity_bytes / chunk_target_size).max(2);
        let arena: Vec<BufferChunk> = (0..initial_chunks)
            .map(|_| BufferChunk::new(chunk_target_size))
            .collect();
        let next: Vec<usize> = (0..initial_chunks).map(|i| (i + 1) % initial_chunks).collect();
        ChunkChain {
            arena,
            next,
            writer: 0,
            reader: 0,
            draining: None,
            target_size: chunk_target_size,
            capacity_bytes,
            total_dropped_bytes: 0,
        }
    }

    pub fn total_dropped_bytes(&self) -> u64 {
        self.total_dropped_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.arena.len()
    }

    fn writer_mbuf_mut(&mut self) -> &mut MBuffer {
        &mut self.arena[self.writer].mbuf
    }

    /// Marks the start of a message the caller is about to write in pieces
    /// via repeated [`ChunkChain::append`] calls.
    pub fn begin_message(&mut self) {
        self.writer_mbuf_mut().begin_write_message();
    }

    /// Commits the just-completed message: no partial tail remains pending
    /// in the writer chunk.
    pub fn consume_message(&mut self) {
        self.writer_mbuf_mut().consume_message();
    }

    /// Appends `bytes` to the current write chunk, rotating to (and
    /// possibly allocating or overwriting) the next chunk first if the
    /// append would exceed this chunk's target size.
    pub fn append(&mut self, bytes: &[u8]) -> Result<AdvanceOutcome, BufferError> {
        let dropped = if self.arena[self.writer].would_exceed(bytes.len()) {
            self.advance()?
        } else {
            0
        };
        self.writer_mbuf_mut().write(bytes)?;
        Ok(AdvanceOutcome {
            dropped_bytes: dropped,
        })
    }

    /// Chunk-advance rule (§4.3): reuse the next chunk if the reader has
    /// drained it; else allocate a new one and splice it in if the chain
    /// has room; else overwrite the next chunk, dropping its contents.
    fn advance(&mut self) -> Result<usize, BufferError> {
        let old = self.writer;
        let next_id = self.next[old];

        let (new_writer, dropped_bytes) = if self.arena[next_id].mbuf.is_empty() {
            self.arena[next_id].reset();
            (next_id, 0)
        } else if self.arena.len() * self.target_size < self.capacity_bytes {
            let new_id = self.arena.len();
            self.arena.push(BufferChunk::new(self.target_size));
            self.next.push(next_id);
            self.next[old] = new_id;
            (new_id, 0)
        } else {
            if self.draining == Some(next_id) {
                return Err(BufferError::CursorViolation);
            }
            let dropped = self.arena[next_id].mbuf.available();
            self.arena[next_id].reset();
            (next_id, dropped)
        };

        // Carry forward any partial message left at the tail of the old
        // chunk so the message stays contiguous across the rotation. The
        // fresh/reset chunk at `new_writer` already has `message_start == 0`,
        // which is exactly where the carried-forward bytes land.
        let tail = self.arena[old].mbuf.take_tail();
        if !tail.is_empty() {
            self.arena[new_writer].mbuf.write(&tail)?;
        }

        self.writer = new_writer;
        self.total_dropped_bytes += dropped_bytes as u64;
        Ok(dropped_bytes)
    }

    /// Checks out the next chunk with unread bytes for the worker to drain,
    /// stopping once the reader would catch up to the writer chunk.
    pub fn next_chunk_to_drain(&mut self) -> Option<usize> {
        if self.reader == self.writer && self.arena[self.reader].mbuf.is_empty() {
            return None;
        }
        if self.reader == self.writer {
            // Writer chunk has bytes but nothing past it is queued yet;
            // still drainable.
        }
        self.draining = Some(self.reader);
        Some(self.reader)
    }

    pub fn chunk_mbuf(&mut self, slot: usize) -> &mut MBuffer {
        &mut self.arena[slot].mbuf
    }

    /// Called once a chunk is fully drained: advances the reader to the
    /// next slot and clears the draining marker.
    pub fn finish_draining(&mut self, slot: usize) {
        debug_assert_eq!(self.draining, Some(slot));
        self.draining = None;
        if self.arena[slot].mbuf.is_empty() && slot != self.writer {
            self.reader = self.next[slot];
        }
    }

    /// True if the chunk currently checked out for draining has no more
    /// unread bytes and the worker should move on to the next one.
    pub fn drain_slot_exhausted(&self, slot: usize) -> bool {
        self.arena[slot].mbuf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_at_least_two_chunks() {
        let chain = ChunkChain::new(100, 1000);
        assert_eq!(chain.chunk_count(), 2);
    }

    #[test]
    fn append_within_target_does_not_rotate() {
        let mut chain = ChunkChain::new(4096, 1024);
        let outcome = chain.append(b"hello").unwrap();
        assert_eq!(outcome.dropped_bytes, 0);
        assert_eq!(chain.chunk_count(), 2);
    }

    #[test]
    fn full_chain_overwrites_and_counts_dropped_bytes() {
        // capacity_bytes == 2*chunk_size forces only 2 chunks, no room to
        // splice a third, so once both are full the writer must overwrite.
        let mut chain = ChunkChain::new(20, 10);
        chain.begin_message();
        chain.append(&[1u8; 10]).unwrap(); // fills chunk 0
        chain.consume_message();
        // rotate into chunk 1 (empty, reused)
        chain.begin_message();
        let outcome = chain.append(&[2u8; 10]).unwrap();
        chain.consume_message();
        assert_eq!(outcome.dropped_bytes, 0);
        // chunk 0 still has unread bytes from the first append: reader
        // hasn't drained anything, so the next rotation must overwrite it.
        chain.begin_message();
        let outcome = chain.append(&[3u8; 10]).unwrap();
        chain.consume_message();
        assert_eq!(outcome.dropped_bytes, 10);
        assert_eq!(chain.total_dropped_bytes(), 10);
    }

    #[test]
    fn partial_message_survives_a_chunk_rotation() {
        let mut chain = ChunkChain::new(4096, 8);
        chain.begin_message();
        chain.append(b"1234").unwrap();
        // This would exceed chunk 0's target (4+6 > 8), forcing a rotation
        // mid-message; the first 4 bytes should be carried to chunk 1.
        chain.append(b"567890").unwrap();
        chain.consume_message();
        let slot = chain.next_chunk_to_drain().unwrap();
        assert_eq!(slot, 0);
    }
}
