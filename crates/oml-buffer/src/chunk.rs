use crate::mbuf::MBuffer;

/// One link in the [`crate::ChunkChain`]: an `MBuffer` plus the target size
/// at which the chain rotates to the next chunk (§3 BufferChunk).
pub struct BufferChunk {
    pub mbuf: MBuffer,
    target_size: usize,
}

impl BufferChunk {
    pub fn new(target_size: usize) -> Self {
        BufferChunk {
            mbuf: MBuffer::new(target_size, 0),
            target_size,
        }
    }

    /// True if appending `additional` bytes to the current write position
    /// would exceed this chunk's target size.
    pub fn would_exceed(&self, additional: usize) -> bool {
        self.mbuf.write_cursor() + additional > self.target_size
    }

    /// Discards any buffered content and starts fresh. Used both when a
    /// drained chunk is reused and when a full chunk is overwritten
    /// (dropping its unsent contents).
    pub fn reset(&mut self) {
        self.mbuf = MBuffer::new(self.target_size, 0);
    }
}
