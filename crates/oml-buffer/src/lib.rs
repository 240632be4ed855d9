//! Bounded byte buffer and chunk-chain egress storage (§4.1 and the
//! `ChunkChain`/`BufferChunk` data model of §3).
//!
//! `MBuffer` is used on both sides of the wire: the server's receive buffer
//! parses messages out of it, and each `BufferChunk` in the client's egress
//! chain uses one to accumulate bytes the worker drains to the transport.

mod chain;
mod chunk;
mod mbuf;

pub use chain::{AdvanceOutcome, ChunkChain};
pub use chunk::BufferChunk;
pub use mbuf::{BufferError, MBuffer, NOT_FOUND};
