//! Streaming support: backend chunk parsing and message reconstruction.

use std::pin::Pin;

use futures::Stream;

use crate::error::RelayError;
use crate::types::ChatCompletionChunk;

pub mod accumulator;
pub mod sse;

pub use accumulator::{DeltaAccumulator, LogicalMessage};
pub use sse::{DONE_MARKER, chunk_stream};

/// Stream of backend chunks.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, RelayError>> + Send>>;
