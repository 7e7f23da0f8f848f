//! In-memory byte conduit between a render engine and the HTTP transport.
//!
//! The writer never waits on the reader: chunks are queued as they arrive and
//! drained lazily by whoever holds the [`BridgeReader`]. Growth is unbounded
//! but monitored: crossing the configured high-water mark emits one warning per
//! bridge, and the buffered size is recorded on every write.

use std::{
    collections::VecDeque,
    convert::Infallible,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use metrics::histogram;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::render::bridge";

/// Create a connected writer/reader pair.
pub fn byte_bridge(high_water: NonZeroUsize) -> (BridgeWriter, BridgeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(BridgeState {
            chunks: VecDeque::new(),
            buffered: 0,
            high_water: high_water.get(),
            warned: false,
            closed: false,
            reader_dropped: false,
        }),
        notify: Notify::new(),
    });

    (
        BridgeWriter {
            shared: Arc::clone(&shared),
        },
        BridgeReader { shared },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeClosed {
    #[error("byte bridge is already closed")]
    Closed,
    #[error("byte bridge reader was dropped")]
    ReaderDropped,
}

struct Shared {
    state: Mutex<BridgeState>,
    notify: Notify,
}

struct BridgeState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    high_water: usize,
    warned: bool,
    closed: bool,
    reader_dropped: bool,
}

/// Producer side of the bridge. Dropping the writer closes the bridge.
pub struct BridgeWriter {
    shared: Arc<Shared>,
}

impl BridgeWriter {
    /// Queue a chunk for the reader. Empty chunks are accepted and discarded.
    pub fn write(&self, chunk: Bytes) -> Result<(), BridgeClosed> {
        let buffered = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "write");
            if state.reader_dropped {
                return Err(BridgeClosed::ReaderDropped);
            }
            if state.closed {
                return Err(BridgeClosed::Closed);
            }
            if chunk.is_empty() {
                return Ok(());
            }

            state.buffered += chunk.len();
            state.chunks.push_back(chunk);

            if state.buffered > state.high_water && !state.warned {
                state.warned = true;
                warn!(
                    target = "olian::render::bridge",
                    buffered_bytes = state.buffered,
                    high_water_bytes = state.high_water,
                    "Byte bridge exceeded its high-water mark; consumer is draining slowly"
                );
            }
            state.buffered
        };

        histogram!("olian_bridge_buffered_bytes").record(buffered as f64);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Signal end of data. Buffered chunks remain readable.
    pub fn close(&self) {
        {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "close");
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.notify.notify_one();
    }

    /// Close the bridge and discard anything the reader has not taken yet.
    ///
    /// Returns the number of undelivered bytes that were dropped.
    pub fn abort(&self) -> usize {
        let discarded = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "abort");
            let discarded = state.buffered;
            state.chunks.clear();
            state.buffered = 0;
            state.closed = true;
            discarded
        };
        self.shared.notify.notify_one();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        mutex_lock(&self.shared.state, SOURCE, "is_closed").closed
    }

    /// Bytes written but not yet taken by the reader.
    pub fn buffered_bytes(&self) -> usize {
        mutex_lock(&self.shared.state, SOURCE, "buffered_bytes").buffered
    }
}

impl Drop for BridgeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer side of the bridge. Pull-based: nothing is taken until asked for.
pub struct BridgeReader {
    shared: Arc<Shared>,
}

impl BridgeReader {
    /// Wait for the next chunk. Returns `None` once the bridge is closed and drained.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = mutex_lock(&self.shared.state, SOURCE, "next_chunk");
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Adapt the reader into a stream suitable for an HTTP response body.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream! {
            while let Some(chunk) = self.next_chunk().await {
                yield Ok::<Bytes, Infallible>(chunk);
            }
        }
    }
}

impl Drop for BridgeReader {
    fn drop(&mut self) {
        let mut state = mutex_lock(&self.shared.state, SOURCE, "reader_drop");
        state.reader_dropped = true;
        state.chunks.clear();
        state.buffered = 0;
    }
}

impl std::fmt::Debug for BridgeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = mutex_lock(&self.shared.state, SOURCE, "debug");
        f.debug_struct("BridgeReader")
            .field("buffered", &state.buffered)
            .field("closed", &state.closed)
            .finish()
    }
}
