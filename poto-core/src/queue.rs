//! # Buffering Queue - Byte-Bounded Stream Buffer
//!
//! Sits between the demuxer and a render sink so demux rate and render rate
//! are decoupled:
//! - Byte ceiling per queue (5 MB by default)
//! - Item count unbounded unless configured
//! - Flush on seek/reset
//! - End-of-stream marker so sinks can tell "drained" from "starved"
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │ Demuxer  │───►│ BufferQueue │───►│  Sink    │
//! │ (stream  │    │ (bytes ≤ N) │    │ (clock)  │
//! │  thread) │    └─────────────┘    └──────────┘
//! └──────────┘
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::media::StreamKind;

// ============================================================================
// Buffers
// ============================================================================

/// A timestamped chunk of one elementary stream.
///
/// Payload bytes are not carried: sinks only need timing and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    pub stream: StreamKind,
    /// Presentation timestamp (milliseconds)
    pub pts_ms: u64,
    /// Duration (milliseconds)
    pub duration_ms: u64,
    /// Payload size in bytes
    pub size: u64,
}

impl StreamBuffer {
    pub fn end_ms(&self) -> u64 {
        self.pts_ms + self.duration_ms
    }
}

// ============================================================================
// Limits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Byte ceiling (0 = unbounded)
    pub max_bytes: u64,
    /// Item ceiling (0 = unbounded)
    pub max_buffers: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5_000_000,
            max_buffers: 0,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Default)]
struct QueueInner {
    buffers: VecDeque<StreamBuffer>,
    bytes: u64,
    eos: bool,
}

impl QueueInner {
    fn is_full(&self, limits: &QueueLimits, incoming: u64) -> bool {
        // An empty queue always takes one buffer, even an oversized one,
        // otherwise a single large buffer would stall the stream forever.
        if self.buffers.is_empty() {
            return false;
        }
        let bytes_full = limits.max_bytes > 0 && self.bytes + incoming > limits.max_bytes;
        let count_full =
            limits.max_buffers > 0 && self.buffers.len() >= limits.max_buffers as usize;
        bytes_full || count_full
    }
}

/// Thread-safe bounded queue for one elementary stream
#[derive(Debug)]
pub struct BufferQueue {
    name: String,
    limits: QueueLimits,
    inner: Mutex<QueueInner>,
}

impl BufferQueue {
    pub fn new(name: impl Into<String>, limits: QueueLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Producer API (streaming thread)
    // ========================================================================

    /// Push without blocking. Hands the buffer back when the queue is full.
    pub fn try_push(&self, buffer: StreamBuffer) -> Result<(), StreamBuffer> {
        let mut inner = self.inner.lock();
        if inner.is_full(&self.limits, buffer.size) {
            return Err(buffer);
        }
        inner.bytes += buffer.size;
        inner.buffers.push_back(buffer);
        Ok(())
    }

    /// Mark end of stream: nothing more will be pushed until the next flush.
    pub fn set_eos(&self) {
        self.inner.lock().eos = true;
    }

    // ========================================================================
    // Consumer API (sink clock)
    // ========================================================================

    /// Consume every buffer that ends at or before `position_ms`.
    /// Returns how many were consumed.
    pub fn consume_until(&self, position_ms: u64) -> usize {
        let mut inner = self.inner.lock();
        let mut consumed = 0;
        while inner
            .buffers
            .front()
            .is_some_and(|b| b.end_ms() <= position_ms)
        {
            if let Some(buffer) = inner.buffers.pop_front() {
                inner.bytes -= buffer.size;
                consumed += 1;
            }
        }
        consumed
    }

    /// End timestamp of the newest queued buffer.
    pub fn buffered_until(&self) -> Option<u64> {
        self.inner.lock().buffers.back().map(StreamBuffer::end_ms)
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Drop everything and clear end-of-stream.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.buffers.len();
        inner.buffers.clear();
        inner.bytes = 0;
        inner.eos = false;
        drop(inner);
        tracing::debug!("{} flushed, {} buffers dropped", self.name, dropped);
    }

    // ========================================================================
    // Status API
    // ========================================================================

    pub fn is_eos(&self) -> bool {
        self.inner.lock().eos
    }

    /// End of stream reached and every buffer consumed.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.eos && inner.buffers.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.inner.lock().bytes
    }
}

// ============================================================================
// Tests
// ============================================================================
