//! Seek slider ↔ playback time
//!
//! The slider is a coarse 0-1000 scale. Seeks are issued in milliseconds and
//! the next position report of the same seek generation decides whether the
//! pipeline really landed there.

use std::time::{Duration, Instant};

/// Top of the seek slider scale
pub const SLIDER_MAX: u32 = 1000;

/// Slider value to milliseconds, rounding half up.
///
/// `0` maps to `0` and [`SLIDER_MAX`] maps to `duration_ms` exactly.
pub fn normalized_to_ms(normalized: u32, duration_ms: u64) -> u64 {
    let n = normalized.min(SLIDER_MAX) as u128;
    let max = SLIDER_MAX as u128;
    ((n * duration_ms as u128 + max / 2) / max) as u64
}

/// Milliseconds to the nearest slider value. 0 while duration is unknown.
pub fn ms_to_normalized(position_ms: u64, duration_ms: u64) -> u32 {
    if duration_ms == 0 {
        return 0;
    }
    let d = duration_ms as u128;
    let p = position_ms.min(duration_ms) as u128;
    ((p * SLIDER_MAX as u128 + d / 2) / d) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target_ms: u64,
    pub issued_at: Instant,
    /// Engine seek generation returned when the seek was issued
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekVerdict {
    /// No seek in flight
    Idle,
    /// Report predates the seek
    Pending,
    Landed {
        target_ms: u64,
        reported_ms: u64,
        latency: Duration,
    },
    Mismatch {
        target_ms: u64,
        reported_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct PositionReconciler {
    tolerance_ms: u64,
    pending: Option<SeekRequest>,
}

impl PositionReconciler {
    pub fn new(tolerance_ms: u64) -> Self {
        Self {
            tolerance_ms,
            pending: None,
        }
    }

    /// Target for a slider value, or `None` while duration is unknown.
    pub fn plan(&self, normalized: u32, duration_ms: u64) -> Option<u64> {
        (duration_ms > 0).then(|| normalized_to_ms(normalized, duration_ms))
    }

    /// Watch for the landing of `request`, replacing any earlier seek.
    pub fn track(&mut self, request: SeekRequest) {
        self.pending = Some(request);
    }

    pub fn pending(&self) -> Option<&SeekRequest> {
        self.pending.as_ref()
    }

    /// Check a position report against the seek in flight.
    pub fn verify(&mut self, reported_ms: u64, generation: u64, now: Instant) -> SeekVerdict {
        let Some(request) = self.pending else {
            return SeekVerdict::Idle;
        };
        if generation < request.generation {
            return SeekVerdict::Pending;
        }
        self.pending = None;

        if reported_ms.abs_diff(request.target_ms) > self.tolerance_ms {
            SeekVerdict::Mismatch {
                target_ms: request.target_ms,
                reported_ms,
            }
        } else {
            SeekVerdict::Landed {
                target_ms: request.target_ms,
                reported_ms,
                latency: now.saturating_duration_since(request.issued_at),
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
