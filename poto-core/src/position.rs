//! Playback position bookkeeping and time labels.

use crate::reconcile::ms_to_normalized;

/// `(current_ms, duration_ms)` as last reported by the engine.
///
/// `duration_ms` stays 0 until the engine discovers it. Once known,
/// `current_ms` is clamped into `[0, duration_ms]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackPosition {
    current_ms: u64,
    duration_ms: u64,
}

impl PlaybackPosition {
    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn is_duration_known(&self) -> bool {
        self.duration_ms > 0
    }

    pub fn set_current(&mut self, ms: u64) {
        self.current_ms = if self.is_duration_known() {
            ms.min(self.duration_ms)
        } else {
            ms
        };
    }

    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
        if self.is_duration_known() {
            self.current_ms = self.current_ms.min(ms);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Seek slider handle position for the current time.
    pub fn slider_value(&self) -> u32 {
        ms_to_normalized(self.current_ms, self.duration_ms)
    }
}

/// `HH:MM:SS` label for a millisecond offset.
pub fn format_hms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_once_duration_known() {
        let mut pos = PlaybackPosition::default();
        pos.set_current(90_000);
        assert_eq!(pos.current_ms(), 90_000);

        pos.set_duration(60_000);
        assert_eq!(pos.current_ms(), 60_000);

        pos.set_current(75_000);
        assert_eq!(pos.current_ms(), 60_000);
        assert_eq!(pos.slider_value(), 1000);
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(61_999), "00:01:01");
        assert_eq!(format_hms(3_723_000), "01:02:03");
    }
}
