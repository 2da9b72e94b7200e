//! Pipeline counters shared between the reader thread and the debouncer.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::PresenceSignal;

#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    frames_with_objects: AtomicU64,
    empty_frames: AtomicU64,
    decode_failures: AtomicU64,
    activations: AtomicU64,
    deactivations: AtomicU64,
    sink_failures: AtomicU64,
    stale_timers: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub frames_with_objects: u64,
    pub empty_frames: u64,
    pub decode_failures: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub sink_failures: u64,
    pub stale_timers: u64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl PipelineStats {
    pub fn record_line(&self) -> u64 {
        bump(&self.lines_read)
    }

    /// Returns the number of decode failures seen so far, including this one.
    pub fn record_decode_failure(&self) -> u64 {
        bump(&self.decode_failures)
    }

    pub fn record_signal(&self, signal: PresenceSignal) {
        match signal {
            PresenceSignal::Detected => bump(&self.frames_with_objects),
            PresenceSignal::Empty => bump(&self.empty_frames),
        };
    }

    pub fn record_activation(&self) -> u64 {
        bump(&self.activations)
    }

    pub fn record_deactivation(&self) -> u64 {
        bump(&self.deactivations)
    }

    pub fn record_sink_failure(&self) -> u64 {
        bump(&self.sink_failures)
    }

    pub fn record_stale_timer(&self) -> u64 {
        bump(&self.stale_timers)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            frames_with_objects: self.frames_with_objects.load(Ordering::Relaxed),
            empty_frames: self.empty_frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            deactivations: self.deactivations.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            stale_timers: self.stale_timers.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines={} detected={} empty={} undecodable={} activations={} deactivations={} sink_failures={}",
            self.lines_read,
            self.frames_with_objects,
            self.empty_frames,
            self.decode_failures,
            self.activations,
            self.deactivations,
            self.sink_failures
        )
    }
}
