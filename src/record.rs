//! Detection record decoding.
//!
//! Each input line is one JSON metadata record emitted by the video analytics
//! pipeline: `{ "objects": [...], "resolution": {...}, "timestamp": ... }`.
//! The debouncer only cares whether `objects` is non-empty, so presence is
//! read from a minimal shape that ignores every other field and the contents
//! of each object. The typed `FrameRecord` is a best-effort diagnostic view;
//! a record that does not fit it still yields a signal.
//!
//! Decoding never fails outward: an unparseable line degrades to
//! `PresenceSignal::Empty` and is counted in `PipelineStats`.

use anyhow::{anyhow, Result};
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::ingest::RawLine;
use crate::stats::PipelineStats;

/// Decoded presence for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceSignal {
    /// At least one object was detected in the frame.
    Detected,
    /// No objects, or the line could not be decoded.
    Empty,
}

impl PresenceSignal {
    pub fn is_detected(self) -> bool {
        matches!(self, PresenceSignal::Detected)
    }
}

/// The only part of a record presence depends on.
#[derive(Debug, Default, Deserialize)]
struct PresenceShape {
    #[serde(default)]
    objects: Option<Vec<IgnoredAny>>,
}

impl PresenceShape {
    fn presence(&self) -> PresenceSignal {
        match &self.objects {
            Some(objects) if !objects.is_empty() => PresenceSignal::Detected,
            _ => PresenceSignal::Empty,
        }
    }
}

/// One metadata record as written by the analytics pipeline.
#[derive(Debug, Default, Deserialize)]
pub struct FrameRecord {
    #[serde(default)]
    pub objects: Vec<DetectedObject>,

    #[serde(default)]
    pub resolution: Resolution,

    /// Pipeline timestamp (nanoseconds, opaque to us)
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectedObject {
    #[serde(default)]
    pub detection: Detection,

    /// Age classification (label is the estimated age in years)
    #[serde(default)]
    pub age: Option<AgeClass>,

    #[serde(default)]
    pub emotion: Option<Classification>,

    #[serde(default)]
    pub gender: Option<Classification>,

    #[serde(default)]
    pub region_id: i64,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub w: i64,
    #[serde(default)]
    pub h: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub label_id: i64,
}

/// Normalized (0.0-1.0) box corners.
#[derive(Debug, Default, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub x_min: f64,
    #[serde(default)]
    pub x_max: f64,
    #[serde(default)]
    pub y_min: f64,
    #[serde(default)]
    pub y_max: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgeClass {
    #[serde(default)]
    pub label: u32,
    #[serde(default)]
    pub model: ModelInfo,
}

/// Label-style classification (emotion, gender).
#[derive(Debug, Default, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub label_id: i64,
    #[serde(default)]
    pub model: ModelInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Resolution {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl FrameRecord {
    pub fn presence(&self) -> PresenceSignal {
        if self.objects.is_empty() {
            PresenceSignal::Empty
        } else {
            PresenceSignal::Detected
        }
    }
}

fn ensure_not_blank(bytes: &[u8]) -> Result<()> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(anyhow!("blank line"));
    }
    Ok(())
}

/// Presence of one record, ignoring everything but the `objects` array.
pub fn parse_presence(bytes: &[u8]) -> Result<PresenceSignal> {
    ensure_not_blank(bytes)?;
    let shape: PresenceShape =
        serde_json::from_slice(bytes).map_err(|e| anyhow!("parse error: {}", e))?;
    Ok(shape.presence())
}

/// Strictly parse one record into its typed form. Blank input is rejected.
pub fn parse_frame_record(bytes: &[u8]) -> Result<FrameRecord> {
    ensure_not_blank(bytes)?;
    serde_json::from_slice(bytes).map_err(|e| anyhow!("parse error: {}", e))
}

/// Decode a raw line into a presence signal, absorbing decode failures.
pub fn decode(line: &RawLine, stats: &PipelineStats) -> PresenceSignal {
    stats.record_line();
    let signal = match parse_presence(line.as_bytes()) {
        Ok(signal) => signal,
        Err(e) => {
            let failures = stats.record_decode_failure();
            log::warn!(
                "undecodable record treated as empty ({} so far): {}",
                failures,
                e
            );
            return PresenceSignal::Empty;
        }
    };

    if log::log_enabled!(log::Level::Debug) {
        match parse_frame_record(line.as_bytes()) {
            Ok(record) => {
                log::debug!(
                    "record: objects={} resolution={}x{} timestamp={}",
                    record.objects.len(),
                    record.resolution.width,
                    record.resolution.height,
                    record.timestamp
                );
                for object in &record.objects {
                    log::trace!("  object: {:?}", object);
                }
            }
            Err(e) => log::debug!("record: {:?} (untyped: {})", signal, e),
        }
    }

    stats.record_signal(signal);
    signal
}
