//! Presence bridge
//!
//! Turns a stream of object-detection metadata records (one JSON document per
//! line) into a debounced presence signal, and notifies an event sink when
//! presence starts and when it has been absent for the inactivity window.
//!
//! # Architecture
//!
//! ```text
//! LineSource -> record::decode -> Debouncer -> EventSink
//! ```
//!
//! 1. **No flapping**: detections arriving within the inactivity window keep
//!    presence active; only the window elapsing ends it.
//! 2. **Tolerant input**: malformed records never stop the pipeline; they are
//!    counted and treated as empty frames.
//! 3. **Stale timers are inert**: every rearm gets a new timer identity and
//!    only the current one may deactivate.
//! 4. **Bounded memory**: the reader and debouncer share a bounded queue, so a
//!    slow sink back-pressures the input instead of buffering without limit.
//!
//! # Module Structure
//!
//! - `ingest`: line sources (stdin, files, named pipes)
//! - `record`: detection record shapes and presence decoding
//! - `debounce`: the presence state machine
//! - `sink`: event sinks (log, HTTP provisioning, fan-out)
//! - `pipeline`: reader thread, bounded queue and debouncer loop
//! - `config`: file + environment configuration

pub mod config;
pub mod debounce;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod stats;

pub use config::{ConfigOverrides, PresenceConfig, SinkSettings};
pub use debounce::{
    DebounceState, Debouncer, EmptyFramePolicy, InactivityTimer, PresenceEvent, TimerOutcome,
    TimerToken, DEFAULT_INACTIVITY_TIMEOUT,
};
pub use ingest::{open_input, BufReadSource, LineSource, RawLine};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineMessage, RunSummary, ShutdownHandle, StopReason,
};
pub use record::{decode, parse_frame_record, parse_presence, FrameRecord, PresenceSignal};
pub use sink::{EventSink, FanoutSink, HttpSink, HttpSinkConfig, LogSink};
pub use stats::{PipelineStats, StatsSnapshot};
