//! Reader thread + debouncer loop.
//!
//! ```text
//! LineSource --(reader thread: read + decode)--> sync_channel --> debouncer loop --> EventSink
//! ```
//!
//! The queue is bounded: when the debouncer falls behind, the reader blocks on
//! `send`, which in turn stalls the upstream writer of the pipe. The debouncer
//! is the only owner of timing state and processes one input at a time.
//!
//! End-of-stream and shutdown both stop the loop without synthesizing a
//! deactivation; the sink sees exactly the transitions the debouncer made.
//! A shutdown request raises a stop flag that the loop checks before every
//! message, so it takes effect ahead of whatever is still queued.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::debounce::{Debouncer, EmptyFramePolicy, PresenceEvent, TimerOutcome};
use crate::ingest::LineSource;
use crate::record::{self, PresenceSignal};
use crate::sink::EventSink;
use crate::stats::{PipelineStats, StatsSnapshot};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Item carried from the reader (or a shutdown handle) to the debouncer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMessage {
    Signal(PresenceSignal),
    /// The source is exhausted. Sent by the reader so that outstanding
    /// shutdown handles do not keep the loop alive.
    EndOfStream,
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub inactivity_timeout: Duration,
    pub queue_capacity: usize,
    pub empty_frames: EmptyFramePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: crate::debounce::DEFAULT_INACTIVITY_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            empty_frames: EmptyFramePolicy::default(),
        }
    }
}

/// Why the debouncer loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub reason: StopReason,
    /// Presence state at the moment the loop stopped.
    pub active_at_stop: bool,
    pub stats: StatsSnapshot,
}

/// Stops a running pipeline from another thread (e.g. a Ctrl-C handler).
///
/// `shutdown` never blocks: it raises the stop flag and, if the queue has
/// room, enqueues a wake-up for a loop that is idle in `recv`.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    tx: SyncSender<PipelineMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Full means the loop is busy and will see the flag; closed means it stopped.
        let _ = self.tx.try_send(PipelineMessage::Shutdown);
    }

    pub fn is_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    stop: Arc<AtomicBool>,
    tx: SyncSender<PipelineMessage>,
    rx: Receiver<PipelineMessage>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if config.inactivity_timeout.is_zero() {
            return Err(anyhow!("inactivity timeout must be greater than zero"));
        }
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        Ok(Self {
            config,
            stats: Arc::new(PipelineStats::default()),
            stop: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        })
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Run until the source ends or shutdown is requested.
    pub fn run<S>(self, source: S, sink: &mut dyn EventSink) -> Result<RunSummary>
    where
        S: LineSource + Send + 'static,
    {
        let Pipeline {
            config,
            stats,
            stop,
            tx,
            rx,
        } = self;

        let reader = spawn_reader(source, tx, stats.clone())?;
        let debouncer = Debouncer::with_policy(config.inactivity_timeout, config.empty_frames);
        let (reason, active_at_stop) = run_debouncer(debouncer, &rx, sink, &stats, &stop);

        // On shutdown the reader may still be blocked in a read; leave it.
        if reason == StopReason::EndOfStream && reader.join().is_err() {
            log::error!("line reader thread panicked");
        }

        Ok(RunSummary {
            reason,
            active_at_stop,
            stats: stats.snapshot(),
        })
    }
}

fn spawn_reader<S>(
    mut source: S,
    tx: SyncSender<PipelineMessage>,
    stats: Arc<PipelineStats>,
) -> Result<JoinHandle<()>>
where
    S: LineSource + Send + 'static,
{
    let join = std::thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            let name = source.describe();
            log::info!("reader started on {}", name);
            loop {
                match source.next_line() {
                    Ok(Some(line)) => {
                        let signal = record::decode(&line, &stats);
                        if tx.send(PipelineMessage::Signal(signal)).is_err() {
                            log::debug!("debouncer gone, reader stopping");
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("end of stream on {}", name);
                        break;
                    }
                    Err(e) => {
                        log::warn!("read error on {}, treating as end of stream: {}", name, e);
                        break;
                    }
                }
            }
            let _ = tx.send(PipelineMessage::EndOfStream);
        })?;
    Ok(join)
}

/// Drive the debouncer from the queue until it closes or shutdown is requested.
///
/// `stop` is checked before every message, so queued signals are abandoned
/// once it is raised. Returns the stop reason and whether presence was
/// active at that point.
pub fn run_debouncer(
    mut debouncer: Debouncer,
    rx: &Receiver<PipelineMessage>,
    sink: &mut dyn EventSink,
    stats: &PipelineStats,
    stop: &AtomicBool,
) -> (StopReason, bool) {
    loop {
        if stop.load(Ordering::SeqCst) {
            log::info!("shutdown requested");
            return (StopReason::Shutdown, debouncer.is_active());
        }
        let message = match debouncer.pending_timer() {
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => return (StopReason::EndOfStream, debouncer.is_active()),
            },
            Some((token, deadline)) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                let received = if wait.is_zero() {
                    // Deadline reached: a queued signal still wins the tie.
                    match rx.try_recv() {
                        Ok(message) => Ok(message),
                        Err(TryRecvError::Empty) => Err(RecvTimeoutError::Timeout),
                        Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
                    }
                } else {
                    rx.recv_timeout(wait)
                };
                match received {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) if stop.load(Ordering::SeqCst) => continue,
                    Err(RecvTimeoutError::Timeout) => {
                        match debouncer.on_timer(token, Instant::now()) {
                            TimerOutcome::Transition(event) => dispatch(sink, event, stats),
                            TimerOutcome::Stale => {
                                let n = stats.record_stale_timer();
                                log::debug!("ignored stale inactivity timer ({} so far)", n);
                            }
                            TimerOutcome::Idle | TimerOutcome::NotYetDue => {}
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return (StopReason::EndOfStream, debouncer.is_active())
                    }
                }
            }
        };

        if stop.load(Ordering::SeqCst) {
            continue;
        }
        match message {
            PipelineMessage::Signal(signal) => {
                if let Some(event) = debouncer.on_signal(signal, Instant::now()) {
                    dispatch(sink, event, stats);
                }
            }
            PipelineMessage::EndOfStream => {
                return (StopReason::EndOfStream, debouncer.is_active());
            }
            PipelineMessage::Shutdown => {
                log::info!("shutdown requested");
                return (StopReason::Shutdown, debouncer.is_active());
            }
        }
    }
}

/// Call the sink for a committed transition. Failures are logged, never undone.
fn dispatch(sink: &mut dyn EventSink, event: PresenceEvent, stats: &PipelineStats) {
    match event {
        PresenceEvent::Activated => {
            let n = stats.record_activation();
            log::info!("presence activated (#{})", n);
        }
        PresenceEvent::Deactivated { timeout } => {
            let n = stats.record_deactivation();
            log::info!(
                "presence deactivated after {}s of inactivity (#{})",
                timeout.as_secs(),
                n
            );
        }
    }
    if let Err(e) = sink.notify(event) {
        let n = stats.record_sink_failure();
        log::warn!("event sink failed for {:?} ({} failures): {}", event, n, e);
    }
}
