//! presenced - Debounce object-detection records into presence events.
//!
//! This daemon:
//! 1. Reads newline-delimited detection metadata from a named pipe, file or stdin
//! 2. Decodes each record into "objects present" / "empty"
//! 3. Fires an activation on the first detection
//! 4. Fires a deactivation once no detection arrives for the inactivity window
//! 5. Forwards transitions to the provisioning endpoint, when one is configured
//!
//! The process exits when the input reaches end-of-stream or on Ctrl-C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use presence_bridge::{
    open_input, ConfigOverrides, EmptyFramePolicy, FanoutSink, HttpSink, LogSink, Pipeline,
    PresenceConfig, StopReason,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Turn object-detection records into debounced presence events"
)]
struct Args {
    /// Optional JSON config file. CLI flags override file and environment values.
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Named pipe or file carrying one JSON record per line ('-' for stdin).
    #[arg(long)]
    fifo_file: Option<PathBuf>,

    /// Seconds without a detection before firing the deactivation.
    #[arg(long)]
    inactive_timer: Option<u64>,

    /// Provisioning endpoint. Without it, transitions are only logged.
    #[arg(long)]
    nef_svc_endpoint: Option<String>,

    /// JSON body posted to the provisioning endpoint on activation.
    #[arg(long)]
    nef_json: Option<String>,

    /// Bounded queue size between reader and debouncer.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Whether empty frames extend presence: 'refresh' or 'ignore'.
    #[arg(long)]
    empty_frames: Option<EmptyFramePolicy>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input: self.fifo_file.clone(),
            inactivity_timeout: self.inactive_timer.map(Duration::from_secs),
            queue_capacity: self.queue_capacity,
            empty_frames: self.empty_frames,
            sink_endpoint: self.nef_svc_endpoint.clone(),
            sink_payload: self.nef_json.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PresenceConfig::load_with_overrides(args.config.as_deref(), args.overrides())?;

    log::info!("presenced starting");
    log::info!("  Input: {}", cfg.input.display());
    log::info!("  Inactivity timeout: {}s", cfg.inactivity_timeout.as_secs());
    log::info!("  Queue capacity: {}", cfg.queue_capacity);
    log::info!("  Empty frames: {}", cfg.empty_frames);
    log::info!(
        "  Provisioning endpoint: {}",
        cfg.sink.endpoint.as_deref().unwrap_or("none (log only)")
    );

    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(http) = cfg.http_sink() {
        sink = sink.with(HttpSink::new(http)?);
    }

    // Opening a FIFO blocks until a writer connects; Ctrl-C keeps its
    // default behavior until then.
    let source = open_input(&cfg.input)?;

    let pipeline = Pipeline::new(cfg.pipeline())?;
    let shutdown = pipeline.shutdown_handle();
    ctrlc::set_handler(move || shutdown.shutdown()).expect("error setting Ctrl-C handler");

    let summary = pipeline.run(source, &mut sink)?;

    match summary.reason {
        StopReason::EndOfStream => log::info!("FINISHED: input closed"),
        StopReason::Shutdown => log::info!("FINISHED: shutdown signal received"),
    }
    if summary.active_at_stop {
        log::info!("presence was still active at exit; no deactivation sent");
    }
    log::info!("stats: {}", summary.stats);
    Ok(())
}
