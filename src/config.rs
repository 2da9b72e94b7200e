use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debounce::{EmptyFramePolicy, DEFAULT_INACTIVITY_TIMEOUT};
use crate::pipeline::{PipelineConfig, DEFAULT_QUEUE_CAPACITY};
use crate::sink::{validate_endpoint, validate_payload, HttpSinkConfig};

const DEFAULT_INPUT: &str = "output.json";
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct PresenceConfigFile {
    input: Option<PathBuf>,
    inactivity_timeout_secs: Option<u64>,
    queue_capacity: Option<usize>,
    empty_frames: Option<EmptyFramePolicy>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    endpoint: Option<String>,
    payload: Option<serde_json::Value>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Record source: a file or named pipe, or `-` for stdin.
    pub input: PathBuf,
    pub inactivity_timeout: Duration,
    pub queue_capacity: usize,
    pub empty_frames: EmptyFramePolicy,
    pub sink: SinkSettings,
}

/// Command-line values, applied on top of file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input: Option<PathBuf>,
    pub inactivity_timeout: Option<Duration>,
    pub queue_capacity: Option<usize>,
    pub empty_frames: Option<EmptyFramePolicy>,
    pub sink_endpoint: Option<String>,
    pub sink_payload: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Provisioning endpoint; when unset, transitions are only logged.
    pub endpoint: Option<String>,
    /// JSON body posted on activation.
    pub payload: Option<String>,
    pub timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            empty_frames: EmptyFramePolicy::default(),
            sink: SinkSettings {
                endpoint: None,
                payload: None,
                timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_SECS),
            },
        }
    }
}

impl PresenceConfig {
    /// Load from an optional JSON file (falling back to `PRESENCE_CONFIG`),
    /// then apply `PRESENCE_*` environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, ConfigOverrides::default())
    }

    /// Like `load`, with command-line overrides taking precedence over both
    /// the file and the environment. Validation runs once, on the final result.
    pub fn load_with_overrides(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let env_path = std::env::var("PRESENCE_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        Ok(cfg)
    }

    /// Apply command-line overrides, then validate the result.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(input) = overrides.input {
            self.input = input;
        }
        if let Some(timeout) = overrides.inactivity_timeout {
            self.inactivity_timeout = timeout;
        }
        if let Some(capacity) = overrides.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(policy) = overrides.empty_frames {
            self.empty_frames = policy;
        }
        if let Some(endpoint) = overrides.sink_endpoint {
            self.sink.endpoint = Some(endpoint);
        }
        if let Some(payload) = overrides.sink_payload {
            self.sink.payload = Some(payload);
        }
        self.validate()
    }

    fn from_file(file: PresenceConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let sink = file.sink.unwrap_or_default();
        let payload = match sink.payload {
            None | Some(serde_json::Value::Null) => None,
            // Allow the payload either inline as JSON or as a JSON-encoded string.
            Some(serde_json::Value::String(raw)) => Some(raw),
            Some(value) => Some(serde_json::to_string(&value)?),
        };
        Ok(Self {
            input: file.input.unwrap_or(defaults.input),
            inactivity_timeout: file
                .inactivity_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_timeout),
            queue_capacity: file.queue_capacity.unwrap_or(defaults.queue_capacity),
            empty_frames: file.empty_frames.unwrap_or(defaults.empty_frames),
            sink: SinkSettings {
                endpoint: sink.endpoint,
                payload,
                timeout: sink
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.sink.timeout),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(input) = std::env::var("PRESENCE_INPUT") {
            if !input.trim().is_empty() {
                self.input = PathBuf::from(input);
            }
        }
        if let Ok(secs) = std::env::var("PRESENCE_INACTIVE_TIMER_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("PRESENCE_INACTIVE_TIMER_SECS must be an integer number of seconds")
            })?;
            self.inactivity_timeout = Duration::from_secs(secs);
        }
        if let Ok(capacity) = std::env::var("PRESENCE_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("PRESENCE_QUEUE_CAPACITY must be a positive integer"))?;
        }
        if let Ok(policy) = std::env::var("PRESENCE_EMPTY_FRAMES") {
            self.empty_frames = policy.parse()?;
        }
        if let Ok(endpoint) = std::env::var("PRESENCE_SINK_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.sink.endpoint = Some(endpoint);
            }
        }
        if let Ok(payload) = std::env::var("PRESENCE_SINK_PAYLOAD") {
            if !payload.trim().is_empty() {
                self.sink.payload = Some(payload);
            }
        }
        if let Ok(secs) = std::env::var("PRESENCE_SINK_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("PRESENCE_SINK_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.sink.timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.inactivity_timeout.is_zero() {
            return Err(anyhow!("inactivity timeout must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.input.as_os_str().is_empty() {
            return Err(anyhow!("input path must not be empty"));
        }
        if let Some(endpoint) = &self.sink.endpoint {
            validate_endpoint(endpoint)?;
        }
        if let Some(payload) = &self.sink.payload {
            validate_payload(payload)?;
        }
        if self.sink.timeout.is_zero() {
            return Err(anyhow!("sink timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            inactivity_timeout: self.inactivity_timeout,
            queue_capacity: self.queue_capacity,
            empty_frames: self.empty_frames,
        }
    }

    /// HTTP sink settings, if an endpoint is configured.
    pub fn http_sink(&self) -> Option<HttpSinkConfig> {
        self.sink.endpoint.as_ref().map(|endpoint| HttpSinkConfig {
            endpoint: endpoint.clone(),
            payload: self.sink.payload.clone(),
            timeout: self.sink.timeout,
        })
    }
}

fn read_config_file(path: &Path) -> Result<PresenceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = PresenceConfig::from_file(PresenceConfigFile::default()).unwrap();
        assert_eq!(cfg.input, PathBuf::from("output.json"));
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(10));
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.empty_frames, EmptyFramePolicy::Refresh);
        assert!(cfg.http_sink().is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn inline_payload_is_serialized() {
        let file: PresenceConfigFile = serde_json::from_str(
            r#"{"sink": {"endpoint": "http://127.0.0.1:9000/qos", "payload": {"qosReference": "qos_1"}}}"#,
        )
        .unwrap();
        let cfg = PresenceConfig::from_file(file).unwrap();
        let sink = cfg.http_sink().unwrap();
        assert_eq!(sink.payload.as_deref(), Some(r#"{"qosReference":"qos_1"}"#));
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PresenceConfig::default();
        cfg.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PresenceConfig::default();
        cfg.inactivity_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = PresenceConfig::default();
        cfg.sink.endpoint = Some("nef.local".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = PresenceConfig::default();
        cfg.sink.payload = Some("{".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_policy_in_file_fails() {
        let parsed: Result<PresenceConfigFile, _> =
            serde_json::from_str(r#"{"empty_frames": "sometimes"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn overrides_replace_values_and_validate() {
        let mut cfg = PresenceConfig::default();
        cfg.apply_overrides(ConfigOverrides {
            input: Some(PathBuf::from("-")),
            empty_frames: Some(EmptyFramePolicy::Ignore),
            sink_endpoint: Some("http://127.0.0.1:9000/qos".to_string()),
            ..ConfigOverrides::default()
        })
        .unwrap();
        assert_eq!(cfg.input, PathBuf::from("-"));
        assert_eq!(cfg.empty_frames, EmptyFramePolicy::Ignore);
        assert_eq!(cfg.queue_capacity, 64);

        let err = cfg
            .apply_overrides(ConfigOverrides {
                sink_payload: Some("{".to_string()),
                ..ConfigOverrides::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("payload"));
    }
}
