//! Event sinks notified of debounced presence transitions.
//!
//! The debouncer calls a sink synchronously; a slow sink delays the next
//! input. Sink errors are reported back to the caller, which logs them and
//! keeps the committed transition.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use crate::debounce::PresenceEvent;

pub trait EventSink {
    fn on_activated(&mut self) -> Result<()>;

    fn on_deactivated(&mut self, timeout: Duration) -> Result<()>;

    fn notify(&mut self, event: PresenceEvent) -> Result<()> {
        match event {
            PresenceEvent::Activated => self.on_activated(),
            PresenceEvent::Deactivated { timeout } => self.on_deactivated(timeout),
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn on_activated(&mut self) -> Result<()> {
        (**self).on_activated()
    }

    fn on_deactivated(&mut self, timeout: Duration) -> Result<()> {
        (**self).on_deactivated(timeout)
    }
}

/// Logs transitions and does nothing else.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_activated(&mut self) -> Result<()> {
        log::info!("Object detected => fire provisioning POST");
        Ok(())
    }

    fn on_deactivated(&mut self, timeout: Duration) -> Result<()> {
        log::info!(
            "No object detected for {}s => fire provisioning DELETE",
            timeout.as_secs()
        );
        Ok(())
    }
}

/// Forwards each event to every inner sink, in order.
///
/// All sinks are called even if one fails; the first error is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&mut self, mut f: impl FnMut(&mut dyn EventSink) -> Result<()>) -> Result<()> {
        let mut first_err = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = f(sink.as_mut()) {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    log::warn!("additional sink failure: {}", e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl EventSink for FanoutSink {
    fn on_activated(&mut self) -> Result<()> {
        self.each(|sink| sink.on_activated())
    }

    fn on_deactivated(&mut self, timeout: Duration) -> Result<()> {
        self.each(|sink| sink.on_deactivated(timeout))
    }
}

/// Configuration for `HttpSink`.
#[derive(Clone, Debug)]
pub struct HttpSinkConfig {
    /// Provisioning endpoint (http:// or https://).
    pub endpoint: String,
    /// JSON body sent on activation. An empty object is sent when unset.
    pub payload: Option<String>,
    pub timeout: Duration,
}

/// Provisioning client.
///
/// Activation POSTs the payload to the endpoint. When the response names the
/// created resource in a `Location` header, deactivation DELETEs that
/// resource (resolved against the endpoint); otherwise it DELETEs the
/// endpoint itself.
pub struct HttpSink {
    agent: ureq::Agent,
    endpoint: Url,
    payload: Option<String>,
    resource: Option<Url>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let endpoint = validate_endpoint(&config.endpoint)?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            endpoint,
            payload: config.payload,
            resource: None,
        })
    }

    /// Resource created by the last successful activation, if the server named one.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_ref().map(Url::as_str)
    }

    fn resolve_location(&self, location: &str) -> Result<Url> {
        self.endpoint
            .join(location)
            .with_context(|| format!("resolve Location '{}'", location))
    }
}

impl EventSink for HttpSink {
    fn on_activated(&mut self) -> Result<()> {
        let body = self.payload.as_deref().unwrap_or("{}");
        log::info!("POST {}", self.endpoint);
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .send_string(body)
            .map_err(|e| request_error("POST", &self.endpoint, e))?;
        let status = response.status();
        self.resource = match response.header("Location").map(|l| self.resolve_location(l)) {
            Some(Ok(url)) => Some(url),
            Some(Err(e)) => {
                log::warn!("{}; deactivation will target the endpoint", e);
                None
            }
            None => None,
        };
        log::info!(
            "provisioning POST accepted (status {}, resource {})",
            status,
            self.resource().unwrap_or("none")
        );
        Ok(())
    }

    fn on_deactivated(&mut self, timeout: Duration) -> Result<()> {
        let target = self
            .resource
            .take()
            .unwrap_or_else(|| self.endpoint.clone());
        log::info!(
            "DELETE {} after {}s without detections",
            target,
            timeout.as_secs()
        );
        let response = self
            .agent
            .delete(target.as_str())
            .call()
            .map_err(|e| request_error("DELETE", &target, e))?;
        log::info!("provisioning DELETE accepted (status {})", response.status());
        Ok(())
    }
}

fn request_error(method: &str, url: &Url, err: ureq::Error) -> anyhow::Error {
    if let ureq::Error::Status(code, _) = err {
        return anyhow!("{} {} rejected with status {}", method, url, code);
    }
    anyhow!("{} {} failed: {}", method, url, err)
}

/// Parse a provisioning endpoint; only http(s) URLs with a host are accepted.
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).with_context(|| format!("parse sink endpoint '{}'", endpoint))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported sink endpoint scheme '{}'; expected http or https",
                other
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("sink endpoint '{}' has no host", endpoint));
    }
    Ok(url)
}

/// Validate that a configured payload is JSON before any request is made.
pub fn validate_payload(payload: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(payload)
        .map(|_| ())
        .context("sink payload is not valid JSON")
}
