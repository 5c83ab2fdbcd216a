use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use super::Notifier;
use crate::detect::TransitionEvent;

/// Configuration for the pickup/return HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpNotifierConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for HttpNotifierConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Sends `GET /api/objectitem/{action}/{name}` per transition.
pub struct HttpNotifier {
    base: Url,
    agent: ureq::Agent,
}

impl HttpNotifier {
    pub fn new(config: &HttpNotifierConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(anyhow!("notification host must not be empty"));
        }
        let base = Url::parse(&format!("http://{}:{}/", config.host, config.port))
            .with_context(|| format!("invalid notification host '{}'", config.host))?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { base, agent })
    }

    /// Request URL for `event`; the zone name is percent-encoded as one path segment.
    pub fn request_url(&self, event: &TransitionEvent) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("notification base url cannot carry a path"))?
            .clear()
            .extend(["api", "objectitem", event.action.as_str(), &event.zone_name]);
        Ok(url)
    }
}

impl Notifier for HttpNotifier {
    fn notify(&mut self, event: &TransitionEvent) -> Result<()> {
        let url = self.request_url(event)?;
        match self.agent.get(url.as_str()).call() {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .context("read notification response")?;
                log::info!("notify {} -> {} {}", url, status, body.trim());
                Ok(())
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(anyhow!("{} answered {}: {}", url, code, body.trim()))
            }
            Err(err) => Err(anyhow!("{} unreachable: {}", url, err)),
        }
    }
}
