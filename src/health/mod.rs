//! Readiness probing for workflow server children.
//!
//! A freshly spawned server is only useful once its HTTP surface answers, so
//! the supervisor polls `GET /health` until the first 2xx response or until
//! the configured deadline. A probe has exactly two outcomes: `Ready` or
//! `NotReady`. Connection refusal and request timeouts during boot are the
//! normal case, not failures — they map to `NotReady` and the loop keeps
//! polling. Only exhausting the total timeout fails the wait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::HealthSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ready,
    NotReady,
}

/// Single readiness probe against a server port.
///
/// Object-safe so tests can swap the HTTP prober for a scripted one.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, port: u16) -> Probe;
}

/// Probes `http://localhost:<port>/health`; any 2xx status means ready.
pub struct HttpHealthProber {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpHealthProber {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_timeout,
        }
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    async fn probe(&self, port: u16) -> Probe {
        let url = format!("http://localhost:{}/health", port);
        match self.client.get(&url).timeout(self.probe_timeout).send().await {
            Ok(resp) if resp.status().is_success() => Probe::Ready,
            Ok(resp) => {
                tracing::debug!("Health probe on port {} returned {}", port, resp.status());
                Probe::NotReady
            }
            Err(e) => {
                tracing::trace!("Health probe on port {} not reachable yet: {}", port, e);
                Probe::NotReady
            }
        }
    }
}

/// Poll until the server reports healthy or the total timeout elapses.
///
/// Probes immediately, then every `interval`. Returns `false` only after the
/// deadline passes; never errors.
pub async fn wait_for_health(
    prober: &dyn HealthProber,
    port: u16,
    settings: &HealthSettings,
) -> bool {
    let deadline = Instant::now() + settings.timeout();
    loop {
        if prober.probe(port).await == Probe::Ready {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(settings.interval()).await;
    }
}
