//! Backend reachability detection.
//!
//! Maintains a process-shared belief about whether the detection
//! backend is network-accessible: a periodic HTTP HEAD liveness probe
//! against a health endpoint, combined with caller-reported platform
//! connectivity hints via [`ReachabilityMonitor::report`]. The dual
//! mechanism covers environments where the platform signal alone is
//! unreliable (connected to a LAN with no backend route).
//!
//! Explicitly constructed and explicitly torn down — there is no
//! process-wide singleton. Consumers receive a `watch` receiver and
//! observe every transition.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Reachability ─────────────────────────────────────────────────────

/// The current belief about backend reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Online,
    Offline,
}

// ── ProbeConfig ──────────────────────────────────────────────────────

/// Liveness probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Health endpoint, probed with `HEAD` and `Cache-Control: no-cache`.
    pub health_url: Url,

    /// Probe period. Default: 30s.
    pub interval: Duration,

    /// Per-request timeout. Default: 5s.
    pub timeout: Duration,

    /// Initial belief, seeded from the platform's connectivity signal
    /// at construction time. Default: [`Reachability::Online`].
    pub initial: Reachability,
}

impl ProbeConfig {
    pub fn new(health_url: Url) -> Self {
        Self {
            health_url,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            initial: Reachability::Online,
        }
    }
}

// ── ReachabilityMonitor ──────────────────────────────────────────────

/// Handle to the running probe task.
pub struct ReachabilityMonitor {
    state_tx: watch::Sender<Reachability>,
    cancel: CancellationToken,
}

impl ReachabilityMonitor {
    /// Start the monitor. The first probe fires immediately, then every
    /// `interval`.
    pub fn spawn(config: ProbeConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let (state_tx, _) = watch::channel(config.initial);
        let cancel = CancellationToken::new();

        tokio::spawn(probe_task(
            client,
            config,
            state_tx.clone(),
            cancel.clone(),
        ));

        Ok(Self { state_tx, cancel })
    }

    /// Subscribe to reachability transitions.
    pub fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.state_tx.subscribe()
    }

    /// The current belief.
    pub fn current(&self) -> Reachability {
        *self.state_tx.borrow()
    }

    /// Feed in a platform connectivity signal (e.g. an interface
    /// up/down notification from the hosting environment). Takes effect
    /// immediately; the next probe will confirm or correct it.
    pub fn report(&self, observed: Reachability) {
        transition(&self.state_tx, observed, "reported");
    }

    /// Stop the probe task. Subscribers keep their last-seen value.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Probe task ───────────────────────────────────────────────────────

async fn probe_task(
    client: reqwest::Client,
    config: ProbeConfig,
    state_tx: watch::Sender<Reachability>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let observed = if check_once(&client, &config.health_url).await {
                    Reachability::Online
                } else {
                    Reachability::Offline
                };
                transition(&state_tx, observed, "probe");
            }
        }
    }

    tracing::debug!("reachability monitor stopped");
}

/// One liveness probe: HTTP HEAD, no-cache, success = reachable.
pub async fn check_once(client: &reqwest::Client, health_url: &Url) -> bool {
    match client
        .head(health_url.clone())
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(error = %e, "liveness probe request failed");
            false
        }
    }
}

/// Publish a transition if the belief actually changed.
///
/// A successful probe while believed-offline flips Online; a failed
/// probe while believed-online flips Offline. Repeat observations are
/// not republished.
fn transition(tx: &watch::Sender<Reachability>, observed: Reachability, source: &str) {
    tx.send_if_modified(|current| {
        if *current == observed {
            return false;
        }
        tracing::info!(from = ?current, to = ?observed, source, "reachability changed");
        *current = observed;
        true
    });
}

// ── Tests ────────────────────────────────────────────────────────────
