//! Connectivity gate: point-in-time reachability checks.
//!
//! The engine asks before every sync attempt and never subscribes to
//! change events; a transition it misses is picked up by the next periodic
//! or foreground-triggered check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and able to reach the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}

#[async_trait]
pub trait Connectivity: Send + Sync {
    /// Is the API reachable right now? No side effects.
    async fn is_online(&self) -> bool;

    async fn state(&self) -> ConnectivityState {
        if self.is_online().await {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Manually switched connectivity (tests, `--offline`).
#[derive(Debug)]
pub struct OfflineMode {
    online: AtomicBool,
}

impl OfflineMode {
    pub fn new(state: ConnectivityState) -> Self {
        Self {
            online: AtomicBool::new(state == ConnectivityState::Online),
        }
    }

    pub fn online() -> Self {
        Self::new(ConnectivityState::Online)
    }

    pub fn offline() -> Self {
        Self::new(ConnectivityState::Offline)
    }

    /// Mark the client as offline.
    pub fn set_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    /// Mark the client as online.
    pub fn set_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for OfflineMode {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Reachability by probing the API health endpoint.
///
/// Any HTTP response counts as reachable; only a failed or timed-out
/// request counts as offline.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HealthCheck {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/health", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connectivity for HealthCheck {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "health probe failed");
                false
            }
        }
    }
}
