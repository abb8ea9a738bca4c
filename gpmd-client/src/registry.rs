//! Registry-driven discovery.

use crate::discovery::{Discovery, DiscoveryError, MultiServerDiscovery, SelectMode};
use gpmd_protocol::SERVERS_HEADER;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// How long a pulled server list stays fresh.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(10);

/// Discovery backed by a gpmd registry.
///
/// Wraps the static discovery with a TTL cache: `get`/`get_all` refresh
/// first, and `refresh` only hits the registry once the last pull has
/// expired.
pub struct RegistryDiscovery {
    inner: MultiServerDiscovery,
    registry: String,
    ttl: Duration,
    http: reqwest::Client,
    last_update: Mutex<Option<Instant>>,
}

impl RegistryDiscovery {
    /// Creates a discovery pulling from `registry` (the full URL of the
    /// registry path). A `ttl` of `None` uses [`DEFAULT_REFRESH_TTL`].
    pub fn new(registry: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            inner: MultiServerDiscovery::new(Vec::new()),
            registry: registry.into(),
            ttl: ttl.unwrap_or(DEFAULT_REFRESH_TTL),
            http: reqwest::Client::new(),
            last_update: Mutex::new(None),
        }
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .is_some_and(|at| at.elapsed() < self.ttl)
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<(), DiscoveryError> {
        if self.is_fresh() {
            return Ok(());
        }

        tracing::debug!("refreshing server list from {}", self.registry);
        let response = self.http.get(&self.registry).send().await?;
        let raw = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let servers: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(String::from)
            .collect();

        self.inner.update(servers).await?;
        *self.last_update.lock() = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), DiscoveryError> {
        self.inner.update(servers).await?;
        *self.last_update.lock() = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, DiscoveryError> {
        self.refresh().await?;
        self.inner.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>, DiscoveryError> {
        self.refresh().await?;
        self.inner.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_update_marks_fresh() {
        // An unreachable registry URL: refresh would fail if it ran.
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/_gpmd_/registry", None);
        discovery
            .update(vec!["127.0.0.1:9001".to_string()])
            .await
            .unwrap();

        // Within the TTL, get must not touch the registry.
        let pick = discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert_eq!(pick, "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn test_stale_refresh_propagates_fetch_errors() {
        let discovery = RegistryDiscovery::new(
            "http://127.0.0.1:1/_gpmd_/registry",
            Some(Duration::ZERO),
        );
        assert!(matches!(
            discovery.get(SelectMode::Random).await,
            Err(DiscoveryError::Registry(_))
        ));
    }
}
