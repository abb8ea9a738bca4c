//! Service discovery and load balancing.

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;

/// Load-balancing policy for [`Discovery::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectMode {
    /// Uniform random choice over the current list.
    Random,
    /// Cursor advancing modulo the list size.
    RoundRobin,
}

/// Discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no available servers")]
    NoAvailableServers,

    /// Reserved for selection policies a discovery does not implement.
    #[error("select mode not supported")]
    UnsupportedMode,

    #[error("registry fetch failed: {0}")]
    Registry(#[from] reqwest::Error),
}

/// Maintains a server list and picks one endpoint per invocation.
pub trait Discovery {
    /// Pulls the current server list from the authoritative source.
    fn refresh(&self) -> impl std::future::Future<Output = Result<(), DiscoveryError>> + Send;

    /// Replaces the server list.
    fn update(
        &self,
        servers: Vec<String>,
    ) -> impl std::future::Future<Output = Result<(), DiscoveryError>> + Send;

    /// Selects one server according to `mode`.
    fn get(
        &self,
        mode: SelectMode,
    ) -> impl std::future::Future<Output = Result<String, DiscoveryError>> + Send;

    /// Returns a snapshot of all servers.
    fn get_all(&self) -> impl std::future::Future<Output = Result<Vec<String>, DiscoveryError>> + Send;
}

struct BalancerState {
    servers: Vec<String>,
    /// Round-robin cursor, seeded randomly so replicas starting from the
    /// same list do not hammer the same server.
    index: usize,
}

/// Discovery over a fixed, manually-updated server list.
pub struct MultiServerDiscovery {
    state: Mutex<BalancerState>,
}

impl MultiServerDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..u32::MAX as usize);
        Self {
            state: Mutex::new(BalancerState { servers, index }),
        }
    }
}

impl Discovery for MultiServerDiscovery {
    async fn refresh(&self) -> Result<(), DiscoveryError> {
        // A static list has no authoritative source to pull from.
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), DiscoveryError> {
        self.state.lock().servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, DiscoveryError> {
        let mut state = self.state.lock();
        let n = state.servers.len();
        if n == 0 {
            return Err(DiscoveryError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let pick = rand::thread_rng().gen_range(0..n);
                Ok(state.servers[pick].clone())
            }
            SelectMode::RoundRobin => {
                let pick = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(pick)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.state.lock().servers.clone())
    }
}
