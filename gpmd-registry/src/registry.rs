//! The registry itself and its HTTP surface.

use crate::error::RegistryError;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use gpmd_protocol::SERVERS_HEADER;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Default lifetime of a registry entry without a fresh heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Directory of alive servers, keyed by address.
///
/// An entry is alive while `now - last_heartbeat <= timeout`; a zero
/// timeout means entries never expire. Expired entries are purged as a
/// side effect of reading the alive set.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts a server, refreshing its heartbeat stamp.
    pub fn put_server(&self, addr: impl Into<String>) {
        let addr = addr.into();
        tracing::debug!("heartbeat from {}", addr);
        self.servers.lock().insert(addr, Instant::now());
    }

    /// Purges expired entries and returns the sorted alive set.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock();
        if !self.timeout.is_zero() {
            let now = Instant::now();
            servers.retain(|_, heartbeat| now.duration_since(*heartbeat) <= self.timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Builds the HTTP router serving this registry at `path`.
    ///
    /// GET answers with the alive set in [`SERVERS_HEADER`]; POST upserts
    /// the address carried in the same header. Other methods get a 405
    /// from the method router.
    pub fn into_router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(get_servers).post(post_server))
            .with_state(self)
    }

    /// Serves the registry on `listener` until the server fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, path: &str) -> Result<(), RegistryError> {
        let app = self.into_router(path);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    (StatusCode::OK, [(SERVERS_HEADER, alive)])
}

async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(SERVERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    match addr {
        Some(addr) => {
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
