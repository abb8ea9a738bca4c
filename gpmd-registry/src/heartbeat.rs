//! Heartbeat client for registered servers.

use crate::error::RegistryError;
use crate::registry::DEFAULT_TIMEOUT;
use gpmd_protocol::SERVERS_HEADER;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Starts heartbeating `addr` to the registry at `registry_url`.
///
/// One POST goes out immediately, then one per `period`. The default
/// period leaves a minute of slack before the registry's default entry
/// timeout. The task stops on the first send error, dropping the server
/// out of the directory once its entry expires.
pub fn heartbeat(
    registry_url: impl Into<String>,
    addr: impl Into<String>,
    period: Option<Duration>,
) -> JoinHandle<()> {
    let registry_url = registry_url.into();
    let addr = addr.into();
    let period = period.unwrap_or_else(|| DEFAULT_TIMEOUT - Duration::from_secs(60));

    tokio::spawn(async move {
        let http = reqwest::Client::new();
        if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
            tracing::warn!("heartbeat to {} failed: {}", registry_url, e);
            return;
        }

        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
                tracing::warn!("heartbeat to {} failed, stopping: {}", registry_url, e);
                break;
            }
        }
    })
}

async fn send_heartbeat(
    http: &reqwest::Client,
    registry_url: &str,
    addr: &str,
) -> Result<(), RegistryError> {
    tracing::debug!("{} sending heartbeat to {}", addr, registry_url);
    http.post(registry_url)
        .header(SERVERS_HEADER, addr)
        .send()
        .await?;
    Ok(())
}
