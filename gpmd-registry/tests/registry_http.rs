//! Registry lifecycle over real HTTP.

use gpmd_registry::{heartbeat, Registry, REGISTRY_PATH, SERVERS_HEADER};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_registry(timeout: Duration) -> String {
    let registry = Arc::new(Registry::new(timeout));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = registry.serve(listener, REGISTRY_PATH).await;
    });
    format!("http://{}{}", addr, REGISTRY_PATH)
}

async fn get_servers(http: &reqwest::Client, url: &str) -> Vec<String> {
    let response = http.get(url).send().await.unwrap();
    assert!(response.status().is_success());
    let raw = response
        .headers()
        .get(SERVERS_HEADER)
        .expect("servers header missing")
        .to_str()
        .unwrap();
    raw.split(',')
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

async fn post_server(http: &reqwest::Client, url: &str, addr: &str) {
    let status = http
        .post(url)
        .header(SERVERS_HEADER, addr)
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success());
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let url = start_registry(Duration::from_secs(2)).await;
    let http = reqwest::Client::new();

    // A posted server is visible while its entry is fresh.
    post_server(&http, &url, "127.0.0.1:9001").await;
    assert_eq!(get_servers(&http, &url).await, vec!["127.0.0.1:9001"]);

    // Past the timeout without another heartbeat, it expires.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(get_servers(&http, &url).await.is_empty());

    // New heartbeats repopulate the directory, sorted.
    post_server(&http, &url, "127.0.0.1:9002").await;
    post_server(&http, &url, "127.0.0.1:9001").await;
    assert_eq!(
        get_servers(&http, &url).await,
        vec!["127.0.0.1:9001", "127.0.0.1:9002"]
    );
}

#[tokio::test]
async fn test_post_without_header_is_rejected() {
    let url = start_registry(Duration::from_secs(60)).await;
    let http = reqwest::Client::new();

    let status = http.post(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 500);

    // An empty header value counts as missing.
    let status = http
        .post(&url)
        .header(SERVERS_HEADER, "  ")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 500);
}

#[tokio::test]
async fn test_other_methods_not_allowed() {
    let url = start_registry(Duration::from_secs(60)).await;
    let http = reqwest::Client::new();

    let status = http.delete(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 405);
}

#[tokio::test]
async fn test_heartbeat_keeps_entry_alive() {
    let url = start_registry(Duration::from_millis(400)).await;
    let http = reqwest::Client::new();

    let handle = heartbeat(
        url.clone(),
        "127.0.0.1:9001",
        Some(Duration::from_millis(100)),
    );

    // Several entry lifetimes later the address is still listed.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(get_servers(&http, &url).await, vec!["127.0.0.1:9001"]);

    // Once the heartbeat stops, the entry ages out.
    handle.abort();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(get_servers(&http, &url).await.is_empty());
}
