//! TCP server implementation.
//!
//! One task per accepted connection runs the serve loop; each request is
//! dispatched in its own task and joined before the connection is dropped.
//! All frame writes for a connection serialize through a single lock, so a
//! response is always emitted whole.

use crate::error::ServerError;
use crate::service::{invalid_request_body, MethodDescriptor, MethodError, Service};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gpmd_protocol::{BodyCodec, Decoder, Encoder, Header, MAGIC};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// RPC server: a concurrent service map plus the accept/serve loops.
///
/// Cloning is cheap and clones share the same service map, so services may
/// be registered before or after serving starts.
#[derive(Clone, Default)]
pub struct Server {
    services: Arc<DashMap<String, Arc<Service>>>,
    stats: Arc<ServerStats>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its type-derived name.
    pub fn register(&self, service: Service) -> Result<(), ServerError> {
        let name = service.name().to_string();
        match self.services.entry(name) {
            Entry::Occupied(entry) => Err(ServerError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!("registered service {}", service.name());
                entry.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Resolves `"<service>.<method>"`, splitting on the last dot.
    fn find_method(&self, service_method: &str) -> Result<Arc<MethodDescriptor>, ServerError> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| ServerError::IllFormedRequest(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| ServerError::UnknownService(service_name.to_string()))?
            .clone();
        service
            .method(method_name)
            .ok_or_else(|| ServerError::UnknownMethod(method_name.to_string()))
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("server listening on {}", addr);
        }

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                    return Err(e.into());
                }
            };

            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(stream, addr).await {
                    tracing::debug!("connection {} error: {}", addr, e);
                    server.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                }
                server
                    .stats
                    .connections_active
                    .fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    /// Handles a single connection: handshake, serve loop, drain.
    async fn serve_conn(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        stream.set_nodelay(true).ok();
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];

        // The options line arrives before any framed traffic.
        let options = loop {
            if let Some(options) = decoder.decode_options()? {
                break options;
            }
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                // Peer went away before handshaking.
                return Ok(());
            }
            decoder.extend(&buf[..n]);
        };

        if options.magic != MAGIC {
            return Err(ServerError::InvalidMagic(options.magic));
        }
        let codec = BodyCodec::from_name(&options.codec_type)?;

        tracing::info!("client connected: {} ({})", addr, codec.name());

        let mut inflight = JoinSet::new();
        let result = 'serve: loop {
            // Drain every complete message before reading again.
            loop {
                let (header, body) = match decoder.decode_message(&codec) {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => break 'serve Err(ServerError::Protocol(e)),
                };

                self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "[{}] request {} seq={}",
                    addr,
                    header.service_method,
                    header.seq
                );

                match self.find_method(&header.service_method) {
                    Ok(method) => {
                        inflight.spawn(handle_request(
                            codec,
                            header,
                            body,
                            method,
                            writer.clone(),
                            options.handle_timeout,
                        ));
                    }
                    Err(e) => {
                        // Per-request failure: report it and keep serving.
                        self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        let mut header = header;
                        header.error = e.to_string();
                        if let Err(e) = send_response(&writer, &codec, &header, None).await {
                            break 'serve Err(e);
                        }
                    }
                }
            }

            match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => break Err(ServerError::Io(e)),
            }
        };

        // Wait for in-flight dispatches before dropping the connection.
        while inflight.join_next().await.is_some() {}

        tracing::info!("client disconnected: {}", addr);
        result
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Runs one request to completion and emits exactly one response.
///
/// The method itself runs on the blocking pool. When a handle timeout is
/// configured the dispatch is raced against it; on timeout the method keeps
/// running but its result is dropped, so the timeout response below is the
/// only response this request can ever produce.
async fn handle_request(
    codec: BodyCodec,
    mut header: Header,
    body: Bytes,
    method: Arc<MethodDescriptor>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    timeout: Duration,
) {
    let dispatch = tokio::task::spawn_blocking(move || method.dispatch(&codec, &body));

    let joined = if timeout.is_zero() {
        dispatch.await
    } else {
        match tokio::time::timeout(timeout, dispatch).await {
            Ok(joined) => joined,
            Err(_) => {
                header.error = format!("request handle timeout: expect within {:?}", timeout);
                log_write(send_response(&writer, &codec, &header, None).await);
                return;
            }
        }
    };

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => Err(MethodError::new(format!("method panicked: {e}")).into()),
    };

    match outcome {
        Ok(reply) => {
            log_write(send_response(&writer, &codec, &header, Some(Bytes::from(reply))).await);
        }
        Err(e) => {
            header.error = e.to_string();
            log_write(send_response(&writer, &codec, &header, None).await);
        }
    }
}

/// Writes one response frame under the connection's write lock.
///
/// `None` stands for the invalid-request placeholder body used on every
/// error path.
async fn send_response(
    writer: &Mutex<OwnedWriteHalf>,
    codec: &BodyCodec,
    header: &Header,
    reply: Option<Bytes>,
) -> Result<(), ServerError> {
    let body = reply.unwrap_or_else(|| invalid_request_body(codec));
    let frame = Encoder::encode_raw(codec, header, body)?;
    let mut writer = writer.lock().await;
    writer.write_all(&frame).await?;
    Ok(())
}

fn log_write(result: Result<(), ServerError>) {
    if let Err(e) = result {
        tracing::warn!("write response error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;
    use gpmd_protocol::Options;
    use serde::{Deserialize, Serialize};

    struct Foo;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i32,
        num2: i32,
    }

    fn foo_service() -> Service {
        ServiceBuilder::new(Foo)
            .method("Sum", |_foo: &Foo, args: Args, reply: &mut i32| {
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let server = Server::new();
        server.register(foo_service()).unwrap();
        let err = server.register(foo_service()).unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_find_method_resolution() {
        let server = Server::new();
        server.register(foo_service()).unwrap();

        assert!(server.find_method("Foo.Sum").is_ok());
        assert!(matches!(
            server.find_method("FooSum"),
            Err(ServerError::IllFormedRequest(_))
        ));
        assert!(matches!(
            server.find_method("Bar.Sum"),
            Err(ServerError::UnknownService(_))
        ));
        assert!(matches!(
            server.find_method("Foo.Nope"),
            Err(ServerError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_last_dot_splits_the_key() {
        // Only the final dot separates service from method.
        let server = Server::new();
        server.register(foo_service()).unwrap();
        assert!(matches!(
            server.find_method("a.Foo.Sum"),
            Err(ServerError::UnknownService(name)) if name == "a.Foo"
        ));
    }

    async fn spawn_server() -> SocketAddr {
        let server = Server::new();
        server.register(foo_service()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_rejects_bad_magic() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut options = Options::default();
        options.magic = 0xBAD;
        stream
            .write_all(&Encoder::encode_options(&options).unwrap())
            .await
            .unwrap();

        // The server drops the connection without a response.
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_rejects_unknown_codec() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let options = Options::default().with_codec("application/xml");
        stream
            .write_all(&Encoder::encode_options(&options).unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_raw_request_roundtrip() {
        let addr = spawn_server().await;
        let codec = BodyCodec::Gob;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(&Encoder::encode_options(&Options::default()).unwrap())
            .await
            .unwrap();
        let request = Encoder::encode_message(
            &codec,
            &Header::request("Foo.Sum", 1),
            &Args { num1: 3, num2: 4 },
        )
        .unwrap();
        stream.write_all(&request).await.unwrap();

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 1024];
        let (header, body) = loop {
            if let Some(message) = decoder.decode_message(&codec).unwrap() {
                break message;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before responding");
            decoder.extend(&buf[..n]);
        };

        assert_eq!(header.seq, 1);
        assert!(!header.has_error());
        let reply: i32 = codec.decode(&body).unwrap();
        assert_eq!(reply, 7);
    }
}
