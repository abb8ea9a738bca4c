//! Call multiplexer over a single RPC connection.
//!
//! A `Client` pairs a send path (serialized by one write lock) with a
//! background receive task that demultiplexes responses back to their
//! callers through the pending map. State transitions (sequence counter,
//! pending calls, `closing`/`shutdown` flags) happen under a separate lock
//! that is never held across I/O.

use crate::error::ClientError;
use bytes::Bytes;
use gpmd_protocol::{BodyCodec, Decoder, Encoder, Header, Options};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// A completed (or failed) invocation, delivered on the caller's
/// completion channel.
#[derive(Debug)]
pub struct Call {
    /// Sequence assigned when the call was registered (0 if registration
    /// never happened).
    pub seq: u64,

    /// Invocation target of the form `<service>.<method>`.
    pub service_method: String,

    /// Encoded reply body on success.
    pub reply: Option<Bytes>,

    /// Failure, when the call did not complete successfully.
    pub error: Option<ClientError>,
}

impl Call {
    /// Consumes the call, yielding the encoded reply or the error.
    pub fn into_result(self) -> Result<Bytes, ClientError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply.unwrap_or_default()),
        }
    }

    /// Consumes the call and decodes the reply with the connection's codec
    /// (see [`Client::codec`]).
    pub fn reply_as<R: DeserializeOwned>(self, codec: &BodyCodec) -> Result<R, ClientError> {
        let reply = self.into_result()?;
        codec
            .decode(&reply)
            .map_err(|e| ClientError::ReadBody(e.to_string()))
    }
}

/// An in-flight call waiting for its response.
struct PendingCall {
    service_method: String,
    done: mpsc::Sender<Call>,
}

/// State guarded by the client's state lock.
struct ClientState {
    /// Next sequence number to assign.
    seq: u64,
    /// In-flight calls keyed by sequence.
    pending: HashMap<u64, PendingCall>,
    /// Set by `close`.
    closing: bool,
    /// Set when the receive loop terminates.
    shutdown: bool,
}

struct Shared {
    codec: BodyCodec,
    options: Options,
    /// Send lock: serializes frame writes. Held across the write so frames
    /// never interleave.
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// State lock: never held across an await point.
    state: Mutex<ClientState>,
}

/// RPC client. Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connects with the default options.
    pub async fn dial(addr: &str) -> Result<Self, ClientError> {
        Self::dial_with(addr, Options::default()).await
    }

    /// Connects to `addr` and performs the options handshake.
    ///
    /// When `connect_timeout` is non-zero the whole connect-and-handshake
    /// sequence races a timer; losing the race drops the connection and
    /// returns [`ClientError::ConnectTimeout`].
    pub async fn dial_with(addr: &str, options: Options) -> Result<Self, ClientError> {
        let codec = BodyCodec::from_name(&options.codec_type)?;

        let connect_timeout = options.connect_timeout;
        let connect = Self::connect(addr, codec, options);
        if connect_timeout.is_zero() {
            connect.await
        } else {
            match tokio::time::timeout(connect_timeout, connect).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::ConnectTimeout(connect_timeout)),
            }
        }
    }

    async fn connect(addr: &str, codec: BodyCodec, options: Options) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (reader, mut writer) = stream.into_split();

        // The options line goes out before any codec-specific traffic.
        writer
            .write_all(&Encoder::encode_options(&options)?)
            .await?;

        let shared = Arc::new(Shared {
            codec,
            options,
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });
        tokio::spawn(Self::receive(shared.clone(), reader));

        tracing::debug!("connected to {} ({})", addr, codec.name());
        Ok(Self { shared })
    }

    /// Starts an asynchronous call.
    ///
    /// The outcome arrives as a [`Call`] on `done`, which must have
    /// capacity for it (tokio channels always have capacity >= 1; a
    /// zero-capacity channel panics at construction). Every submitted call
    /// is delivered exactly once, including on registration and send
    /// failures.
    pub async fn go<A: Serialize>(
        &self,
        service_method: &str,
        args: &A,
        done: mpsc::Sender<Call>,
    ) {
        let body = match self.shared.codec.encode(args) {
            Ok(body) => body,
            Err(e) => {
                deliver(&done, failed_call(0, service_method, e.into())).await;
                return;
            }
        };

        let mut writer = self.shared.writer.lock().await;

        // Register under the send lock so the first frame for a sequence
        // cannot race its response.
        let seq = {
            let mut state = self.shared.state.lock();
            if state.closing || state.shutdown {
                None
            } else {
                let seq = state.seq;
                state.seq += 1;
                state.pending.insert(
                    seq,
                    PendingCall {
                        service_method: service_method.to_string(),
                        done: done.clone(),
                    },
                );
                Some(seq)
            }
        };
        let Some(seq) = seq else {
            drop(writer);
            deliver(&done, failed_call(0, service_method, ClientError::Shutdown)).await;
            return;
        };

        let header = Header::request(service_method, seq);
        let frame = match Encoder::encode_raw(&self.shared.codec, &header, Bytes::from(body)) {
            Ok(frame) => frame,
            Err(e) => {
                drop(writer);
                self.fail_pending(seq, e.into()).await;
                return;
            }
        };

        if let Err(e) = writer.write_all(&frame).await {
            drop(writer);
            // The receiver may already have evicted the call; only signal
            // if it is still ours.
            self.fail_pending(seq, e.into()).await;
        }
    }

    /// Synchronous call: submits and awaits the completion signal.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let (done, mut completed) = mpsc::channel(1);
        self.go(service_method, args, done).await;
        let call = completed.recv().await.ok_or(ClientError::Shutdown)?;
        call.reply_as(&self.shared.codec)
    }

    /// Marks the client closing and shuts the connection down.
    ///
    /// Pending calls are signalled by the receive loop once the peer
    /// drains; a second close returns [`ClientError::Shutdown`].
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.lock();
            if state.closing {
                return Err(ClientError::Shutdown);
            }
            state.closing = true;
        }
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Whether calls can still be submitted.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state.lock();
        !state.closing && !state.shutdown
    }

    /// The body codec negotiated for this connection.
    pub fn codec(&self) -> BodyCodec {
        self.shared.codec
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Removes `seq` from pending (if still there) and signals it with
    /// `error`.
    async fn fail_pending(&self, seq: u64, error: ClientError) {
        let removed = self.shared.state.lock().pending.remove(&seq);
        if let Some(pending) = removed {
            let call = failed_call(seq, &pending.service_method, error);
            deliver(&pending.done, call).await;
        }
    }

    /// Background receive loop: demultiplexes responses until the
    /// connection dies, then fans the terminating error out to every
    /// pending call.
    async fn receive(shared: Arc<Shared>, mut reader: OwnedReadHalf) {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];

        let reason = loop {
            match decoder.decode_message(&shared.codec) {
                Ok(Some((header, body))) => {
                    let removed = shared.state.lock().pending.remove(&header.seq);
                    match removed {
                        // A send failure already evicted this call; the
                        // frame was consumed whole, so just move on.
                        None => {}
                        Some(pending) => {
                            let mut call = Call {
                                seq: header.seq,
                                service_method: pending.service_method,
                                reply: None,
                                error: None,
                            };
                            if header.has_error() {
                                call.error = Some(ClientError::Server(header.error));
                            } else {
                                call.reply = Some(body);
                            }
                            deliver(&pending.done, call).await;
                        }
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => break ClientError::Protocol(e),
            }

            match reader.read(&mut buf).await {
                Ok(0) => break ClientError::ConnectionClosed,
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => break ClientError::Io(e),
            }
        };

        Self::terminate(&shared, reason).await;
    }

    /// Marks the client shut down and signals every pending call.
    async fn terminate(shared: &Arc<Shared>, reason: ClientError) {
        // Send lock first, then state lock: a sender past registration
        // finishes its write before we drain.
        let writer = shared.writer.lock().await;
        let (closing, drained): (bool, Vec<(u64, PendingCall)>) = {
            let mut state = shared.state.lock();
            state.shutdown = true;
            (state.closing, state.pending.drain().collect())
        };
        drop(writer);

        if !drained.is_empty() {
            tracing::debug!("terminating {} pending calls: {}", drained.len(), reason);
        }

        // Signal outside all locks.
        for (seq, pending) in drained {
            let error = if closing {
                ClientError::Shutdown
            } else {
                ClientError::ConnectionLost(reason.to_string())
            };
            let call = failed_call(seq, &pending.service_method, error);
            deliver(&pending.done, call).await;
        }
    }
}

fn failed_call(seq: u64, service_method: &str, error: ClientError) -> Call {
    Call {
        seq,
        service_method: service_method.to_string(),
        reply: None,
        error: Some(error),
    }
}

/// Signals a completion channel, tolerating callers that went away.
async fn deliver(done: &mpsc::Sender<Call>, call: Call) {
    if done.send(call).await.is_err() {
        tracing::debug!("completion channel dropped before delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection and reads until EOF without responding.
    async fn silent_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while stream.read(&mut buf).await.unwrap_or(0) > 0 {}
        });
        addr
    }

    #[tokio::test]
    async fn test_dial_and_close() {
        let addr = silent_server().await;
        let client = Client::dial(&addr.to_string()).await.unwrap();
        assert!(client.is_available());

        client.close().await.unwrap();
        assert!(!client.is_available());

        // Double close reports shutdown.
        assert!(matches!(client.close().await, Err(ClientError::Shutdown)));
    }

    #[tokio::test]
    async fn test_calls_after_close_fail_with_shutdown() {
        let addr = silent_server().await;
        let client = Client::dial(&addr.to_string()).await.unwrap();
        client.close().await.unwrap();

        let err = client.call::<i32, i32>("Foo.Sum", &1).await.unwrap_err();
        assert!(matches!(err, ClientError::Shutdown));
    }

    #[tokio::test]
    async fn test_peer_eof_terminates_pending_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            // Accept, swallow the handshake, then hang up on demand.
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = close_rx.await;
        });

        let client = Client::dial(&addr.to_string()).await.unwrap();
        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call::<i32, i32>("Foo.Sum", &1).await });

        // Let the call register and reach the wire, then drop the server.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = close_tx.send(());

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost(_)));
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_unknown_codec_rejected_before_connecting() {
        use gpmd_protocol::ProtocolError;

        let options = Options::default().with_codec("application/xml");
        let err = Client::dial_with("127.0.0.1:1", options).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnknownCodec(_))
        ));
    }
}
