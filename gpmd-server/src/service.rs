//! Typed service registration and per-method dispatch.
//!
//! A service is built from any plain value: the builder derives the
//! service name from the receiver's bare type name and records one
//! dispatch handler per exported method. Handlers follow the
//! argument/reply-carrier shape `Fn(&T, A, &mut R) -> Result<(), MethodError>`:
//! the argument is decoded into a fresh `A`, the reply carrier starts as
//! `R::default()` (so map- and vector-valued replies begin empty rather
//! than null), and the handler's error text is surfaced verbatim to the
//! caller.

use crate::error::ServerError;
use bytes::Bytes;
use gpmd_protocol::BodyCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a service method.
///
/// The text is placed in the response header exactly as written.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MethodError(String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

type DispatchFn = Box<dyn Fn(&BodyCodec, &[u8]) -> Result<Vec<u8>, ServerError> + Send + Sync>;

/// One callable method of a registered service.
pub struct MethodDescriptor {
    handler: DispatchFn,
    calls: AtomicU64,
}

impl MethodDescriptor {
    /// Number of dispatch attempts so far.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Decodes the argument, invokes the handler, and encodes the reply.
    pub(crate) fn dispatch(&self, codec: &BodyCodec, body: &[u8]) -> Result<Vec<u8>, ServerError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(codec, body)
    }
}

/// A named collection of methods reachable through dispatch.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Builds a [`Service`] from a receiver value and its methods.
pub struct ServiceBuilder<T> {
    receiver: Arc<T>,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    pub fn new(receiver: T) -> Self {
        Self {
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// Registers a method under `name`.
    ///
    /// Names that are not exported identifiers (leading uppercase) are
    /// skipped; the rest of the eligibility rules are carried by the
    /// handler signature itself.
    pub fn method<A, R, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(&T, A, &mut R) -> Result<(), MethodError> + Send + Sync + 'static,
    {
        if !is_exported(name) {
            tracing::debug!("skipping unexported method {}", name);
            return self;
        }

        let receiver = self.receiver.clone();
        let handler = move |codec: &BodyCodec, body: &[u8]| -> Result<Vec<u8>, ServerError> {
            let argv: A = codec.decode(body)?;
            let mut replyv = R::default();
            f(&receiver, argv, &mut replyv)?;
            Ok(codec.encode(&replyv)?)
        };

        self.methods.insert(
            name.to_string(),
            Arc::new(MethodDescriptor {
                handler: Box::new(handler),
                calls: AtomicU64::new(0),
            }),
        );
        self
    }

    /// Finalizes the service, deriving its name from the receiver type.
    ///
    /// Fails fast when the type name is not an exported identifier.
    pub fn build(self) -> Result<Service, ServerError> {
        let name = short_type_name::<T>();
        if !is_exported(&name) {
            return Err(ServerError::InvalidServiceName(name));
        }
        for method in self.methods.keys() {
            tracing::debug!("service {}: registered method {}", name, method);
        }
        Ok(Service {
            name,
            methods: self.methods,
        })
    }
}

/// Placeholder response body used whenever a request fails.
pub(crate) fn invalid_request_body(codec: &BodyCodec) -> Bytes {
    // Encoding a unit value cannot fail in either codec.
    Bytes::from(codec.encode(&()).unwrap_or_default())
}

fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}
