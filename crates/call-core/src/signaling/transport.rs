//! Transport seam
//!
//! The core never owns sockets. It hands a message and a connection handle
//! to a `SignalTransport`, which performs the actual delivery.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::message::SignalingMessage;
use crate::errors::{CallError, Result};
use crate::presence::ConnectionHandle;

/// Outbound delivery to one connection
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Hand `message` to the connection behind `handle`.
    ///
    /// An error means the connection is gone; the relay reports the
    /// receiver as offline.
    async fn send(&self, handle: &ConnectionHandle, message: &SignalingMessage) -> Result<()>;
}

/// In-process transport: one unbounded queue per connection.
///
/// Suitable for embedding the core next to a websocket server (each socket
/// task drains its receiver) and for tests.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    outboxes: DashMap<ConnectionHandle, mpsc::UnboundedSender<SignalingMessage>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection and return its handle and inbound queue
    pub fn open(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<SignalingMessage>) {
        let handle = ConnectionHandle::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(handle.clone(), tx);
        debug!("Opened channel connection {}", handle);
        (handle, rx)
    }

    /// Close a connection. Returns false if it was not open.
    pub fn close(&self, handle: &ConnectionHandle) -> bool {
        self.outboxes.remove(handle).is_some()
    }

    pub fn is_open(&self, handle: &ConnectionHandle) -> bool {
        self.outboxes
            .get(handle)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn open_count(&self) -> usize {
        self.outboxes.len()
    }
}

#[async_trait]
impl SignalTransport for ChannelTransport {
    async fn send(&self, handle: &ConnectionHandle, message: &SignalingMessage) -> Result<()> {
        let tx = self
            .outboxes
            .get(handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CallError::transport(format!("unknown connection {}", handle)))?;

        tx.send(message.clone())
            .map_err(|_| CallError::transport(format!("connection {} closed", handle)))
    }
}
