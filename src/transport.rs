//! The channel the dispatcher talks over.
//!
//! Establishing and tearing down the underlying link is the adapter's job;
//! the dispatcher only needs to send ordered messages, ask whether the link
//! is open, and receive its events.

pub mod memory;
pub mod stream;

use crate::{error::TransportError, types::Value};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub use memory::MemoryTransport;
pub use stream::StreamTransport;

/// One message: an ordered, heterogeneous sequence of values.
pub type Payload = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Errored(String),
    DataReceived(Payload),
}

pub trait Transport: Send + Sync + 'static {
    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), TransportError>>;

    fn is_open(&self) -> bool;

    /// Hands out the event stream. Only the first caller gets it.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Releases the link. Idempotent.
    fn close(&self);
}
