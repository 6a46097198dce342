use super::{Payload, Transport, TransportEvent};
use crate::error::TransportError;
use futures::future::{ready, BoxFuture};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::mpsc;

/// One end of an in-process channel pair.
pub struct MemoryTransport {
    open: Arc<AtomicBool>,
    own_events: mpsc::UnboundedSender<TransportEvent>,
    peer_events: mpsc::UnboundedSender<TransportEvent>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MemoryTransport {
    /// Two linked ends, already open.
    pub fn pair() -> (Self, Self) {
        let (a, b) = Self::pending_pair();
        a.open.store(true, Ordering::SeqCst);
        (a, b)
    }

    /// Two linked ends that stay closed until [`open`](Self::open) is called.
    pub fn pending_pair() -> (Self, Self) {
        let open = Arc::new(AtomicBool::new(false));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            open: open.clone(),
            own_events: a_tx.clone(),
            peer_events: b_tx.clone(),
            events: Mutex::new(Some(a_rx)),
        };
        let b = Self {
            open,
            own_events: b_tx,
            peer_events: a_tx,
            events: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }

    /// Opens the link, firing `Opened` on both ends.
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.broadcast(TransportEvent::Opened);
        }
    }

    /// Fires `Errored` on this end without closing.
    pub fn fail(&self, info: impl Into<String>) {
        let _ = self.own_events.send(TransportEvent::Errored(info.into()));
    }

    fn broadcast(&self, event: TransportEvent) {
        let _ = self.own_events.send(event.clone());
        let _ = self.peer_events.send(event);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), TransportError>> {
        let sent = if self.is_open() {
            self.peer_events
                .send(TransportEvent::DataReceived(payload))
                .map_err(|_| TransportError::Closed)
        } else {
            Err(TransportError::Closed)
        };
        Box::pin(ready(sent))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broadcast(TransportEvent::Closed);
        }
    }
}
