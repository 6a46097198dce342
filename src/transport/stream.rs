use super::{Payload, Transport, TransportEvent};
use crate::error::TransportError;
use async_bincode::tokio::AsyncBincodeStream;
use futures::{future::BoxFuture, Sink, SinkExt, StreamExt};
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc,
    task::JoinHandle,
};

type BoxSink = Pin<Box<dyn Sink<Payload, Error = TransportError> + Send>>;

/// Bincode-framed messages over any byte stream.
pub struct StreamTransport {
    sink: Arc<tokio::sync::Mutex<Option<BoxSink>>>,
    open: Arc<AtomicBool>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    closed_tx: mpsc::UnboundedSender<TransportEvent>,
    reader: JoinHandle<()>,
}

impl StreamTransport {
    /// Wraps an already connected stream. Must be called inside a tokio runtime.
    pub fn new<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = AsyncBincodeStream::<_, Payload, Payload, _>::from(io).for_async();
        let (sink, mut stream) = framed.split();
        let sink: BoxSink = Box::pin(sink.sink_map_err(|e| TransportError::Io(e.to_string())));

        let open = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        let closed_tx = tx.clone();
        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(payload) => {
                        if tx.send(TransportEvent::DataReceived(payload)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("stream transport read error: {e}");
                        let _ = tx.send(TransportEvent::Errored(e.to_string()));
                        break;
                    }
                }
            }
            if reader_open.swap(false, Ordering::SeqCst) {
                let _ = tx.send(TransportEvent::Closed);
            }
        });

        Self {
            sink: Arc::new(tokio::sync::Mutex::new(Some(sink))),
            open,
            events: Mutex::new(Some(rx)),
            closed_tx,
            reader,
        }
    }

    /// Dials `addr` over TCP. The caller connects out; nothing listens here.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let sock = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self::new(BufStream::new(sock)))
    }
}

impl Transport for StreamTransport {
    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            let mut sink = self.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send(payload).await,
                None => Err(TransportError::Closed),
            }
        })
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
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.reader.abort();
        let _ = self.closed_tx.send(TransportEvent::Closed);

        let sink = self.sink.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(mut sink) = sink.lock().await.take() {
                    let _ = sink.close().await;
                }
            });
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test]
    async fn frames_survive_the_byte_stream() {
        let (left, right) = tokio::io::duplex(1024);
        let a = StreamTransport::new(left);
        let b = StreamTransport::new(right);
        let mut b_events = b.subscribe().unwrap();

        let msg = vec![Value::from("?"), Value::from("id"), Value::List(vec![Value::Float(0.5)])];
        a.send(msg.clone()).await.unwrap();
        assert_eq!(b_events.recv().await, Some(TransportEvent::DataReceived(msg)));
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (left, right) = tokio::io::duplex(1024);
        let a = StreamTransport::new(left);
        let b = StreamTransport::new(right);
        let mut b_events = b.subscribe().unwrap();

        a.close();
        drop(a);
        assert_eq!(b_events.recv().await, Some(TransportEvent::Closed));
        assert!(!b.is_open());
        assert_eq!(b.send(vec![]).await, Err(TransportError::Closed));
    }
}
