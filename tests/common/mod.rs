#![allow(dead_code)]

use peerwire::{
    Dispatcher, MemoryTransport, MethodMeta, MethodRegistry, MethodSignature, Transport,
    TransportEvent, Type, Value,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn add_sig() -> MethodSignature {
    MethodSignature::function("Math", "add")
        .positional("a", Type::Int)
        .positional("b", Type::Int)
        .returns(Type::Int)
}

pub fn log_sig() -> MethodSignature {
    MethodSignature::function("Console", "log")
        .positional("msg", Type::String)
        .no_reply()
}

pub fn math_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register(add_sig(), MethodMeta::public(), |inv: peerwire::Invocation| async move {
        anyhow::Ok(inv.value::<i64>(0)? + inv.value::<i64>(1)?)
    });
    registry
}

/// A dispatcher on one end, the bare transport on the other.
pub fn dispatcher_and_raw() -> (Dispatcher, MemoryTransport, UnboundedReceiver<TransportEvent>) {
    let (a, b) = MemoryTransport::pair();
    let raw_events = b.subscribe().expect("fresh transport");
    let dispatcher = Dispatcher::builder(a).registry(math_registry()).build();
    (dispatcher, b, raw_events)
}

/// Next non-handshake message seen by the raw end.
pub async fn next_message(events: &mut UnboundedReceiver<TransportEvent>) -> Vec<Value> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("event stream ended");
        if let TransportEvent::DataReceived(payload) = event {
            if payload.get(2).and_then(Value::as_str) == Some("!ready") {
                continue;
            }
            return payload;
        }
    }
}

pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never held");
}
