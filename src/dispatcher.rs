use crate::{
    correlation::{CorrelationTable, ReplyPayload},
    descriptor::MethodDescriptor,
    error::{CallError, DispatchError},
    marshal,
    policy::{AccessPolicy, CallGuard},
    registry::{Invocation, MethodEntry, MethodRegistry},
    services::{Instance, NoServices, ServiceProvider},
    signature::MethodSignature,
    transport::{Payload, Transport, TransportEvent},
    types::{Decode, Type, TypeMismatch, Value},
    wire::{CorrelationId, Envelope, READY_DESCRIPTOR},
};
use futures::FutureExt;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, RwLock, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub policy: AccessPolicy,
    /// How long an awaited call waits for its reply. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Fail calls still awaiting a reply when the dispatcher is disposed.
    /// When `false` they keep waiting.
    pub fail_pending_on_dispose: bool,
    /// Whether inbound calls are accepted at startup.
    pub serving: bool,
    /// Tell the remote side we are ready whenever the channel opens.
    pub announce_ready: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::default(),
            call_timeout: None,
            fail_pending_on_dispose: true,
            serving: true,
            announce_ready: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Ready,
    Gone,
}

pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    registry: Arc<MethodRegistry>,
    services: Arc<dyn ServiceProvider>,
    guard: Option<Arc<dyn CallGuard>>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn registry(mut self, registry: impl Into<Arc<MethodRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn services(mut self, services: Arc<dyn ServiceProvider>) -> Self {
        self.services = services;
        self
    }

    pub fn guard(mut self, guard: impl CallGuard) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: AccessPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Binds to the transport and starts listening to it. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> Dispatcher {
        let DispatcherConfig {
            policy,
            call_timeout,
            fail_pending_on_dispose,
            serving,
            announce_ready,
        } = self.config;

        let dispatcher = Dispatcher {
            inner: Arc::new(Inner {
                transport: self.transport,
                registry: self.registry,
                services: self.services,
                guard: self.guard,
                pending: CorrelationTable::default(),
                policy: RwLock::new(policy),
                serving: AtomicBool::new(serving),
                readiness: watch::channel(Readiness::Waiting).0,
                disposed: AtomicBool::new(false),
                event_loop: Mutex::new(None),
                call_timeout,
                fail_pending_on_dispose,
                announce_ready,
            }),
        };

        match dispatcher.inner.transport.subscribe() {
            Some(events) => {
                let handle = tokio::spawn(event_loop(Arc::downgrade(&dispatcher.inner), events));
                *dispatcher.inner.event_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            None => tracing::warn!("transport events already taken; inbound messages will not be seen"),
        }
        if dispatcher.inner.transport.is_open() {
            dispatcher.spawn_ready_announcement();
        }
        dispatcher
    }
}

/// Issues calls to the remote side and serves the remote side's calls,
/// over one shared channel.
///
/// Cloning is cheap; all clones share one channel and one set of pending calls.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    registry: Arc<MethodRegistry>,
    services: Arc<dyn ServiceProvider>,
    guard: Option<Arc<dyn CallGuard>>,
    pending: CorrelationTable,
    policy: RwLock<AccessPolicy>,
    serving: AtomicBool,
    readiness: watch::Sender<Readiness>,
    disposed: AtomicBool,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    call_timeout: Option<Duration>,
    fail_pending_on_dispose: bool,
    announce_ready: bool,
}

impl Dispatcher {
    pub fn builder(transport: impl Transport) -> DispatcherBuilder {
        Self::builder_shared(Arc::new(transport))
    }

    pub fn builder_shared(transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder {
            transport,
            registry: Arc::default(),
            services: Arc::new(NoServices),
            guard: None,
            config: DispatcherConfig::default(),
        }
    }

    /// Calls `sig` on the remote side.
    ///
    /// `args` is the full parameter list in declaration order; values at
    /// locally bound positions are never sent. With `no_reply` (or when the
    /// method itself is marked no-reply) this returns as soon as the message
    /// is sent. Otherwise it waits for the reply and returns its result, or
    /// `None` for methods returning [`Type::Nil`].
    pub async fn invoke(
        &self,
        sig: &MethodSignature,
        args: Vec<Value>,
        no_reply: bool,
    ) -> Result<Option<Value>, CallError> {
        let inner = &self.inner;
        // Dispose closes the channel, so a disposed dispatcher normally
        // reports NotConnected; Disposed covers a transport reopened behind it.
        if !inner.transport.is_open() {
            return Err(CallError::NotConnected);
        }
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(CallError::Disposed);
        }

        let args = Value::List(marshal::prepare_outbound(sig, args)?);
        let descriptor = Value::String(sig.descriptor().to_string());

        if no_reply || sig.is_no_reply() {
            let id = CorrelationId::generate();
            tracing::debug!("message {id} -> {descriptor:?}");
            let envelope = Envelope::Call {
                id,
                expects_reply: false,
                descriptor,
                args,
            };
            inner.transport.send(envelope.into_payload()).await?;
            return Ok(None);
        }

        let (id, reply) = inner.pending.register();
        let pending = PendingGuard {
            table: &inner.pending,
            id: id.clone(),
        };
        tracing::debug!("call {id} -> {descriptor:?}");
        let envelope = Envelope::Call {
            id,
            expects_reply: true,
            descriptor,
            args,
        };
        inner.transport.send(envelope.into_payload()).await?;

        let reply = match inner.call_timeout {
            Some(limit) => tokio::time::timeout(limit, reply)
                .await
                .map_err(|_| CallError::Timeout(limit))?,
            None => reply.await,
        }
        .map_err(|_| CallError::Disposed)?;
        drop(pending);

        if let Some(error) = reply.error {
            return Err(CallError::Remote(error));
        }
        let returns = sig.return_type();
        if *returns == Type::Nil {
            return Ok(None);
        }
        if !returns.accepts(&reply.result) {
            return Err(TypeMismatch::new(reply.result, returns.clone()).into());
        }
        Ok(Some(reply.result))
    }

    /// Awaited call decoding the result to `R`.
    pub async fn call<R: Decode>(&self, sig: &MethodSignature, args: Vec<Value>) -> Result<R, CallError> {
        let value = self.invoke(sig, args, false).await?.unwrap_or(Value::Nil);
        Ok(R::decode(value)?)
    }

    /// Fire-and-forget call.
    pub async fn send(&self, sig: &MethodSignature, args: Vec<Value>) -> Result<(), CallError> {
        self.invoke(sig, args, true).await.map(drop)
    }

    /// Entry point for every inbound message.
    ///
    /// Replies complete their pending call right here; calls are handed to
    /// their own task so the next message is never held up.
    pub fn on_data_received(&self, payload: Payload) {
        let envelope = match Envelope::from_payload(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping malformed message: {e}");
                return;
            }
        };

        match envelope {
            Envelope::Reply { id, error, result } => {
                tracing::debug!("reply {id}");
                let reply = ReplyPayload { error, result };
                if !self.inner.pending.resolve(&id, reply) {
                    tracing::debug!("dropping reply {id}: no such pending call");
                }
            }
            // Only the fire-and-forget form is the handshake; a `?` to the
            // reserved name is answered like any unknown method.
            Envelope::Call {
                expects_reply: false,
                descriptor,
                ..
            } if descriptor.as_str() == Some(READY_DESCRIPTOR) => {
                tracing::debug!("remote side is ready");
                self.inner.readiness.send_replace(Readiness::Ready);
            }
            Envelope::Call {
                id,
                expects_reply,
                descriptor,
                args,
            } => {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.handle_call(id, expects_reply, descriptor, args).await;
                });
            }
        }
    }

    async fn handle_call(self, id: CorrelationId, expects_reply: bool, descriptor: Value, args: Value) {
        tracing::debug!("inbound {} {id} {descriptor:?}", if expects_reply { "call" } else { "message" });
        let mut entry = None;
        let outcome = self.execute(descriptor, args, &mut entry).await;
        if let Err(e) = &outcome {
            tracing::debug!("inbound {id} failed: {e}");
        }

        let marked_no_reply = entry.is_some_and(|e: Arc<MethodEntry>| e.signature().is_no_reply());
        if !expects_reply || marked_no_reply {
            return;
        }

        let (error, result) = match outcome {
            Ok(value) => (None, value),
            Err(e) => (Some(e.to_string()), Value::Nil),
        };
        let reply = Envelope::Reply {
            id: id.clone(),
            error,
            result,
        };
        if let Err(e) = self.inner.transport.send(reply.into_payload()).await {
            tracing::error!("failed to send reply {id}: {e}");
        }
    }

    /// Resolve, bind, authorize and run one inbound call. The first failing
    /// step decides the error.
    async fn execute(
        &self,
        descriptor: Value,
        args: Value,
        entry_out: &mut Option<Arc<MethodEntry>>,
    ) -> Result<Value, DispatchError> {
        let inner = &self.inner;
        let policy = self.policy();
        if !self.is_serving() {
            return Err(DispatchError::Offline);
        }

        let Some(text) = descriptor.as_str() else {
            return Err(DispatchError::MethodNotFound(format!("{descriptor:?}")));
        };
        let entry = text
            .parse::<MethodDescriptor>()
            .ok()
            .and_then(|d| inner.registry.resolve(&d))
            .ok_or_else(|| DispatchError::MethodNotFound(text.to_owned()))?;
        *entry_out = Some(entry.clone());
        let sig = entry.signature();

        let service = sig.declaring().and_then(|key| inner.services.descriptor(key));

        let slots = marshal::decode_inbound(sig, args)
            .map_err(|e| DispatchError::ArgumentDecoding(e.to_string()))?;

        // Everything resolved from here on lives exactly as long as this call.
        let scope = inner.services.create_scope();
        let instance = if sig.is_static() {
            None
        } else {
            let found = sig.declaring().and_then(|key| scope.resolve(key));
            let missing = || sig.declaring().map_or(text, |key| key.name()).to_owned();
            Some(found.ok_or_else(|| DispatchError::ServiceNotFound(missing()))?)
        };
        let this = self.clone();
        let dispatcher_instance = move || -> Instance { Arc::new(this.clone()) };
        let args = marshal::resolve_locals(sig, slots, scope.as_ref(), &dispatcher_instance)
            .map_err(|e| DispatchError::ArgumentDecoding(e.to_string()))?;

        policy
            .check(&entry, service.as_ref(), instance.as_ref())
            .map_err(DispatchError::AccessDenied)?;
        if let Some(guard) = &inner.guard {
            guard.check(&entry, &args).map_err(DispatchError::AccessDenied)?;
        }

        let invocation = Invocation::new(instance, args);
        let result = AssertUnwindSafe(entry.invoke(invocation)).catch_unwind().await;
        drop(scope);
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DispatchError::Invocation(format!("{e:#}"))),
            Err(panic) => Err(DispatchError::Invocation(panic_message(panic.as_ref()))),
        }
    }

    fn spawn_ready_announcement(&self) {
        if !self.inner.announce_ready {
            return;
        }
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let envelope = Envelope::Call {
                id: CorrelationId::generate(),
                expects_reply: false,
                descriptor: Value::from(READY_DESCRIPTOR),
                args: Value::List(Vec::new()),
            };
            if let Err(e) = dispatcher.inner.transport.send(envelope.into_payload()).await {
                tracing::warn!("ready announcement failed: {e}");
            }
        });
    }

    /// Waits until the remote dispatcher has announced itself.
    pub async fn when_ready(&self) -> Result<(), CallError> {
        let mut readiness = self.inner.readiness.subscribe();
        let state = readiness
            .wait_for(|r| *r != Readiness::Waiting)
            .await
            .map(|r| *r)
            .map_err(|_| CallError::Disposed)?;
        match state {
            Readiness::Gone => Err(CallError::Disposed),
            _ => Ok(()),
        }
    }

    pub fn is_remote_ready(&self) -> bool {
        *self.inner.readiness.borrow() == Readiness::Ready
    }

    pub fn policy(&self) -> AccessPolicy {
        *self.inner.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes effect from the next inbound call on.
    pub fn set_policy(&self, policy: AccessPolicy) {
        *self.inner.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn is_serving(&self) -> bool {
        self.inner.serving.load(Ordering::SeqCst)
    }

    /// While not serving, inbound calls are answered with an offline error.
    pub fn set_serving(&self, serving: bool) {
        self.inner.serving.store(serving, Ordering::SeqCst);
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_open()
    }

    /// Number of awaited calls still waiting for their reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stops listening to the channel and releases it. Idempotent.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.shutdown();
        }
    }
}

impl Inner {
    fn shutdown(&self) {
        tracing::debug!("disposing dispatcher");
        if let Some(handle) = self.event_loop.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.transport.close();
        self.readiness.send_replace(Readiness::Gone);
        if self.fail_pending_on_dispose {
            let failed = self.pending.clear();
            if failed > 0 {
                tracing::debug!("failed {failed} pending calls on dispose");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

/// Removes the pending entry if the caller stops waiting early (timeout,
/// send failure, or the call future being dropped).
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.abandon(&self.id);
    }
}

async fn event_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let dispatcher = Dispatcher { inner };
        match event {
            TransportEvent::DataReceived(payload) => dispatcher.on_data_received(payload),
            TransportEvent::Opened => {
                tracing::debug!("channel opened");
                dispatcher.spawn_ready_announcement();
            }
            TransportEvent::Errored(info) => tracing::warn!("channel error: {info}"),
            TransportEvent::Closed => {
                tracing::debug!("channel closed");
                dispatcher.inner.readiness.send_replace(Readiness::Waiting);
                dispatcher.dispose();
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    format!("method panicked: {detail}")
}
