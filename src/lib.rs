//! # peerwire
//!
//! Call named methods on a remote peer over one duplex, message-oriented
//! channel. Neither side listens; both sides can call and serve at once.
//!
//! A [`Dispatcher`] owns the channel. Outbound, it strips locally bound
//! parameters, sends the call and, unless the call is fire-and-forget,
//! waits for the reply carrying the same correlation id. Inbound, it
//! resolves the [`MethodDescriptor`] against its [`MethodRegistry`], binds
//! the parameters, checks the [`AccessPolicy`], runs the method and
//! replies.
//!
//! ```ignore
//! let add = MethodSignature::function("Math", "add")
//!     .positional("a", Type::Int)
//!     .positional("b", Type::Int)
//!     .returns(Type::Int);
//!
//! let mut registry = MethodRegistry::new();
//! registry.register(add.clone(), MethodMeta::public(), |inv: Invocation| async move {
//!     anyhow::Ok(inv.value::<i64>(0)? + inv.value::<i64>(1)?)
//! });
//!
//! let dispatcher = Dispatcher::builder(transport).registry(registry).build();
//! let five: i64 = dispatcher.call(&add, vec![2.into(), 3.into()]).await?;
//! ```

pub mod correlation;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod marshal;
pub mod policy;
pub mod registry;
pub mod services;
pub mod signature;
pub mod transport;
pub mod types;
pub mod wire;

pub use correlation::ReplyPayload;
pub use descriptor::MethodDescriptor;
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::{CallError, DispatchError, MarshalError, TransportError};
pub use policy::{AccessPolicy, CallGuard};
pub use registry::{Arg, ArgError, Invocation, MethodEntry, MethodRegistry, RpcFunction, RpcFunctionInfo};
pub use services::{
    Instance, Lifetime, NoServices, ServiceCollection, ServiceDescriptor, ServiceKey, ServiceProvider,
    ServiceScope,
};
pub use signature::{MethodMeta, MethodSignature, ParamBinding, ParamSpec, Receiver, Visibility};
pub use transport::{MemoryTransport, StreamTransport, Transport, TransportEvent};
pub use types::{Decode, Encode, List, Type, TypeMismatch, Typed, Value};
pub use wire::{CorrelationId, Envelope, Kind};
