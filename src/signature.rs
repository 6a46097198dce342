//! Method signatures shared by the calling and the called side.
//!
//! A [`MethodSignature`] carries everything both ends need to agree on: the
//! descriptor parts, how each parameter is bound, the return type and the
//! no-reply marker. Access metadata that only matters to the receiver lives
//! in [`MethodMeta`].

use crate::{
    descriptor::MethodDescriptor,
    services::{Instance, ServiceKey},
    types::{Type, Value},
};
use std::{any::Any, fmt, sync::Arc};

pub(crate) type Fallback = Arc<dyn Fn() -> Instance + Send + Sync>;

/// How one formal parameter gets its value, decided once at registration.
#[derive(Clone)]
pub enum ParamBinding {
    /// Resolved from the service registry by type and key. Never sent.
    KeyedService { service: ServiceKey, key: String },
    /// Resolved from the service registry by type. Never sent.
    Service(ServiceKey),
    /// Resolved on the called side: the dispatcher itself if the type
    /// matches, else the service registry, else the fallback. Never sent.
    CallSide {
        service: ServiceKey,
        fallback: Option<Fallback>,
    },
    /// Taken from the next wire slot, or `default` when the wire runs out.
    Positional { ty: Type, default: Option<Value> },
}

impl ParamBinding {
    pub fn is_wire(&self) -> bool {
        matches!(self, ParamBinding::Positional { .. })
    }

    /// The type name this parameter contributes to the method descriptor.
    pub fn type_name(&self) -> String {
        match self {
            ParamBinding::KeyedService { service, .. }
            | ParamBinding::Service(service)
            | ParamBinding::CallSide { service, .. } => service.name().to_owned(),
            ParamBinding::Positional { ty, .. } => ty.to_string(),
        }
    }
}

impl fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamBinding::KeyedService { service, key } => {
                write!(f, "KeyedService({service:?}, {key:?})")
            }
            ParamBinding::Service(service) => write!(f, "Service({service:?})"),
            ParamBinding::CallSide { service, .. } => write!(f, "CallSide({service:?})"),
            ParamBinding::Positional { ty, default } => {
                write!(f, "Positional({ty}, default={default:?})")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub binding: ParamBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Static,
    Instance,
}

#[derive(Debug, Clone)]
pub struct MethodSignature {
    type_name: String,
    method_name: String,
    declaring: Option<ServiceKey>,
    receiver: Receiver,
    params: Vec<ParamSpec>,
    returns: Type,
    no_reply: bool,
}

impl MethodSignature {
    /// A static function on a named type that is not a service.
    pub fn function(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::new(type_name.into(), method_name.into(), None, Receiver::Static)
    }

    /// An instance method; the receiver is resolved from the service registry.
    pub fn method<T: Any>(method_name: impl Into<String>) -> Self {
        let key = ServiceKey::of::<T>();
        Self::new(key.name().to_owned(), method_name.into(), Some(key), Receiver::Instance)
    }

    /// A static method declared on a (possibly registered) service type.
    pub fn static_on<T: Any>(method_name: impl Into<String>) -> Self {
        let key = ServiceKey::of::<T>();
        Self::new(key.name().to_owned(), method_name.into(), Some(key), Receiver::Static)
    }

    fn new(
        type_name: String,
        method_name: String,
        declaring: Option<ServiceKey>,
        receiver: Receiver,
    ) -> Self {
        Self {
            type_name,
            method_name,
            declaring,
            receiver,
            params: Vec::new(),
            returns: Type::Nil,
            no_reply: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, binding: ParamBinding) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            binding,
        });
        self
    }

    pub fn positional(self, name: impl Into<String>, ty: Type) -> Self {
        self.param(name, ParamBinding::Positional { ty, default: None })
    }

    pub fn positional_default(self, name: impl Into<String>, ty: Type, default: impl Into<Value>) -> Self {
        let default = Some(default.into());
        self.param(name, ParamBinding::Positional { ty, default })
    }

    pub fn service<T: Any>(self, name: impl Into<String>) -> Self {
        self.param(name, ParamBinding::Service(ServiceKey::of::<T>()))
    }

    pub fn keyed_service<T: Any>(self, name: impl Into<String>, key: impl Into<String>) -> Self {
        let binding = ParamBinding::KeyedService {
            service: ServiceKey::of::<T>(),
            key: key.into(),
        };
        self.param(name, binding)
    }

    /// A call-side parameter with no fallback.
    pub fn call_side<T: Any>(self, name: impl Into<String>) -> Self {
        let binding = ParamBinding::CallSide {
            service: ServiceKey::of::<T>(),
            fallback: None,
        };
        self.param(name, binding)
    }

    /// A call-side parameter falling back to `T::default()`.
    pub fn call_side_or_default<T: Any + Default + Send + Sync>(self, name: impl Into<String>) -> Self {
        let fallback: Fallback = Arc::new(|| Arc::new(T::default()) as Instance);
        let binding = ParamBinding::CallSide {
            service: ServiceKey::of::<T>(),
            fallback: Some(fallback),
        };
        self.param(name, binding)
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.returns = ty;
        self
    }

    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::new(
            self.type_name.clone(),
            self.method_name.clone(),
            self.params.iter().map(|p| p.binding.type_name()).collect(),
        )
    }

    pub fn declaring(&self) -> Option<&ServiceKey> {
        self.declaring.as_ref()
    }

    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    pub fn is_static(&self) -> bool {
        self.receiver == Receiver::Static
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn return_type(&self) -> &Type {
        &self.returns
    }

    pub fn is_no_reply(&self) -> bool {
        self.no_reply
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Receiver-side access metadata for a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodMeta {
    pub visibility: Visibility,
    /// Compiler-generated or operator-like name (accessors, constructors, ...).
    pub special_name: bool,
    /// Explicit opt-in marking the method as remotely callable.
    pub callable_marker: bool,
}

impl MethodMeta {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn private() -> Self {
        Self {
            visibility: Visibility::Private,
            ..Self::default()
        }
    }

    pub fn special(mut self) -> Self {
        self.special_name = true;
        self
    }

    pub fn callable(mut self) -> Self {
        self.callable_marker = true;
        self
    }
}
