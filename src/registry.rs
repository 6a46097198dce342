use crate::{
    descriptor::MethodDescriptor,
    services::Instance,
    signature::{MethodMeta, MethodSignature},
    types::{Decode, Encode, Type, TypeMismatch, Value},
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{any::Any, collections::BTreeMap, future::Future, sync::Arc};
use thiserror::Error;

/// The body of a remotely callable method.
///
/// Implemented for every `Fn(Invocation) -> impl Future<Output = anyhow::Result<R>>`,
/// so closures and async fns register directly.
pub trait RpcFunction: Send + Sync + 'static {
    type Range: Encode;
    type RangeFut: Future<Output = anyhow::Result<Self::Range>> + Send + 'static;

    fn call(&self, invocation: Invocation) -> Self::RangeFut;
}

impl<F, Fut, R> RpcFunction for F
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Encode,
{
    type Range = R;
    type RangeFut = Fut;

    fn call(&self, invocation: Invocation) -> Fut {
        self(invocation)
    }
}

/// One bound parameter, in declaration order.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Local(Instance),
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "Value({v:?})"),
            Arg::Local(_) => f.write_str("Local(..)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("no argument at position {0}")]
    Missing(usize),

    #[error("argument {index}: {source}")]
    Type { index: usize, source: TypeMismatch },

    #[error("argument {index} is not a {expected}")]
    Local {
        index: usize,
        expected: &'static str,
    },

    #[error("no instance of {0} bound to this call")]
    Instance(&'static str),
}

/// Everything a handler receives: the receiver instance (for instance
/// methods) and the fully bound parameter list.
pub struct Invocation {
    instance: Option<Instance>,
    args: Vec<Arg>,
}

impl Invocation {
    pub(crate) fn new(instance: Option<Instance>, args: Vec<Arg>) -> Self {
        Self { instance, args }
    }

    pub fn instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ArgError> {
        self.instance
            .clone()
            .and_then(|i| i.downcast::<T>().ok())
            .ok_or(ArgError::Instance(std::any::type_name::<T>()))
    }

    pub fn value<T: Decode>(&self, index: usize) -> Result<T, ArgError> {
        match self.args.get(index) {
            Some(Arg::Value(v)) => {
                T::decode(v.clone()).map_err(|source| ArgError::Type { index, source })
            }
            Some(Arg::Local(_)) => Err(ArgError::Local {
                index,
                expected: "wire value",
            }),
            None => Err(ArgError::Missing(index)),
        }
    }

    pub fn local<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ArgError> {
        match self.args.get(index) {
            Some(Arg::Local(i)) => i.clone().downcast::<T>().map_err(|_| ArgError::Local {
                index,
                expected: std::any::type_name::<T>(),
            }),
            Some(Arg::Value(_)) => Err(ArgError::Local {
                index,
                expected: std::any::type_name::<T>(),
            }),
            None => Err(ArgError::Missing(index)),
        }
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }
}

struct TypedRpcFunction<RFn> {
    rpc_function: RFn,
    range: Type,
}

/// [`RpcFunction`] with its range erased to [`Value`].
trait DynamicRpcFunction: Send + Sync {
    fn call(&self, invocation: Invocation) -> BoxFuture<'static, anyhow::Result<Value>>;
}

impl<RFn> DynamicRpcFunction for TypedRpcFunction<RFn>
where
    RFn: RpcFunction,
{
    fn call(&self, invocation: Invocation) -> BoxFuture<'static, anyhow::Result<Value>> {
        let call_fut = self.rpc_function.call(invocation);
        let range = self.range.clone();
        Box::pin(async move {
            let retval = RFn::Range::encode(call_fut.await?);
            // The declared return type is what callers decode against.
            if !range.accepts(&retval) {
                anyhow::bail!("(BUG in RPC function) range type mismatch: {}", TypeMismatch::new(retval, range));
            }
            Ok(retval)
        })
    }
}

/// A registered method: its shared signature, its access metadata and its body.
pub struct MethodEntry {
    signature: MethodSignature,
    meta: MethodMeta,
    function: Box<dyn DynamicRpcFunction>,
}

impl MethodEntry {
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn meta(&self) -> &MethodMeta {
        &self.meta
    }

    pub(crate) fn invoke(&self, invocation: Invocation) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.function.call(invocation)
    }
}

/// Maps [`MethodDescriptor`]s to callable [`MethodEntry`]s.
#[derive(Default)]
pub struct MethodRegistry {
    methods: BTreeMap<MethodDescriptor, Arc<MethodEntry>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rpc_function` under the signature's descriptor, replacing any
    /// earlier registration with the same descriptor.
    pub fn register<RFn>(&mut self, signature: MethodSignature, meta: MethodMeta, rpc_function: RFn) -> &mut Self
    where
        RFn: RpcFunction,
    {
        let descriptor = signature.descriptor();
        let typed = TypedRpcFunction {
            rpc_function,
            range: signature.return_type().clone(),
        };
        let entry = MethodEntry {
            signature,
            meta,
            function: Box::new(typed),
        };
        tracing::debug!("registered {descriptor}");
        self.methods.insert(descriptor, Arc::new(entry));
        self
    }

    pub fn resolve(&self, descriptor: &MethodDescriptor) -> Option<Arc<MethodEntry>> {
        self.methods.get(descriptor).cloned()
    }

    pub fn methods(&self) -> Vec<RpcFunctionInfo> {
        self.methods
            .iter()
            .map(|(descriptor, entry)| RpcFunctionInfo {
                descriptor: descriptor.clone(),
                returns: entry.signature.return_type().clone(),
                no_reply: entry.signature.is_no_reply(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcFunctionInfo {
    pub descriptor: MethodDescriptor,
    pub returns: Type,
    pub no_reply: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_signature() -> MethodSignature {
        MethodSignature::function("Math", "add")
            .positional("a", Type::Int)
            .positional("b", Type::Int)
            .returns(Type::Int)
    }

    #[tokio::test]
    async fn resolves_by_descriptor_and_invokes() {
        let mut registry = MethodRegistry::new();
        registry.register(add_signature(), MethodMeta::public(), |inv: Invocation| async move {
            anyhow::Ok(inv.value::<i64>(0)? + inv.value::<i64>(1)?)
        });

        let desc: MethodDescriptor = "Math::add(Int,Int)".parse().unwrap();
        let entry = registry.resolve(&desc).unwrap();
        let args = vec![Arg::Value(Value::Int(2)), Arg::Value(Value::Int(3))];
        let out = entry.invoke(Invocation::new(None, args)).await.unwrap();
        assert_eq!(out, Value::Int(5));
        assert_eq!(registry.methods()[0].descriptor, desc);
    }

    #[tokio::test]
    async fn range_is_checked() {
        let mut registry = MethodRegistry::new();
        registry.register(add_signature(), MethodMeta::public(), |_inv: Invocation| async move {
            anyhow::Ok(String::from("five"))
        });
        let entry = registry.resolve(&add_signature().descriptor()).unwrap();
        let err = entry.invoke(Invocation::new(None, vec![])).await.unwrap_err();
        assert!(err.to_string().contains("range type mismatch"), "{err}");
    }

    #[test]
    fn wrong_local_type_is_reported() {
        let inv = Invocation::new(None, vec![Arg::Local(Arc::new(5u8))]);
        assert!(matches!(inv.args(), [Arg::Local(_)]));
        assert!(matches!(inv.local::<String>(0), Err(ArgError::Local { index: 0, .. })));
        assert_eq!(*inv.local::<u8>(0).unwrap(), 5);
        assert!(matches!(inv.value::<i64>(1), Err(ArgError::Missing(1))));
        assert!(matches!(inv.instance::<u8>(), Err(ArgError::Instance(_))));
    }
}
