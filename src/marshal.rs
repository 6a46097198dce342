//! Per-parameter argument binding.
//!
//! Both directions walk the signature's parameters in order. Only
//! [`ParamBinding::Positional`] parameters ever occupy a wire slot; every
//! other parameter is skipped on the way out and resolved locally on the way
//! in, so the wire list is the positional values alone, in order.

use crate::{
    error::MarshalError,
    registry::Arg,
    services::{Instance, ServiceScope},
    signature::{MethodSignature, ParamBinding, ParamSpec},
    types::Value,
};

/// Builds the wire argument list from a full, in-order argument list.
///
/// Values at locally bound positions are ignored; trailing positional
/// arguments may be left out when the receiver declares defaults for them.
pub fn prepare_outbound(sig: &MethodSignature, args: Vec<Value>) -> Result<Vec<Value>, MarshalError> {
    let params = sig.params();
    if args.len() > params.len() {
        return Err(MarshalError::TooMany {
            given: args.len(),
            max: params.len(),
        });
    }

    let mut wire = Vec::with_capacity(args.len());
    for (param, value) in params.iter().zip(args) {
        if let ParamBinding::Positional { ty, .. } = &param.binding {
            if !ty.accepts(&value) {
                return Err(type_error(param, &value, ty));
            }
            wire.push(value);
        }
    }
    Ok(wire)
}

/// A parameter after the wire pass: either its value, or still waiting for
/// local resolution.
#[derive(Debug)]
pub(crate) enum Slot {
    Value(Value),
    Local,
}

/// Consumes wire values strictly in order for positional parameters,
/// filling in declared defaults once the wire runs out.
pub(crate) fn decode_inbound(sig: &MethodSignature, args: Value) -> Result<Vec<Slot>, MarshalError> {
    let wire = match args {
        Value::List(items) => items,
        Value::Nil => Vec::new(),
        other => return Err(MarshalError::NotAList(format!("{other:?}"))),
    };
    let given = wire.len();
    let mut wire = wire.into_iter();

    let mut slots = Vec::with_capacity(sig.params().len());
    let mut positional = 0;
    for param in sig.params() {
        let ParamBinding::Positional { ty, default } = &param.binding else {
            slots.push(Slot::Local);
            continue;
        };
        positional += 1;
        let value = match (wire.next(), default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(MarshalError::Missing {
                    name: param.name.clone(),
                })
            }
        };
        if !ty.accepts(&value) {
            return Err(type_error(param, &value, ty));
        }
        slots.push(Slot::Value(value));
    }

    if given > positional {
        return Err(MarshalError::TooMany {
            given,
            max: positional,
        });
    }
    Ok(slots)
}

/// Fills every [`Slot::Local`] from the call's service scope.
///
/// `dispatcher` is offered first to call-side parameters of the
/// dispatcher's own type.
pub(crate) fn resolve_locals(
    sig: &MethodSignature,
    slots: Vec<Slot>,
    scope: &dyn ServiceScope,
    dispatcher: &dyn Fn() -> Instance,
) -> Result<Vec<Arg>, MarshalError> {
    sig.params()
        .iter()
        .zip(slots)
        .map(|(param, slot)| {
            let binding = match slot {
                Slot::Value(value) => return Ok(Arg::Value(value)),
                Slot::Local => &param.binding,
            };
            let (service, instance) = match binding {
                ParamBinding::KeyedService { service, key } => {
                    (service, scope.resolve_keyed(service, key))
                }
                ParamBinding::Service(service) => (service, scope.resolve(service)),
                ParamBinding::CallSide { service, fallback } => {
                    let instance = if service.is::<crate::Dispatcher>() {
                        Some(dispatcher())
                    } else {
                        scope
                            .resolve(service)
                            .or_else(|| fallback.as_ref().map(|f| f()))
                    };
                    (service, instance)
                }
                ParamBinding::Positional { .. } => unreachable!("positional slots carry values"),
            };
            instance.map(Arg::Local).ok_or_else(|| MarshalError::Unresolved {
                name: param.name.clone(),
                service: service.name(),
            })
        })
        .collect()
}

fn type_error(param: &ParamSpec, value: &Value, ty: &crate::types::Type) -> MarshalError {
    MarshalError::Type {
        name: param.name.clone(),
        reason: crate::types::TypeMismatch::new(value.clone(), ty.clone()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{ServiceCollection, ServiceKey, ServiceProvider},
        types::Type,
    };
    use std::sync::Arc;

    #[derive(Default)]
    struct Clock(u8);
    struct Db(&'static str);

    fn sig() -> MethodSignature {
        MethodSignature::function("Store", "put")
            .service::<Db>("db")
            .positional("key", Type::String)
            .keyed_service::<Db>("backup", "backup")
            .positional("value", Type::Int)
            .call_side_or_default::<Clock>("clock")
            .positional_default("ttl", Type::Int, 60i64)
    }

    #[test]
    fn outbound_skips_local_slots_without_padding() {
        let args = vec![
            Value::Nil,
            "k".into(),
            Value::Nil,
            Value::Int(7),
            Value::Nil,
        ];
        let wire = prepare_outbound(&sig(), args).unwrap();
        assert_eq!(wire, vec![Value::from("k"), Value::Int(7)]);
    }

    #[test]
    fn outbound_rejects_wrong_types_and_extra_args() {
        let err = prepare_outbound(&sig(), vec![Value::Nil, Value::Int(1)]).unwrap_err();
        assert!(matches!(err, MarshalError::Type { ref name, .. } if name == "key"));
        let err = prepare_outbound(&sig(), vec![Value::Nil; 7]).unwrap_err();
        assert_eq!(err, MarshalError::TooMany { given: 7, max: 6 });
    }

    #[test]
    fn inbound_rebuilds_full_order() {
        let mut services = ServiceCollection::new();
        services
            .add_singleton(Db("main"))
            .add_keyed_singleton("backup", Db("backup"));
        let scope = services.create_scope();
        let dispatcher = || -> Instance { Arc::new(()) };

        let wire = Value::List(vec!["k".into(), Value::Int(7)]);
        let slots = decode_inbound(&sig(), wire).unwrap();
        let args = resolve_locals(&sig(), slots, scope.as_ref(), &dispatcher).unwrap();

        assert_eq!(args.len(), 6);
        let db = |i: usize| match &args[i] {
            Arg::Local(inst) => inst.clone().downcast::<Db>().unwrap().0,
            other => panic!("{other:?}"),
        };
        assert_eq!(db(0), "main");
        assert_eq!(db(2), "backup");
        assert!(matches!(&args[1], Arg::Value(Value::String(k)) if k == "k"));
        assert!(matches!(&args[3], Arg::Value(Value::Int(7))));
        // No Clock registered: falls back to Default.
        assert!(matches!(&args[4], Arg::Local(inst) if inst.clone().downcast::<Clock>().unwrap().0 == 0));
        assert!(matches!(&args[5], Arg::Value(Value::Int(60))));
    }

    #[test]
    fn inbound_errors() {
        let missing = decode_inbound(&sig(), Value::List(vec!["k".into()])).unwrap_err();
        assert_eq!(missing, MarshalError::Missing { name: "value".into() });

        let extra = Value::List(vec!["k".into(), Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            decode_inbound(&sig(), extra).unwrap_err(),
            MarshalError::TooMany { given: 4, max: 3 }
        );

        assert!(matches!(
            decode_inbound(&sig(), Value::Int(1)),
            Err(MarshalError::NotAList(_))
        ));
    }

    #[test]
    fn unregistered_service_is_unresolved() {
        let services = ServiceCollection::new();
        let scope = services.create_scope();
        let dispatcher = || -> Instance { Arc::new(()) };
        let slots = decode_inbound(&sig(), Value::List(vec!["k".into(), Value::Int(1)])).unwrap();
        let err = resolve_locals(&sig(), slots, scope.as_ref(), &dispatcher).unwrap_err();
        assert_eq!(
            err,
            MarshalError::Unresolved {
                name: "db".into(),
                service: ServiceKey::of::<Db>().name(),
            }
        );
    }
}
