use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

/// The declared type of a wire slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Type {
    Nil,
    Any,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    List(Box<Type>),
    Option(Box<Type>),
}

impl Type {
    pub fn list(inner: Type) -> Self {
        Type::List(Box::new(inner))
    }

    pub fn option(inner: Type) -> Self {
        Type::Option(Box::new(inner))
    }

    fn name(&self) -> &'static str {
        use Type::*;
        match self {
            Nil => "Nil",
            Any => "Any",
            Bool => "Bool",
            Int => "Int",
            Float => "Float",
            String => "String",
            Bytes => "Bytes",
            List(_) => "List",
            Option(_) => "Option",
        }
    }

    /// Whether `value` is a valid inhabitant of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Type::Any, _) => true,
            (Type::Nil, Value::Nil)
            | (Type::Bool, Value::Bool(_))
            | (Type::Int, Value::Int(_))
            | (Type::Float, Value::Float(_))
            | (Type::String, Value::String(_))
            | (Type::Bytes, Value::Bytes(_)) => true,
            (Type::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (Type::Option(_), Value::Nil) => true,
            (Type::Option(inner), v) => inner.accepts(v),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())?;
        if let Type::List(inner) | Type::Option(inner) = self {
            write!(f, "<{inner}>")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl<T: Encode> From<T> for Value {
    fn from(val: T) -> Self {
        T::encode(val)
    }
}

pub trait Typed {
    fn rpc_type() -> Type;
}

pub trait Encode {
    fn encode(val: Self) -> Value;
}

pub trait Decode: Sized {
    fn decode(val: Value) -> Result<Self, TypeMismatch>;
}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $rpc_type:expr, $encode_name:pat => $encode_expr:expr, $($from_rpc_arm:tt)*) => {
        impl Typed for $rust_type {
            fn rpc_type() -> Type {
                $rpc_type
            }
        }

        impl Encode for $rust_type {
            fn encode($encode_name: $rust_type) -> Value {
                $encode_expr
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, TypeMismatch> {
                Ok(match val {
                    $($from_rpc_arm)*,
                    _ => return Err(TypeMismatch::new(val, <Self as Typed>::rpc_type()))
                })
            }
        }
    };
}

impl_encode_decode!((), Type::Nil, () => Value::Nil, Value::Nil => ());
impl_encode_decode!(bool, Type::Bool, b => Value::Bool(b), Value::Bool(b) => b);
impl_encode_decode!(i64, Type::Int, n => Value::Int(n), Value::Int(n) => n);
impl_encode_decode!(f64, Type::Float, x => Value::Float(x), Value::Float(x) => x);
impl_encode_decode!(String, Type::String, s => Value::String(s), Value::String(s) => s);
impl_encode_decode!(Vec<u8>, Type::Bytes, b => Value::Bytes(b), Value::Bytes(b) => b);

impl Typed for i32 {
    fn rpc_type() -> Type {
        Type::Int
    }
}

impl Encode for i32 {
    fn encode(n: i32) -> Value {
        Value::Int(n.into())
    }
}

impl Decode for i32 {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        match val {
            Value::Int(n) => i32::try_from(n).map_err(|_| TypeMismatch::new(val, Type::Int)),
            _ => Err(TypeMismatch::new(val, Type::Int)),
        }
    }
}

// `Value` passes through untouched, for callers that do their own checking.
impl Typed for Value {
    fn rpc_type() -> Type {
        Type::Any
    }
}

impl Decode for Value {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        Ok(val)
    }
}

impl<T: Typed> Typed for Option<T> {
    fn rpc_type() -> Type {
        Type::option(T::rpc_type())
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(val: Self) -> Value {
        match val {
            Some(v) => T::encode(v),
            None => Value::Nil,
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        match val {
            Value::Nil => Ok(None),
            v => T::decode(v).map(Some),
        }
    }
}

/// Lists of anything but bytes; `Vec<u8>` is [`Type::Bytes`].
#[derive(Debug, Clone, PartialEq)]
pub struct List<T>(pub Vec<T>);

impl<T: Typed> Typed for List<T> {
    fn rpc_type() -> Type {
        Type::list(T::rpc_type())
    }
}

impl<T: Encode> Encode for List<T> {
    fn encode(val: Self) -> Value {
        Value::List(val.0.into_iter().map(T::encode).collect())
    }
}

impl<T: Decode + Typed> Decode for List<T> {
    fn decode(val: Value) -> Result<Self, TypeMismatch> {
        match val {
            Value::List(items) => items.into_iter().map(T::decode).collect::<Result<_, _>>().map(List),
            _ => Err(TypeMismatch::new(val, <Self as Typed>::rpc_type())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeMismatch {
    value: Value,
    expected_type: Type,
}

impl TypeMismatch {
    pub fn new(value: Value, expected_type: Type) -> Self {
        Self {
            value,
            expected_type,
        }
    }
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Type error: {:?} :/: {}", self.value, self.expected_type)
    }
}

impl Error for TypeMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_accepts_nil_and_inner() {
        let t = Type::option(Type::Int);
        assert!(t.accepts(&Value::Nil));
        assert!(t.accepts(&Value::Int(3)));
        assert!(!t.accepts(&Value::from("3")));
    }

    #[test]
    fn list_checks_every_element() {
        let t = Type::list(Type::String);
        assert!(t.accepts(&Value::List(vec!["a".into(), "b".into()])));
        assert!(!t.accepts(&Value::List(vec!["a".into(), Value::Int(1)])));
        assert_eq!(t.to_string(), "List<String>");
    }

    #[test]
    fn decode_reports_expected_type() {
        let err = i64::decode(Value::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "Type error: String(\"x\") :/: Int");
    }

    #[test]
    fn narrow_ints_reject_overflow() {
        assert_eq!(i32::decode(Value::Int(7)).unwrap(), 7);
        assert!(i32::decode(Value::Int(i64::MAX)).is_err());
    }

    #[test]
    fn decodes_what_encode_produced() {
        let list = List(vec![Some(1i64), None]);
        let back = List::<Option<i64>>::decode(Value::from(list.clone())).unwrap();
        assert_eq!(back, list);
        assert_eq!(Vec::<u8>::decode(Value::from(vec![1u8, 2])).unwrap(), vec![1, 2]);
        assert!(bool::decode(Value::from(true)).unwrap());
        assert!(Value::from(None::<i64>).is_nil());
        assert!(!Value::from(Some(0i64)).is_nil());
        assert_eq!(f64::decode(Value::from(1.5)).unwrap(), 1.5);
    }
}
