//! Message layout on the channel.
//!
//! Every message is a `Vec<Value>` whose first element is a one-character
//! kind tag:
//!
//! | tag | kind            | rest                              |
//! |-----|-----------------|-----------------------------------|
//! | `.` | fire-and-forget | correlation id, descriptor, args  |
//! | `?` | call            | correlation id, descriptor, args  |
//! | `=` | reply           | correlation id, error or `""`, result |

use crate::types::Value;
use std::{collections::VecDeque, fmt};
use thiserror::Error;
use uuid::Uuid;

pub const TAG_MESSAGE: &str = ".";
pub const TAG_CALL: &str = "?";
pub const TAG_REPLY: &str = "=";

/// Descriptor of the fire-and-forget call announcing that a dispatcher is
/// bound and serving. Never a valid method descriptor.
pub const READY_DESCRIPTOR: &str = "!ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Message,
    Call,
    Reply,
}

impl Kind {
    pub fn tag(self) -> &'static str {
        match self {
            Kind::Message => TAG_MESSAGE,
            Kind::Call => TAG_CALL,
            Kind::Reply => TAG_REPLY,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            TAG_MESSAGE => Some(Kind::Message),
            TAG_CALL => Some(Kind::Call),
            TAG_REPLY => Some(Kind::Reply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded message.
///
/// Call payload fields stay undecoded `Value`s so that a bad descriptor or
/// argument list can still be answered under the call's correlation id.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call {
        id: CorrelationId,
        expects_reply: bool,
        descriptor: Value,
        args: Value,
    },
    Reply {
        id: CorrelationId,
        error: Option<String>,
        result: Value,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedMessage {
    #[error("empty message")]
    Empty,

    #[error("unknown message kind {0:?}")]
    UnknownKind(Value),

    #[error("missing or non-string correlation id")]
    MissingId,
}

impl Envelope {
    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Call {
                expects_reply: true,
                ..
            } => Kind::Call,
            Envelope::Call { .. } => Kind::Message,
            Envelope::Reply { .. } => Kind::Reply,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        match self {
            Envelope::Call { id, .. } | Envelope::Reply { id, .. } => id,
        }
    }

    pub fn into_payload(self) -> Vec<Value> {
        let tag = Value::from(self.kind().tag());
        match self {
            Envelope::Call {
                id,
                descriptor,
                args,
                ..
            } => vec![tag, Value::String(id.0), descriptor, args],
            Envelope::Reply { id, error, result } => {
                let error = Value::String(error.unwrap_or_default());
                vec![tag, Value::String(id.0), error, result]
            }
        }
    }

    /// Shifts the kind tag and correlation id off the front; missing trailing
    /// elements read as `Nil`.
    pub fn from_payload(payload: Vec<Value>) -> Result<Self, MalformedMessage> {
        let mut payload = VecDeque::from(payload);
        let tag = payload.pop_front().ok_or(MalformedMessage::Empty)?;
        let kind = tag
            .as_str()
            .and_then(Kind::from_tag)
            .ok_or_else(|| MalformedMessage::UnknownKind(tag.clone()))?;
        let id = match payload.pop_front() {
            Some(Value::String(id)) if !id.is_empty() => CorrelationId(id),
            _ => return Err(MalformedMessage::MissingId),
        };
        let mut next = || payload.pop_front().unwrap_or(Value::Nil);

        Ok(match kind {
            Kind::Message | Kind::Call => Envelope::Call {
                id,
                expects_reply: kind == Kind::Call,
                descriptor: next(),
                args: next(),
            },
            Kind::Reply => {
                let error = match next() {
                    Value::Nil => None,
                    Value::String(s) if s.is_empty() => None,
                    Value::String(s) => Some(s),
                    other => Some(format!("malformed reply error field: {other:?}")),
                };
                Envelope::Reply {
                    id,
                    error,
                    result: next(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_layout() {
        let env = Envelope::Call {
            id: "c1".into(),
            expects_reply: true,
            descriptor: "Math::add(Int,Int)".into(),
            args: Value::List(vec![Value::Int(2), Value::Int(3)]),
        };
        let payload = env.clone().into_payload();
        assert_eq!(
            payload,
            vec![
                "?".into(),
                "c1".into(),
                "Math::add(Int,Int)".into(),
                Value::List(vec![Value::Int(2), Value::Int(3)]),
            ]
        );
        assert_eq!(Envelope::from_payload(payload).unwrap(), env);
        assert_eq!(env.id().as_str(), "c1");
    }

    #[test]
    fn reply_with_empty_error_is_success() {
        let payload = vec!["=".into(), "c1".into(), "".into(), Value::Int(5)];
        let env = Envelope::from_payload(payload).unwrap();
        assert_eq!(
            env,
            Envelope::Reply {
                id: "c1".into(),
                error: None,
                result: Value::Int(5)
            }
        );
        assert_eq!(env.into_payload()[2], Value::from(""));
    }

    #[test]
    fn short_messages_pad_with_nil() {
        let env = Envelope::from_payload(vec![".".into(), "c2".into()]).unwrap();
        assert_eq!(env.kind(), Kind::Message);
        assert!(matches!(env, Envelope::Call { descriptor: Value::Nil, args: Value::Nil, .. }));
    }

    #[test]
    fn malformed() {
        assert_eq!(Envelope::from_payload(vec![]), Err(MalformedMessage::Empty));
        assert_eq!(
            Envelope::from_payload(vec!["!".into(), "c".into()]),
            Err(MalformedMessage::UnknownKind("!".into()))
        );
        assert_eq!(
            Envelope::from_payload(vec!["?".into(), Value::Int(1)]),
            Err(MalformedMessage::MissingId)
        );
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }
}
