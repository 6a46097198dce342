use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Identifies a method across processes: `Type::method(P1,P2)`.
///
/// Two processes built from the same method definitions produce equal
/// descriptors, so the text form is all that needs to cross the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct MethodDescriptor {
    pub type_name: String,
    pub method_name: String,
    pub param_types: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        param_types: Vec<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            param_types,
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}::{}({})",
            self.type_name,
            self.method_name,
            self.param_types.join(",")
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed method descriptor {0:?}")]
pub struct DescriptorParseError(String);

impl FromStr for MethodDescriptor {
    type Err = DescriptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || DescriptorParseError(s.to_owned());

        // Type names may carry their own parens (tuples, `fn(..)`), so the
        // parameter list is found from the end.
        let body = s.strip_suffix(')').ok_or_else(err)?;
        let open = params_start(body).ok_or_else(err)?;
        let params = &body[open + 1..];
        let (type_name, method_name) = body[..open].rsplit_once("::").ok_or_else(err)?;
        if type_name.is_empty() || method_name.is_empty() {
            return Err(err());
        }

        Ok(Self {
            type_name: type_name.to_owned(),
            method_name: method_name.to_owned(),
            param_types: split_top_level(params).ok_or_else(err)?,
        })
    }
}

/// Whether the `>` at byte `i` is the tail of a `->` arrow.
fn is_arrow(text: &[u8], i: usize) -> bool {
    i > 0 && text[i - 1] == b'-'
}

/// Byte index of the `(` opening the parameter list, given everything up to
/// (but excluding) the final `)`.
fn params_start(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'>' if !is_arrow(bytes, i) => depth += 1,
            b'(' if depth == 0 => return Some(i),
            b'(' | b'<' => depth = depth.checked_sub(1)?,
            _ => {}
        }
    }
    None
}

/// Splits on commas that are not nested inside `<...>` or `(...)`.
fn split_top_level(params: &str) -> Option<Vec<String>> {
    if params.is_empty() {
        return Some(Vec::new());
    }

    let bytes = params.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' | b'(' => depth += 1,
            b'>' if is_arrow(bytes, i) => {}
            b'>' | b')' => depth = depth.checked_sub(1)?,
            b',' if depth == 0 => {
                parts.push(params[start..i].trim().to_owned());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(params[start..].trim().to_owned());

    if parts.iter().any(String::is_empty) {
        return None;
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_parses_back() {
        let desc = MethodDescriptor::new(
            "app::Calculator",
            "add",
            vec!["Int".into(), "Int".into()],
        );
        assert_eq!(desc.to_string(), "app::Calculator::add(Int,Int)");
        assert_eq!(desc.to_string().parse::<MethodDescriptor>().unwrap(), desc);
    }

    #[test]
    fn parens_in_type_names_parse_back() {
        use crate::signature::MethodSignature;
        use std::sync::Mutex;

        let desc = MethodSignature::method::<Mutex<(u8, u8)>>("get").descriptor();
        assert_eq!(desc.to_string().parse::<MethodDescriptor>().unwrap(), desc);

        let desc = MethodDescriptor::new(
            "hooks::Table<fn(u8) -> (u8, bool)>",
            "call",
            vec!["fn(u8) -> u8".into(), "(Int, String)".into(), "Int".into()],
        );
        let back: MethodDescriptor = desc.to_string().parse().unwrap();
        assert_eq!(back, desc);
        assert_eq!(back.type_name, "hooks::Table<fn(u8) -> (u8, bool)>");
        assert_eq!(back.param_types[1], "(Int, String)");
    }

    #[test]
    fn generic_params_keep_their_commas() {
        let desc: MethodDescriptor = "a::b::Store::put(core::option::Option<alloc::string::String>,std::collections::HashMap<u8, u8>,List<Int>)"
            .parse()
            .unwrap();
        assert_eq!(desc.type_name, "a::b::Store");
        assert_eq!(desc.method_name, "put");
        assert_eq!(desc.param_types.len(), 3);
        assert_eq!(desc.param_types[1], "std::collections::HashMap<u8, u8>");
    }

    #[test]
    fn no_params() {
        let desc: MethodDescriptor = "Clock::now()".parse().unwrap();
        assert!(desc.param_types.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "noparens", "::m()", "T::()", "T::m(Int", "T::m(Int,)", "T::m(List<Int)"] {
            assert!(bad.parse::<MethodDescriptor>().is_err(), "{bad}");
        }
    }
}
