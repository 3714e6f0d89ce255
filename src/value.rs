// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Dynamic host values
//!
//! The scripting host hands us loosely typed values and expects the same
//! kind of values back. This module models the handful of value kinds the
//! marshalling layer needs: nil, booleans, unsigned numbers, byte
//! strings, symbols (keywords and constant names), tuples and structs.

use std::fmt;

use crate::error::{Error, Result};
use crate::pkcs11::CK_ULONG;

/// A key-unique mapping
///
/// Keys can be any value; a `Nil` key marks an absent slot that is
/// carried along but ignored by consumers. Equality does not depend on
/// insertion order.
#[derive(Clone, Debug, Default)]
pub struct Struct {
    entries: Vec<(Value, Value)>,
}

impl Struct {
    pub fn new() -> Struct {
        Struct {
            entries: Vec::new(),
        }
    }

    /// Inserts an entry, replacing any entry with an equal key.
    /// Nil keys are never merged, each one is its own absent slot.
    pub fn insert(&mut self, key: Value, val: Value) {
        if !key.is_nil() {
            if let Some(e) = self.entries.iter_mut().find(|e| e.0 == key) {
                e.1 = val;
                return;
            }
        }
        self.entries.push((key, val));
    }

    /// Builder style insert
    pub fn with(mut self, key: Value, val: Value) -> Struct {
        self.insert(key, val);
        self
    }

    /// All entries, absent slots included
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Entries with a non-nil key
    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter().filter(|e| !e.0.is_nil())
    }

    /// Number of entries with a non-nil key
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an entry whose key is a symbol or byte string equal to
    /// `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.iter()
            .find(|e| e.0.as_name() == Some(name))
            .map(|e| &e.1)
    }

    pub fn get_key(&self, key: &Value) -> Option<&Value> {
        self.iter().find(|e| &e.0 == key).map(|e| &e.1)
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Struct) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|(k, v)| other.get_key(k) == Some(v))
    }
}

impl Eq for Struct {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(u64),
    Bytes(Vec<u8>),
    Symbol(String),
    Tuple(Vec<Value>),
    Struct(Struct),
}

impl Value {
    pub fn symbol(s: &str) -> Value {
        Value::Symbol(s.to_string())
    }

    pub fn bytes(b: &[u8]) -> Value {
        Value::Bytes(b.to_vec())
    }

    pub fn string(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn number(n: CK_ULONG) -> Value {
        Value::Number(n as u64)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Bytes(_) => "bytes",
            Value::Symbol(_) => "symbol",
            Value::Tuple(_) => "tuple",
            Value::Struct(_) => "struct",
        }
    }

    /// The textual content of a symbol or a valid UTF-8 byte string
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s.as_str()),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            _ => Err(unexpected("boolean", self)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b.as_slice()),
            _ => Err(unexpected("bytes", self)),
        }
    }

    pub fn as_ulong(&self) -> Result<CK_ULONG> {
        match self {
            Value::Number(n) => match CK_ULONG::try_from(*n) {
                Ok(u) => Ok(u),
                Err(_) => Err(Error::unsupported_value(format!(
                    "number {} does not fit a CK_ULONG",
                    n
                ))),
            },
            _ => Err(unexpected("number", self)),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value]> {
        match self {
            Value::Tuple(t) => Ok(t.as_slice()),
            _ => Err(unexpected("tuple", self)),
        }
    }

    pub fn as_struct(&self) -> Result<&Struct> {
        match self {
            Value::Struct(s) => Ok(s),
            _ => Err(unexpected("struct", self)),
        }
    }
}

fn unexpected(wanted: &str, got: &Value) -> Error {
    Error::unsupported_value(format!(
        "expected {}, got {}",
        wanted,
        got.type_name()
    ))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "0x{}", hex::encode(b)),
            },
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::Tuple(t) => {
                write!(f, "[")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Struct(s) => {
                write!(f, "{{")?;
                for (i, (k, v)) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Value {
        Value::Bytes(b)
    }
}

impl From<Struct> for Value {
    fn from(s: Struct) -> Value {
        Value::Struct(s)
    }
}

/// JSON strings become byte strings unless they start with ':', in which
/// case the rest of the string is a symbol. Objects become structs keyed
/// by the same rule, arrays become tuples. Negative or fractional
/// numbers have no host counterpart.
impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(json: serde_json::Value) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(u) => Value::Number(u),
                None => {
                    return Err(Error::unsupported_value(format!(
                        "number {} is not an unsigned integer",
                        n
                    )))
                }
            },
            serde_json::Value::String(s) => json_string(s),
            serde_json::Value::Array(a) => Value::Tuple(
                a.into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<Value>>>()?,
            ),
            serde_json::Value::Object(o) => {
                let mut st = Struct::new();
                for (k, v) in o {
                    st.insert(json_string(k), Value::try_from(v)?);
                }
                Value::Struct(st)
            }
        })
    }
}

fn json_string(s: String) -> Value {
    match s.strip_prefix(':') {
        Some(sym) => Value::Symbol(sym.to_string()),
        None => Value::Bytes(s.into_bytes()),
    }
}

impl Value {
    /// Parses a JSON document into a host value
    pub fn from_json(json: &str) -> Result<Value> {
        let v: serde_json::Value = serde_json::from_str(json)?;
        Value::try_from(v)
    }
}
