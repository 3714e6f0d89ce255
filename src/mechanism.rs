// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Mechanism descriptions
//!
//! A mechanism is an algorithm selector plus opaque parameter bytes that
//! are handed to the provider untouched.

use crate::error::{Error, Result};
use crate::pkcs11::*;
use crate::registry::{self, Namespace};
use crate::value::{Struct, Value};
use crate::void_ptr;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mechanism {
    mechanism: CK_MECHANISM_TYPE,
    param: Vec<u8>,
}

impl Mechanism {
    pub fn new(mechanism: CK_MECHANISM_TYPE) -> Mechanism {
        Mechanism {
            mechanism: mechanism,
            param: Vec::new(),
        }
    }

    pub fn with_param(mechanism: CK_MECHANISM_TYPE, param: &[u8]) -> Mechanism {
        Mechanism {
            mechanism: mechanism,
            param: param.to_vec(),
        }
    }

    /// Builds a mechanism from a host structure with a required
    /// `mechanism` field (code or symbolic name) and an optional
    /// `parameter` byte string
    pub fn from_value(s: &Struct) -> Result<Mechanism> {
        let mechanism = match s.get("mechanism") {
            None | Some(Value::Nil) => return Err(Error::missing_mechanism()),
            Some(v @ Value::Number(_)) => v.as_ulong()?,
            Some(v) => match v.as_name() {
                Some(name) => {
                    registry::resolve_in(Namespace::Mechanism, name)?
                }
                None => {
                    return crate::err_unsupported!(
                        "mechanism must be a number or a name, got {}",
                        v.type_name()
                    )
                }
            },
        };
        let param = match s.get("parameter") {
            None | Some(Value::Nil) => Vec::new(),
            Some(v) => v.as_bytes()?.to_vec(),
        };
        Ok(Mechanism {
            mechanism: mechanism,
            param: param,
        })
    }

    /// Host representation, the mechanism is named symbolically when the
    /// registry knows it
    pub fn to_value(&self) -> Value {
        let mech = match registry::name_in(Namespace::Mechanism, self.mechanism)
        {
            Ok(name) => Value::symbol(name),
            Err(_) => Value::number(self.mechanism),
        };
        let mut s = Struct::new().with(Value::symbol("mechanism"), mech);
        if !self.param.is_empty() {
            s.insert(Value::symbol("parameter"), Value::bytes(&self.param));
        }
        Value::Struct(s)
    }

    pub fn mechanism(&self) -> CK_MECHANISM_TYPE {
        self.mechanism
    }

    pub fn param(&self) -> &[u8] {
        &self.param
    }

    /// The native structure, borrowing the parameter buffer. Absent
    /// parameters are passed as a null pointer with zero length.
    pub fn as_ck(&self) -> CK_MECHANISM {
        CK_MECHANISM {
            mechanism: self.mechanism,
            pParameter: if self.param.is_empty() {
                std::ptr::null_mut()
            } else {
                void_ptr!(self.param.as_ptr())
            },
            ulParameterLen: self.param.len() as CK_ULONG,
        }
    }
}

impl TryFrom<&Value> for Mechanism {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Mechanism> {
        match v {
            Value::Struct(s) => Mechanism::from_value(s),
            /* a bare name or code is a mechanism without parameters */
            Value::Number(_) => Ok(Mechanism::new(v.as_ulong()?)),
            Value::Symbol(name) => Ok(Mechanism::new(registry::resolve_in(
                Namespace::Mechanism,
                name,
            )?)),
            _ => crate::err_unsupported!(
                "mechanism description cannot be a {}",
                v.type_name()
            ),
        }
    }
}
