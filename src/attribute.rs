// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module maps PKCS#11 attribute types to the shape of the data
//! they carry ([AttrShape]) and converts single attribute values between
//! host [Value]s and the native byte representation the provider
//! expects.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::misc::CK_ULONG_SIZE;
use crate::pkcs11::*;
use crate::registry;
use crate::value::{Struct, Value};

/// The shapes an attribute value can take
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrShape {
    Boolean,
    UnsignedInt,
    Bytes,
    Date,
    String,
}

impl AttrShape {
    /// Finds the value shape of an attribute type
    ///
    /// Returns an UnknownAttributeType error for codes outside the
    /// classification table, vendor defined codes included
    pub fn of(id: CK_ATTRIBUTE_TYPE) -> Result<AttrShape> {
        match Attrmap::search_by_id(id) {
            Some(a) => Ok(a.shape),
            None => Err(Error::unknown_attribute(id)),
        }
    }
}

/// Shorthand for [AttrShape::of]
pub fn shape_of(id: CK_ATTRIBUTE_TYPE) -> Result<AttrShape> {
    AttrShape::of(id)
}

/// Struct to map a PKCS#11 attribute to its shape
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    shape: AttrShape,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search(&Attrmap {
            id: id,
            name: "",
            shape: AttrShape::Bytes,
        }) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr; as $shape:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            shape: AttrShape::$shape,
        }
    };
}

/// The classification table, sorted by attribute id.
/// Several numeric attributes (MODULUS_BITS, PRIME_BITS, HW_FEATURE_TYPE,
/// ...) are deliberately exchanged as raw bytes.
static ATTRMAP: &[Attrmap<'_>] = &[
    attrmap_element!(CKA_CLASS; as UnsignedInt),
    attrmap_element!(CKA_TOKEN; as Boolean),
    attrmap_element!(CKA_PRIVATE; as Boolean),
    attrmap_element!(CKA_LABEL; as String),
    attrmap_element!(CKA_APPLICATION; as String),
    attrmap_element!(CKA_VALUE; as Bytes),
    attrmap_element!(CKA_OBJECT_ID; as Bytes),
    attrmap_element!(CKA_CERTIFICATE_TYPE; as UnsignedInt),
    attrmap_element!(CKA_ISSUER; as Bytes),
    attrmap_element!(CKA_SERIAL_NUMBER; as Bytes),
    attrmap_element!(CKA_TRUSTED; as Boolean),
    attrmap_element!(CKA_CERTIFICATE_CATEGORY; as UnsignedInt),
    attrmap_element!(CKA_KEY_TYPE; as UnsignedInt),
    attrmap_element!(CKA_SUBJECT; as Bytes),
    attrmap_element!(CKA_ID; as Bytes),
    attrmap_element!(CKA_SENSITIVE; as Boolean),
    attrmap_element!(CKA_ENCRYPT; as Boolean),
    attrmap_element!(CKA_DECRYPT; as Boolean),
    attrmap_element!(CKA_WRAP; as Boolean),
    attrmap_element!(CKA_UNWRAP; as Boolean),
    attrmap_element!(CKA_SIGN; as Boolean),
    attrmap_element!(CKA_SIGN_RECOVER; as Boolean),
    attrmap_element!(CKA_VERIFY; as Boolean),
    attrmap_element!(CKA_VERIFY_RECOVER; as Boolean),
    attrmap_element!(CKA_DERIVE; as Boolean),
    attrmap_element!(CKA_START_DATE; as Date),
    attrmap_element!(CKA_END_DATE; as Date),
    attrmap_element!(CKA_MODULUS; as Bytes),
    attrmap_element!(CKA_MODULUS_BITS; as Bytes),
    attrmap_element!(CKA_PUBLIC_EXPONENT; as Bytes),
    attrmap_element!(CKA_PRIVATE_EXPONENT; as Bytes),
    attrmap_element!(CKA_PRIME_1; as Bytes),
    attrmap_element!(CKA_PRIME_2; as Bytes),
    attrmap_element!(CKA_EXPONENT_1; as Bytes),
    attrmap_element!(CKA_EXPONENT_2; as Bytes),
    attrmap_element!(CKA_COEFFICIENT; as Bytes),
    attrmap_element!(CKA_PRIME; as Bytes),
    attrmap_element!(CKA_SUBPRIME; as Bytes),
    attrmap_element!(CKA_BASE; as Bytes),
    attrmap_element!(CKA_PRIME_BITS; as Bytes),
    attrmap_element!(CKA_SUBPRIME_BITS; as Bytes),
    attrmap_element!(CKA_VALUE_BITS; as UnsignedInt),
    attrmap_element!(CKA_VALUE_LEN; as UnsignedInt),
    attrmap_element!(CKA_EXTRACTABLE; as Boolean),
    attrmap_element!(CKA_LOCAL; as Boolean),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as Boolean),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as Boolean),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as UnsignedInt),
    attrmap_element!(CKA_MODIFIABLE; as Boolean),
    attrmap_element!(CKA_COPYABLE; as Boolean),
    attrmap_element!(CKA_DESTROYABLE; as Boolean),
    attrmap_element!(CKA_EC_PARAMS; as Bytes),
    attrmap_element!(CKA_EC_POINT; as Bytes),
    attrmap_element!(CKA_SECONDARY_AUTH; as Bytes),
    attrmap_element!(CKA_AUTH_PIN_FLAGS; as Bytes),
    attrmap_element!(CKA_ALWAYS_AUTHENTICATE; as Boolean),
    attrmap_element!(CKA_WRAP_WITH_TRUSTED; as Bytes),
    attrmap_element!(CKA_HW_FEATURE_TYPE; as Bytes),
    attrmap_element!(CKA_RESET_ON_INIT; as Bytes),
    attrmap_element!(CKA_HAS_RESET; as Bytes),
    attrmap_element!(CKA_PIXEL_X; as Bytes),
    attrmap_element!(CKA_PIXEL_Y; as Bytes),
    attrmap_element!(CKA_RESOLUTION; as Bytes),
    attrmap_element!(CKA_CHAR_ROWS; as Bytes),
    attrmap_element!(CKA_CHAR_COLUMNS; as Bytes),
    attrmap_element!(CKA_COLOR; as Bytes),
    attrmap_element!(CKA_BITS_PER_PIXEL; as Bytes),
    attrmap_element!(CKA_CHAR_SETS; as Bytes),
    attrmap_element!(CKA_ENCODING_METHODS; as Bytes),
    attrmap_element!(CKA_MIME_TYPES; as Bytes),
    attrmap_element!(CKA_MECHANISM_TYPE; as UnsignedInt),
    attrmap_element!(CKA_REQUIRED_CMS_ATTRIBUTES; as Bytes),
    attrmap_element!(CKA_DEFAULT_CMS_ATTRIBUTES; as Bytes),
    attrmap_element!(CKA_SUPPORTED_CMS_ATTRIBUTES; as Bytes),
    attrmap_element!(CKA_WRAP_TEMPLATE; as Bytes),
    attrmap_element!(CKA_UNWRAP_TEMPLATE; as Bytes),
    attrmap_element!(CKA_DERIVE_TEMPLATE; as Bytes),
    attrmap_element!(CKA_ALLOWED_MECHANISMS; as Bytes),
];

/// Resolves an attribute key, either a numeric code or a symbolic name
pub fn attr_id(key: &Value) -> Result<CK_ATTRIBUTE_TYPE> {
    match key {
        Value::Number(_) => key.as_ulong(),
        Value::Symbol(_) | Value::Bytes(_) => match key.as_name() {
            Some(name) => {
                registry::resolve_in(registry::Namespace::Attribute, name)
            }
            None => crate::err_unsupported!("attribute name is not UTF-8"),
        },
        _ => crate::err_unsupported!(
            "attribute key must be a number or a name, got {}",
            key.type_name()
        ),
    }
}

/// Converts a host value to the native bytes for the given shape
pub fn encode(shape: AttrShape, val: &Value) -> Result<Vec<u8>> {
    match shape {
        AttrShape::Boolean => match val {
            Value::Boolean(b) => {
                Ok(vec![if *b { CK_TRUE } else { CK_FALSE }])
            }
            _ => mismatch(shape, val),
        },
        AttrShape::UnsignedInt => {
            let n = match val {
                Value::Number(_) => val.as_ulong()?,
                Value::Symbol(s) => registry::resolve(s)?,
                _ => return mismatch(shape, val),
            };
            Ok(n.to_ne_bytes().to_vec())
        }
        AttrShape::Bytes | AttrShape::String => match val {
            Value::Bytes(b) => Ok(b.clone()),
            _ => mismatch(shape, val),
        },
        AttrShape::Date => match val {
            Value::Struct(s) => encode_date(s),
            _ => mismatch(shape, val),
        },
    }
}

/// Converts native bytes returned by the provider to a host value
pub fn decode(shape: AttrShape, buf: &[u8]) -> Result<Value> {
    match shape {
        AttrShape::Boolean => {
            if buf.len() != std::mem::size_of::<CK_BBOOL>() {
                return crate::err_unsupported!(
                    "boolean value of {} bytes",
                    buf.len()
                );
            }
            Ok(Value::Boolean(buf[0] != CK_FALSE))
        }
        AttrShape::UnsignedInt => match <[u8; CK_ULONG_SIZE]>::try_from(buf) {
            Ok(a) => Ok(Value::number(CK_ULONG::from_ne_bytes(a))),
            Err(_) => crate::err_unsupported!(
                "unsigned integer value of {} bytes",
                buf.len()
            ),
        },
        AttrShape::Bytes | AttrShape::String => Ok(Value::bytes(buf)),
        AttrShape::Date => decode_date(buf),
    }
}

fn mismatch<T>(shape: AttrShape, val: &Value) -> Result<T> {
    crate::err_unsupported!(
        "{:?} attribute cannot hold a {}",
        shape,
        val.type_name()
    )
}

const DATE_FIELDS: [(&str, usize); 3] = [("year", 4), ("month", 2), ("day", 2)];

fn encode_date(s: &Struct) -> Result<Vec<u8>> {
    let mut date = CK_DATE {
        year: [0; 4],
        month: [0; 2],
        day: [0; 2],
    };
    for (field, len) in DATE_FIELDS {
        let v = match s.get(field) {
            Some(v) => v.as_bytes()?,
            None => return crate::err_unsupported!("date lacks the {field} field"),
        };
        if v.len() != len || !v.iter().all(|c| c.is_ascii_digit()) {
            return crate::err_unsupported!(
                "date {field} must be {len} ASCII digits"
            );
        }
        match field {
            "year" => date.year.copy_from_slice(v),
            "month" => date.month.copy_from_slice(v),
            _ => date.day.copy_from_slice(v),
        }
    }
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&date.year);
    out.extend_from_slice(&date.month);
    out.extend_from_slice(&date.day);
    Ok(out)
}

fn decode_date(buf: &[u8]) -> Result<Value> {
    if buf.len() == 0 {
        /* empty default value */
        return Ok(Value::Nil);
    }
    if buf.len() != std::mem::size_of::<CK_DATE>() {
        return crate::err_unsupported!("date value of {} bytes", buf.len());
    }
    Ok(Value::Struct(
        Struct::new()
            .with(Value::symbol("year"), Value::bytes(&buf[0..4]))
            .with(Value::symbol("month"), Value::bytes(&buf[4..6]))
            .with(Value::symbol("day"), Value::bytes(&buf[6..8])),
    ))
}
