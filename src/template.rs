// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Managed arrays of CK_ATTRIBUTEs
//!
//! A [Template] owns one byte buffer per attribute and the flat
//! `CK_ATTRIBUTE` array pointing into those buffers, so the array can be
//! handed to the provider for the duration of a call. Buffers are
//! cleared on drop as they routinely carry key material.

use crate::attribute::{self, shape_of};
use crate::error::Result;
use crate::misc::zeromem;
use crate::{bytes_to_vec, void_ptr};
use crate::pkcs11::*;
use crate::registry;
use crate::value::{Struct, Value};

#[derive(Debug)]
pub struct Template {
    /// Storage for owned byte buffers backing the attribute values
    v: Vec<Vec<u8>>,
    /// The CK_ATTRIBUTE array
    p: Vec<CK_ATTRIBUTE>,
}

impl Drop for Template {
    fn drop(&mut self) {
        while let Some(mut elem) = self.v.pop() {
            zeromem(elem.as_mut_slice());
        }
    }
}

impl Template {
    pub fn new() -> Template {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Template {
        Template {
            v: Vec::with_capacity(capacity),
            p: Vec::with_capacity(capacity),
        }
    }

    /// Builds a value template from a host mapping
    ///
    /// Keys are attribute codes or symbolic names, entries with a nil key
    /// are skipped. Each value is encoded according to its attribute's
    /// shape into a buffer owned by the template. A code may appear only
    /// once, whether given by name or by number.
    pub fn from_value(s: &Struct) -> Result<Template> {
        let mut t = Template::with_capacity(s.len());
        for (k, v) in s.iter() {
            let typ = attribute::attr_id(k)?;
            if t.find_attr(typ).is_some() {
                return crate::err_unsupported!(
                    "attribute 0x{:x} given more than once",
                    typ
                );
            }
            let shape = shape_of(typ)?;
            t.add_owned_vec(typ, attribute::encode(shape, v)?)?;
        }
        Ok(t)
    }

    /// Builds a query template, one (code, null, 0) element per code
    pub fn query(codes: &[CK_ATTRIBUTE_TYPE]) -> Template {
        Template {
            v: Vec::new(),
            p: codes
                .iter()
                .map(|c| CK_ATTRIBUTE {
                    type_: *c,
                    pValue: std::ptr::null_mut(),
                    ulValueLen: 0,
                })
                .collect(),
        }
    }

    /// Builds a query template from host keys (codes or names)
    pub fn query_from_value(keys: &[Value]) -> Result<Template> {
        let mut codes = Vec::with_capacity(keys.len());
        for k in keys {
            if k.is_nil() {
                continue;
            }
            codes.push(attribute::attr_id(k)?);
        }
        Ok(Template::query(&codes))
    }

    /// Adds an attribute whose value buffer is owned by the template.
    /// Empty values are passed as a null pointer with zero length.
    pub fn add_owned_vec(
        &mut self,
        typ: CK_ATTRIBUTE_TYPE,
        val: Vec<u8>,
    ) -> Result<()> {
        let len = CK_ULONG::try_from(val.len())?;
        self.v.push(val);
        let ptr = match self.v.last() {
            Some(r) if len > 0 => void_ptr!(r.as_ptr()),
            Some(_) => std::ptr::null_mut(),
            None => return Err(CKR_GENERAL_ERROR)?,
        };
        self.p.push(CK_ATTRIBUTE {
            type_: typ,
            pValue: ptr,
            ulValueLen: len,
        });
        Ok(())
    }

    /// Allocates output buffers for every element according to the
    /// lengths the provider reported in a probe call. Elements with a
    /// zero or unavailable length keep a null pointer.
    pub fn allocate(&mut self) -> Result<()> {
        for mut b in self.v.drain(..) {
            zeromem(b.as_mut_slice());
        }
        for a in self.p.iter_mut() {
            if a.ulValueLen == 0 || a.ulValueLen == CK_UNAVAILABLE_INFORMATION
            {
                a.pValue = std::ptr::null_mut();
                continue;
            }
            let buf = vec![0u8; usize::try_from(a.ulValueLen)?];
            self.v.push(buf);
            a.pValue = match self.v.last_mut() {
                Some(r) => r.as_mut_ptr() as CK_VOID_PTR,
                None => return Err(CKR_GENERAL_ERROR)?,
            };
        }
        Ok(())
    }

    /// Decodes every element into a host mapping keyed by the symbolic
    /// attribute name. Elements the provider marked unavailable map to
    /// nil. Any other element failure fails the whole conversion.
    pub fn to_value(&self) -> Result<Struct> {
        let mut s = Struct::new();
        for a in &self.p {
            let shape = shape_of(a.type_)?;
            let name = registry::name_of(a.type_)?;
            let val = if a.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                Value::Nil
            } else {
                let buf = bytes_to_vec!(a.pValue, a.ulValueLen);
                attribute::decode(shape, &buf)?
            };
            s.insert(Value::symbol(name), val);
        }
        Ok(s)
    }

    /// Total number of bytes the elements point to, used to decide
    /// whether a fill call is needed at all
    pub fn total_len(&self) -> CK_ULONG {
        self.p
            .iter()
            .filter(|a| a.ulValueLen != CK_UNAVAILABLE_INFORMATION)
            .fold(0, |acc, a| acc.saturating_add(a.ulValueLen))
    }

    /// Returns the number of elements in the array
    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }

    /// Returns a pointer to the array of CK_ATTRIBUTEs
    pub fn as_ptr(&self) -> *const CK_ATTRIBUTE {
        self.p.as_ptr()
    }

    /// Returns a mutable pointer to the array of CK_ATTRIBUTEs
    pub fn as_mut_ptr(&mut self) -> *mut CK_ATTRIBUTE {
        self.p.as_mut_ptr()
    }

    /// Returns a reference to the internal CK_ATTRIBUTEs array
    pub fn as_slice(&self) -> &[CK_ATTRIBUTE] {
        self.p.as_slice()
    }

    /// Length of the array in the provider's length type
    pub fn ck_len(&self) -> Result<CK_ULONG> {
        Ok(CK_ULONG::try_from(self.p.len())?)
    }

    /// Finds an attribute by attribute id
    pub fn find_attr(&self, typ: CK_ATTRIBUTE_TYPE) -> Option<&CK_ATTRIBUTE> {
        self.p.iter().find(|a| a.type_ == typ)
    }
}

/// Converts a native attribute array to a host mapping
///
/// # Safety
///
/// Every element must point to at least `ulValueLen` readable bytes,
/// or be null with a zero length.
pub unsafe fn to_dynamic(attrs: &[CK_ATTRIBUTE]) -> Result<Struct> {
    let mut s = Struct::new();
    for a in attrs {
        let shape = shape_of(a.type_)?;
        let name = registry::name_of(a.type_)?;
        let buf = bytes_to_vec!(a.pValue, a.ulValueLen);
        s.insert(Value::symbol(name), attribute::decode(shape, &buf)?);
    }
    Ok(s)
}
