// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Access to the provider's function table
//!
//! The table is obtained once from the loaded module and shared by the
//! library handle and all of its sessions. Once the library is closed
//! the table is marked unusable and every further call fails with an
//! InvalidHandleState error instead of calling into an unloaded module.

use std::cell::Cell;
use std::ffi::{c_void, CStr, CString};

use crate::error::{Error, Result};
use crate::pkcs11::*;

pub fn dl_error() -> String {
    let cstr = unsafe { libc::dlerror() };
    if cstr.is_null() {
        String::from("<none>")
    } else {
        unsafe {
            String::from_utf8_lossy(CStr::from_ptr(cstr).to_bytes()).to_string()
        }
    }
}

#[derive(Debug)]
pub struct FuncList {
    fntable: *const CK_FUNCTION_LIST,
    open: Cell<bool>,
}

impl FuncList {
    /// Resolves `name` in a loaded module and calls it to obtain the
    /// function table
    pub fn from_symbol_name(handle: *mut c_void, name: &str) -> Result<FuncList> {
        let fname = CString::new(name)?;
        let list_fn: CK_C_GetFunctionList = unsafe {
            let ptr = libc::dlsym(handle, fname.as_ptr());
            if ptr.is_null() {
                None
            } else {
                Some(std::mem::transmute::<
                    *mut c_void,
                    unsafe extern "C" fn(CK_FUNCTION_LIST_PTR_PTR) -> CK_RV,
                >(ptr))
            }
        };
        let mut fn_list: CK_FUNCTION_LIST_PTR = std::ptr::null_mut();
        let rv = match list_fn {
            None => {
                return Err(Error::other_error(format!(
                    "{} not found: {}",
                    name,
                    dl_error()
                )));
            }
            Some(func) => unsafe { func(&mut fn_list) },
        };
        if rv != CKR_OK {
            return Err(Error::provider(name, rv));
        }
        unsafe { FuncList::from_ptr(fn_list) }
    }

    /// Wraps a function table obtained by other means
    ///
    /// # Safety
    ///
    /// The table must stay valid for as long as the returned object (and
    /// any session sharing it) is alive.
    pub unsafe fn from_ptr(fntable: *const CK_FUNCTION_LIST) -> Result<FuncList> {
        if fntable.is_null() {
            return Err(Error::other_error(
                "Broken pkcs11 module, null function list",
            ));
        }
        Ok(FuncList {
            fntable: fntable,
            open: Cell::new(true),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    pub(crate) fn mark_closed(&self) {
        self.open.set(false);
    }

    /// Returns the function table, or an error if the owning library has
    /// been closed
    pub fn table(&self) -> Result<&CK_FUNCTION_LIST> {
        if !self.open.get() {
            return Err(Error::invalid_state("library is closed"));
        }
        Ok(unsafe { &*self.fntable })
    }
}

/// Fetches a function pointer from a FuncList, failing if the library is
/// closed or the module does not provide the function
#[macro_export]
macro_rules! ck_fn {
    ($funcs:expr, $name:ident) => {
        match $funcs.table()?.$name {
            Some(f) => f,
            None => {
                log::error!(
                    "Broken pkcs11 module, no {} function",
                    stringify!($name)
                );
                return Err($crate::error::Error::provider(
                    stringify!($name),
                    CKR_FUNCTION_NOT_SUPPORTED,
                ));
            }
        }
    };
}

/// Calls a provider function and converts its status into a Result
/// naming the function
#[macro_export]
macro_rules! ck_call {
    ($funcs:expr, $name:ident, $($arg:expr),* $(,)?) => {{
        let f = $crate::ck_fn!($funcs, $name);
        $crate::error::check_rv(stringify!($name), unsafe { f($($arg),*) })
    }};
}
