// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The probe-then-fill calling convention
//!
//! Cryptoki functions that return variable length output are called
//! twice: first with a null buffer so the provider reports the length it
//! needs, then with a buffer of exactly that length. The provider may
//! report a smaller final length on the second call, the result is cut
//! to it.

use crate::error::{check_rv, Result};
use crate::pkcs11::*;

/// What to do when the probe reports a zero length
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZeroLength {
    /// Return an empty result without calling the provider again
    Skip,
    /// Issue the fill call anyway with a one byte buffer, so calls that
    /// advance or terminate an operation always reach the provider with
    /// an output buffer
    Singleton,
}

/// Runs the two calls of the protocol
///
/// `call` receives the output pointer and a mutable length slot; it must
/// forward both to the provider and return the provider's status. Any
/// status other than CKR_OK aborts the protocol with a ProviderError
/// naming `op`.
pub fn two_phase<F>(op: &str, policy: ZeroLength, mut call: F) -> Result<Vec<u8>>
where
    F: FnMut(CK_BYTE_PTR, &mut CK_ULONG) -> CK_RV,
{
    let mut len: CK_ULONG = 0;
    check_rv(op, call(std::ptr::null_mut(), &mut len))?;
    log::trace!("{}: provider requested {} bytes", op, len);

    let mut buf = if len == 0 {
        match policy {
            ZeroLength::Skip => return Ok(Vec::new()),
            ZeroLength::Singleton => {
                len = 1;
                vec![0u8; 1]
            }
        }
    } else {
        vec![0u8; usize::try_from(len)?]
    };

    check_rv(op, call(buf.as_mut_ptr(), &mut len))?;
    let final_len = usize::try_from(len)?;
    if final_len > buf.len() {
        /* a provider can not write past the buffer it was given */
        log::error!(
            "{}: provider reported {} bytes for a {} bytes buffer",
            op,
            final_len,
            buf.len()
        );
        return Err(CKR_GENERAL_ERROR)?;
    }
    buf.truncate(final_len);
    Ok(buf)
}

/// Same protocol for calls that return an array of CK_ULONG values
/// (slot lists, mechanism lists)
pub fn two_phase_ulong<F>(op: &str, mut call: F) -> Result<Vec<CK_ULONG>>
where
    F: FnMut(*mut CK_ULONG, &mut CK_ULONG) -> CK_RV,
{
    let mut count: CK_ULONG = 0;
    check_rv(op, call(std::ptr::null_mut(), &mut count))?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut list = vec![0 as CK_ULONG; usize::try_from(count)?];
    check_rv(op, call(list.as_mut_ptr(), &mut count))?;
    let final_count = usize::try_from(count)?;
    if final_count > list.len() {
        return Err(CKR_GENERAL_ERROR)?;
    }
    list.truncate(final_count);
    Ok(list)
}
