// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

/* misc utilities that do not really belong in any module */

use zeroize::Zeroize;

use crate::pkcs11::*;

pub const CK_ULONG_SIZE: usize = std::mem::size_of::<CK_ULONG>();

#[macro_export]
macro_rules! bytes_to_vec {
    ($ptr:expr, $len:expr) => {{
        let ptr = $ptr as *const u8;
        let size = usize::try_from($len)?;
        if ptr.is_null() || size == 0 {
            Vec::new()
        } else {
            let mut v = Vec::<u8>::with_capacity(size);
            unsafe {
                std::ptr::copy_nonoverlapping(ptr, v.as_mut_ptr(), size);
                v.set_len(size);
            }
            v
        }
    }};
}

#[macro_export]
macro_rules! void_ptr {
    ($ptr:expr) => {
        $ptr as *const _ as CK_VOID_PTR
    };
}

#[macro_export]
macro_rules! byte_ptr {
    ($ptr:expr) => {
        $ptr as *const _ as CK_BYTE_PTR
    };
}

/// Clears a buffer that may have held secrets
pub fn zeromem(mem: &mut [u8]) {
    mem.zeroize();
}

/// Converts a buffer length to the native length type
pub fn ck_len(data: &[u8]) -> crate::error::Result<CK_ULONG> {
    Ok(CK_ULONG::try_from(data.len())?)
}
