// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Vendor defined ranges
//!
//! Codes at or above the base are reserved for module vendors and are
//! never part of the symbolic constant tables.

use crate::*;

pub const VENDOR_RV_BASE: CK_RV = CKR_VENDOR_DEFINED;

/// Returns true if the code falls in the vendor defined range
pub fn is_vendor_defined(code: CK_ULONG, base: CK_ULONG) -> bool {
    code >= base
}
