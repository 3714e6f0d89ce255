// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! PKCS#11 interface definitions
//!
//! Re-exports the Cryptoki v2.40 types, function table and constants and
//! adds the few legacy definitions older headers still carried.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

pub use cryptoki_sys::*;

pub mod vendor;

// this is wrongly converted on 32b architecture to too large value
// which can not be represented in CK_ULONG.
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

/* Deprecated attributes, still classified by the attribute table */
pub const CKA_SECONDARY_AUTH: CK_ATTRIBUTE_TYPE = 0x00000200;
pub const CKA_AUTH_PIN_FLAGS: CK_ATTRIBUTE_TYPE = 0x00000201;
