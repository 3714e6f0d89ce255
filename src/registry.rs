// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Symbolic constant registry
//!
//! Maps the PKCS#11 constant names (`CKA_LABEL`, `CKM_AES_CBC`,
//! `CKR_PIN_INCORRECT`, ...) to their numeric codes and back. Constants
//! are grouped by [Namespace]; name lookups can be done within a namespace
//! or across all of them, reverse lookups are always scoped to a namespace
//! because numeric codes collide across namespaces (`CKA_CLASS`,
//! `CKO_DATA` and `CKR_OK` are all zero).
//!
//! The tables are built once, on first use, and never change afterwards.

use std::collections::HashMap;

use bimap::BiHashMap;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::pkcs11::*;

/// Constant categories
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Namespace {
    Attribute,
    ObjectClass,
    KeyType,
    CertificateType,
    HwFeature,
    Mechanism,
    ReturnValue,
    UserType,
    SessionState,
    SlotFlag,
    TokenFlag,
    SessionFlag,
    MechanismFlag,
    Misc,
}

impl Namespace {
    /// Whether codes in this namespace are unique and can be mapped back
    /// to a name. Flag words reuse bit values across different flag sets
    /// and misc constants share zero.
    pub fn is_reversible(self) -> bool {
        match self {
            Namespace::SlotFlag
            | Namespace::TokenFlag
            | Namespace::SessionFlag
            | Namespace::MechanismFlag
            | Namespace::Misc => false,
            _ => true,
        }
    }
}

macro_rules! constants {
    ($($id:ident),* $(,)?) => {
        &[$((stringify!($id), $id as CK_ULONG)),*]
    };
}

static ATTRIBUTES: &[(&str, CK_ULONG)] = constants![
    CKA_CLASS,
    CKA_TOKEN,
    CKA_PRIVATE,
    CKA_LABEL,
    CKA_APPLICATION,
    CKA_VALUE,
    CKA_OBJECT_ID,
    CKA_CERTIFICATE_TYPE,
    CKA_ISSUER,
    CKA_SERIAL_NUMBER,
    CKA_AC_ISSUER,
    CKA_OWNER,
    CKA_ATTR_TYPES,
    CKA_TRUSTED,
    CKA_CERTIFICATE_CATEGORY,
    CKA_JAVA_MIDP_SECURITY_DOMAIN,
    CKA_URL,
    CKA_HASH_OF_SUBJECT_PUBLIC_KEY,
    CKA_HASH_OF_ISSUER_PUBLIC_KEY,
    CKA_NAME_HASH_ALGORITHM,
    CKA_CHECK_VALUE,
    CKA_KEY_TYPE,
    CKA_SUBJECT,
    CKA_ID,
    CKA_SENSITIVE,
    CKA_ENCRYPT,
    CKA_DECRYPT,
    CKA_WRAP,
    CKA_UNWRAP,
    CKA_SIGN,
    CKA_SIGN_RECOVER,
    CKA_VERIFY,
    CKA_VERIFY_RECOVER,
    CKA_DERIVE,
    CKA_START_DATE,
    CKA_END_DATE,
    CKA_MODULUS,
    CKA_MODULUS_BITS,
    CKA_PUBLIC_EXPONENT,
    CKA_PRIVATE_EXPONENT,
    CKA_PRIME_1,
    CKA_PRIME_2,
    CKA_EXPONENT_1,
    CKA_EXPONENT_2,
    CKA_COEFFICIENT,
    CKA_PUBLIC_KEY_INFO,
    CKA_PRIME,
    CKA_SUBPRIME,
    CKA_BASE,
    CKA_PRIME_BITS,
    CKA_SUBPRIME_BITS,
    CKA_VALUE_BITS,
    CKA_VALUE_LEN,
    CKA_EXTRACTABLE,
    CKA_LOCAL,
    CKA_NEVER_EXTRACTABLE,
    CKA_ALWAYS_SENSITIVE,
    CKA_KEY_GEN_MECHANISM,
    CKA_MODIFIABLE,
    CKA_COPYABLE,
    CKA_DESTROYABLE,
    CKA_EC_PARAMS,
    CKA_EC_POINT,
    CKA_SECONDARY_AUTH,
    CKA_AUTH_PIN_FLAGS,
    CKA_ALWAYS_AUTHENTICATE,
    CKA_WRAP_WITH_TRUSTED,
    CKA_WRAP_TEMPLATE,
    CKA_UNWRAP_TEMPLATE,
    CKA_DERIVE_TEMPLATE,
    CKA_HW_FEATURE_TYPE,
    CKA_RESET_ON_INIT,
    CKA_HAS_RESET,
    CKA_PIXEL_X,
    CKA_PIXEL_Y,
    CKA_RESOLUTION,
    CKA_CHAR_ROWS,
    CKA_CHAR_COLUMNS,
    CKA_COLOR,
    CKA_BITS_PER_PIXEL,
    CKA_CHAR_SETS,
    CKA_ENCODING_METHODS,
    CKA_MIME_TYPES,
    CKA_MECHANISM_TYPE,
    CKA_REQUIRED_CMS_ATTRIBUTES,
    CKA_DEFAULT_CMS_ATTRIBUTES,
    CKA_SUPPORTED_CMS_ATTRIBUTES,
    CKA_ALLOWED_MECHANISMS,
    CKA_VENDOR_DEFINED,
];

static OBJECT_CLASSES: &[(&str, CK_ULONG)] = constants![
    CKO_DATA,
    CKO_CERTIFICATE,
    CKO_PUBLIC_KEY,
    CKO_PRIVATE_KEY,
    CKO_SECRET_KEY,
    CKO_HW_FEATURE,
    CKO_DOMAIN_PARAMETERS,
    CKO_MECHANISM,
    CKO_OTP_KEY,
    CKO_VENDOR_DEFINED,
];

static KEY_TYPES: &[(&str, CK_ULONG)] = constants![
    CKK_RSA,
    CKK_DSA,
    CKK_DH,
    CKK_EC,
    CKK_X9_42_DH,
    CKK_GENERIC_SECRET,
    CKK_RC2,
    CKK_RC4,
    CKK_DES,
    CKK_DES2,
    CKK_DES3,
    CKK_CAST128,
    CKK_AES,
    CKK_BLOWFISH,
    CKK_TWOFISH,
    CKK_CAMELLIA,
    CKK_ARIA,
    CKK_MD5_HMAC,
    CKK_SHA_1_HMAC,
    CKK_SHA256_HMAC,
    CKK_SHA384_HMAC,
    CKK_SHA512_HMAC,
    CKK_SHA224_HMAC,
    CKK_GOSTR3410,
    CKK_GOSTR3411,
    CKK_GOST28147,
    CKK_VENDOR_DEFINED,
];

static CERTIFICATE_TYPES: &[(&str, CK_ULONG)] = constants![
    CKC_X_509,
    CKC_X_509_ATTR_CERT,
    CKC_WTLS,
    CKC_VENDOR_DEFINED,
];

static HW_FEATURES: &[(&str, CK_ULONG)] = constants![
    CKH_MONOTONIC_COUNTER,
    CKH_CLOCK,
    CKH_USER_INTERFACE,
    CKH_VENDOR_DEFINED,
];

static MECHANISMS: &[(&str, CK_ULONG)] = constants![
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_RSA_PKCS,
    CKM_RSA_X_509,
    CKM_MD5_RSA_PKCS,
    CKM_SHA1_RSA_PKCS,
    CKM_RSA_PKCS_OAEP,
    CKM_RSA_PKCS_PSS,
    CKM_SHA1_RSA_PKCS_PSS,
    CKM_SHA256_RSA_PKCS,
    CKM_SHA384_RSA_PKCS,
    CKM_SHA512_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS,
    CKM_SHA384_RSA_PKCS_PSS,
    CKM_SHA512_RSA_PKCS_PSS,
    CKM_SHA224_RSA_PKCS,
    CKM_SHA224_RSA_PKCS_PSS,
    CKM_DSA_KEY_PAIR_GEN,
    CKM_DSA,
    CKM_DSA_SHA1,
    CKM_DH_PKCS_KEY_PAIR_GEN,
    CKM_DH_PKCS_DERIVE,
    CKM_DES3_KEY_GEN,
    CKM_DES3_ECB,
    CKM_DES3_CBC,
    CKM_DES3_MAC,
    CKM_DES3_CBC_PAD,
    CKM_MD5,
    CKM_MD5_HMAC,
    CKM_SHA_1,
    CKM_SHA_1_HMAC,
    CKM_SHA256,
    CKM_SHA256_HMAC,
    CKM_SHA224,
    CKM_SHA224_HMAC,
    CKM_SHA384,
    CKM_SHA384_HMAC,
    CKM_SHA512,
    CKM_SHA512_HMAC,
    CKM_GENERIC_SECRET_KEY_GEN,
    CKM_EC_KEY_PAIR_GEN,
    CKM_ECDSA,
    CKM_ECDSA_SHA1,
    CKM_ECDSA_SHA224,
    CKM_ECDSA_SHA256,
    CKM_ECDSA_SHA384,
    CKM_ECDSA_SHA512,
    CKM_ECDH1_DERIVE,
    CKM_ECDH1_COFACTOR_DERIVE,
    CKM_AES_KEY_GEN,
    CKM_AES_ECB,
    CKM_AES_CBC,
    CKM_AES_MAC,
    CKM_AES_CBC_PAD,
    CKM_AES_CTR,
    CKM_AES_GCM,
    CKM_AES_CCM,
    CKM_AES_CMAC,
    CKM_AES_KEY_WRAP,
    CKM_AES_KEY_WRAP_PAD,
    CKM_VENDOR_DEFINED,
];

static RETURN_VALUES: &[(&str, CK_ULONG)] = constants![
    CKR_OK,
    CKR_CANCEL,
    CKR_HOST_MEMORY,
    CKR_SLOT_ID_INVALID,
    CKR_GENERAL_ERROR,
    CKR_FUNCTION_FAILED,
    CKR_ARGUMENTS_BAD,
    CKR_NO_EVENT,
    CKR_NEED_TO_CREATE_THREADS,
    CKR_CANT_LOCK,
    CKR_ATTRIBUTE_READ_ONLY,
    CKR_ATTRIBUTE_SENSITIVE,
    CKR_ATTRIBUTE_TYPE_INVALID,
    CKR_ATTRIBUTE_VALUE_INVALID,
    CKR_ACTION_PROHIBITED,
    CKR_DATA_INVALID,
    CKR_DATA_LEN_RANGE,
    CKR_DEVICE_ERROR,
    CKR_DEVICE_MEMORY,
    CKR_DEVICE_REMOVED,
    CKR_ENCRYPTED_DATA_INVALID,
    CKR_ENCRYPTED_DATA_LEN_RANGE,
    CKR_FUNCTION_CANCELED,
    CKR_FUNCTION_NOT_PARALLEL,
    CKR_FUNCTION_NOT_SUPPORTED,
    CKR_KEY_HANDLE_INVALID,
    CKR_KEY_SIZE_RANGE,
    CKR_KEY_TYPE_INCONSISTENT,
    CKR_KEY_NOT_NEEDED,
    CKR_KEY_CHANGED,
    CKR_KEY_NEEDED,
    CKR_KEY_INDIGESTIBLE,
    CKR_KEY_FUNCTION_NOT_PERMITTED,
    CKR_KEY_NOT_WRAPPABLE,
    CKR_KEY_UNEXTRACTABLE,
    CKR_MECHANISM_INVALID,
    CKR_MECHANISM_PARAM_INVALID,
    CKR_OBJECT_HANDLE_INVALID,
    CKR_OPERATION_ACTIVE,
    CKR_OPERATION_NOT_INITIALIZED,
    CKR_PIN_INCORRECT,
    CKR_PIN_INVALID,
    CKR_PIN_LEN_RANGE,
    CKR_PIN_EXPIRED,
    CKR_PIN_LOCKED,
    CKR_SESSION_CLOSED,
    CKR_SESSION_COUNT,
    CKR_SESSION_HANDLE_INVALID,
    CKR_SESSION_PARALLEL_NOT_SUPPORTED,
    CKR_SESSION_READ_ONLY,
    CKR_SESSION_EXISTS,
    CKR_SESSION_READ_ONLY_EXISTS,
    CKR_SESSION_READ_WRITE_SO_EXISTS,
    CKR_SIGNATURE_INVALID,
    CKR_SIGNATURE_LEN_RANGE,
    CKR_TEMPLATE_INCOMPLETE,
    CKR_TEMPLATE_INCONSISTENT,
    CKR_TOKEN_NOT_PRESENT,
    CKR_TOKEN_NOT_RECOGNIZED,
    CKR_TOKEN_WRITE_PROTECTED,
    CKR_UNWRAPPING_KEY_HANDLE_INVALID,
    CKR_UNWRAPPING_KEY_SIZE_RANGE,
    CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT,
    CKR_USER_ALREADY_LOGGED_IN,
    CKR_USER_NOT_LOGGED_IN,
    CKR_USER_PIN_NOT_INITIALIZED,
    CKR_USER_TYPE_INVALID,
    CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
    CKR_USER_TOO_MANY_TYPES,
    CKR_WRAPPED_KEY_INVALID,
    CKR_WRAPPED_KEY_LEN_RANGE,
    CKR_WRAPPING_KEY_HANDLE_INVALID,
    CKR_WRAPPING_KEY_SIZE_RANGE,
    CKR_WRAPPING_KEY_TYPE_INCONSISTENT,
    CKR_RANDOM_SEED_NOT_SUPPORTED,
    CKR_RANDOM_NO_RNG,
    CKR_DOMAIN_PARAMS_INVALID,
    CKR_CURVE_NOT_SUPPORTED,
    CKR_BUFFER_TOO_SMALL,
    CKR_SAVED_STATE_INVALID,
    CKR_INFORMATION_SENSITIVE,
    CKR_STATE_UNSAVEABLE,
    CKR_CRYPTOKI_NOT_INITIALIZED,
    CKR_CRYPTOKI_ALREADY_INITIALIZED,
    CKR_MUTEX_BAD,
    CKR_MUTEX_NOT_LOCKED,
    CKR_NEW_PIN_MODE,
    CKR_NEXT_OTP,
    CKR_EXCEEDED_MAX_ITERATIONS,
    CKR_FIPS_SELF_TEST_FAILED,
    CKR_LIBRARY_LOAD_FAILED,
    CKR_PIN_TOO_WEAK,
    CKR_PUBLIC_KEY_INVALID,
    CKR_FUNCTION_REJECTED,
    CKR_VENDOR_DEFINED,
];

static USER_TYPES: &[(&str, CK_ULONG)] =
    constants![CKU_SO, CKU_USER, CKU_CONTEXT_SPECIFIC];

static SESSION_STATES: &[(&str, CK_ULONG)] = constants![
    CKS_RO_PUBLIC_SESSION,
    CKS_RO_USER_FUNCTIONS,
    CKS_RW_PUBLIC_SESSION,
    CKS_RW_USER_FUNCTIONS,
    CKS_RW_SO_FUNCTIONS,
];

static SLOT_FLAGS: &[(&str, CK_ULONG)] =
    constants![CKF_TOKEN_PRESENT, CKF_REMOVABLE_DEVICE, CKF_HW_SLOT];

static TOKEN_FLAGS: &[(&str, CK_ULONG)] = constants![
    CKF_RNG,
    CKF_WRITE_PROTECTED,
    CKF_LOGIN_REQUIRED,
    CKF_USER_PIN_INITIALIZED,
    CKF_RESTORE_KEY_NOT_NEEDED,
    CKF_CLOCK_ON_TOKEN,
    CKF_PROTECTED_AUTHENTICATION_PATH,
    CKF_DUAL_CRYPTO_OPERATIONS,
    CKF_TOKEN_INITIALIZED,
    CKF_SECONDARY_AUTHENTICATION,
    CKF_USER_PIN_COUNT_LOW,
    CKF_USER_PIN_FINAL_TRY,
    CKF_USER_PIN_LOCKED,
    CKF_USER_PIN_TO_BE_CHANGED,
    CKF_SO_PIN_COUNT_LOW,
    CKF_SO_PIN_FINAL_TRY,
    CKF_SO_PIN_LOCKED,
    CKF_SO_PIN_TO_BE_CHANGED,
];

static SESSION_FLAGS: &[(&str, CK_ULONG)] =
    constants![CKF_RW_SESSION, CKF_SERIAL_SESSION];

static MECHANISM_FLAGS: &[(&str, CK_ULONG)] = constants![
    CKF_HW,
    CKF_ENCRYPT,
    CKF_DECRYPT,
    CKF_DIGEST,
    CKF_SIGN,
    CKF_SIGN_RECOVER,
    CKF_VERIFY,
    CKF_VERIFY_RECOVER,
    CKF_GENERATE,
    CKF_GENERATE_KEY_PAIR,
    CKF_WRAP,
    CKF_UNWRAP,
    CKF_DERIVE,
    CKF_EXTENSION,
];

static MISC: &[(&str, CK_ULONG)] = constants![
    CK_INVALID_HANDLE,
    CK_UNAVAILABLE_INFORMATION,
    CK_EFFECTIVELY_INFINITE,
    CKN_SURRENDER,
    CKF_DONT_BLOCK,
    CKF_ARRAY_ATTRIBUTE,
    CKF_OS_LOCKING_OK,
    CKF_LIBRARY_CANT_CREATE_OS_THREADS,
];

static TABLES: [(Namespace, &[(&str, CK_ULONG)]); 14] = [
    (Namespace::Attribute, ATTRIBUTES),
    (Namespace::ObjectClass, OBJECT_CLASSES),
    (Namespace::KeyType, KEY_TYPES),
    (Namespace::CertificateType, CERTIFICATE_TYPES),
    (Namespace::HwFeature, HW_FEATURES),
    (Namespace::Mechanism, MECHANISMS),
    (Namespace::ReturnValue, RETURN_VALUES),
    (Namespace::UserType, USER_TYPES),
    (Namespace::SessionState, SESSION_STATES),
    (Namespace::SlotFlag, SLOT_FLAGS),
    (Namespace::TokenFlag, TOKEN_FLAGS),
    (Namespace::SessionFlag, SESSION_FLAGS),
    (Namespace::MechanismFlag, MECHANISM_FLAGS),
    (Namespace::Misc, MISC),
];

struct Registry {
    /// every registered name, across namespaces
    flat: HashMap<&'static str, (Namespace, CK_ULONG)>,
    /// name <-> code, only for reversible namespaces
    reverse: HashMap<Namespace, BiHashMap<&'static str, CK_ULONG>>,
}

impl Registry {
    fn build() -> Registry {
        let mut flat = HashMap::new();
        let mut reverse = HashMap::new();
        for (ns, table) in TABLES.iter() {
            let mut bimap = BiHashMap::with_capacity(table.len());
            for (name, code) in table.iter() {
                if let Some((other, _)) = flat.insert(*name, (*ns, *code)) {
                    log::error!(
                        "Constant {} registered in both {:?} and {:?}",
                        name,
                        other,
                        ns
                    );
                }
                if ns.is_reversible() {
                    if bimap.insert_no_overwrite(*name, *code).is_err() {
                        log::error!(
                            "Duplicate code 0x{:x} for {} in {:?}",
                            code,
                            name,
                            ns
                        );
                    }
                }
            }
            if ns.is_reversible() {
                reverse.insert(*ns, bimap);
            }
        }
        log::debug!("Constant registry initialized: {} names", flat.len());
        Registry {
            flat: flat,
            reverse: reverse,
        }
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// Forces the registry initialization, repeated calls are no-ops
pub fn initialize() {
    Lazy::force(&REGISTRY);
}

/// Resolves a constant name in the flat view of all namespaces
pub fn resolve(name: &str) -> Result<CK_ULONG> {
    match REGISTRY.flat.get(name) {
        Some((_, code)) => Ok(*code),
        None => Err(Error::unknown_constant(name)),
    }
}

/// Resolves a constant name only if it belongs to the given namespace
pub fn resolve_in(ns: Namespace, name: &str) -> Result<CK_ULONG> {
    match REGISTRY.flat.get(name) {
        Some((n, code)) if *n == ns => Ok(*code),
        _ => Err(Error::unknown_constant(name)),
    }
}

/// Returns the namespace a name was registered in
pub fn namespace_of(name: &str) -> Result<Namespace> {
    match REGISTRY.flat.get(name) {
        Some((ns, _)) => Ok(*ns),
        None => Err(Error::unknown_constant(name)),
    }
}

/// Reverse lookup of an attribute type code
pub fn name_of(code: CK_ATTRIBUTE_TYPE) -> Result<&'static str> {
    name_in(Namespace::Attribute, code)
}

/// Reverse lookup of a code within a namespace
pub fn name_in(ns: Namespace, code: CK_ULONG) -> Result<&'static str> {
    match REGISTRY.reverse.get(&ns) {
        Some(map) => match map.get_by_right(&code) {
            Some(name) => Ok(*name),
            None => Err(Error::unknown_constant(&format!(
                "{:?} code 0x{:x}",
                ns, code
            ))),
        },
        None => Err(Error::unknown_constant(&format!(
            "{:?} has no reverse mapping",
            ns
        ))),
    }
}

/// Names of the flags set in `flags`, for the flag namespaces
pub fn flag_names(ns: Namespace, flags: CK_FLAGS) -> Vec<&'static str> {
    TABLES
        .iter()
        .filter(|(n, _)| *n == ns)
        .flat_map(|(_, table)| table.iter())
        .filter(|(_, bit)| *bit != 0 && flags & *bit == *bit)
        .map(|(name, _)| *name)
        .collect()
}

/// Number of names registered across all namespaces
pub fn len() -> usize {
    REGISTRY.flat.len()
}

#[cfg(test)]
pub(crate) fn tables() -> &'static [(Namespace, &'static [(&'static str, CK_ULONG)])]
{
    &TABLES
}
