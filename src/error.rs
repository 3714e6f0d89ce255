// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Error type shared by every marshalling and provider call.
//!
//! Every failure aborts the call in progress; errors carry the name of the
//! logical operation that failed and, for provider failures, the PKCS#11
//! status code so the symbolic `CKR_*` name can be reported.

use std::error;
use std::fmt;

use crate::pkcs11::*;
use crate::registry::{self, Namespace};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error>>,
    errmsg: Option<String>,
    op: Option<String>,
    ckrv: CK_RV,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /* A symbolic name is not in the constant registry, see errmsg */
    UnknownConstant,
    /* An attribute code has no known value shape, see ckrv */
    UnknownAttributeType,
    /* A dynamic value does not fit the shape required, see errmsg */
    UnsupportedValueType,
    /* A mechanism description lacks the mechanism field */
    MissingMechanismField,
    /* The provider returned a non-success status, see ckrv */
    ProviderError,
    /* The handle was closed, see errmsg */
    InvalidHandleState,
    /* Other error, see origin */
    Nested,
}

impl Error {
    pub fn unknown_constant(name: &str) -> Error {
        Error {
            kind: ErrorKind::UnknownConstant,
            origin: None,
            errmsg: Some(name.to_string()),
            op: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn unknown_attribute(code: CK_ATTRIBUTE_TYPE) -> Error {
        Error {
            kind: ErrorKind::UnknownAttributeType,
            origin: None,
            errmsg: None,
            op: None,
            ckrv: code,
        }
    }

    pub fn unsupported_value(errmsg: String) -> Error {
        Error {
            kind: ErrorKind::UnsupportedValueType,
            origin: None,
            errmsg: Some(errmsg),
            op: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn missing_mechanism() -> Error {
        Error {
            kind: ErrorKind::MissingMechanismField,
            origin: None,
            errmsg: None,
            op: None,
            ckrv: CKR_MECHANISM_INVALID,
        }
    }

    pub fn provider(op: &str, ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::ProviderError,
            origin: None,
            errmsg: None,
            op: Some(op.to_string()),
            ckrv: ckrv,
        }
    }

    pub fn invalid_state(errmsg: &str) -> Error {
        Error {
            kind: ErrorKind::InvalidHandleState,
            origin: None,
            errmsg: Some(errmsg.to_string()),
            op: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn other_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error>>,
    {
        Error {
            kind: ErrorKind::Nested,
            origin: Some(error.into()),
            errmsg: None,
            op: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    /// Attaches the name of the logical operation being performed,
    /// unless a more specific one was already recorded
    pub fn in_op(mut self, op: &str) -> Error {
        if self.op.is_none() {
            self.op = Some(op.to_string());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// The provider status for ProviderError, the attribute code for
    /// UnknownAttributeType, CKR_GENERAL_ERROR otherwise
    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }

    /// Symbolic name of the provider status
    pub fn rv_name(&self) -> String {
        rv_to_name(self.ckrv)
    }
}

/// Maps a status code to its symbolic name, vendor codes are shown as an
/// offset from CKR_VENDOR_DEFINED
pub fn rv_to_name(rv: CK_RV) -> String {
    match registry::name_in(Namespace::ReturnValue, rv) {
        Ok(name) => name.to_string(),
        Err(_) => {
            if pkcs11::vendor::is_vendor_defined(
                rv,
                pkcs11::vendor::VENDOR_RV_BASE,
            ) {
                format!(
                    "CKR_VENDOR_DEFINED+0x{:x}",
                    rv - pkcs11::vendor::VENDOR_RV_BASE
                )
            } else {
                format!("0x{:08x}", rv)
            }
        }
    }
}

/// Converts a provider status into a Result, naming the operation
pub fn check_rv(op: &str, rv: CK_RV) -> Result<()> {
    if rv == CKR_OK {
        Ok(())
    } else {
        Err(Error::provider(op, rv))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref op) = self.op {
            write!(f, "{}: ", op)?;
        }
        match self.kind {
            ErrorKind::UnknownConstant => match self.errmsg {
                Some(ref e) => write!(f, "unknown constant: {}", e),
                None => write!(f, "unknown constant"),
            },
            ErrorKind::UnknownAttributeType => {
                write!(f, "unknown attribute type: 0x{:x}", self.ckrv)
            }
            ErrorKind::UnsupportedValueType => match self.errmsg {
                Some(ref e) => write!(f, "unsupported value type: {}", e),
                None => write!(f, "unsupported value type"),
            },
            ErrorKind::MissingMechanismField => {
                write!(f, "mechanism structure lacks the mechanism field")
            }
            ErrorKind::ProviderError => {
                write!(f, "failed, rv:{}", rv_to_name(self.ckrv))
            }
            ErrorKind::InvalidHandleState => match self.errmsg {
                Some(ref e) => write!(f, "invalid handle state: {}", e),
                None => write!(f, "invalid handle state"),
            },
            ErrorKind::Nested => match self.origin {
                Some(ref e) => e.fmt(f),
                None => write!(f, "unspecified error"),
            },
        }
    }
}

impl error::Error for Error {}

impl From<CK_RV> for Error {
    fn from(error: CK_RV) -> Error {
        Error {
            kind: ErrorKind::ProviderError,
            origin: None,
            errmsg: None,
            op: None,
            ckrv: error,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::other_error(error)
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(error: std::ffi::NulError) -> Error {
        Error::other_error(error)
    }
}

#[macro_export]
macro_rules! err_unsupported {
    ($($arg:tt)*) => {
        Err($crate::error::Error::unsupported_value(format!($($arg)*)))
    };
}
