// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use super::*;
use crate::pkcs11::*;

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

/* asserts that an expression failed with the given provider status */
macro_rules! assert_rv {
    ($ret:expr, $rv:expr) => {
        match $ret {
            Ok(_) => panic!("expected {}", stringify!($rv)),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::ProviderError, "{e}");
                assert_eq!(e.rv(), $rv, "{e}");
            }
        }
    };
}

mod mock;


/* opens a read-write session on the mock token */
fn rw_session(lib: &Library) -> Session {
    ret_or_panic!(lib.open_session(
        mock::TOKEN_SLOT,
        SessionFlags::RW_SESSION | SessionFlags::SERIAL_SESSION
    ))
}

/* a secret key labelled "test-key" stored directly in the mock */
fn secret_key() -> CK_OBJECT_HANDLE {
    mock::add_object(vec![
        (CKA_CLASS, mock::ulong_bytes(CKO_SECRET_KEY)),
        (CKA_KEY_TYPE, mock::ulong_bytes(CKK_AES)),
        (CKA_LABEL, b"test-key".to_vec()),
        (CKA_TOKEN, vec![CK_FALSE]),
        (CKA_VALUE, vec![0x42; 16]),
    ])
}

fn sym(s: &str) -> Value {
    Value::symbol(s)
}
