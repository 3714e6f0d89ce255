// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Capability dispatch for the scripting host
//!
//! The host sees a library and its sessions as opaque objects answering
//! to keyword named methods (`:get-slot-list`, `:encrypt`, ...). Each
//! object lists the methods it supports and dispatches a call by
//! unmarshalling the host arguments, running the typed operation on the
//! underlying [Library] or [Session] and marshalling the result back.

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::info;
use crate::library::{Library, SessionFlags};
use crate::mechanism::Mechanism;
use crate::pkcs11::*;
use crate::registry::{self, Namespace};
use crate::session::Session;
use crate::template::Template;
use crate::value::Value;

/// Number of handles returned by find-objects when no maximum is given
pub const DEFAULT_FIND_MAX: usize = 64;

/// What a method call hands back to the host
#[derive(Debug)]
pub enum Reply {
    Value(Value),
    Session(SessionObject),
}

impl Reply {
    /// Unwraps a plain value, failing if the call produced an object
    pub fn into_value(self) -> Result<Value> {
        match self {
            Reply::Value(v) => Ok(v),
            Reply::Session(_) => crate::err_unsupported!(
                "expected a value, the call returned a session"
            ),
        }
    }

    pub fn into_session(self) -> Result<SessionObject> {
        match self {
            Reply::Session(s) => Ok(s),
            Reply::Value(v) => crate::err_unsupported!(
                "expected a session, the call returned a {}",
                v.type_name()
            ),
        }
    }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Reply {
        Reply::Value(v)
    }
}

/// An object exposed to the host
pub trait HostObject {
    /// The host visible type name
    fn type_name(&self) -> &'static str;

    /// The method names this object answers to
    fn methods(&self) -> &'static [&'static str];

    /// Calls a method; `args` excludes the object itself
    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Reply>;

    fn has_method(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }
}

fn check_arity(args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        if min == max {
            return crate::err_unsupported!(
                "expected {} arguments, got {}",
                min,
                args.len()
            );
        }
        return crate::err_unsupported!(
            "expected {} to {} arguments, got {}",
            min,
            max,
            args.len()
        );
    }
    Ok(())
}

fn arg(args: &[Value], idx: usize) -> Result<&Value> {
    match args.get(idx) {
        Some(v) => Ok(v),
        None => crate::err_unsupported!("missing argument {}", idx + 1),
    }
}

/// Numbers are taken as is, symbols are resolved as constants
fn ulong_arg(args: &[Value], idx: usize) -> Result<CK_ULONG> {
    match arg(args, idx)? {
        Value::Symbol(s) => registry::resolve(s),
        v => v.as_ulong(),
    }
}

fn usize_arg(args: &[Value], idx: usize) -> Result<usize> {
    Ok(usize::try_from(ulong_arg(args, idx)?)?)
}

fn bytes_arg(args: &[Value], idx: usize) -> Result<&[u8]> {
    arg(args, idx)?.as_bytes()
}

fn secret_arg(args: &[Value], idx: usize) -> Result<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(bytes_arg(args, idx)?.to_vec()))
}

fn mechanism_arg(args: &[Value], idx: usize) -> Result<Mechanism> {
    Mechanism::try_from(arg(args, idx)?)
}

fn template_arg(args: &[Value], idx: usize) -> Result<Template> {
    Template::from_value(arg(args, idx)?.as_struct()?)
}

fn keyword_arg(args: &[Value], idx: usize) -> Option<&str> {
    match args.get(idx) {
        Some(Value::Symbol(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn handle_value(h: CK_ULONG) -> Value {
    Value::number(h)
}

fn user_type(v: &Value) -> Result<CK_USER_TYPE> {
    match v {
        Value::Symbol(s) => match s.as_str() {
            "so" => Ok(CKU_SO),
            "user" => Ok(CKU_USER),
            "context-specific" => Ok(CKU_CONTEXT_SPECIFIC),
            name => registry::resolve_in(Namespace::UserType, name),
        },
        Value::Number(_) => v.as_ulong(),
        _ => crate::err_unsupported!(
            "expected one of :so, :user, :context-specific, got {}",
            v
        ),
    }
}

fn mechanism_value(m: CK_MECHANISM_TYPE) -> Value {
    match registry::name_in(Namespace::Mechanism, m) {
        Ok(name) => Value::symbol(name),
        Err(_) => Value::number(m),
    }
}

static LIBRARY_METHODS: &[&str] = &[
    "close",
    "get-info",
    "get-slot-list",
    "get-slot-info",
    "get-token-info",
    "wait-for-slot-event",
    "get-mechanism-list",
    "get-mechanism-info",
    "init-token",
    "open-session",
    "close-all-sessions",
];

/// The host object wrapping a [Library]
#[derive(Debug)]
pub struct LibraryObject {
    lib: Library,
}

impl LibraryObject {
    pub fn new(path: &str) -> Result<LibraryObject> {
        Ok(LibraryObject {
            lib: Library::open(path)?,
        })
    }

    pub fn from_library(lib: Library) -> LibraryObject {
        LibraryObject { lib: lib }
    }

    pub fn library(&self) -> &Library {
        &self.lib
    }

    pub fn library_mut(&mut self) -> &mut Library {
        &mut self.lib
    }

    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Reply> {
        let lib = &mut self.lib;
        Ok(match method {
            "close" => {
                check_arity(args, 0, 0)?;
                lib.close()?;
                Value::Nil.into()
            }
            "get-info" => {
                check_arity(args, 0, 0)?;
                info::info_to_value(&lib.get_info()?).into()
            }
            "get-slot-list" => {
                check_arity(args, 0, 1)?;
                let token_present = match args.first() {
                    None => true,
                    Some(Value::Symbol(s)) if s == "all" => false,
                    Some(v) => v.as_bool()?,
                };
                Value::Tuple(
                    lib.get_slot_list(token_present)?
                        .into_iter()
                        .map(handle_value)
                        .collect(),
                )
                .into()
            }
            "get-slot-info" => {
                check_arity(args, 1, 1)?;
                info::slot_info_to_value(&lib.get_slot_info(ulong_arg(args, 0)?)?)
                    .into()
            }
            "get-token-info" => {
                check_arity(args, 1, 1)?;
                info::token_info_to_value(
                    &lib.get_token_info(ulong_arg(args, 0)?)?,
                )
                .into()
            }
            "wait-for-slot-event" => {
                check_arity(args, 0, 1)?;
                let dont_block = match args.first() {
                    None | Some(Value::Nil) => false,
                    Some(_) => match keyword_arg(args, 0) {
                        Some("dont-block") => true,
                        _ => {
                            return crate::err_unsupported!(
                                "expected :dont-block, got {}",
                                args[0]
                            )
                        }
                    },
                };
                match lib.wait_for_slot_event(dont_block)? {
                    Some(slot) => handle_value(slot),
                    None => Value::Nil,
                }
                .into()
            }
            "get-mechanism-list" => {
                check_arity(args, 1, 1)?;
                Value::Tuple(
                    lib.get_mechanism_list(ulong_arg(args, 0)?)?
                        .into_iter()
                        .map(mechanism_value)
                        .collect(),
                )
                .into()
            }
            "get-mechanism-info" => {
                check_arity(args, 2, 2)?;
                let mech = mechanism_arg(args, 1)?.mechanism();
                info::mechanism_info_to_value(
                    &lib.get_mechanism_info(ulong_arg(args, 0)?, mech)?,
                )
                .into()
            }
            "init-token" => {
                check_arity(args, 3, 3)?;
                let so_pin = secret_arg(args, 1)?;
                lib.init_token(ulong_arg(args, 0)?, &so_pin, bytes_arg(args, 2)?)?;
                Value::Nil.into()
            }
            "open-session" => {
                check_arity(args, 1, 2)?;
                let rw = match args.get(1) {
                    None | Some(Value::Nil) => true,
                    Some(_) => match keyword_arg(args, 1) {
                        Some("read-write") => true,
                        Some("read-only") => false,
                        _ => {
                            return crate::err_unsupported!(
                                "expected :read-only or :read-write, got {}",
                                args[1]
                            )
                        }
                    },
                };
                let flags = if rw {
                    SessionFlags::SERIAL_SESSION | SessionFlags::RW_SESSION
                } else {
                    SessionFlags::SERIAL_SESSION
                };
                let session = lib.open_session(ulong_arg(args, 0)?, flags)?;
                Reply::Session(SessionObject::from_session(session))
            }
            "close-all-sessions" => {
                check_arity(args, 1, 1)?;
                lib.close_all_sessions(ulong_arg(args, 0)?)?;
                Value::Nil.into()
            }
            _ => return Err(Error::unknown_constant(method)),
        })
    }
}

impl HostObject for LibraryObject {
    fn type_name(&self) -> &'static str {
        "pkcs11"
    }

    fn methods(&self) -> &'static [&'static str] {
        LIBRARY_METHODS
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Reply> {
        log::trace!("pkcs11 :{} {:?}", method, args);
        self.dispatch(method, args).map_err(|e| e.in_op(method))
    }
}

static SESSION_METHODS: &[&str] = &[
    "close",
    "close-session",
    "get-session-info",
    "get-operation-state",
    "login",
    "logout",
    "init-pin",
    "set-pin",
    "create-object",
    "copy-object",
    "destroy-object",
    "get-object-size",
    "get-attribute-value",
    "set-attribute-value",
    "find-objects-init",
    "find-objects",
    "find-objects-final",
    "encrypt-init",
    "encrypt",
    "encrypt-update",
    "encrypt-final",
    "decrypt-init",
    "decrypt",
    "decrypt-update",
    "decrypt-final",
    "digest-init",
    "digest",
    "digest-update",
    "digest-key",
    "digest-final",
    "sign-init",
    "sign",
    "sign-update",
    "sign-final",
    "sign-recover-init",
    "sign-recover",
    "verify-init",
    "verify",
    "verify-update",
    "verify-final",
    "verify-recover-init",
    "verify-recover",
    "digest-encrypt-update",
    "decrypt-digest-update",
    "sign-encrypt-update",
    "decrypt-verify-update",
    "generate-key",
    "generate-key-pair",
    "wrap-key",
    "unwrap-key",
    "derive-key",
    "seed-random",
    "generate-random",
];

/// The host object wrapping a [Session]
#[derive(Debug)]
pub struct SessionObject {
    session: Session,
}

impl SessionObject {
    pub fn from_session(session: Session) -> SessionObject {
        SessionObject { session: session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value> {
        let s = &mut self.session;
        Ok(match method {
            "close" | "close-session" => {
                check_arity(args, 0, 0)?;
                s.close()?;
                Value::Nil
            }
            "get-session-info" => {
                check_arity(args, 0, 0)?;
                info::session_info_to_value(&s.get_session_info()?)
            }
            "get-operation-state" => {
                check_arity(args, 0, 0)?;
                Value::Bytes(s.get_operation_state()?)
            }
            "login" => {
                check_arity(args, 2, 2)?;
                let pin = secret_arg(args, 1)?;
                s.login(user_type(arg(args, 0)?)?, &pin)?;
                Value::Nil
            }
            "logout" => {
                check_arity(args, 0, 0)?;
                s.logout()?;
                Value::Nil
            }
            "init-pin" => {
                check_arity(args, 1, 1)?;
                s.init_pin(&secret_arg(args, 0)?)?;
                Value::Nil
            }
            "set-pin" => {
                check_arity(args, 2, 2)?;
                s.set_pin(&secret_arg(args, 0)?, &secret_arg(args, 1)?)?;
                Value::Nil
            }
            "create-object" => {
                check_arity(args, 1, 1)?;
                handle_value(s.create_object(&template_arg(args, 0)?)?)
            }
            "copy-object" => {
                check_arity(args, 1, 2)?;
                let template = match args.get(1) {
                    Some(_) => template_arg(args, 1)?,
                    None => Template::new(),
                };
                handle_value(s.copy_object(ulong_arg(args, 0)?, &template)?)
            }
            "destroy-object" => {
                check_arity(args, 1, 1)?;
                s.destroy_object(ulong_arg(args, 0)?)?;
                Value::Nil
            }
            "get-object-size" => {
                check_arity(args, 1, 1)?;
                Value::number(s.get_object_size(ulong_arg(args, 0)?)?)
            }
            "get-attribute-value" => {
                check_arity(args, 2, 2)?;
                let query = Template::query_from_value(arg(args, 1)?.as_tuple()?)?;
                let codes: Vec<CK_ATTRIBUTE_TYPE> =
                    query.as_slice().iter().map(|a| a.type_).collect();
                Value::Struct(s.get_attribute_value(ulong_arg(args, 0)?, &codes)?)
            }
            "set-attribute-value" => {
                check_arity(args, 2, 2)?;
                s.set_attribute_value(ulong_arg(args, 0)?, &template_arg(args, 1)?)?;
                Value::Nil
            }
            "find-objects-init" => {
                check_arity(args, 0, 1)?;
                let template = match args.first() {
                    Some(_) => template_arg(args, 0)?,
                    None => Template::new(),
                };
                s.find_objects_init(&template)?;
                Value::Nil
            }
            "find-objects" => {
                check_arity(args, 0, 1)?;
                let max = match args.first() {
                    Some(_) => usize_arg(args, 0)?,
                    None => DEFAULT_FIND_MAX,
                };
                Value::Tuple(
                    s.find_objects(max)?.into_iter().map(handle_value).collect(),
                )
            }
            "find-objects-final" => {
                check_arity(args, 0, 0)?;
                s.find_objects_final()?;
                Value::Nil
            }
            "encrypt-init" => {
                check_arity(args, 2, 2)?;
                s.encrypt_init(&mechanism_arg(args, 0)?, ulong_arg(args, 1)?)?;
                Value::Nil
            }
            "encrypt" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.encrypt(bytes_arg(args, 0)?)?)
            }
            "encrypt-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.encrypt_update(bytes_arg(args, 0)?)?)
            }
            "encrypt-final" => {
                check_arity(args, 0, 0)?;
                Value::Bytes(s.encrypt_final()?)
            }
            "decrypt-init" => {
                check_arity(args, 2, 2)?;
                s.decrypt_init(&mechanism_arg(args, 0)?, ulong_arg(args, 1)?)?;
                Value::Nil
            }
            "decrypt" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.decrypt(bytes_arg(args, 0)?)?)
            }
            "decrypt-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.decrypt_update(bytes_arg(args, 0)?)?)
            }
            "decrypt-final" => {
                check_arity(args, 0, 0)?;
                Value::Bytes(s.decrypt_final()?)
            }
            "digest-init" => {
                check_arity(args, 1, 1)?;
                s.digest_init(&mechanism_arg(args, 0)?)?;
                Value::Nil
            }
            "digest" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.digest(bytes_arg(args, 0)?)?)
            }
            "digest-update" => {
                check_arity(args, 1, 1)?;
                s.digest_update(bytes_arg(args, 0)?)?;
                Value::Nil
            }
            "digest-key" => {
                check_arity(args, 1, 1)?;
                s.digest_key(ulong_arg(args, 0)?)?;
                Value::Nil
            }
            "digest-final" => {
                check_arity(args, 0, 0)?;
                Value::Bytes(s.digest_final()?)
            }
            "sign-init" => {
                check_arity(args, 2, 2)?;
                s.sign_init(&mechanism_arg(args, 0)?, ulong_arg(args, 1)?)?;
                Value::Nil
            }
            "sign" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.sign(bytes_arg(args, 0)?)?)
            }
            "sign-update" => {
                check_arity(args, 1, 1)?;
                s.sign_update(bytes_arg(args, 0)?)?;
                Value::Nil
            }
            "sign-final" => {
                check_arity(args, 0, 0)?;
                Value::Bytes(s.sign_final()?)
            }
            "sign-recover-init" => {
                check_arity(args, 2, 2)?;
                s.sign_recover_init(&mechanism_arg(args, 0)?, ulong_arg(args, 1)?)?;
                Value::Nil
            }
            "sign-recover" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.sign_recover(bytes_arg(args, 0)?)?)
            }
            "verify-init" => {
                check_arity(args, 2, 2)?;
                s.verify_init(&mechanism_arg(args, 0)?, ulong_arg(args, 1)?)?;
                Value::Nil
            }
            "verify" => {
                check_arity(args, 2, 2)?;
                Value::Boolean(s.verify(bytes_arg(args, 0)?, bytes_arg(args, 1)?)?)
            }
            "verify-update" => {
                check_arity(args, 1, 1)?;
                s.verify_update(bytes_arg(args, 0)?)?;
                Value::Nil
            }
            "verify-final" => {
                check_arity(args, 1, 1)?;
                Value::Boolean(s.verify_final(bytes_arg(args, 0)?)?)
            }
            "verify-recover-init" => {
                check_arity(args, 2, 2)?;
                s.verify_recover_init(
                    &mechanism_arg(args, 0)?,
                    ulong_arg(args, 1)?,
                )?;
                Value::Nil
            }
            "verify-recover" => {
                check_arity(args, 1, 1)?;
                let (valid, data) = s.verify_recover(bytes_arg(args, 0)?)?;
                Value::Tuple(vec![Value::Boolean(valid), Value::Bytes(data)])
            }
            "digest-encrypt-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.digest_encrypt_update(bytes_arg(args, 0)?)?)
            }
            "decrypt-digest-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.decrypt_digest_update(bytes_arg(args, 0)?)?)
            }
            "sign-encrypt-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.sign_encrypt_update(bytes_arg(args, 0)?)?)
            }
            "decrypt-verify-update" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.decrypt_verify_update(bytes_arg(args, 0)?)?)
            }
            "generate-key" => {
                check_arity(args, 1, 2)?;
                let template = match args.get(1) {
                    Some(_) => Some(template_arg(args, 1)?),
                    None => None,
                };
                handle_value(
                    s.generate_key(&mechanism_arg(args, 0)?, template.as_ref())?,
                )
            }
            "generate-key-pair" => {
                check_arity(args, 3, 3)?;
                let (pubkey, privkey) = s.generate_key_pair(
                    &mechanism_arg(args, 0)?,
                    &template_arg(args, 1)?,
                    &template_arg(args, 2)?,
                )?;
                Value::Tuple(vec![handle_value(pubkey), handle_value(privkey)])
            }
            "wrap-key" => {
                check_arity(args, 3, 3)?;
                Value::Bytes(s.wrap_key(
                    &mechanism_arg(args, 0)?,
                    ulong_arg(args, 1)?,
                    ulong_arg(args, 2)?,
                )?)
            }
            "unwrap-key" => {
                check_arity(args, 4, 4)?;
                handle_value(s.unwrap_key(
                    &mechanism_arg(args, 0)?,
                    ulong_arg(args, 1)?,
                    bytes_arg(args, 2)?,
                    &template_arg(args, 3)?,
                )?)
            }
            "derive-key" => {
                check_arity(args, 3, 3)?;
                handle_value(s.derive_key(
                    &mechanism_arg(args, 0)?,
                    ulong_arg(args, 1)?,
                    &template_arg(args, 2)?,
                )?)
            }
            "seed-random" => {
                check_arity(args, 1, 1)?;
                s.seed_random(bytes_arg(args, 0)?)?;
                Value::Nil
            }
            "generate-random" => {
                check_arity(args, 1, 1)?;
                Value::Bytes(s.generate_random(usize_arg(args, 0)?)?)
            }
            _ => return Err(Error::unknown_constant(method)),
        })
    }
}

impl HostObject for SessionObject {
    fn type_name(&self) -> &'static str {
        "pkcs11/session"
    }

    fn methods(&self) -> &'static [&'static str] {
        SESSION_METHODS
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Reply> {
        log::trace!("session :{} ({} args)", method, args.len());
        match self.dispatch(method, args) {
            Ok(v) => Ok(Reply::Value(v)),
            Err(e) => Err(e.in_op(method)),
        }
    }
}

/// Free standing helper functions offered to the host next to the
/// objects: bit operations on flag words and hex conversion
pub fn call_util(name: &str, args: &[Value]) -> Result<Value> {
    let ret = match name {
        "bit-and" => {
            let mut acc = if args.is_empty() { 0 } else { CK_ULONG::MAX };
            for i in 0..args.len() {
                acc &= ulong_arg(args, i)?;
            }
            Value::number(acc)
        }
        "bit-or" => {
            let mut acc: CK_ULONG = 0;
            for i in 0..args.len() {
                acc |= ulong_arg(args, i)?;
            }
            Value::number(acc)
        }
        "bit-lshift" | "bit-rshift" => {
            check_arity(args, 2, 2)?;
            let x = ulong_arg(args, 0)?;
            let shift = u32::try_from(ulong_arg(args, 1)?)?;
            let r = if name == "bit-lshift" {
                x.checked_shl(shift)
            } else {
                x.checked_shr(shift)
            };
            match r {
                Some(r) => Value::number(r),
                None => {
                    return crate::err_unsupported!("shift by {} bits", shift)
                }
            }
        }
        "hex-encode" => {
            check_arity(args, 1, 1)?;
            Value::string(&hex::encode(bytes_arg(args, 0)?))
        }
        "hex-decode" => {
            check_arity(args, 1, 1)?;
            match hex::decode(bytes_arg(args, 0)?) {
                Ok(b) => Value::Bytes(b),
                Err(e) => return Err(Error::other_error(e)),
            }
        }
        _ => return Err(Error::unknown_constant(name)),
    };
    Ok(ret)
}
