// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Session handles and the operations performed through them
//!
//! A [Session] is created by [crate::library::Library::open_session] and
//! shares the library's function table. Every operation checks that the
//! session is still open (and, through the table, that the library is)
//! before calling the provider. Variable length outputs go through the
//! probe-then-fill protocol in [crate::twophase].

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::funclist::FuncList;
use crate::mechanism::Mechanism;
use crate::misc::ck_len;
use crate::pkcs11::*;
use crate::template::Template;
use crate::twophase::{two_phase, ZeroLength};
use crate::value::Struct;
use crate::{byte_ptr, ck_call, ck_fn};

/// C_Encrypt, C_Sign, C_DigestEncryptUpdate, ...
type DataFn = unsafe extern "C" fn(
    CK_SESSION_HANDLE,
    CK_BYTE_PTR,
    CK_ULONG,
    CK_BYTE_PTR,
    CK_ULONG_PTR,
) -> CK_RV;

/// C_EncryptFinal, C_DigestFinal, C_SignFinal, ...
type FinalFn =
    unsafe extern "C" fn(CK_SESSION_HANDLE, CK_BYTE_PTR, CK_ULONG_PTR) -> CK_RV;

/// C_DigestUpdate, C_SignUpdate, C_VerifyUpdate, C_SeedRandom
type UpdateFn =
    unsafe extern "C" fn(CK_SESSION_HANDLE, CK_BYTE_PTR, CK_ULONG) -> CK_RV;

/// C_EncryptInit, C_SignInit, C_VerifyRecoverInit, ...
type InitFn = unsafe extern "C" fn(
    CK_SESSION_HANDLE,
    CK_MECHANISM_PTR,
    CK_OBJECT_HANDLE,
) -> CK_RV;

#[derive(Debug)]
pub struct Session {
    funcs: Rc<FuncList>,
    handle: CK_SESSION_HANDLE,
    open: bool,
}

impl Session {
    pub(crate) fn new(funcs: Rc<FuncList>, handle: CK_SESSION_HANDLE) -> Session {
        Session {
            funcs: funcs,
            handle: handle,
            open: true,
        }
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn check(&self) -> Result<()> {
        if !self.open {
            return Err(Error::invalid_state("session is closed"));
        }
        Ok(())
    }

    /// Closes the session. Closing an already closed session does
    /// nothing, and so does closing a session whose library has already
    /// been finalized (the provider dropped it already).
    ///
    /// The session stays open when the provider fails the close, so the
    /// call can be retried. A handle the provider no longer knows is
    /// marked closed and the error is still returned.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if !self.funcs.is_open() {
            self.open = false;
            return Ok(());
        }
        log::debug!("Closing session {}", self.handle);
        let ret = ck_call!(self.funcs, C_CloseSession, self.handle);
        match &ret {
            Ok(()) => self.open = false,
            Err(e) if e.rv() == CKR_SESSION_HANDLE_INVALID => {
                self.open = false
            }
            Err(_) => (),
        }
        ret
    }

    pub fn get_session_info(&self) -> Result<CK_SESSION_INFO> {
        self.check()?;
        let mut info: CK_SESSION_INFO = unsafe { std::mem::zeroed() };
        ck_call!(self.funcs, C_GetSessionInfo, self.handle, &mut info)?;
        Ok(info)
    }

    pub fn get_operation_state(&self) -> Result<Vec<u8>> {
        self.check()?;
        let f = ck_fn!(self.funcs, C_GetOperationState);
        let handle = self.handle;
        two_phase("C_GetOperationState", ZeroLength::Skip, |out, len| unsafe {
            f(handle, out, len)
        })
    }

    pub fn login(&self, user_type: CK_USER_TYPE, pin: &[u8]) -> Result<()> {
        self.check()?;
        ck_call!(
            self.funcs,
            C_Login,
            self.handle,
            user_type,
            byte_ptr!(pin.as_ptr()),
            ck_len(pin)?
        )
    }

    pub fn logout(&self) -> Result<()> {
        self.check()?;
        ck_call!(self.funcs, C_Logout, self.handle)
    }

    pub fn init_pin(&self, pin: &[u8]) -> Result<()> {
        self.check()?;
        ck_call!(
            self.funcs,
            C_InitPIN,
            self.handle,
            byte_ptr!(pin.as_ptr()),
            ck_len(pin)?
        )
    }

    pub fn set_pin(&self, old_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        self.check()?;
        ck_call!(
            self.funcs,
            C_SetPIN,
            self.handle,
            byte_ptr!(old_pin.as_ptr()),
            ck_len(old_pin)?,
            byte_ptr!(new_pin.as_ptr()),
            ck_len(new_pin)?
        )
    }

    pub fn create_object(&self, template: &Template) -> Result<CK_OBJECT_HANDLE> {
        self.check()?;
        let mut object: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_CreateObject,
            self.handle,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?,
            &mut object
        )?;
        Ok(object)
    }

    pub fn copy_object(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        self.check()?;
        let mut copy: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_CopyObject,
            self.handle,
            object,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?,
            &mut copy
        )?;
        Ok(copy)
    }

    pub fn destroy_object(&self, object: CK_OBJECT_HANDLE) -> Result<()> {
        self.check()?;
        ck_call!(self.funcs, C_DestroyObject, self.handle, object)
    }

    pub fn get_object_size(&self, object: CK_OBJECT_HANDLE) -> Result<CK_ULONG> {
        self.check()?;
        let mut size: CK_ULONG = 0;
        ck_call!(self.funcs, C_GetObjectSize, self.handle, object, &mut size)?;
        Ok(size)
    }

    /// Reads the requested attributes of an object
    ///
    /// A first call collects the length of every attribute, buffers are
    /// then allocated per attribute and a second call fills them. When
    /// every attribute is empty the second call is skipped. The result is
    /// keyed by the symbolic attribute names.
    pub fn get_attribute_value(
        &self,
        object: CK_OBJECT_HANDLE,
        attrs: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Struct> {
        self.check()?;
        let mut template = Template::query(attrs);
        let count = template.ck_len()?;
        ck_call!(
            self.funcs,
            C_GetAttributeValue,
            self.handle,
            object,
            template.as_mut_ptr(),
            count
        )?;
        if template.total_len() > 0 {
            template.allocate()?;
            ck_call!(
                self.funcs,
                C_GetAttributeValue,
                self.handle,
                object,
                template.as_mut_ptr(),
                count
            )?;
        }
        template.to_value()
    }

    pub fn set_attribute_value(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<()> {
        self.check()?;
        ck_call!(
            self.funcs,
            C_SetAttributeValue,
            self.handle,
            object,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?
        )
    }

    pub fn find_objects_init(&self, template: &Template) -> Result<()> {
        self.check()?;
        ck_call!(
            self.funcs,
            C_FindObjectsInit,
            self.handle,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?
        )
    }

    /// Returns up to `max` handles of the objects matching the current
    /// search, an empty vector once the search is exhausted
    pub fn find_objects(&self, max: usize) -> Result<Vec<CK_OBJECT_HANDLE>> {
        self.check()?;
        let mut handles = vec![CK_INVALID_HANDLE; max];
        let mut count: CK_ULONG = 0;
        ck_call!(
            self.funcs,
            C_FindObjects,
            self.handle,
            handles.as_mut_ptr(),
            CK_ULONG::try_from(max)?,
            &mut count
        )?;
        let count = usize::try_from(count)?;
        if count > max {
            return Err(CKR_GENERAL_ERROR)?;
        }
        handles.truncate(count);
        Ok(handles)
    }

    pub fn find_objects_final(&self) -> Result<()> {
        self.check()?;
        ck_call!(self.funcs, C_FindObjectsFinal, self.handle)
    }

    fn op_init(
        &self,
        op: &str,
        f: Option<InitFn>,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.check()?;
        let f = match f {
            Some(f) => f,
            None => return Err(Error::provider(op, CKR_FUNCTION_NOT_SUPPORTED)),
        };
        let mut mech = mechanism.as_ck();
        crate::error::check_rv(op, unsafe { f(self.handle, &mut mech, key) })
    }

    fn op_data(&self, op: &str, f: Option<DataFn>, data: &[u8]) -> Result<Vec<u8>> {
        self.check()?;
        let f = match f {
            Some(f) => f,
            None => return Err(Error::provider(op, CKR_FUNCTION_NOT_SUPPORTED)),
        };
        let handle = self.handle;
        let data_len = ck_len(data)?;
        two_phase(op, ZeroLength::Singleton, |out, len| unsafe {
            f(handle, byte_ptr!(data.as_ptr()), data_len, out, len)
        })
    }

    fn op_final(&self, op: &str, f: Option<FinalFn>) -> Result<Vec<u8>> {
        self.check()?;
        let f = match f {
            Some(f) => f,
            None => return Err(Error::provider(op, CKR_FUNCTION_NOT_SUPPORTED)),
        };
        let handle = self.handle;
        two_phase(op, ZeroLength::Singleton, |out, len| unsafe {
            f(handle, out, len)
        })
    }

    fn op_update(&self, op: &str, f: Option<UpdateFn>, data: &[u8]) -> Result<()> {
        self.check()?;
        let f = match f {
            Some(f) => f,
            None => return Err(Error::provider(op, CKR_FUNCTION_NOT_SUPPORTED)),
        };
        crate::error::check_rv(op, unsafe {
            f(self.handle, byte_ptr!(data.as_ptr()), ck_len(data)?)
        })
    }

    pub fn encrypt_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_EncryptInit;
        self.op_init("C_EncryptInit", f, mechanism, key)
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_Encrypt;
        self.op_data("C_Encrypt", f, data)
    }

    pub fn encrypt_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_EncryptUpdate;
        self.op_data("C_EncryptUpdate", f, data)
    }

    pub fn encrypt_final(&self) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_EncryptFinal;
        self.op_final("C_EncryptFinal", f)
    }

    pub fn decrypt_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_DecryptInit;
        self.op_init("C_DecryptInit", f, mechanism, key)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_Decrypt;
        self.op_data("C_Decrypt", f, data)
    }

    pub fn decrypt_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DecryptUpdate;
        self.op_data("C_DecryptUpdate", f, data)
    }

    pub fn decrypt_final(&self) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DecryptFinal;
        self.op_final("C_DecryptFinal", f)
    }

    pub fn digest_init(&self, mechanism: &Mechanism) -> Result<()> {
        self.check()?;
        let mut mech = mechanism.as_ck();
        ck_call!(self.funcs, C_DigestInit, self.handle, &mut mech)
    }

    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_Digest;
        self.op_data("C_Digest", f, data)
    }

    pub fn digest_update(&self, data: &[u8]) -> Result<()> {
        let f = self.funcs.table()?.C_DigestUpdate;
        self.op_update("C_DigestUpdate", f, data)
    }

    pub fn digest_key(&self, key: CK_OBJECT_HANDLE) -> Result<()> {
        self.check()?;
        ck_call!(self.funcs, C_DigestKey, self.handle, key)
    }

    pub fn digest_final(&self) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DigestFinal;
        self.op_final("C_DigestFinal", f)
    }

    pub fn sign_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_SignInit;
        self.op_init("C_SignInit", f, mechanism, key)
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_Sign;
        self.op_data("C_Sign", f, data)
    }

    pub fn sign_update(&self, data: &[u8]) -> Result<()> {
        let f = self.funcs.table()?.C_SignUpdate;
        self.op_update("C_SignUpdate", f, data)
    }

    pub fn sign_final(&self) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_SignFinal;
        self.op_final("C_SignFinal", f)
    }

    pub fn sign_recover_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_SignRecoverInit;
        self.op_init("C_SignRecoverInit", f, mechanism, key)
    }

    pub fn sign_recover(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_SignRecover;
        self.op_data("C_SignRecover", f, data)
    }

    pub fn verify_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_VerifyInit;
        self.op_init("C_VerifyInit", f, mechanism, key)
    }

    /// Verifies a signature in a single part operation. An invalid
    /// signature is reported as `false`, not as an error.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        self.check()?;
        let f = ck_fn!(self.funcs, C_Verify);
        let rv = unsafe {
            f(
                self.handle,
                byte_ptr!(data.as_ptr()),
                ck_len(data)?,
                byte_ptr!(signature.as_ptr()),
                ck_len(signature)?,
            )
        };
        signature_result("C_Verify", rv)
    }

    pub fn verify_update(&self, data: &[u8]) -> Result<()> {
        let f = self.funcs.table()?.C_VerifyUpdate;
        self.op_update("C_VerifyUpdate", f, data)
    }

    /// Finishes a multi part verification, an invalid signature is
    /// reported as `false`
    pub fn verify_final(&self, signature: &[u8]) -> Result<bool> {
        self.check()?;
        let f = ck_fn!(self.funcs, C_VerifyFinal);
        let rv = unsafe {
            f(
                self.handle,
                byte_ptr!(signature.as_ptr()),
                ck_len(signature)?,
            )
        };
        signature_result("C_VerifyFinal", rv)
    }

    pub fn verify_recover_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let f = self.funcs.table()?.C_VerifyRecoverInit;
        self.op_init("C_VerifyRecoverInit", f, mechanism, key)
    }

    /// Verifies a signature and recovers the signed data. Returns whether
    /// the signature is valid and the recovered data (empty when it is
    /// not).
    pub fn verify_recover(&self, signature: &[u8]) -> Result<(bool, Vec<u8>)> {
        self.check()?;
        let f = ck_fn!(self.funcs, C_VerifyRecover);
        let sig_ptr = byte_ptr!(signature.as_ptr());
        let sig_len = ck_len(signature)?;
        let mut len: CK_ULONG = 0;
        crate::error::check_rv("C_VerifyRecover", unsafe {
            f(self.handle, sig_ptr, sig_len, std::ptr::null_mut(), &mut len)
        })?;
        /* always issue the second call, it is the one that verifies */
        let mut buf = vec![0u8; std::cmp::max(usize::try_from(len)?, 1)];
        if len == 0 {
            len = 1;
        }
        let rv = unsafe {
            f(self.handle, sig_ptr, sig_len, buf.as_mut_ptr(), &mut len)
        };
        if !signature_result("C_VerifyRecover", rv)? {
            return Ok((false, Vec::new()));
        }
        let len = usize::try_from(len)?;
        if len > buf.len() {
            return Err(CKR_GENERAL_ERROR)?;
        }
        buf.truncate(len);
        Ok((true, buf))
    }

    pub fn digest_encrypt_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DigestEncryptUpdate;
        self.op_data("C_DigestEncryptUpdate", f, data)
    }

    pub fn decrypt_digest_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DecryptDigestUpdate;
        self.op_data("C_DecryptDigestUpdate", f, data)
    }

    pub fn sign_encrypt_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_SignEncryptUpdate;
        self.op_data("C_SignEncryptUpdate", f, data)
    }

    pub fn decrypt_verify_update(&self, data: &[u8]) -> Result<Vec<u8>> {
        let f = self.funcs.table()?.C_DecryptVerifyUpdate;
        self.op_data("C_DecryptVerifyUpdate", f, data)
    }

    /// Generates a secret key, the template is optional
    pub fn generate_key(
        &self,
        mechanism: &Mechanism,
        template: Option<&Template>,
    ) -> Result<CK_OBJECT_HANDLE> {
        self.check()?;
        let mut mech = mechanism.as_ck();
        let (ptr, count) = match template {
            Some(t) => (t.as_ptr() as CK_ATTRIBUTE_PTR, t.ck_len()?),
            None => (std::ptr::null_mut(), 0),
        };
        let mut key: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_GenerateKey,
            self.handle,
            &mut mech,
            ptr,
            count,
            &mut key
        )?;
        Ok(key)
    }

    /// Generates a key pair, returns the public and private key handles
    pub fn generate_key_pair(
        &self,
        mechanism: &Mechanism,
        public_template: &Template,
        private_template: &Template,
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        self.check()?;
        let mut mech = mechanism.as_ck();
        let mut pubkey: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        let mut privkey: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_GenerateKeyPair,
            self.handle,
            &mut mech,
            public_template.as_ptr() as CK_ATTRIBUTE_PTR,
            public_template.ck_len()?,
            private_template.as_ptr() as CK_ATTRIBUTE_PTR,
            private_template.ck_len()?,
            &mut pubkey,
            &mut privkey
        )?;
        Ok((pubkey, privkey))
    }

    pub fn wrap_key(
        &self,
        mechanism: &Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> Result<Vec<u8>> {
        self.check()?;
        let f = ck_fn!(self.funcs, C_WrapKey);
        let mut mech = mechanism.as_ck();
        let handle = self.handle;
        two_phase("C_WrapKey", ZeroLength::Singleton, |out, len| unsafe {
            f(handle, &mut mech, wrapping_key, key, out, len)
        })
    }

    pub fn unwrap_key(
        &self,
        mechanism: &Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        self.check()?;
        let mut mech = mechanism.as_ck();
        let mut key: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_UnwrapKey,
            self.handle,
            &mut mech,
            unwrapping_key,
            byte_ptr!(wrapped_key.as_ptr()),
            ck_len(wrapped_key)?,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?,
            &mut key
        )?;
        Ok(key)
    }

    pub fn derive_key(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        self.check()?;
        let mut mech = mechanism.as_ck();
        let mut key: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_DeriveKey,
            self.handle,
            &mut mech,
            base_key,
            template.as_ptr() as CK_ATTRIBUTE_PTR,
            template.ck_len()?,
            &mut key
        )?;
        Ok(key)
    }

    pub fn seed_random(&self, seed: &[u8]) -> Result<()> {
        let f = self.funcs.table()?.C_SeedRandom;
        self.op_update("C_SeedRandom", f, seed)
    }

    pub fn generate_random(&self, len: usize) -> Result<Vec<u8>> {
        self.check()?;
        let mut buf = vec![0u8; len];
        ck_call!(
            self.funcs,
            C_GenerateRandom,
            self.handle,
            buf.as_mut_ptr(),
            CK_ULONG::try_from(len)?
        )?;
        Ok(buf)
    }
}

/// CKR_OK is a valid signature, CKR_SIGNATURE_INVALID an invalid one,
/// anything else an error
fn signature_result(op: &str, rv: CK_RV) -> Result<bool> {
    match rv {
        CKR_OK => Ok(true),
        CKR_SIGNATURE_INVALID => Ok(false),
        _ => Err(Error::provider(op, rv)),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close session {}: {}", self.handle, e);
        }
    }
}
