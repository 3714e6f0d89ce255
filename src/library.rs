// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The provider library handle
//!
//! A [Library] loads a PKCS#11 module, initializes it and owns it until
//! [Library::close] (or drop) finalizes and unloads it. Sessions opened
//! through it share its function table; once the library is closed the
//! shared table refuses every further call, so sessions outliving their
//! library fail cleanly instead of calling into an unloaded module.

use std::ffi::{c_void, CString};
use std::rc::Rc;

use bitflags::bitflags;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::funclist::{dl_error, FuncList};
use crate::pkcs11::*;
use crate::session::Session;
use crate::twophase::two_phase_ulong;
use crate::{byte_ptr, ck_call, ck_fn};

bitflags! {
    /// Flags accepted when opening a session
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SessionFlags: CK_FLAGS {
        /// Read/write session, required to create or modify token objects
        const RW_SESSION = CKF_RW_SESSION;
        /// Always set, parallel sessions are not supported by Cryptoki
        const SERIAL_SESSION = CKF_SERIAL_SESSION;
    }
}

/// Size of the token label field
const LABEL_LEN: usize = 32;

#[derive(Debug)]
pub struct Library {
    funcs: Rc<FuncList>,
    /// dlopen handle, null for providers linked in the process
    dlhandle: *mut c_void,
}

impl Library {
    /// Loads the module at `path` and initializes it with default
    /// arguments
    pub fn open(path: &str) -> Result<Library> {
        Library::load(path, None, false)
    }

    /// Loads and initializes the module described by a configuration
    pub fn open_with_config(config: &Config) -> Result<Library> {
        Library::load(
            config.module_path()?,
            config.init_args.as_deref(),
            config.os_locking,
        )
    }

    /// Loads the module named by the default configuration sources
    pub fn open_default() -> Result<Library> {
        Library::open_with_config(&Config::default_config()?)
    }

    fn load(
        path: &str,
        init_args: Option<&str>,
        os_locking: bool,
    ) -> Result<Library> {
        #[cfg(feature = "log")]
        crate::log::p11host_log_init();

        let cpath = CString::new(path)?;
        let dlhandle = unsafe {
            libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL)
        };
        if dlhandle.is_null() {
            return Err(Error::other_error(format!(
                "Load library {} failed: {}",
                path,
                dl_error()
            )));
        }
        let funcs = match FuncList::from_symbol_name(
            dlhandle,
            "C_GetFunctionList",
        ) {
            Ok(f) => f,
            Err(e) => {
                unsafe { libc::dlclose(dlhandle) };
                return Err(e);
            }
        };
        let lib = Library {
            funcs: Rc::new(funcs),
            dlhandle: dlhandle,
        };
        /* on failure lib is dropped here, which unloads the module */
        lib.initialize(init_args, os_locking)?;
        log::info!("Loaded PKCS#11 module {}", path);
        Ok(lib)
    }

    /// Wraps a function table provided by a module already linked in
    /// the process and initializes it
    ///
    /// # Safety
    ///
    /// `fntable` must point to a valid function table that outlives the
    /// returned Library and all sessions opened through it.
    pub unsafe fn from_function_list(
        fntable: *const CK_FUNCTION_LIST,
    ) -> Result<Library> {
        let lib = Library {
            funcs: Rc::new(FuncList::from_ptr(fntable)?),
            dlhandle: std::ptr::null_mut(),
        };
        lib.initialize(None, false)?;
        Ok(lib)
    }

    fn initialize(&self, init_args: Option<&str>, os_locking: bool) -> Result<()> {
        if init_args.is_none() && !os_locking {
            return ck_call!(self.funcs, C_Initialize, std::ptr::null_mut());
        }
        let reserved = match init_args {
            Some(a) => Some(CString::new(a)?),
            None => None,
        };
        let mut targs = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: if os_locking { CKF_OS_LOCKING_OK } else { 0 },
            pReserved: match &reserved {
                Some(r) => r.as_ptr() as CK_VOID_PTR,
                None => std::ptr::null_mut(),
            },
        };
        ck_call!(
            self.funcs,
            C_Initialize,
            &mut targs as *mut CK_C_INITIALIZE_ARGS as CK_VOID_PTR
        )
    }

    /// Finalizes and unloads the module. Closing an already closed
    /// library does nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.funcs.is_open() {
            return Ok(());
        }
        let ret = self.finalize();
        self.funcs.mark_closed();
        if !self.dlhandle.is_null() {
            unsafe { libc::dlclose(self.dlhandle) };
            self.dlhandle = std::ptr::null_mut();
        }
        ret
    }

    fn finalize(&self) -> Result<()> {
        ck_call!(self.funcs, C_Finalize, std::ptr::null_mut())
    }

    pub fn is_open(&self) -> bool {
        self.funcs.is_open()
    }

    pub fn get_info(&self) -> Result<CK_INFO> {
        let mut info: CK_INFO = unsafe { std::mem::zeroed() };
        ck_call!(self.funcs, C_GetInfo, &mut info)?;
        Ok(info)
    }

    pub fn get_slot_list(&self, token_present: bool) -> Result<Vec<CK_SLOT_ID>> {
        let f = ck_fn!(self.funcs, C_GetSlotList);
        let present = if token_present { CK_TRUE } else { CK_FALSE };
        two_phase_ulong("C_GetSlotList", |ptr, count| unsafe {
            f(present, ptr, count)
        })
    }

    pub fn get_slot_info(&self, slot: CK_SLOT_ID) -> Result<CK_SLOT_INFO> {
        let mut info: CK_SLOT_INFO = unsafe { std::mem::zeroed() };
        ck_call!(self.funcs, C_GetSlotInfo, slot, &mut info)?;
        Ok(info)
    }

    pub fn get_token_info(&self, slot: CK_SLOT_ID) -> Result<CK_TOKEN_INFO> {
        let mut info: CK_TOKEN_INFO = unsafe { std::mem::zeroed() };
        ck_call!(self.funcs, C_GetTokenInfo, slot, &mut info)?;
        Ok(info)
    }

    /// Waits for a slot event. With `dont_block` the call returns None
    /// right away when no event is pending.
    pub fn wait_for_slot_event(
        &self,
        dont_block: bool,
    ) -> Result<Option<CK_SLOT_ID>> {
        let f = ck_fn!(self.funcs, C_WaitForSlotEvent);
        let flags = if dont_block { CKF_DONT_BLOCK } else { 0 };
        let mut slot: CK_SLOT_ID = 0;
        match unsafe { f(flags, &mut slot, std::ptr::null_mut()) } {
            CKR_OK => Ok(Some(slot)),
            CKR_NO_EVENT => Ok(None),
            rv => Err(Error::provider("C_WaitForSlotEvent", rv)),
        }
    }

    pub fn get_mechanism_list(
        &self,
        slot: CK_SLOT_ID,
    ) -> Result<Vec<CK_MECHANISM_TYPE>> {
        let f = ck_fn!(self.funcs, C_GetMechanismList);
        two_phase_ulong("C_GetMechanismList", |ptr, count| unsafe {
            f(slot, ptr, count)
        })
    }

    pub fn get_mechanism_info(
        &self,
        slot: CK_SLOT_ID,
        mechanism: CK_MECHANISM_TYPE,
    ) -> Result<CK_MECHANISM_INFO> {
        let mut info: CK_MECHANISM_INFO = unsafe { std::mem::zeroed() };
        ck_call!(self.funcs, C_GetMechanismInfo, slot, mechanism, &mut info)?;
        Ok(info)
    }

    /// Initializes a token, the label is blank padded to 32 bytes
    pub fn init_token(
        &self,
        slot: CK_SLOT_ID,
        so_pin: &[u8],
        label: &[u8],
    ) -> Result<()> {
        if label.len() > LABEL_LEN {
            return crate::err_unsupported!(
                "token label longer than {} bytes",
                LABEL_LEN
            );
        }
        let mut padded = [b' '; LABEL_LEN];
        padded[..label.len()].copy_from_slice(label);
        ck_call!(
            self.funcs,
            C_InitToken,
            slot,
            byte_ptr!(so_pin.as_ptr()),
            CK_ULONG::try_from(so_pin.len())?,
            padded.as_mut_ptr()
        )
    }

    /// Opens a session on `slot`; the serial flag is always added
    pub fn open_session(
        &self,
        slot: CK_SLOT_ID,
        flags: SessionFlags,
    ) -> Result<Session> {
        let flags = flags | SessionFlags::SERIAL_SESSION;
        let mut handle: CK_SESSION_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self.funcs,
            C_OpenSession,
            slot,
            flags.bits(),
            std::ptr::null_mut(),
            None,
            &mut handle
        )?;
        log::debug!("Opened session {} on slot {}", handle, slot);
        Ok(Session::new(Rc::clone(&self.funcs), handle))
    }

    pub fn close_all_sessions(&self, slot: CK_SLOT_ID) -> Result<()> {
        ck_call!(self.funcs, C_CloseAllSessions, slot)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close library: {}", e);
        }
    }
}
