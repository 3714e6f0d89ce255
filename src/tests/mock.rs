// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

/* An in-process provider used to exercise the library and session
 * handles without loading a real module. All state lives in a global
 * guarded by a mutex, tests using it must be marked #[serial]. */

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::pkcs11::*;
use crate::Library;

pub const TOKEN_SLOT: CK_SLOT_ID = 1;
pub const EMPTY_SLOT: CK_SLOT_ID = 2;
pub const SO_PIN: &[u8] = b"12345678";
pub const USER_PIN: &[u8] = b"87654321";

/* byte every ciphertext byte is xored with */
pub const XOR_MASK: u8 = 0x5a;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OpKind {
    Encrypt,
    Decrypt,
    Digest,
    Sign,
    SignRecover,
    Verify,
    VerifyRecover,
    Find,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub initialized: bool,
    pub init_flags: CK_FLAGS,
    pub calls: HashMap<&'static str, usize>,
    pub objects: Vec<(CK_OBJECT_HANDLE, Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>)>,
    pub next_handle: CK_ULONG,
    pub sessions: Vec<(CK_SESSION_HANDLE, CK_FLAGS)>,
    /* active operations and the data they accumulated */
    pub ops: HashMap<OpKind, Vec<u8>>,
    pub found: Vec<CK_OBJECT_HANDLE>,
    pub user: Option<CK_USER_TYPE>,
    pub user_pin: Vec<u8>,
    pub token_label: Vec<u8>,
    pub pending_event: Option<CK_SLOT_ID>,
    pub seed: Vec<u8>,
    /* bytes the fill call reports less than the probe asked for */
    pub shrink: usize,
    /* status the next C_CloseSession fails with */
    pub close_error: Option<CK_RV>,
}

static STATE: Lazy<Mutex<MockState>> =
    Lazy::new(|| Mutex::new(MockState::default()));

pub fn state() -> MutexGuard<'static, MockState> {
    match STATE.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

pub fn reset() {
    let mut st = state();
    *st = MockState::default();
    st.next_handle = 100;
    st.user_pin = USER_PIN.to_vec();
}

pub fn calls(name: &str) -> usize {
    match state().calls.get(name) {
        Some(n) => *n,
        None => 0,
    }
}

pub fn set_shrink(n: usize) {
    state().shrink = n;
}

pub fn fail_next_close(rv: CK_RV) {
    state().close_error = Some(rv);
}

/// Adds an object directly to the mock store, returns its handle
pub fn add_object(attrs: Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>) -> CK_OBJECT_HANDLE {
    let mut st = state();
    let handle = st.next_handle;
    st.next_handle += 1;
    st.objects.push((handle, attrs));
    handle
}

pub fn ulong_bytes(v: CK_ULONG) -> Vec<u8> {
    v.to_ne_bytes().to_vec()
}

/// Resets the mock and opens a library over it
pub fn open_library() -> Library {
    reset();
    match unsafe { Library::from_function_list(&*FUNCTION_LIST) } {
        Ok(l) => l,
        Err(e) => panic!("{e}"),
    }
}

pub fn xor(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ XOR_MASK).collect()
}

/* a toy digest: a 64 bit polynomial hash of the input */
pub fn digest(data: &[u8]) -> Vec<u8> {
    data.iter()
        .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(*b)))
        .to_be_bytes()
        .to_vec()
}

pub fn recover(data: &[u8]) -> Vec<u8> {
    data.iter().rev().cloned().collect()
}

fn enter(name: &'static str) -> MutexGuard<'static, MockState> {
    let mut st = state();
    *st.calls.entry(name).or_insert(0) += 1;
    st
}

macro_rules! check_session {
    ($st:expr, $h:expr) => {
        if !$st.initialized {
            return CKR_CRYPTOKI_NOT_INITIALIZED;
        }
        if !$st.sessions.iter().any(|s| s.0 == $h) {
            return CKR_SESSION_HANDLE_INVALID;
        }
    };
}

unsafe fn input(ptr: CK_BYTE_PTR, len: CK_ULONG) -> Vec<u8> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(ptr, len as usize).to_vec()
}

/* Probe-then-fill output handling: a null buffer only reports the
 * length, returns (rv, delivered) */
unsafe fn deliver(
    shrink: usize,
    data: &[u8],
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> (CK_RV, bool) {
    let needed = data.len() as CK_ULONG;
    if out.is_null() {
        *out_len = needed;
        return (CKR_OK, false);
    }
    if *out_len < needed {
        *out_len = needed;
        return (CKR_BUFFER_TOO_SMALL, false);
    }
    let n = data.len().saturating_sub(shrink);
    std::ptr::copy_nonoverlapping(data.as_ptr(), out, n);
    *out_len = n as CK_ULONG;
    (CKR_OK, true)
}

fn find_attr(
    st: &MockState,
    object: CK_OBJECT_HANDLE,
    typ: CK_ATTRIBUTE_TYPE,
) -> Option<Vec<u8>> {
    let obj = st.objects.iter().find(|o| o.0 == object)?;
    obj.1.iter().find(|a| a.0 == typ).map(|a| a.1.clone())
}

unsafe fn read_template(
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)> {
    if tmpl.is_null() || count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(tmpl, count as usize)
        .iter()
        .map(|a| (a.type_, input(a.pValue as CK_BYTE_PTR, a.ulValueLen)))
        .collect()
}

fn store_object(
    st: &mut MockState,
    attrs: Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>,
) -> CK_OBJECT_HANDLE {
    let handle = st.next_handle;
    st.next_handle += 1;
    st.objects.push((handle, attrs));
    handle
}

fn pad(text: &[u8], len: usize) -> Vec<u8> {
    let mut v = text.to_vec();
    v.resize(len, b' ');
    v
}

extern "C" fn initialize(init_args: CK_VOID_PTR) -> CK_RV {
    let mut st = enter("C_Initialize");
    if st.initialized {
        return CKR_CRYPTOKI_ALREADY_INITIALIZED;
    }
    if !init_args.is_null() {
        let args = unsafe { &*(init_args as *const CK_C_INITIALIZE_ARGS) };
        st.init_flags = args.flags;
    }
    st.initialized = true;
    CKR_OK
}

extern "C" fn finalize(_reserved: CK_VOID_PTR) -> CK_RV {
    let mut st = enter("C_Finalize");
    if !st.initialized {
        return CKR_CRYPTOKI_NOT_INITIALIZED;
    }
    st.initialized = false;
    st.sessions.clear();
    CKR_OK
}

extern "C" fn get_info(info: CK_INFO_PTR) -> CK_RV {
    let _st = enter("C_GetInfo");
    let info = unsafe { &mut *info };
    info.cryptokiVersion = CK_VERSION { major: 2, minor: 40 };
    info.manufacturerID.copy_from_slice(&pad(b"Mock", 32));
    info.flags = 0;
    info.libraryDescription.copy_from_slice(&pad(b"Mock provider", 32));
    info.libraryVersion = CK_VERSION { major: 1, minor: 2 };
    CKR_OK
}

extern "C" fn get_slot_list(
    token_present: CK_BBOOL,
    list: CK_SLOT_ID_PTR,
    count: CK_ULONG_PTR,
) -> CK_RV {
    let _st = enter("C_GetSlotList");
    let slots: &[CK_SLOT_ID] = if token_present == CK_TRUE {
        &[TOKEN_SLOT]
    } else {
        &[TOKEN_SLOT, EMPTY_SLOT]
    };
    unsafe {
        if list.is_null() {
            *count = slots.len() as CK_ULONG;
            return CKR_OK;
        }
        if (*count as usize) < slots.len() {
            *count = slots.len() as CK_ULONG;
            return CKR_BUFFER_TOO_SMALL;
        }
        std::ptr::copy_nonoverlapping(slots.as_ptr(), list, slots.len());
        *count = slots.len() as CK_ULONG;
    }
    CKR_OK
}

extern "C" fn get_slot_info(slot: CK_SLOT_ID, info: CK_SLOT_INFO_PTR) -> CK_RV {
    let _st = enter("C_GetSlotInfo");
    let info = unsafe { &mut *info };
    info.slotDescription.copy_from_slice(&pad(b"Mock slot", 64));
    info.manufacturerID.copy_from_slice(&pad(b"Mock", 32));
    info.flags = match slot {
        TOKEN_SLOT => CKF_TOKEN_PRESENT | CKF_HW_SLOT,
        EMPTY_SLOT => CKF_HW_SLOT,
        _ => return CKR_SLOT_ID_INVALID,
    };
    info.hardwareVersion = CK_VERSION { major: 0, minor: 1 };
    info.firmwareVersion = CK_VERSION { major: 0, minor: 2 };
    CKR_OK
}

extern "C" fn get_token_info(
    slot: CK_SLOT_ID,
    info: CK_TOKEN_INFO_PTR,
) -> CK_RV {
    let st = enter("C_GetTokenInfo");
    match slot {
        TOKEN_SLOT => (),
        EMPTY_SLOT => return CKR_TOKEN_NOT_PRESENT,
        _ => return CKR_SLOT_ID_INVALID,
    }
    let info = unsafe { &mut *info };
    info.label.copy_from_slice(&pad(&st.token_label, 32));
    info.manufacturerID.copy_from_slice(&pad(b"Mock", 32));
    info.model.copy_from_slice(&pad(b"Model", 16));
    info.serialNumber.copy_from_slice(&pad(b"0001", 16));
    info.flags = CKF_RNG | CKF_LOGIN_REQUIRED | CKF_TOKEN_INITIALIZED;
    info.ulMaxSessionCount = CK_EFFECTIVELY_INFINITE;
    info.ulSessionCount = st.sessions.len() as CK_ULONG;
    info.ulMaxPinLen = 32;
    info.ulMinPinLen = 4;
    CKR_OK
}

extern "C" fn wait_for_slot_event(
    flags: CK_FLAGS,
    slot: CK_SLOT_ID_PTR,
    _reserved: CK_VOID_PTR,
) -> CK_RV {
    let mut st = enter("C_WaitForSlotEvent");
    match st.pending_event.take() {
        Some(s) => {
            unsafe { *slot = s };
            CKR_OK
        }
        None if flags & CKF_DONT_BLOCK != 0 => CKR_NO_EVENT,
        None => CKR_FUNCTION_NOT_SUPPORTED,
    }
}

const MECHANISMS: [CK_MECHANISM_TYPE; 4] =
    [CKM_AES_KEY_GEN, CKM_AES_ECB, CKM_SHA256, CKM_SHA256_HMAC];

extern "C" fn get_mechanism_list(
    _slot: CK_SLOT_ID,
    list: CK_MECHANISM_TYPE_PTR,
    count: CK_ULONG_PTR,
) -> CK_RV {
    let _st = enter("C_GetMechanismList");
    unsafe {
        if list.is_null() {
            *count = MECHANISMS.len() as CK_ULONG;
            return CKR_OK;
        }
        std::ptr::copy_nonoverlapping(
            MECHANISMS.as_ptr(),
            list,
            MECHANISMS.len(),
        );
        *count = MECHANISMS.len() as CK_ULONG;
    }
    CKR_OK
}

extern "C" fn get_mechanism_info(
    _slot: CK_SLOT_ID,
    mech: CK_MECHANISM_TYPE,
    info: CK_MECHANISM_INFO_PTR,
) -> CK_RV {
    let _st = enter("C_GetMechanismInfo");
    if !MECHANISMS.contains(&mech) {
        return CKR_MECHANISM_INVALID;
    }
    let info = unsafe { &mut *info };
    info.ulMinKeySize = 16;
    info.ulMaxKeySize = 32;
    info.flags = CKF_ENCRYPT | CKF_DECRYPT;
    CKR_OK
}

extern "C" fn init_token(
    _slot: CK_SLOT_ID,
    pin: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
    label: CK_UTF8CHAR_PTR,
) -> CK_RV {
    let mut st = enter("C_InitToken");
    if unsafe { input(pin, pin_len) } != SO_PIN {
        return CKR_PIN_INCORRECT;
    }
    st.token_label = unsafe { input(label, 32) };
    CKR_OK
}

extern "C" fn open_session(
    slot: CK_SLOT_ID,
    flags: CK_FLAGS,
    _app: CK_VOID_PTR,
    _notify: CK_NOTIFY,
    handle: CK_SESSION_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_OpenSession");
    if !st.initialized {
        return CKR_CRYPTOKI_NOT_INITIALIZED;
    }
    if slot != TOKEN_SLOT {
        return CKR_SLOT_ID_INVALID;
    }
    if flags & CKF_SERIAL_SESSION == 0 {
        return CKR_SESSION_PARALLEL_NOT_SUPPORTED;
    }
    let h = st.next_handle;
    st.next_handle += 1;
    st.sessions.push((h, flags));
    unsafe { *handle = h };
    CKR_OK
}

extern "C" fn close_session(h: CK_SESSION_HANDLE) -> CK_RV {
    let mut st = enter("C_CloseSession");
    check_session!(st, h);
    if let Some(rv) = st.close_error.take() {
        return rv;
    }
    st.sessions.retain(|s| s.0 != h);
    CKR_OK
}

extern "C" fn close_all_sessions(_slot: CK_SLOT_ID) -> CK_RV {
    let mut st = enter("C_CloseAllSessions");
    st.sessions.clear();
    CKR_OK
}

extern "C" fn get_session_info(
    h: CK_SESSION_HANDLE,
    info: CK_SESSION_INFO_PTR,
) -> CK_RV {
    let st = enter("C_GetSessionInfo");
    check_session!(st, h);
    let flags = match st.sessions.iter().find(|s| s.0 == h) {
        Some(s) => s.1,
        None => return CKR_SESSION_HANDLE_INVALID,
    };
    let rw = flags & CKF_RW_SESSION != 0;
    let info = unsafe { &mut *info };
    info.slotID = TOKEN_SLOT;
    info.state = match (st.user, rw) {
        (Some(CKU_USER), true) => CKS_RW_USER_FUNCTIONS,
        (Some(CKU_USER), false) => CKS_RO_USER_FUNCTIONS,
        (Some(_), _) => CKS_RW_SO_FUNCTIONS,
        (None, true) => CKS_RW_PUBLIC_SESSION,
        (None, false) => CKS_RO_PUBLIC_SESSION,
    };
    info.flags = flags;
    info.ulDeviceError = 0;
    CKR_OK
}

extern "C" fn get_operation_state(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let st = enter("C_GetOperationState");
    check_session!(st, h);
    let data = match st.ops.get(&OpKind::Digest) {
        Some(d) => d.clone(),
        None => Vec::new(),
    };
    unsafe { deliver(st.shrink, &data, out, out_len).0 }
}

extern "C" fn login(
    h: CK_SESSION_HANDLE,
    user: CK_USER_TYPE,
    pin: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_Login");
    check_session!(st, h);
    if st.user.is_some() {
        return CKR_USER_ALREADY_LOGGED_IN;
    }
    let pin = unsafe { input(pin, pin_len) };
    let ok = match user {
        CKU_SO => pin == SO_PIN,
        CKU_USER | CKU_CONTEXT_SPECIFIC => pin == st.user_pin,
        _ => return CKR_USER_TYPE_INVALID,
    };
    if !ok {
        return CKR_PIN_INCORRECT;
    }
    st.user = Some(user);
    CKR_OK
}

extern "C" fn logout(h: CK_SESSION_HANDLE) -> CK_RV {
    let mut st = enter("C_Logout");
    check_session!(st, h);
    if st.user.take().is_none() {
        return CKR_USER_NOT_LOGGED_IN;
    }
    CKR_OK
}

extern "C" fn init_pin(
    h: CK_SESSION_HANDLE,
    pin: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_InitPIN");
    check_session!(st, h);
    if st.user != Some(CKU_SO) {
        return CKR_USER_NOT_LOGGED_IN;
    }
    st.user_pin = unsafe { input(pin, pin_len) };
    CKR_OK
}

extern "C" fn set_pin(
    h: CK_SESSION_HANDLE,
    old: CK_UTF8CHAR_PTR,
    old_len: CK_ULONG,
    new: CK_UTF8CHAR_PTR,
    new_len: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_SetPIN");
    check_session!(st, h);
    if unsafe { input(old, old_len) } != st.user_pin {
        return CKR_PIN_INCORRECT;
    }
    st.user_pin = unsafe { input(new, new_len) };
    CKR_OK
}

extern "C" fn create_object(
    h: CK_SESSION_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    object: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_CreateObject");
    check_session!(st, h);
    let attrs = unsafe { read_template(tmpl, count) };
    if !attrs.iter().any(|a| a.0 == CKA_CLASS) {
        return CKR_TEMPLATE_INCOMPLETE;
    }
    let handle = store_object(&mut st, attrs);
    unsafe { *object = handle };
    CKR_OK
}

extern "C" fn copy_object(
    h: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    copy: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_CopyObject");
    check_session!(st, h);
    let mut attrs = match st.objects.iter().find(|o| o.0 == object) {
        Some(o) => o.1.clone(),
        None => return CKR_OBJECT_HANDLE_INVALID,
    };
    for (typ, val) in unsafe { read_template(tmpl, count) } {
        attrs.retain(|a| a.0 != typ);
        attrs.push((typ, val));
    }
    let handle = store_object(&mut st, attrs);
    unsafe { *copy = handle };
    CKR_OK
}

extern "C" fn destroy_object(
    h: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
) -> CK_RV {
    let mut st = enter("C_DestroyObject");
    check_session!(st, h);
    let before = st.objects.len();
    st.objects.retain(|o| o.0 != object);
    if st.objects.len() == before {
        return CKR_OBJECT_HANDLE_INVALID;
    }
    CKR_OK
}

extern "C" fn get_object_size(
    h: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    size: CK_ULONG_PTR,
) -> CK_RV {
    let st = enter("C_GetObjectSize");
    check_session!(st, h);
    match st.objects.iter().find(|o| o.0 == object) {
        Some(o) => {
            let total: usize = o.1.iter().map(|a| a.1.len()).sum();
            unsafe { *size = total as CK_ULONG };
            CKR_OK
        }
        None => CKR_OBJECT_HANDLE_INVALID,
    }
}

extern "C" fn get_attribute_value(
    h: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> CK_RV {
    let st = enter("C_GetAttributeValue");
    check_session!(st, h);
    if !st.objects.iter().any(|o| o.0 == object) {
        return CKR_OBJECT_HANDLE_INVALID;
    }
    let attrs = unsafe { std::slice::from_raw_parts_mut(tmpl, count as usize) };
    let mut rv = CKR_OK;
    for a in attrs.iter_mut() {
        let val = match find_attr(&st, object, a.type_) {
            Some(v) => v,
            None => {
                a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
                rv = CKR_ATTRIBUTE_TYPE_INVALID;
                continue;
            }
        };
        if a.pValue.is_null() {
            a.ulValueLen = val.len() as CK_ULONG;
            continue;
        }
        if (a.ulValueLen as usize) < val.len() {
            a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
            rv = CKR_BUFFER_TOO_SMALL;
            continue;
        }
        let n = val.len().saturating_sub(st.shrink);
        unsafe {
            std::ptr::copy_nonoverlapping(val.as_ptr(), a.pValue as *mut u8, n)
        };
        a.ulValueLen = n as CK_ULONG;
    }
    rv
}

extern "C" fn set_attribute_value(
    h: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_SetAttributeValue");
    check_session!(st, h);
    let new = unsafe { read_template(tmpl, count) };
    let obj = match st.objects.iter_mut().find(|o| o.0 == object) {
        Some(o) => o,
        None => return CKR_OBJECT_HANDLE_INVALID,
    };
    for (typ, val) in new {
        obj.1.retain(|a| a.0 != typ);
        obj.1.push((typ, val));
    }
    CKR_OK
}

extern "C" fn find_objects_init(
    h: CK_SESSION_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_FindObjectsInit");
    check_session!(st, h);
    if st.ops.contains_key(&OpKind::Find) {
        return CKR_OPERATION_ACTIVE;
    }
    let filter = unsafe { read_template(tmpl, count) };
    let found: Vec<CK_OBJECT_HANDLE> = st
        .objects
        .iter()
        .filter(|o| filter.iter().all(|f| o.1.contains(f)))
        .map(|o| o.0)
        .collect();
    st.found = found;
    st.ops.insert(OpKind::Find, Vec::new());
    CKR_OK
}

extern "C" fn find_objects(
    h: CK_SESSION_HANDLE,
    out: CK_OBJECT_HANDLE_PTR,
    max: CK_ULONG,
    count: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter("C_FindObjects");
    check_session!(st, h);
    if !st.ops.contains_key(&OpKind::Find) {
        return CKR_OPERATION_NOT_INITIALIZED;
    }
    let n = std::cmp::min(max as usize, st.found.len());
    let batch: Vec<CK_OBJECT_HANDLE> = st.found.drain(..n).collect();
    unsafe {
        std::ptr::copy_nonoverlapping(batch.as_ptr(), out, n);
        *count = n as CK_ULONG;
    }
    CKR_OK
}

extern "C" fn find_objects_final(h: CK_SESSION_HANDLE) -> CK_RV {
    let mut st = enter("C_FindObjectsFinal");
    check_session!(st, h);
    if st.ops.remove(&OpKind::Find).is_none() {
        return CKR_OPERATION_NOT_INITIALIZED;
    }
    st.found.clear();
    CKR_OK
}

fn op_init(
    name: &'static str,
    kind: OpKind,
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    if st.ops.contains_key(&kind) {
        return CKR_OPERATION_ACTIVE;
    }
    let mech = unsafe { &*mech };
    /* CBC style mechanisms must carry a 16 byte IV */
    if mech.mechanism == CKM_AES_CBC && mech.ulParameterLen != 16 {
        return CKR_MECHANISM_PARAM_INVALID;
    }
    if kind != OpKind::Digest
        && !st.objects.iter().any(|o| o.0 == key)
    {
        return CKR_KEY_HANDLE_INVALID;
    }
    st.ops.insert(kind, Vec::new());
    CKR_OK
}

/* transforms of each operation kind on the complete input */
fn transform(kind: OpKind, data: &[u8]) -> Vec<u8> {
    match kind {
        OpKind::Encrypt | OpKind::Decrypt => xor(data),
        OpKind::Digest | OpKind::Sign | OpKind::Verify => digest(data),
        OpKind::SignRecover | OpKind::VerifyRecover => recover(data),
        OpKind::Find => Vec::new(),
    }
}

fn op_single(
    name: &'static str,
    kind: OpKind,
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    if !st.ops.contains_key(&kind) {
        return CKR_OPERATION_NOT_INITIALIZED;
    }
    let result = transform(kind, &unsafe { input(data, data_len) });
    let (rv, delivered) = unsafe { deliver(st.shrink, &result, out, out_len) };
    if delivered || (rv != CKR_BUFFER_TOO_SMALL && rv != CKR_OK) {
        st.ops.remove(&kind);
    }
    rv
}

/* encrypt and decrypt updates return output, the others accumulate */
fn op_update(
    name: &'static str,
    kind: OpKind,
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    let chunk = unsafe { input(data, data_len) };
    match kind {
        OpKind::Encrypt | OpKind::Decrypt => {
            if !st.ops.contains_key(&kind) {
                return CKR_OPERATION_NOT_INITIALIZED;
            }
            let result = xor(&chunk);
            unsafe { deliver(st.shrink, &result, out, out_len).0 }
        }
        _ => match st.ops.get_mut(&kind) {
            Some(acc) => {
                acc.extend_from_slice(&chunk);
                CKR_OK
            }
            None => CKR_OPERATION_NOT_INITIALIZED,
        },
    }
}

fn op_final(
    name: &'static str,
    kind: OpKind,
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    let result = match st.ops.get(&kind) {
        Some(acc) => match kind {
            /* streaming ciphers have nothing left at the end */
            OpKind::Encrypt | OpKind::Decrypt => Vec::new(),
            _ => transform(kind, acc),
        },
        None => return CKR_OPERATION_NOT_INITIALIZED,
    };
    let (rv, delivered) = unsafe { deliver(st.shrink, &result, out, out_len) };
    if delivered {
        st.ops.remove(&kind);
    }
    rv
}

extern "C" fn encrypt_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_EncryptInit", OpKind::Encrypt, h, mech, key)
}

extern "C" fn encrypt(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_single("C_Encrypt", OpKind::Encrypt, h, data, data_len, out, out_len)
}

extern "C" fn encrypt_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_update(
        "C_EncryptUpdate",
        OpKind::Encrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn encrypt_final(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_final("C_EncryptFinal", OpKind::Encrypt, h, out, out_len)
}

extern "C" fn decrypt_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_DecryptInit", OpKind::Decrypt, h, mech, key)
}

extern "C" fn decrypt(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_single("C_Decrypt", OpKind::Decrypt, h, data, data_len, out, out_len)
}

extern "C" fn decrypt_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_update(
        "C_DecryptUpdate",
        OpKind::Decrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn decrypt_final(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_final("C_DecryptFinal", OpKind::Decrypt, h, out, out_len)
}

extern "C" fn digest_init(h: CK_SESSION_HANDLE, mech: CK_MECHANISM_PTR) -> CK_RV {
    op_init("C_DigestInit", OpKind::Digest, h, mech, CK_INVALID_HANDLE)
}

extern "C" fn digest_fn(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_single("C_Digest", OpKind::Digest, h, data, data_len, out, out_len)
}

extern "C" fn digest_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
) -> CK_RV {
    op_update(
        "C_DigestUpdate",
        OpKind::Digest,
        h,
        data,
        data_len,
        std::ptr::null_mut(),
        std::ptr::null_mut(),
    )
}

extern "C" fn digest_key(h: CK_SESSION_HANDLE, key: CK_OBJECT_HANDLE) -> CK_RV {
    let mut st = enter("C_DigestKey");
    check_session!(st, h);
    let value = match find_attr(&st, key, CKA_VALUE) {
        Some(v) => v,
        None => return CKR_KEY_HANDLE_INVALID,
    };
    match st.ops.get_mut(&OpKind::Digest) {
        Some(acc) => {
            acc.extend_from_slice(&value);
            CKR_OK
        }
        None => CKR_OPERATION_NOT_INITIALIZED,
    }
}

extern "C" fn digest_final(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_final("C_DigestFinal", OpKind::Digest, h, out, out_len)
}

extern "C" fn sign_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_SignInit", OpKind::Sign, h, mech, key)
}

extern "C" fn sign(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_single("C_Sign", OpKind::Sign, h, data, data_len, out, out_len)
}

extern "C" fn sign_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
) -> CK_RV {
    op_update(
        "C_SignUpdate",
        OpKind::Sign,
        h,
        data,
        data_len,
        std::ptr::null_mut(),
        std::ptr::null_mut(),
    )
}

extern "C" fn sign_final(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_final("C_SignFinal", OpKind::Sign, h, out, out_len)
}

extern "C" fn sign_recover_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_SignRecoverInit", OpKind::SignRecover, h, mech, key)
}

extern "C" fn sign_recover(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    op_single(
        "C_SignRecover",
        OpKind::SignRecover,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

fn check_signature(
    name: &'static str,
    h: CK_SESSION_HANDLE,
    data: Option<Vec<u8>>,
    sig: Vec<u8>,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    let acc = match st.ops.remove(&OpKind::Verify) {
        Some(acc) => acc,
        None => return CKR_OPERATION_NOT_INITIALIZED,
    };
    let data = match data {
        Some(d) => d,
        None => acc,
    };
    if digest(&data) == sig {
        CKR_OK
    } else {
        CKR_SIGNATURE_INVALID
    }
}

extern "C" fn verify_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_VerifyInit", OpKind::Verify, h, mech, key)
}

extern "C" fn verify(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    sig: CK_BYTE_PTR,
    sig_len: CK_ULONG,
) -> CK_RV {
    let data = unsafe { input(data, data_len) };
    let sig = unsafe { input(sig, sig_len) };
    check_signature("C_Verify", h, Some(data), sig)
}

extern "C" fn verify_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
) -> CK_RV {
    op_update(
        "C_VerifyUpdate",
        OpKind::Verify,
        h,
        data,
        data_len,
        std::ptr::null_mut(),
        std::ptr::null_mut(),
    )
}

extern "C" fn verify_final(
    h: CK_SESSION_HANDLE,
    sig: CK_BYTE_PTR,
    sig_len: CK_ULONG,
) -> CK_RV {
    let sig = unsafe { input(sig, sig_len) };
    check_signature("C_VerifyFinal", h, None, sig)
}

extern "C" fn verify_recover_init(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    key: CK_OBJECT_HANDLE,
) -> CK_RV {
    op_init("C_VerifyRecoverInit", OpKind::VerifyRecover, h, mech, key)
}

/* signatures starting with a zero byte are invalid */
extern "C" fn verify_recover(
    h: CK_SESSION_HANDLE,
    sig: CK_BYTE_PTR,
    sig_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter("C_VerifyRecover");
    check_session!(st, h);
    if !st.ops.contains_key(&OpKind::VerifyRecover) {
        return CKR_OPERATION_NOT_INITIALIZED;
    }
    let sig = unsafe { input(sig, sig_len) };
    let result = recover(&sig);
    if !out.is_null() && sig.first() == Some(&0) {
        st.ops.remove(&OpKind::VerifyRecover);
        return CKR_SIGNATURE_INVALID;
    }
    let (rv, delivered) = unsafe { deliver(st.shrink, &result, out, out_len) };
    if delivered {
        st.ops.remove(&OpKind::VerifyRecover);
    }
    rv
}

/* the dual functions feed the first operation and produce the output
 * of the second one */
fn dual_update(
    name: &'static str,
    feed: OpKind,
    produce: OpKind,
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let mut st = enter(name);
    check_session!(st, h);
    if !st.ops.contains_key(&feed) || !st.ops.contains_key(&produce) {
        return CKR_OPERATION_NOT_INITIALIZED;
    }
    let chunk = unsafe { input(data, data_len) };
    let result = xor(&chunk);
    let (rv, delivered) = unsafe { deliver(st.shrink, &result, out, out_len) };
    if delivered {
        /* the digest, sign or verify side always sees the plaintext */
        let plain = if produce == OpKind::Encrypt { chunk } else { result };
        if let Some(acc) = st.ops.get_mut(&feed) {
            acc.extend_from_slice(&plain);
        }
    }
    rv
}

extern "C" fn digest_encrypt_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    dual_update(
        "C_DigestEncryptUpdate",
        OpKind::Digest,
        OpKind::Encrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn decrypt_digest_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    dual_update(
        "C_DecryptDigestUpdate",
        OpKind::Digest,
        OpKind::Decrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn sign_encrypt_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    dual_update(
        "C_SignEncryptUpdate",
        OpKind::Sign,
        OpKind::Encrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn decrypt_verify_update(
    h: CK_SESSION_HANDLE,
    data: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    dual_update(
        "C_DecryptVerifyUpdate",
        OpKind::Verify,
        OpKind::Decrypt,
        h,
        data,
        data_len,
        out,
        out_len,
    )
}

extern "C" fn generate_key(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    key: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_GenerateKey");
    check_session!(st, h);
    if unsafe { (*mech).mechanism } != CKM_AES_KEY_GEN {
        return CKR_MECHANISM_INVALID;
    }
    let mut attrs = unsafe { read_template(tmpl, count) };
    attrs.push((CKA_CLASS, ulong_bytes(CKO_SECRET_KEY)));
    attrs.push((CKA_KEY_TYPE, ulong_bytes(CKK_AES)));
    attrs.push((CKA_VALUE, vec![0x11; 16]));
    let handle = store_object(&mut st, attrs);
    unsafe { *key = handle };
    CKR_OK
}

extern "C" fn generate_key_pair(
    h: CK_SESSION_HANDLE,
    _mech: CK_MECHANISM_PTR,
    pub_tmpl: CK_ATTRIBUTE_PTR,
    pub_count: CK_ULONG,
    priv_tmpl: CK_ATTRIBUTE_PTR,
    priv_count: CK_ULONG,
    pub_key: CK_OBJECT_HANDLE_PTR,
    priv_key: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_GenerateKeyPair");
    check_session!(st, h);
    let mut pub_attrs = unsafe { read_template(pub_tmpl, pub_count) };
    pub_attrs.push((CKA_CLASS, ulong_bytes(CKO_PUBLIC_KEY)));
    let mut priv_attrs = unsafe { read_template(priv_tmpl, priv_count) };
    priv_attrs.push((CKA_CLASS, ulong_bytes(CKO_PRIVATE_KEY)));
    let pub_handle = store_object(&mut st, pub_attrs);
    let priv_handle = store_object(&mut st, priv_attrs);
    unsafe {
        *pub_key = pub_handle;
        *priv_key = priv_handle;
    }
    CKR_OK
}

extern "C" fn wrap_key(
    h: CK_SESSION_HANDLE,
    _mech: CK_MECHANISM_PTR,
    wrapping: CK_OBJECT_HANDLE,
    key: CK_OBJECT_HANDLE,
    out: CK_BYTE_PTR,
    out_len: CK_ULONG_PTR,
) -> CK_RV {
    let st = enter("C_WrapKey");
    check_session!(st, h);
    if !st.objects.iter().any(|o| o.0 == wrapping) {
        return CKR_WRAPPING_KEY_HANDLE_INVALID;
    }
    let value = match find_attr(&st, key, CKA_VALUE) {
        Some(v) => v,
        None => return CKR_KEY_HANDLE_INVALID,
    };
    unsafe { deliver(st.shrink, &xor(&value), out, out_len).0 }
}

extern "C" fn unwrap_key(
    h: CK_SESSION_HANDLE,
    _mech: CK_MECHANISM_PTR,
    unwrapping: CK_OBJECT_HANDLE,
    wrapped: CK_BYTE_PTR,
    wrapped_len: CK_ULONG,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    key: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_UnwrapKey");
    check_session!(st, h);
    if !st.objects.iter().any(|o| o.0 == unwrapping) {
        return CKR_UNWRAPPING_KEY_HANDLE_INVALID;
    }
    let value = xor(&unsafe { input(wrapped, wrapped_len) });
    let mut attrs = unsafe { read_template(tmpl, count) };
    attrs.push((CKA_VALUE, value));
    let handle = store_object(&mut st, attrs);
    unsafe { *key = handle };
    CKR_OK
}

extern "C" fn derive_key(
    h: CK_SESSION_HANDLE,
    mech: CK_MECHANISM_PTR,
    base: CK_OBJECT_HANDLE,
    tmpl: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    key: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    let mut st = enter("C_DeriveKey");
    check_session!(st, h);
    let base_value = match find_attr(&st, base, CKA_VALUE) {
        Some(v) => v,
        None => return CKR_KEY_HANDLE_INVALID,
    };
    let mech = unsafe { &*mech };
    let mut material = base_value;
    material.extend_from_slice(&unsafe {
        input(mech.pParameter as CK_BYTE_PTR, mech.ulParameterLen)
    });
    let mut attrs = unsafe { read_template(tmpl, count) };
    attrs.push((CKA_VALUE, digest(&material)));
    let handle = store_object(&mut st, attrs);
    unsafe { *key = handle };
    CKR_OK
}

extern "C" fn seed_random(
    h: CK_SESSION_HANDLE,
    seed: CK_BYTE_PTR,
    seed_len: CK_ULONG,
) -> CK_RV {
    let mut st = enter("C_SeedRandom");
    check_session!(st, h);
    let seed = unsafe { input(seed, seed_len) };
    st.seed.extend_from_slice(&seed);
    CKR_OK
}

extern "C" fn generate_random(
    h: CK_SESSION_HANDLE,
    out: CK_BYTE_PTR,
    len: CK_ULONG,
) -> CK_RV {
    let st = enter("C_GenerateRandom");
    check_session!(st, h);
    let buf = unsafe { std::slice::from_raw_parts_mut(out, len as usize) };
    for (i, b) in buf.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(13).wrapping_add(7);
    }
    CKR_OK
}

pub static FUNCTION_LIST: Lazy<CK_FUNCTION_LIST> = Lazy::new(|| {
    let mut f: CK_FUNCTION_LIST = unsafe { std::mem::zeroed() };
    f.version = CK_VERSION { major: 2, minor: 40 };
    f.C_Initialize = Some(initialize);
    f.C_Finalize = Some(finalize);
    f.C_GetInfo = Some(get_info);
    f.C_GetSlotList = Some(get_slot_list);
    f.C_GetSlotInfo = Some(get_slot_info);
    f.C_GetTokenInfo = Some(get_token_info);
    f.C_WaitForSlotEvent = Some(wait_for_slot_event);
    f.C_GetMechanismList = Some(get_mechanism_list);
    f.C_GetMechanismInfo = Some(get_mechanism_info);
    f.C_InitToken = Some(init_token);
    f.C_OpenSession = Some(open_session);
    f.C_CloseSession = Some(close_session);
    f.C_CloseAllSessions = Some(close_all_sessions);
    f.C_GetSessionInfo = Some(get_session_info);
    f.C_GetOperationState = Some(get_operation_state);
    f.C_Login = Some(login);
    f.C_Logout = Some(logout);
    f.C_InitPIN = Some(init_pin);
    f.C_SetPIN = Some(set_pin);
    f.C_CreateObject = Some(create_object);
    f.C_CopyObject = Some(copy_object);
    f.C_DestroyObject = Some(destroy_object);
    f.C_GetObjectSize = Some(get_object_size);
    f.C_GetAttributeValue = Some(get_attribute_value);
    f.C_SetAttributeValue = Some(set_attribute_value);
    f.C_FindObjectsInit = Some(find_objects_init);
    f.C_FindObjects = Some(find_objects);
    f.C_FindObjectsFinal = Some(find_objects_final);
    f.C_EncryptInit = Some(encrypt_init);
    f.C_Encrypt = Some(encrypt);
    f.C_EncryptUpdate = Some(encrypt_update);
    f.C_EncryptFinal = Some(encrypt_final);
    f.C_DecryptInit = Some(decrypt_init);
    f.C_Decrypt = Some(decrypt);
    f.C_DecryptUpdate = Some(decrypt_update);
    f.C_DecryptFinal = Some(decrypt_final);
    f.C_DigestInit = Some(digest_init);
    f.C_Digest = Some(digest_fn);
    f.C_DigestUpdate = Some(digest_update);
    f.C_DigestKey = Some(digest_key);
    f.C_DigestFinal = Some(digest_final);
    f.C_SignInit = Some(sign_init);
    f.C_Sign = Some(sign);
    f.C_SignUpdate = Some(sign_update);
    f.C_SignFinal = Some(sign_final);
    f.C_SignRecoverInit = Some(sign_recover_init);
    f.C_SignRecover = Some(sign_recover);
    f.C_VerifyInit = Some(verify_init);
    f.C_Verify = Some(verify);
    f.C_VerifyUpdate = Some(verify_update);
    f.C_VerifyFinal = Some(verify_final);
    f.C_VerifyRecoverInit = Some(verify_recover_init);
    f.C_VerifyRecover = Some(verify_recover);
    f.C_DigestEncryptUpdate = Some(digest_encrypt_update);
    f.C_DecryptDigestUpdate = Some(decrypt_digest_update);
    f.C_SignEncryptUpdate = Some(sign_encrypt_update);
    f.C_DecryptVerifyUpdate = Some(decrypt_verify_update);
    f.C_GenerateKey = Some(generate_key);
    f.C_GenerateKeyPair = Some(generate_key_pair);
    f.C_WrapKey = Some(wrap_key);
    f.C_UnwrapKey = Some(unwrap_key);
    f.C_DeriveKey = Some(derive_key);
    f.C_SeedRandom = Some(seed_random);
    f.C_GenerateRandom = Some(generate_random);
    /* C_GetFunctionStatus, C_CancelFunction and C_SetOperationState
     * stay unset */
    f
});
