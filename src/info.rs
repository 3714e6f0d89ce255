// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Host representation of the Cryptoki information structures
//!
//! Fixed width text fields are blank padded by the provider and are
//! returned in full, without trimming.

use crate::pkcs11::*;
use crate::registry::{flag_names, Namespace};
use crate::value::{Struct, Value};

fn key(name: &str) -> Value {
    Value::symbol(name)
}

fn version(v: CK_VERSION) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("major"), Value::Number(u64::from(v.major)))
            .with(key("minor"), Value::Number(u64::from(v.minor))),
    )
}

fn flags(ns: Namespace, flags: CK_FLAGS) -> Value {
    Value::Tuple(flag_names(ns, flags).into_iter().map(Value::symbol).collect())
}

pub fn info_to_value(info: &CK_INFO) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("cryptoki-version"), version(info.cryptokiVersion))
            .with(key("manufacturer-id"), Value::bytes(&info.manufacturerID))
            .with(key("flags"), Value::number(info.flags))
            .with(
                key("library-description"),
                Value::bytes(&info.libraryDescription),
            )
            .with(key("library-version"), version(info.libraryVersion)),
    )
}

pub fn slot_info_to_value(info: &CK_SLOT_INFO) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("slot-description"), Value::bytes(&info.slotDescription))
            .with(key("manufacturer-id"), Value::bytes(&info.manufacturerID))
            .with(key("flags"), Value::number(info.flags))
            .with(key("flag-names"), flags(Namespace::SlotFlag, info.flags))
            .with(key("hardware-version"), version(info.hardwareVersion))
            .with(key("firmware-version"), version(info.firmwareVersion)),
    )
}

pub fn token_info_to_value(info: &CK_TOKEN_INFO) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("label"), Value::bytes(&info.label))
            .with(key("manufacturer-id"), Value::bytes(&info.manufacturerID))
            .with(key("model"), Value::bytes(&info.model))
            .with(key("serial-number"), Value::bytes(&info.serialNumber))
            .with(key("flags"), Value::number(info.flags))
            .with(key("flag-names"), flags(Namespace::TokenFlag, info.flags))
            .with(
                key("max-session-count"),
                Value::number(info.ulMaxSessionCount),
            )
            .with(key("session-count"), Value::number(info.ulSessionCount))
            .with(
                key("max-rw-session-count"),
                Value::number(info.ulMaxRwSessionCount),
            )
            .with(key("rw-session-count"), Value::number(info.ulRwSessionCount))
            .with(key("max-pin-len"), Value::number(info.ulMaxPinLen))
            .with(key("min-pin-len"), Value::number(info.ulMinPinLen))
            .with(
                key("total-public-memory"),
                Value::number(info.ulTotalPublicMemory),
            )
            .with(
                key("free-public-memory"),
                Value::number(info.ulFreePublicMemory),
            )
            .with(
                key("total-private-memory"),
                Value::number(info.ulTotalPrivateMemory),
            )
            .with(
                key("free-private-memory"),
                Value::number(info.ulFreePrivateMemory),
            )
            .with(key("hardware-version"), version(info.hardwareVersion))
            .with(key("firmware-version"), version(info.firmwareVersion))
            .with(key("utc-time"), Value::bytes(&info.utcTime)),
    )
}

pub fn session_info_to_value(info: &CK_SESSION_INFO) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("slot-id"), Value::number(info.slotID))
            .with(key("state"), Value::number(info.state))
            .with(key("flags"), Value::number(info.flags))
            .with(key("flag-names"), flags(Namespace::SessionFlag, info.flags))
            .with(key("device-error"), Value::number(info.ulDeviceError)),
    )
}

pub fn mechanism_info_to_value(info: &CK_MECHANISM_INFO) -> Value {
    Value::Struct(
        Struct::new()
            .with(key("min-key-size"), Value::number(info.ulMinKeySize))
            .with(key("max-key-size"), Value::number(info.ulMaxKeySize))
            .with(key("flags"), Value::number(info.flags))
            .with(
                key("flag-names"),
                flags(Namespace::MechanismFlag, info.flags),
            ),
    )
}
