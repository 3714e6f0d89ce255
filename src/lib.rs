// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This is p11host
//!
//! A marshalling layer that exposes a PKCS#11 (Cryptoki) provider module
//! to a dynamically typed scripting host. Host values (symbols, byte
//! strings, numbers, structs) are converted to the native Cryptoki
//! structures and back, provider calls returning variable length data
//! are driven through the probe-then-fill protocol, and library and
//! session handles are exposed as host objects answering to keyword
//! named methods.

pub use pkcs11;

mod error;
mod misc;
mod funclist;

pub mod attribute;
pub mod config;
pub mod host;
pub mod info;
pub mod library;
pub mod mechanism;
pub mod registry;
pub mod session;
pub mod template;
pub mod value;

mod twophase;

#[cfg(feature = "log")]
mod log;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use host::{call_util, HostObject, LibraryObject, Reply, SessionObject};
pub use library::{Library, SessionFlags};
pub use mechanism::Mechanism;
pub use session::Session;
pub use template::Template;
pub use value::{Struct, Value};

#[cfg(test)]
mod tests;
