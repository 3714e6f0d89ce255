// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use toml;

#[cfg(not(test))]
const DEFAULT_CONF_DIR: &str = {
    match option_env!("CONFDIR") {
        Some(p) => p,
        None => "/usr/local/etc",
    }
};
#[cfg(test)]
const DEFAULT_CONF_DIR: &str = "test";

pub const DEFAULT_CONF_NAME: &str = "p11host.conf";

/// Which provider module to load and how to initialize it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path of the PKCS#11 module
    pub module: Option<String>,
    /// Opaque string handed to the module in the pReserved field of the
    /// initialization arguments (NSS style parameters for example)
    pub init_args: Option<String>,
    /// Tells the module it may use the OS locking primitives
    #[serde(default)]
    pub os_locking: bool,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("P11HOST_CONF") {
            return Ok(var);
        }
        /* Freedesktop specification for config dirs first
         * then fallback to use $HOME/.config, if that is also not
         * available see if we have a system wide file */
        let conffile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/p11host/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/p11host/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => format!(
                    "{}/p11host/{}",
                    DEFAULT_CONF_DIR, DEFAULT_CONF_NAME
                ),
            },
        };
        if Path::new(&conffile).is_file() {
            Ok(conffile)
        } else {
            Err(Error::other_error(format!(
                "no configuration file found at {}",
                conffile
            )))
        }
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Config::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Config> {
        let conf: Config = toml::from_str(config_str)?;
        Ok(conf)
    }

    /// Applies environment overrides, P11HOST_MODULE replaces the module
    /// path
    pub fn from_env(&mut self) {
        if let Ok(module) = env::var("P11HOST_MODULE") {
            log::debug!("Module path overridden by environment: {}", module);
            self.module = Some(module);
        }
    }

    /// Loads the configuration file if one can be found, otherwise starts
    /// from an empty configuration, then applies environment overrides
    pub fn default_config() -> Result<Config> {
        let mut conf = match Config::find_conf() {
            Ok(filename) => {
                log::debug!("Loading configuration from {}", filename);
                Config::from_file(&filename)?
            }
            Err(e) => {
                log::debug!("{}", e);
                Config::new()
            }
        };
        conf.from_env();
        Ok(conf)
    }

    pub fn module_path(&self) -> Result<&str> {
        match &self.module {
            Some(m) => Ok(m.as_str()),
            None => Err(Error::other_error(
                "no PKCS#11 module configured, set module or P11HOST_MODULE",
            )),
        }
    }
}
