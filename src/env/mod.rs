//! Environment variables.
//!
//! Variables are held in RAM while the bootloader runs. With the `persistent_env`
//! feature they can be saved to and restored from NOR flash.

#[cfg(feature = "persistent_env")]
pub mod persistent;

use alloc::{collections::BTreeMap, format, string::String};

use serde::{Deserialize, Serialize};

/// Ordered bootmeth labels, written by `bootmeth order`.
pub const BOOTMETHS: &str = "bootmeths";
/// Ordered bootdev labels used for scanning.
pub const BOOT_TARGETS: &str = "boot_targets";
/// DFU entity descriptor table.
pub const DFU_ALT_INFO: &str = "dfu_alt_info";
pub const UPLADDR: &str = "upladdr";
pub const UPLSIZE: &str = "uplsize";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub const fn new() -> Self {
        Env {
            vars: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Set a variable. An empty value deletes it.
    pub fn set(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.vars.remove(name);
        } else {
            self.vars.insert(name.into(), value.into());
        }
    }

    /// Store a number in hex, without prefix.
    pub fn set_hex(&mut self, name: &str, value: u64) {
        self.set(name, &format!("{value:x}"));
    }

    pub fn get_hex(&self, name: &str) -> Option<u64> {
        let value = self.get(name)?;
        let value = value.strip_prefix("0x").unwrap_or(value);
        u64::from_str_radix(value, 16).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
