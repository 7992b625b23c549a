//! Bootflows: the outcome of applying one bootmeth to one partition of one bootdev.

use alloc::{format, string::String, vec::Vec};

use crate::{Error, bootdev::BootdevId, bootmeth::BootmethId};

/// How far discovery got. Each state implies all the previous ones succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootflowState {
    /// Nothing is known yet.
    Base,
    /// The bootdev has media.
    Media,
    /// The partition exists.
    Part,
    /// A filesystem was mounted.
    Fs,
    /// The boot file was found.
    File,
    /// The boot file was read and the bootflow can be booted.
    Ready,
}

impl BootflowState {
    pub const fn name(self) -> &'static str {
        match self {
            BootflowState::Base => "base",
            BootflowState::Media => "media",
            BootflowState::Part => "part",
            BootflowState::Fs => "fs",
            BootflowState::File => "file",
            BootflowState::Ready => "ready",
        }
    }

    /// Explanation of an error encountered while in this state.
    pub const fn failure(self) -> &'static str {
        match self {
            BootflowState::Base => "No media/partition found",
            BootflowState::Media => "No partition found",
            BootflowState::Part => "No filesystem found",
            BootflowState::Fs => "File not found",
            BootflowState::File => "File cannot be loaded",
            BootflowState::Ready => "Ready",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Bootflow {
    pub dev: BootdevId,
    pub method: BootmethId,
    /// `<bootdev>.whole` or `<bootdev>.part_<n>`.
    pub name: String,
    pub part: u32,
    pub state: BootflowState,
    /// Prefix the boot file was found under.
    pub subdir: Option<String>,
    pub fname: Option<String>,
    pub size: u64,
    /// Contents of the boot file, once read.
    pub buf: Vec<u8>,
    pub err: Option<Error>,
}

impl Bootflow {
    pub fn new(dev: BootdevId, dev_name: &str, method: BootmethId, part: u32) -> Self {
        let name = match part {
            0 => format!("{dev_name}.whole"),
            n => format!("{dev_name}.part_{n:x}"),
        };
        Self {
            dev,
            method,
            name,
            part,
            state: BootflowState::Base,
            subdir: None,
            fname: None,
            size: 0,
            buf: Vec::new(),
            err: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == BootflowState::Ready
    }
}
