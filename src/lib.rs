//! Boot-source orchestration and stage loading for firmware bootloaders.
//!
//! The crate covers the parts of a bootloader that have real protocol behaviour:
//! discovering bootflows by applying boot methods to boot devices ([`bootstd`]),
//! loading and verifying the next stage from flash ([`spl`]) and selecting
//! firmware-update banks from GPT and FWU metadata ([`fwu`]).
//!
//! Hardware access is left to the board: storage, RAM, timers and the final jump
//! are all traits which the board implements.
#![no_std]

extern crate alloc;

pub mod blk;
pub mod boot;
pub mod bootdev;
pub mod bootflow;
pub mod bootmeth;
pub mod bootstd;
pub mod cmd;
pub mod crc32;
pub mod env;
pub mod fdt;
pub mod fwu;
pub mod memory;
pub mod spl;
pub mod time;
pub mod upl;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

/// Errors shared by all bootloader operations.
///
/// Every variant maps onto a negative errno value through [`Error::errno`],
/// which is what the command layer prints as `err=-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A label, GUID, file or entity does not resolve.
    #[error("No such file or directory")]
    NotFound,
    /// The medium could not be initialised.
    #[error("No such device")]
    NoDevice,
    /// A polled condition did not become true within its budget.
    #[error("Connection timed out")]
    Timeout,
    /// The underlying medium reported a transfer failure.
    #[error("I/O error")]
    Io,
    /// Configuration is absent or malformed.
    #[error("Invalid argument")]
    InvalidConfig,
    /// Image header, checksum or structure is not acceptable.
    #[error("Exec format error")]
    InvalidImage,
    /// The medium holds nothing a partition or filesystem reader can use,
    /// such as an empty card slot.
    #[error("Protocol not supported")]
    NoMedia,
    /// The request is understood but not implemented for this medium or format.
    #[error("Operation not supported")]
    Unsupported,
    /// A destination buffer or region is too small.
    #[error("No space left on device")]
    NoSpace,
    /// A value is outside the representable range.
    #[error("Numerical result out of range")]
    Range,
}

impl Error {
    /// Negative errno equivalent, as printed by the command layer.
    pub const fn errno(self) -> i32 {
        match self {
            Error::NotFound => -2,
            Error::Io => -5,
            Error::InvalidImage => -8,
            Error::NoDevice => -19,
            Error::InvalidConfig => -22,
            Error::NoSpace => -28,
            Error::Range => -34,
            Error::NoMedia => -93,
            Error::Unsupported => -95,
            Error::Timeout => -110,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
