//! Boot devices: the places an operating system can be found.
//!
//! A bootdev wraps one medium (an MMC card, a USB stick, a SPI flash) behind the
//! [`BootMedia`] trait. Bootdevs are registered once at start-up and live for the
//! whole boot session; they can be probed any number of times.

use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};

use crate::{Error, Result};

/// Filesystem-level access to a boot medium, provided by the board's drivers.
///
/// Partition 0 always means the whole device.
pub trait BootMedia {
    /// Bring up the medium (power, clocks, card identification).
    fn probe(&mut self) -> Result<()>;

    /// Highest partition number, or 0 if the medium carries no partition table.
    fn max_part(&mut self) -> Result<u32>;

    /// Check that partition `part` exists; [`Error::NoMedia`] when there is no
    /// medium to hold it.
    fn check_part(&mut self, part: u32) -> Result<()>;

    /// Mount the filesystem found in `part`.
    fn mount(&mut self, part: u32) -> Result<()>;

    fn file_size(&mut self, part: u32, path: &str) -> Result<u64>;

    /// Read a whole file into `buf`, returning the number of bytes read.
    fn read_file(&mut self, part: u32, path: &str, buf: &mut [u8]) -> Result<usize>;
}

/// Driver class of the device a bootdev is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uclass {
    Mmc,
    Usb,
    Ethernet,
    SpiFlash,
    Nvme,
    Virtio,
}

impl Uclass {
    pub const fn name(self) -> &'static str {
        match self {
            Uclass::Mmc => "mmc",
            Uclass::Usb => "usb_mass_storage",
            Uclass::Ethernet => "ethernet",
            Uclass::SpiFlash => "spi_flash",
            Uclass::Nvme => "nvme",
            Uclass::Virtio => "virtio",
        }
    }

    /// Whether the device exposes a filesystem at all.
    pub const fn is_block(self) -> bool {
        !matches!(self, Uclass::Ethernet)
    }
}

/// Index of a registered bootdev.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BootdevId(pub(crate) usize);

pub struct Bootdev {
    name: String,
    label: String,
    seq: u32,
    uclass: Uclass,
    active: bool,
    media: Box<dyn BootMedia>,
}

impl Bootdev {
    /// Create a bootdev for the media device called `label`, e.g. `mmc1`.
    pub fn new(label: &str, uclass: Uclass, media: Box<dyn BootMedia>) -> Self {
        Self {
            name: format!("{label}.bootdev"),
            label: label.to_string(),
            seq: 0,
            uclass,
            active: false,
            media,
        }
    }

    /// Device name, e.g. `mmc1.bootdev`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn uclass(&self) -> Uclass {
        self.uclass
    }

    /// Whether the device has been probed successfully.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Probe the medium; a device that is already active is left alone.
    pub fn probe(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        self.media.probe()?;
        self.active = true;
        Ok(())
    }

    pub fn media(&mut self) -> &mut dyn BootMedia {
        self.media.as_mut()
    }
}

/// The registered bootdevs, in registration order.
#[derive(Default)]
pub struct Bootdevs {
    devs: Vec<Bootdev>,
}

impl Bootdevs {
    pub const fn new() -> Self {
        Self { devs: Vec::new() }
    }

    /// Register a bootdev, assigning the next sequence number.
    ///
    /// Labels must be unique within a session.
    pub fn register(&mut self, mut dev: Bootdev) -> Result<BootdevId> {
        if self.devs.iter().any(|d| d.label == dev.label) {
            log::warn!("Duplicate bootdev label '{}'", dev.label);
            return Err(Error::InvalidConfig);
        }
        dev.seq = self.devs.len() as u32;
        self.devs.push(dev);
        Ok(BootdevId(self.devs.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.devs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devs.is_empty()
    }

    pub fn get(&self, id: BootdevId) -> &Bootdev {
        &self.devs[id.0]
    }

    pub fn get_mut(&mut self, id: BootdevId) -> &mut Bootdev {
        &mut self.devs[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = BootdevId> + use<> {
        (0..self.devs.len()).map(BootdevId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BootdevId, &Bootdev)> {
        self.devs.iter().enumerate().map(|(i, d)| (BootdevId(i), d))
    }

    pub fn find_by_label(&self, label: &str) -> Option<BootdevId> {
        self.devs.iter().position(|d| d.label == label).map(BootdevId)
    }

    pub fn find_by_name(&self, name: &str) -> Option<BootdevId> {
        self.devs.iter().position(|d| d.name == name).map(BootdevId)
    }

    pub fn find_by_seq(&self, seq: u32) -> Option<BootdevId> {
        self.devs.iter().position(|d| d.seq == seq).map(BootdevId)
    }

    /// Resolve a hex sequence number, a device name or a label, in that order.
    pub fn find_by_any(&self, name: &str) -> Result<BootdevId> {
        let found = match u32::from_str_radix(name, 16) {
            Ok(seq) => self.find_by_seq(seq),
            Err(_) => self
                .find_by_name(name)
                .or_else(|| self.find_by_label(name)),
        };
        found.ok_or_else(|| {
            log::debug!("Cannot find bootdev '{name}'");
            Error::NotFound
        })
    }
}
