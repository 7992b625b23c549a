//! Block devices, as used for partition tables and firmware-update metadata.

use alloc::vec;

use crate::{Error, Result};

/// Kind of controller behind a block device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Mmc,
    Usb,
    Nvme,
    Scsi,
    Virtio,
}

impl DeviceClass {
    pub const fn name(self) -> &'static str {
        match self {
            DeviceClass::Mmc => "mmc",
            DeviceClass::Usb => "usb",
            DeviceClass::Nvme => "nvme",
            DeviceClass::Scsi => "scsi",
            DeviceClass::Virtio => "virtio",
        }
    }
}

pub trait BlockDevice {
    fn class(&self) -> DeviceClass;

    /// Device number within its class, e.g. 0 for `mmc 0`.
    fn dev_num(&self) -> u32;

    fn block_size(&self) -> usize;

    /// Number of blocks on the device.
    fn block_count(&self) -> u64;

    /// Read whole blocks starting at `lba`; `buf` is a multiple of the block size.
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// Read `len` bytes starting at byte `offset`, which need not be block aligned.
    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bs = self.block_size();
        if bs == 0 {
            return Err(Error::InvalidConfig);
        }
        let first = offset / bs as u64;
        let skip = (offset % bs as u64) as usize;
        let blocks = (skip + buf.len()).div_ceil(bs);

        let mut tmp = vec![0u8; blocks * bs];
        self.read_blocks(first, &mut tmp)?;
        buf.copy_from_slice(&tmp[skip..skip + buf.len()]);
        Ok(())
    }
}
