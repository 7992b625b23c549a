//! System RAM as seen by the loaders.

use crate::{Error, Result};

/// Physical memory that images are loaded into and handoff blobs are read from.
pub trait Memory {
    fn slice(&self, addr: u64, len: usize) -> Result<&[u8]>;

    fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8]>;

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }
}

/// A window of RAM starting at physical address `base`.
pub struct RamWindow<'a> {
    base: u64,
    ram: &'a mut [u8],
}

impl<'a> RamWindow<'a> {
    pub fn new(base: u64, ram: &'a mut [u8]) -> Self {
        Self { base, ram }
    }

    fn range(&self, addr: u64, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr.checked_sub(self.base).ok_or(Error::Range)?;
        let start = usize::try_from(start).map_err(|_| Error::Range)?;
        let end = start.checked_add(len).ok_or(Error::Range)?;
        if end > self.ram.len() {
            return Err(Error::Range);
        }
        Ok(start..end)
    }
}

impl Memory for RamWindow<'_> {
    fn slice(&self, addr: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.ram[range])
    }

    fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8]> {
        let range = self.range(addr, len)?;
        Ok(&mut self.ram[range])
    }
}
