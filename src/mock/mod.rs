pub mod gpt;

use core::cell::Cell;
use std::collections::BTreeMap;

use alloc::{string::String, vec, vec::Vec};
use embedded_hal::delay::DelayNs;
use embedded_storage_async::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::{
    Error, Result,
    bootdev::BootMedia,
    spl::{ImageRead, spi::{SpiFlash, SpiFlashProbe}},
    time::{Ticks, Watchdog},
};

pub use gpt::{BLOCK_SIZE, GptPart, MockDisk, TinyBlocks};

pub const PAGE_SIZE: usize = 4096;

/// Filesystem media with a fixed set of files per partition.
pub struct MockMedia {
    max_part: u32,
    present: bool,
    probe_fails: bool,
    files: BTreeMap<(u32, String), Vec<u8>>,
}

impl MockMedia {
    /// Media with partitions `1..=max_part`, each holding a filesystem.
    ///
    /// With `max_part == 0` the whole device holds the filesystem.
    pub fn new(max_part: u32) -> Self {
        Self {
            max_part,
            present: true,
            probe_fails: false,
            files: BTreeMap::new(),
        }
    }

    /// A slot without a card in it.
    pub fn empty() -> Self {
        Self {
            present: false,
            ..Self::new(0)
        }
    }

    /// A controller that fails to initialise.
    pub fn broken() -> Self {
        Self {
            probe_fails: true,
            ..Self::new(0)
        }
    }

    pub fn file(mut self, part: u32, path: &str, data: &[u8]) -> Self {
        self.files.insert((part, String::from(path)), data.to_vec());
        self
    }
}

impl BootMedia for MockMedia {
    fn probe(&mut self) -> Result<()> {
        if self.probe_fails {
            Err(Error::NoDevice)
        } else {
            Ok(())
        }
    }

    fn max_part(&mut self) -> Result<u32> {
        Ok(if self.present { self.max_part } else { 0 })
    }

    fn check_part(&mut self, part: u32) -> Result<()> {
        if !self.present {
            return Err(Error::NoMedia);
        }
        match part {
            0 if self.max_part == 0 => Ok(()),
            0 => Err(Error::NotFound),
            n if n <= self.max_part => Ok(()),
            _ => Err(Error::NotFound),
        }
    }

    fn mount(&mut self, part: u32) -> Result<()> {
        self.check_part(part)
    }

    fn file_size(&mut self, part: u32, path: &str) -> Result<u64> {
        self.files
            .get(&(part, String::from(path)))
            .map(|data| data.len() as u64)
            .ok_or(Error::NotFound)
    }

    fn read_file(&mut self, part: u32, path: &str, buf: &mut [u8]) -> Result<usize> {
        let data = self
            .files
            .get(&(part, String::from(path)))
            .ok_or(Error::NotFound)?;
        let dst = buf.get_mut(..data.len()).ok_or(Error::NoSpace)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFlashError {
    OutOfBounds,
    NotAligned,
}

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MockFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            MockFlashError::NotAligned => NorFlashErrorKind::NotAligned,
        }
    }
}

fn flash_range(len: usize, offset: u32, count: usize) -> core::result::Result<core::ops::Range<usize>, MockFlashError> {
    let start = offset as usize;
    let end = start.checked_add(count).ok_or(MockFlashError::OutOfBounds)?;
    if end > len {
        return Err(MockFlashError::OutOfBounds);
    }
    Ok(start..end)
}

/// RAM-backed NOR flash: writes can only clear bits, erases set whole pages.
pub struct MockNorFlash {
    data: Vec<u8>,
}

impl MockNorFlash {
    pub fn new(pages: usize) -> Self {
        Self {
            data: vec![0xff; pages * PAGE_SIZE],
        }
    }
}

impl ErrorType for MockNorFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockNorFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), Self::Error> {
        let range = flash_range(self.data.len(), offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockNorFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> core::result::Result<(), Self::Error> {
        if from as usize % PAGE_SIZE != 0 || to as usize % PAGE_SIZE != 0 {
            return Err(MockFlashError::NotAligned);
        }
        let range = flash_range(self.data.len(), from, (to - from) as usize)?;
        self.data[range].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> core::result::Result<(), Self::Error> {
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(MockFlashError::NotAligned);
        }
        let range = flash_range(self.data.len(), offset, bytes.len())?;
        for (dst, src) in self.data[range].iter_mut().zip(bytes) {
            *dst &= *src;
        }
        Ok(())
    }
}

/// SPI NOR flash that records reads and can be told to misbehave on reset.
pub struct MockSpiFlash {
    data: Vec<u8>,
    pub reads: Vec<(u32, usize)>,
    pub reset_fails: bool,
    /// Number of status polls that still report busy.
    pub busy_polls: u32,
    pub resets: usize,
}

impl MockSpiFlash {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: Vec::new(),
            reset_fails: false,
            busy_polls: 0,
            resets: 0,
        }
    }
}

impl ErrorType for MockSpiFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockSpiFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), Self::Error> {
        let range = flash_range(self.data.len(), offset, bytes.len())?;
        self.reads.push((offset, bytes.len()));
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl SpiFlash for MockSpiFlash {
    fn soft_reset(&mut self) -> Result<()> {
        self.resets += 1;
        if self.reset_fails {
            Err(Error::Io)
        } else {
            Ok(())
        }
    }

    fn is_busy(&mut self) -> Result<bool> {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

pub struct MockSpiProbe {
    pub flash: Option<MockSpiFlash>,
}

impl MockSpiProbe {
    pub fn new(flash: MockSpiFlash) -> Self {
        Self { flash: Some(flash) }
    }

    /// Nothing answers on the bus.
    pub fn absent() -> Self {
        Self { flash: None }
    }
}

impl SpiFlashProbe for MockSpiProbe {
    type Flash = MockSpiFlash;

    fn probe(&mut self, _bus: u32, _cs: u32, _max_hz: u32, _mode: u8) -> Result<&mut MockSpiFlash> {
        self.flash.as_mut().ok_or(Error::NoDevice)
    }
}

/// Image medium backed by a byte slice, recording every read.
pub struct SliceReader<'a> {
    data: &'a [u8],
    pub reads: Vec<(u32, usize)>,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            reads: Vec::new(),
        }
    }
}

impl ImageRead for SliceReader<'_> {
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let src = self.data.get(start..start + buf.len()).ok_or(Error::Io)?;
        buf.copy_from_slice(src);
        self.reads.push((offset, buf.len()));
        Ok(())
    }
}

/// Clock that only moves when something waits on it.
pub struct FakeClock {
    us: Cell<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { us: Cell::new(0) }
    }

    pub fn delay(&self) -> FakeDelay<'_> {
        FakeDelay(&self.us)
    }
}

impl Ticks for FakeClock {
    fn now_ms(&self) -> u64 {
        self.us.get() / 1000
    }
}

pub struct FakeDelay<'a>(&'a Cell<u64>);

impl DelayNs for FakeDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns).div_ceil(1000));
    }
}

#[derive(Default)]
pub struct CountingWatchdog {
    pub fed: usize,
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.fed += 1;
    }
}
