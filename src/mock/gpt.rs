use alloc::vec::Vec;
use uuid::Uuid;

use crate::{
    Result,
    blk::{BlockDevice, DeviceClass},
    crc32::crc32,
};

pub const BLOCK_SIZE: usize = 512;
const ENTRY_COUNT: usize = 128;
const ENTRY_SIZE: usize = 128;
const FIRST_USABLE_LBA: u64 = 34;

pub struct GptPart {
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub name: &'static str,
}

/// In-memory block device.
pub struct MockDisk {
    class: DeviceClass,
    dev_num: u32,
    data: Vec<u8>,
}

impl MockDisk {
    pub fn new(class: DeviceClass, dev_num: u32, blocks: usize) -> Self {
        Self {
            class,
            dev_num,
            data: alloc::vec![0; blocks * BLOCK_SIZE],
        }
    }

    /// A disk carrying a primary and a backup GPT with `parts` in entries 1, 2, ...
    pub fn with_gpt(class: DeviceClass, dev_num: u32, blocks: usize, parts: &[GptPart]) -> Self {
        let mut disk = Self::new(class, dev_num, blocks);

        let mut entries = alloc::vec![0u8; ENTRY_COUNT * ENTRY_SIZE];
        for (part, entry) in parts.iter().zip(entries.chunks_exact_mut(ENTRY_SIZE)) {
            entry[0..16].copy_from_slice(&part.type_guid.to_bytes_le());
            entry[16..32].copy_from_slice(&part.unique_guid.to_bytes_le());
            entry[32..40].copy_from_slice(&part.first_lba.to_le_bytes());
            entry[40..48].copy_from_slice(&part.last_lba.to_le_bytes());
            for (i, unit) in part.name.encode_utf16().take(36).enumerate() {
                entry[56 + 2 * i..58 + 2 * i].copy_from_slice(&unit.to_le_bytes());
            }
        }

        let last_lba = blocks as u64 - 1;
        let entry_blocks = (ENTRY_COUNT * ENTRY_SIZE / BLOCK_SIZE) as u64;
        let backup_entries = last_lba - entry_blocks;
        let header = |my_lba: u64, alternate_lba: u64, entries_lba: u64| {
            let mut header = [0u8; 92];
            header[0..8].copy_from_slice(b"EFI PART");
            header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
            header[12..16].copy_from_slice(&92u32.to_le_bytes());
            header[24..32].copy_from_slice(&my_lba.to_le_bytes());
            header[32..40].copy_from_slice(&alternate_lba.to_le_bytes());
            header[40..48].copy_from_slice(&FIRST_USABLE_LBA.to_le_bytes());
            header[48..56].copy_from_slice(&(backup_entries - 1).to_le_bytes());
            header[56..72].copy_from_slice(&Uuid::from_u128(0x5eed).to_bytes_le());
            header[72..80].copy_from_slice(&entries_lba.to_le_bytes());
            header[80..84].copy_from_slice(&(ENTRY_COUNT as u32).to_le_bytes());
            header[84..88].copy_from_slice(&(ENTRY_SIZE as u32).to_le_bytes());
            header[88..92].copy_from_slice(&crc32(&entries).to_le_bytes());
            let hcrc = crc32(&header);
            header[16..20].copy_from_slice(&hcrc.to_le_bytes());
            header
        };

        disk.write_at(1, &header(1, last_lba, 2));
        disk.write_at(2, &entries);
        disk.write_at(backup_entries, &entries);
        disk.write_at(last_lba, &header(last_lba, 1, backup_entries));
        disk
    }

    pub fn write_at(&mut self, lba: u64, data: &[u8]) {
        let start = lba as usize * BLOCK_SIZE;
        self.data[start..start + data.len()].copy_from_slice(data);
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl BlockDevice for MockDisk {
    fn class(&self) -> DeviceClass {
        self.class
    }

    fn dev_num(&self) -> u32 {
        self.dev_num
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / BLOCK_SIZE) as u64
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let start = lba as usize * BLOCK_SIZE;
        let src = self
            .data
            .get(start..start + buf.len())
            .ok_or(crate::Error::Io)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Block device with an unusual block size, reading back zeroes.
pub struct TinyBlocks {
    block_size: usize,
}

impl TinyBlocks {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }
}

impl BlockDevice for TinyBlocks {
    fn class(&self) -> DeviceClass {
        DeviceClass::Mmc
    }

    fn dev_num(&self) -> u32 {
        0
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        64
    }

    fn read_blocks(&mut self, _lba: u64, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        Ok(())
    }
}
