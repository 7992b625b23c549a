//! GUID partition table reader.

use alloc::{string::String, vec, vec::Vec};
use uuid::Uuid;

use crate::{Error, Result, blk::BlockDevice, crc32::crc32};

/// Partitions considered when searching a table, exclusive upper bound.
pub const MAX_SEARCH_PARTITIONS: u32 = 128;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const HEADER_LBA: u64 = 1;
const MIN_HEADER_SIZE: usize = 92;
const MIN_ENTRY_SIZE: usize = 128;
/// Upper bound on the entry array, far above the 128 entries tools create.
const MAX_ENTRY_COUNT: usize = 1024;
const NAME_UNITS: usize = 36;

fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn le64(data: &[u8], offset: usize) -> u64 {
    u64::from(le32(data, offset)) | u64::from(le32(data, offset + 4)) << 32
}

fn guid(data: &[u8], offset: usize) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[offset..offset + 16]);
    Uuid::from_bytes_le(bytes)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptEntry {
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl GptEntry {
    /// `None` for an unused slot.
    fn parse(raw: &[u8]) -> Option<Self> {
        let type_guid = guid(raw, 0);
        if type_guid.is_nil() {
            return None;
        }
        let units = raw[56..56 + 2 * NAME_UNITS]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0);
        Some(Self {
            type_guid,
            unique_guid: guid(raw, 16),
            first_lba: le64(raw, 32),
            last_lba: le64(raw, 40),
            attributes: le64(raw, 48),
            name: char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        })
    }

    pub fn blocks(&self) -> u64 {
        self.last_lba.saturating_sub(self.first_lba) + 1
    }
}

#[derive(Clone, Debug)]
pub struct Gpt {
    pub disk_guid: Uuid,
    entries: Vec<Option<GptEntry>>,
}

impl Gpt {
    /// Read and validate the table of `dev`.
    ///
    /// The backup header in the last block is used when the primary one is
    /// missing or corrupt.
    pub fn read(dev: &mut dyn BlockDevice) -> Result<Self> {
        let bs = dev.block_size();
        if bs < MIN_HEADER_SIZE {
            log::warn!("Block size {bs} cannot hold a GPT header");
            return Err(Error::InvalidImage);
        }

        let primary = match Self::read_at(dev, HEADER_LBA) {
            Ok(gpt) => return Ok(gpt),
            Err(e) => e,
        };
        let backup = dev.block_count().saturating_sub(1);
        if backup <= HEADER_LBA {
            return Err(primary);
        }
        log::debug!("Primary GPT unusable ({primary}), trying LBA {backup}");
        let gpt = Self::read_at(dev, backup)?;
        log::warn!(
            "Primary GPT on {} {} is corrupt, using backup",
            dev.class().name(),
            dev.dev_num()
        );
        Ok(gpt)
    }

    fn read_at(dev: &mut dyn BlockDevice, lba: u64) -> Result<Self> {
        let bs = dev.block_size();
        let mut header = vec![0u8; bs];
        dev.read_blocks(lba, &mut header)?;
        if header.get(..8) != Some(&SIGNATURE[..]) {
            log::debug!(
                "No GPT header at LBA {lba} of {} {}",
                dev.class().name(),
                dev.dev_num()
            );
            return Err(Error::NotFound);
        }

        let header_size = le32(&header, 12) as usize;
        if !(MIN_HEADER_SIZE..=bs).contains(&header_size) {
            return Err(Error::InvalidImage);
        }
        let mut check = header[..header_size].to_vec();
        check[16..20].fill(0);
        if crc32(&check) != le32(&header, 16) {
            log::warn!("GPT header checksum mismatch at LBA {lba}");
            return Err(Error::InvalidImage);
        }
        if le64(&header, 24) != lba {
            log::warn!("GPT header at LBA {lba} claims to be elsewhere");
            return Err(Error::InvalidImage);
        }

        let entries_lba = le64(&header, 72);
        let count = le32(&header, 80) as usize;
        let entry_size = le32(&header, 84) as usize;
        if !(MIN_ENTRY_SIZE..=bs).contains(&entry_size) || count > MAX_ENTRY_COUNT {
            return Err(Error::InvalidImage);
        }
        let len = count * entry_size;
        let mut raw = vec![0u8; len.div_ceil(bs) * bs];
        dev.read_blocks(entries_lba, &mut raw)?;
        if crc32(&raw[..len]) != le32(&header, 88) {
            log::warn!("GPT entries checksum mismatch at LBA {entries_lba}");
            return Err(Error::InvalidImage);
        }

        Ok(Self {
            disk_guid: guid(&header, 56),
            entries: raw[..len].chunks_exact(entry_size).map(GptEntry::parse).collect(),
        })
    }

    /// Entry for 1-based partition number `part`, if it is in use.
    pub fn partition(&self, part: u32) -> Option<&GptEntry> {
        let index = usize::try_from(part.checked_sub(1)?).ok()?;
        self.entries.get(index)?.as_ref()
    }

    /// Partitions in use, with their 1-based numbers.
    pub fn partitions(&self) -> impl Iterator<Item = (u32, &GptEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Some((i as u32 + 1, e.as_ref()?)))
    }
}
