//! FWU metadata, version 1.
//!
//! ```text
//! u32 crc32                    over everything after this field
//! u32 version                  1
//! u32 active_index
//! u32 previous_active_index
//! per image:
//!     guid image_type
//!     guid location
//!     per bank:
//!         guid image
//!         u32  accepted
//!         u32  reserved
//! ```
//!
//! All integers are little-endian and GUIDs use the EFI mixed-endian encoding.

use alloc::{vec, vec::Vec};
use uuid::Uuid;

use super::{
    FwuConfig,
    gpt::{Gpt, GptEntry},
};
use crate::{Error, Result, blk::BlockDevice, crc32::crc32};

pub const VERSION: u32 = 1;

/// Partition type of the two metadata copies.
pub const MDATA_PART_TYPE: Uuid = uuid::uuid!("8a7a84a0-8387-40f6-ab41-a8b9a5a60d23");

const HEADER_SIZE: usize = 16;
const BANK_SIZE: usize = 24;
const ENTRY_HEADER_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankInfo {
    pub image_guid: Uuid,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageEntry {
    pub image_type: Uuid,
    pub location: Uuid,
    pub banks: Vec<BankInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FwuMdata {
    pub version: u32,
    pub active_index: u32,
    pub previous_active_index: u32,
    pub images: Vec<ImageEntry>,
}

fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn guid(data: &[u8], offset: usize) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[offset..offset + 16]);
    Uuid::from_bytes_le(bytes)
}

impl FwuMdata {
    /// Encoded size for `config`.
    pub const fn size(config: &FwuConfig) -> usize {
        HEADER_SIZE + config.images_per_bank * (ENTRY_HEADER_SIZE + config.num_banks * BANK_SIZE)
    }

    /// [`Self::size`], or `None` when `config` describes no representable layout.
    pub(crate) fn checked_size(config: &FwuConfig) -> Option<usize> {
        config
            .num_banks
            .checked_mul(BANK_SIZE)?
            .checked_add(ENTRY_HEADER_SIZE)?
            .checked_mul(config.images_per_bank)?
            .checked_add(HEADER_SIZE)
    }

    pub fn parse(raw: &[u8], config: &FwuConfig) -> Result<Self> {
        config.validate()?;
        let raw = raw.get(..Self::size(config)).ok_or(Error::InvalidImage)?;
        if crc32(&raw[4..]) != le32(raw, 0) {
            return Err(Error::InvalidImage);
        }
        let version = le32(raw, 4);
        if version != VERSION {
            log::warn!("Unsupported FWU metadata version {version}");
            return Err(Error::Unsupported);
        }

        let entry_size = ENTRY_HEADER_SIZE + config.num_banks * BANK_SIZE;
        let images = raw[HEADER_SIZE..]
            .chunks_exact(entry_size)
            .map(|entry| ImageEntry {
                image_type: guid(entry, 0),
                location: guid(entry, 16),
                banks: entry[ENTRY_HEADER_SIZE..]
                    .chunks_exact(BANK_SIZE)
                    .map(|bank| BankInfo {
                        image_guid: guid(bank, 0),
                        accepted: le32(bank, 16) != 0,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            version,
            active_index: le32(raw, 8),
            previous_active_index: le32(raw, 12),
            images,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![0u8; 4];
        for field in [self.version, self.active_index, self.previous_active_index] {
            raw.extend_from_slice(&field.to_le_bytes());
        }
        for image in &self.images {
            raw.extend_from_slice(&image.image_type.to_bytes_le());
            raw.extend_from_slice(&image.location.to_bytes_le());
            for bank in &image.banks {
                raw.extend_from_slice(&bank.image_guid.to_bytes_le());
                raw.extend_from_slice(&u32::from(bank.accepted).to_le_bytes());
                raw.extend_from_slice(&[0; 4]);
            }
        }
        let crc = crc32(&raw[4..]);
        raw[..4].copy_from_slice(&crc.to_le_bytes());
        raw
    }

    /// Read the metadata from its GPT partitions, preferring the first valid copy.
    pub fn read(dev: &mut dyn BlockDevice, config: &FwuConfig) -> Result<Self> {
        config.validate()?;
        let gpt = Gpt::read(dev)?;
        let copies: Vec<&GptEntry> = gpt
            .partitions()
            .filter(|(_, e)| e.type_guid == MDATA_PART_TYPE)
            .map(|(_, e)| e)
            .collect();
        if copies.len() != 2 {
            log::error!("Expected 2 FWU metadata partitions, found {}", copies.len());
            return Err(Error::NotFound);
        }

        let size = Self::size(config);
        let bs = dev.block_size() as u64;
        let mut last = Error::InvalidImage;
        for (copy, part) in copies.iter().enumerate() {
            if part.blocks() * bs < size as u64 {
                log::warn!("FWU metadata partition '{}' too small", part.name);
                last = Error::NoSpace;
                continue;
            }
            let mut raw = vec![0u8; size];
            let parsed = dev
                .read_bytes(part.first_lba * bs, &mut raw)
                .and_then(|()| Self::parse(&raw, config));
            match parsed {
                Ok(mdata) => return Ok(mdata),
                Err(e) => {
                    log::warn!("FWU metadata copy {copy} is corrupted: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Bank the next update goes to.
    pub fn update_index(&self, config: &FwuConfig) -> u32 {
        let banks = u32::try_from(config.num_banks).unwrap_or(u32::MAX);
        self.active_index.wrapping_add(1).checked_rem(banks).unwrap_or(0)
    }

    /// GUID of the image of type `image_type` held in `bank`.
    pub fn image_guid(&self, image_type: &Uuid, bank: u32) -> Result<Uuid> {
        let image = self
            .images
            .iter()
            .find(|i| i.image_type == *image_type)
            .ok_or(Error::NotFound)?;
        image
            .banks
            .get(bank as usize)
            .map(|b| b.image_guid)
            .ok_or(Error::Range)
    }
}
