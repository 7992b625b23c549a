//! Legacy `uImage` payloads: a 64-byte big-endian header followed by the data.

use alloc::string::String;

use crate::{
    Error, Result,
    crc32::crc32,
    spl::{
        ImageOs, ImageRead, LoadedImage, SplContext, SplImage, SplLoadInfo, medium_offset,
        read_to_memory,
    },
};

pub const MAGIC: u32 = 0x2705_1956;
pub const HEADER_SIZE: usize = 64;
pub const NAME_LEN: usize = 32;

const COMP_NONE: u8 = 0;
const HCRC_OFFSET: usize = 4;

pub fn is_legacy(header: &[u8]) -> bool {
    header.len() >= 4 && header[..4] == MAGIC.to_be_bytes()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyHeader {
    pub time: u32,
    pub size: u32,
    pub load: u32,
    pub ep: u32,
    pub dcrc: u32,
    pub os: u8,
    pub arch: u8,
    pub kind: u8,
    pub comp: u8,
    pub name: String,
}

fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn header_crc(raw: &[u8; HEADER_SIZE]) -> u32 {
    let mut copy = *raw;
    copy[HCRC_OFFSET..HCRC_OFFSET + 4].fill(0);
    crc32(&copy)
}

impl LegacyHeader {
    /// Parse and check a header, including its CRC.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(Error::InvalidImage)?;
        if !is_legacy(raw) {
            return Err(Error::InvalidImage);
        }
        if be32(raw, HCRC_OFFSET) != header_crc(raw) {
            log::warn!("Bad legacy header checksum");
            return Err(Error::InvalidImage);
        }

        let name = &raw[HEADER_SIZE - NAME_LEN..];
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        Ok(Self {
            time: be32(raw, 8),
            size: be32(raw, 12),
            load: be32(raw, 16),
            ep: be32(raw, 20),
            dcrc: be32(raw, 24),
            os: raw[28],
            arch: raw[29],
            kind: raw[30],
            comp: raw[31],
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
        })
    }

    /// Serialise with a freshly computed header CRC.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        raw[8..12].copy_from_slice(&self.time.to_be_bytes());
        raw[12..16].copy_from_slice(&self.size.to_be_bytes());
        raw[16..20].copy_from_slice(&self.load.to_be_bytes());
        raw[20..24].copy_from_slice(&self.ep.to_be_bytes());
        raw[24..28].copy_from_slice(&self.dcrc.to_be_bytes());
        raw[28] = self.os;
        raw[29] = self.arch;
        raw[30] = self.kind;
        raw[31] = self.comp;
        let name = self.name.as_bytes();
        let len = name.len().min(NAME_LEN);
        raw[HEADER_SIZE - NAME_LEN..HEADER_SIZE - NAME_LEN + len].copy_from_slice(&name[..len]);

        let hcrc = header_crc(&raw);
        raw[HCRC_OFFSET..HCRC_OFFSET + 4].copy_from_slice(&hcrc.to_be_bytes());
        raw
    }
}

/// Load the data following `hdr`, which was read at `offset`.
pub async fn load<R: ImageRead>(
    spl_image: &mut SplImage,
    info: &mut SplLoadInfo<R>,
    ctx: &mut SplContext<'_>,
    offset: u32,
    hdr: &LegacyHeader,
) -> Result<()> {
    if hdr.comp != COMP_NONE {
        log::error!("Compressed legacy images are not supported");
        return Err(Error::Unsupported);
    }

    let load = u64::from(hdr.load);
    let data_offset = medium_offset(offset, HEADER_SIZE)?;
    read_to_memory(info, ctx, data_offset, load, hdr.size).await?;

    if ctx.defaults.verify_data_crc {
        let data = ctx.mem.slice(load, hdr.size as usize)?;
        if crc32(data) != hdr.dcrc {
            log::warn!("Bad data checksum in '{}'", hdr.name);
            return Err(Error::InvalidImage);
        }
    }

    spl_image.name = hdr.name.clone();
    spl_image.os = ImageOs::from_legacy(hdr.os);
    spl_image.load_addr = load;
    spl_image.entry_point = u64::from(hdr.ep);
    spl_image.size = hdr.size;
    spl_image.images.push(LoadedImage {
        name: hdr.name.clone(),
        load,
        size: hdr.size,
        offset: data_offset,
    });
    Ok(())
}
