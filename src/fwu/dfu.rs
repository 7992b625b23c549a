//! The `dfu_alt_info` entity table.
//!
//! The table is written as groups separated by `&`, each naming an interface and
//! device followed by `;`-separated entities:
//!
//! ```text
//! mmc 0=u-boot part 0 1;env part 0 2&sf 0:0=spl raw 0 0x10000
//! ```
//!
//! Alt numbers are assigned in order across all groups.

use alloc::{string::String, vec::Vec};

use crate::{
    Error, Result,
    blk::DeviceClass,
    env::{DFU_ALT_INFO, Env},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuDevice {
    Mmc,
    Nand,
    Ram,
    Sf,
    Mtd,
    Virt,
}

impl DfuDevice {
    fn from_interface(iface: &str) -> Option<Self> {
        Some(match iface {
            "mmc" => DfuDevice::Mmc,
            "nand" => DfuDevice::Nand,
            "ram" => DfuDevice::Ram,
            "sf" => DfuDevice::Sf,
            "mtd" => DfuDevice::Mtd,
            "virt" => DfuDevice::Virt,
            _ => return None,
        })
    }

    /// DFU medium type serving block devices of `class`.
    pub fn for_class(class: DeviceClass) -> Option<Self> {
        match class {
            DeviceClass::Mmc => Some(DfuDevice::Mmc),
            _ => None,
        }
    }
}

/// Where an entity's data lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuLayout {
    /// Raw blocks; partition 0 for an explicit block range.
    RawAddr {
        dev: u32,
        part: u32,
        lba_start: u64,
        lba_size: u64,
    },
    Fat { dev: u32, part: u32 },
    Ext4 { dev: u32, part: u32 },
    /// Layouts of non-MMC media, which carry no device/partition pair.
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuEntity {
    pub alt: u32,
    pub name: String,
    pub device: DfuDevice,
    pub layout: DfuLayout,
}

fn parse_num(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| {
        log::warn!("Bad number '{s}' in {DFU_ALT_INFO}");
        Error::InvalidConfig
    })
}

fn parse_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|_| Error::InvalidConfig)
}

fn parse_u32(s: &str) -> Result<u32> {
    u32::try_from(parse_num(s)?).map_err(|_| Error::Range)
}

fn mmc_layout(devstr: &str, layout: &str, args: &[&str]) -> Result<DfuLayout> {
    let dev_part = || -> Result<(u32, u32)> {
        match args {
            [dev, part, ..] => Ok((parse_u32(dev)?, parse_u32(part)?)),
            _ => Err(Error::InvalidConfig),
        }
    };
    Ok(match layout {
        "raw" => {
            let [start, size, ..] = args else {
                return Err(Error::InvalidConfig);
            };
            let dev = devstr.split(':').next().unwrap_or(devstr);
            DfuLayout::RawAddr {
                dev: parse_u32(dev)?,
                part: 0,
                lba_start: parse_hex(start)?,
                lba_size: parse_hex(size)?,
            }
        }
        "part" => {
            let (dev, part) = dev_part()?;
            DfuLayout::RawAddr {
                dev,
                part,
                lba_start: 0,
                lba_size: 0,
            }
        }
        "fat" => {
            let (dev, part) = dev_part()?;
            DfuLayout::Fat { dev, part }
        }
        "ext4" => {
            let (dev, part) = dev_part()?;
            DfuLayout::Ext4 { dev, part }
        }
        _ => {
            log::warn!("Unknown mmc layout '{layout}'");
            return Err(Error::InvalidConfig);
        }
    })
}

/// Parsed entity table, released when dropped.
#[derive(Debug)]
pub struct DfuEntities {
    entities: Vec<DfuEntity>,
}

impl DfuEntities {
    pub fn parse(alt_info: &str) -> Result<Self> {
        let mut entities = Vec::new();
        for group in alt_info.split('&').map(str::trim).filter(|g| !g.is_empty()) {
            let (iface, rest) = group.split_once(' ').ok_or(Error::InvalidConfig)?;
            let (devstr, list) = rest.trim().split_once('=').ok_or(Error::InvalidConfig)?;
            let device = DfuDevice::from_interface(iface).ok_or_else(|| {
                log::warn!("Unknown DFU interface '{iface}'");
                Error::InvalidConfig
            })?;

            for entity in list.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                let words: Vec<&str> = entity.split_whitespace().collect();
                let [name, layout, args @ ..] = words.as_slice() else {
                    return Err(Error::InvalidConfig);
                };
                let layout = match device {
                    DfuDevice::Mmc => mmc_layout(devstr.trim(), layout, args)?,
                    _ => DfuLayout::Other,
                };
                entities.push(DfuEntity {
                    alt: entities.len() as u32,
                    name: String::from(*name),
                    device,
                    layout,
                });
            }
        }
        log::debug!("Parsed {} DFU entities", entities.len());
        Ok(Self { entities })
    }

    /// Parse `dfu_alt_info`; a missing variable gives an empty table.
    pub fn from_env(env: &Env) -> Result<Self> {
        Self::parse(env.get(DFU_ALT_INFO).unwrap_or(""))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DfuEntity> {
        self.entities.iter()
    }

    /// Alt number of the raw entity covering partition `part` of `device` number `dev`.
    pub fn find_raw_part(&self, device: DfuDevice, dev: u32, part: u32) -> Option<u32> {
        self.iter()
            .find(|e| {
                e.device == device
                    && matches!(e.layout, DfuLayout::RawAddr { dev: d, part: p, .. } if d == dev && p == part)
            })
            .map(|e| e.alt)
    }
}

impl Drop for DfuEntities {
    fn drop(&mut self) {
        log::debug!("Releasing {} DFU entities", self.entities.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_and_alt_numbers() {
        let table = DfuEntities::parse(
            "mmc 0=u-boot part 0 1;env fat 0 2 &sf 0:0=spl raw 0 0x10000& mmc 1=boot raw 0x22 0x800",
        )
        .unwrap();
        let names: Vec<(u32, &str, DfuDevice)> =
            table.iter().map(|e| (e.alt, e.name.as_str(), e.device)).collect();
        assert_eq!(
            names,
            [
                (0, "u-boot", DfuDevice::Mmc),
                (1, "env", DfuDevice::Mmc),
                (2, "spl", DfuDevice::Sf),
                (3, "boot", DfuDevice::Mmc),
            ]
        );
        assert_eq!(
            table.iter().nth(3).unwrap().layout,
            DfuLayout::RawAddr {
                dev: 1,
                part: 0,
                lba_start: 0x22,
                lba_size: 0x800
            }
        );
        assert_eq!(table.iter().nth(1).unwrap().layout, DfuLayout::Fat { dev: 0, part: 2 });
    }

    #[test]
    fn raw_partition_lookup() {
        let table = DfuEntities::parse("mmc 0=a part 0 1;b part 0 2;c fat 0 3").unwrap();
        assert_eq!(table.find_raw_part(DfuDevice::Mmc, 0, 2), Some(1));
        assert_eq!(table.find_raw_part(DfuDevice::Mmc, 0, 3), None);
        assert_eq!(table.find_raw_part(DfuDevice::Mmc, 1, 1), None);
        assert_eq!(table.find_raw_part(DfuDevice::Nand, 0, 1), None);
    }

    #[test]
    fn empty_and_malformed() {
        assert!(DfuEntities::parse("").unwrap().is_empty());
        assert!(DfuEntities::from_env(&Env::new()).unwrap().is_empty());
        assert!(matches!(DfuEntities::parse("usb 0=x raw 0 1"), Err(Error::InvalidConfig)));
        assert!(matches!(DfuEntities::parse("mmc 0=x part 0"), Err(Error::InvalidConfig)));
        assert!(matches!(DfuEntities::parse("mmc 0=x zip 0 1"), Err(Error::InvalidConfig)));
    }
}
