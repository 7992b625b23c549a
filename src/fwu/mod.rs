//! Firmware-update bank selection.
//!
//! An update request names an image by GUID. The GUID is matched against the
//! unique partition GUIDs of the GPT on the update device, and the partition
//! found is mapped onto the DFU alt number that the transfer layer writes to.

pub mod dfu;
pub mod gpt;
pub mod mdata;

use uuid::Uuid;

use self::{
    dfu::{DfuDevice, DfuEntities},
    gpt::{Gpt, MAX_SEARCH_PARTITIONS},
    mdata::FwuMdata,
};
use crate::{Error, Result, blk::BlockDevice, env::Env};

/// Shape of the FWU metadata on this board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FwuConfig {
    pub num_banks: usize,
    pub images_per_bank: usize,
}

impl FwuConfig {
    /// Reject layouts no metadata can have.
    pub fn validate(&self) -> Result<()> {
        if self.num_banks == 0
            || self.images_per_bank == 0
            || u32::try_from(self.num_banks).is_err()
            || FwuMdata::checked_size(self).is_none()
        {
            log::error!(
                "Invalid FWU layout: {} banks, {} images per bank",
                self.num_banks,
                self.images_per_bank
            );
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for FwuConfig {
    fn default() -> Self {
        Self {
            num_banks: 2,
            images_per_bank: 1,
        }
    }
}

/// 1-based number of the GPT partition whose unique GUID is `image_guid`.
///
/// A device without a readable partition table has no such partition.
pub fn get_gpt_dfu_identifier(dev: &mut dyn BlockDevice, image_guid: &Uuid) -> Result<u32> {
    let gpt = Gpt::read(dev).map_err(|e| {
        log::warn!(
            "No usable GPT on {} {}: {e}",
            dev.class().name(),
            dev.dev_num()
        );
        Error::NotFound
    })?;
    (1..MAX_SEARCH_PARTITIONS)
        .find(|&part| {
            gpt.partition(part)
                .is_some_and(|entry| entry.unique_guid == *image_guid)
        })
        .ok_or(Error::NotFound)
}

/// DFU alt number of the raw entity backing the partition with `image_guid`.
pub fn get_alt_num(dev: &mut dyn BlockDevice, image_guid: &Uuid, env: &Env) -> Result<u32> {
    let part = get_gpt_dfu_identifier(dev, image_guid)?;

    let entities = DfuEntities::from_env(env)?;
    if entities.is_empty() {
        log::warn!("Probably dfu_alt_info not defined");
        return Err(Error::NotFound);
    }

    let device = DfuDevice::for_class(dev.class()).ok_or_else(|| {
        log::warn!("No DFU medium for {} devices", dev.class().name());
        Error::Unsupported
    })?;
    entities
        .find_raw_part(device, dev.dev_num(), part)
        .ok_or(Error::NotFound)
}

/// DFU alt number of image `image_type` in `bank`.
pub fn get_image_alt_num(
    dev: &mut dyn BlockDevice,
    mdata: &FwuMdata,
    image_type: &Uuid,
    bank: u32,
    env: &Env,
) -> Result<u32> {
    let image_guid = mdata.image_guid(image_type, bank)?;
    get_alt_num(dev, &image_guid, env)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::{mdata::tests::FIRMWARE_TYPE, *};
    use crate::{
        blk::DeviceClass,
        env::DFU_ALT_INFO,
        mock::{BLOCK_SIZE, GptPart, MockDisk, TinyBlocks},
    };

    const BASIC_DATA: Uuid = uuid::uuid!("ebd0a0a2-b9e5-4433-87c0-68b6b72699c7");

    fn disk(class: DeviceClass, dev_num: u32, guids: &[u128]) -> MockDisk {
        let parts: Vec<GptPart> = guids
            .iter()
            .enumerate()
            .map(|(i, &g)| GptPart {
                type_guid: BASIC_DATA,
                unique_guid: Uuid::from_u128(g),
                first_lba: 64 + 32 * i as u64,
                last_lba: 64 + 32 * i as u64 + 31,
                name: "bank",
            })
            .collect();
        MockDisk::with_gpt(class, dev_num, 512, &parts)
    }

    fn env(alt_info: &str) -> Env {
        let mut env = Env::new();
        env.set(DFU_ALT_INFO, alt_info);
        env
    }

    #[test]
    fn partition_lookup_by_unique_guid() {
        let guids = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5];
        let mut disk = disk(DeviceClass::Mmc, 0, &guids);
        for (k, &g) in guids.iter().enumerate() {
            assert_eq!(
                get_gpt_dfu_identifier(&mut disk, &Uuid::from_u128(g)),
                Ok(k as u32 + 1)
            );
        }
        assert_eq!(
            get_gpt_dfu_identifier(&mut disk, &Uuid::from_u128(0xff)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn second_of_three_partitions() {
        let mut disk = disk(DeviceClass::Mmc, 0, &[0xa, 0xb, 0xc]);
        assert_eq!(get_gpt_dfu_identifier(&mut disk, &Uuid::from_u128(0xb)), Ok(2));
    }

    #[test]
    fn config_validation() {
        assert_eq!(FwuConfig::default().validate(), Ok(()));
        for (num_banks, images_per_bank) in [(0, 1), (2, 0), (usize::MAX, 1)] {
            let config = FwuConfig {
                num_banks,
                images_per_bank,
            };
            assert_eq!(config.validate(), Err(Error::InvalidConfig));
        }
    }

    #[test]
    fn corrupt_primary_table() {
        let mut disk = disk(DeviceClass::Mmc, 0, &[0xa, 0xb, 0xc]);
        // Header checksum of the primary table.
        disk.bytes_mut()[BLOCK_SIZE + 16] ^= 0xff;
        assert_eq!(get_gpt_dfu_identifier(&mut disk, &Uuid::from_u128(0xc)), Ok(3));

        // Signature of the backup table in the last block.
        disk.bytes_mut()[511 * BLOCK_SIZE] = 0;
        assert_eq!(
            get_gpt_dfu_identifier(&mut disk, &Uuid::from_u128(0xc)),
            Err(Error::NotFound)
        );
        assert_eq!(
            get_gpt_dfu_identifier(&mut TinyBlocks::new(16), &Uuid::from_u128(0xc)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn alt_number_from_descriptor_table() {
        let mut disk = disk(DeviceClass::Mmc, 1, &[0xa, 0xb]);
        let env = env("mmc 0=boot0 part 0 2&mmc 1=bank0 part 1 1;bank1 part 1 2");
        assert_eq!(get_alt_num(&mut disk, &Uuid::from_u128(0xb), &env), Ok(2));
        assert_eq!(get_alt_num(&mut disk, &Uuid::from_u128(0xa), &env), Ok(1));
    }

    #[test]
    fn alt_number_failures() {
        let mut disk = disk(DeviceClass::Mmc, 0, &[0xa]);
        let guid = Uuid::from_u128(0xa);
        assert_eq!(get_alt_num(&mut disk, &guid, &Env::new()), Err(Error::NotFound));
        assert_eq!(
            get_alt_num(&mut disk, &guid, &env("mmc 0=a fat 0 1")),
            Err(Error::NotFound)
        );

        let mut usb = self::disk(DeviceClass::Usb, 0, &[0xa]);
        assert_eq!(
            get_alt_num(&mut usb, &guid, &env("mmc 0=a part 0 1")),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn image_alt_number_follows_bank() {
        let mdata = mdata::tests::sample();
        let mut disk = disk(DeviceClass::Mmc, 0, &[0xb0, 0xb1]);
        let env = env("mmc 0=bank0 part 0 1;bank1 part 0 2");
        let update = mdata.update_index(&FwuConfig::default());
        assert_eq!(
            get_image_alt_num(&mut disk, &mdata, &FIRMWARE_TYPE, update, &env),
            Ok(0)
        );
        assert_eq!(
            get_image_alt_num(&mut disk, &mdata, &FIRMWARE_TYPE, mdata.active_index, &env),
            Ok(1)
        );
    }
}
