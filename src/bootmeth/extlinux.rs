//! Distro boot through an `extlinux.conf` file.

use alloc::string::String;

use super::{Bootmeth, find_under_prefixes, read_file};
use crate::{Result, bootdev::BootMedia, bootflow::Bootflow};

const CONF_NAME: &str = "extlinux/extlinux.conf";

pub struct Extlinux;

impl Bootmeth for Extlinux {
    fn name(&self) -> &str {
        "extlinux"
    }

    fn description(&self) -> &str {
        "Extlinux boot from a block device"
    }

    fn read_bootflow(
        &self,
        media: &mut dyn BootMedia,
        prefixes: &[String],
        bflow: &mut Bootflow,
    ) -> Result<()> {
        find_under_prefixes(media, prefixes, &[CONF_NAME], bflow)?;
        read_file(media, bflow)
    }
}
