//! Distro boot through a U-Boot script image.

use alloc::string::String;

use super::{Bootmeth, find_under_prefixes, read_file};
use crate::{Result, bootdev::BootMedia, bootflow::Bootflow};

const SCRIPT_NAMES: [&str; 2] = ["boot.scr.uimg", "boot.scr"];

pub struct Script;

impl Bootmeth for Script {
    fn name(&self) -> &str {
        "script"
    }

    fn description(&self) -> &str {
        "Script boot from a block device"
    }

    fn read_bootflow(
        &self,
        media: &mut dyn BootMedia,
        prefixes: &[String],
        bflow: &mut Bootflow,
    ) -> Result<()> {
        find_under_prefixes(media, prefixes, &SCRIPT_NAMES, bflow)?;
        read_file(media, bflow)
    }
}
