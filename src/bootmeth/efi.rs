//! Boot an EFI application from the removable-media path.
//!
//! The application itself is only loaded at boot time, so locating it is enough
//! to make the bootflow ready.

use alloc::{format, string::String};

use super::{Bootmeth, try_file};
use crate::{Result, bootdev::BootMedia, bootflow::Bootflow, bootflow::BootflowState};

#[cfg(target_arch = "x86_64")]
const DEFAULT_FILENAME: &str = "BOOTX64.EFI";
#[cfg(target_arch = "x86")]
const DEFAULT_FILENAME: &str = "BOOTIA32.EFI";
#[cfg(target_arch = "arm")]
const DEFAULT_FILENAME: &str = "BOOTARM.EFI";
#[cfg(target_arch = "riscv64")]
const DEFAULT_FILENAME: &str = "BOOTRISCV64.EFI";
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "arm",
    target_arch = "riscv64"
)))]
const DEFAULT_FILENAME: &str = "BOOTAA64.EFI";

pub struct Efi {
    filename: &'static str,
}

impl Efi {
    /// Look for `/EFI/BOOT/<filename>` instead of the architecture default.
    pub const fn with_filename(filename: &'static str) -> Self {
        Self { filename }
    }

    pub fn path(&self) -> String {
        format!("/EFI/BOOT/{}", self.filename)
    }
}

impl Default for Efi {
    fn default() -> Self {
        Self::with_filename(DEFAULT_FILENAME)
    }
}

impl Bootmeth for Efi {
    fn name(&self) -> &str {
        "efi"
    }

    fn description(&self) -> &str {
        "EFI boot from an .efi file"
    }

    fn read_bootflow(
        &self,
        media: &mut dyn BootMedia,
        _prefixes: &[String],
        bflow: &mut Bootflow,
    ) -> Result<()> {
        let path = self.path();
        // Shown even when the file is missing.
        bflow.fname = Some(path.clone());
        try_file(media, bflow, None, path)?;
        bflow.state = BootflowState::Ready;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::{bootdev::BootdevId, bootmeth::BootmethId, mock::MockMedia};

    #[test]
    fn located_not_read() {
        let efi = Efi::with_filename("BOOTAA64.EFI");
        let mut media = MockMedia::new(1).file(1, "/EFI/BOOT/BOOTAA64.EFI", &[0u8; 4096]);
        let mut bflow = Bootflow::new(BootdevId(0), "mmc0.bootdev", BootmethId(1), 1);

        efi.read_bootflow(&mut media, &Vec::new(), &mut bflow).unwrap();
        assert_eq!(bflow.state, BootflowState::Ready);
        assert_eq!(bflow.size, 4096);
        assert!(bflow.buf.is_empty());
        assert_eq!(bflow.subdir, None);
    }
}
