//! Boot methods: strategies for finding an operating system on a bootdev.

pub mod efi;
pub mod extlinux;
pub mod script;

use alloc::{string::String, vec, vec::Vec};

use crate::{
    Error, Result,
    bootdev::{BootMedia, Bootdev},
    bootflow::{Bootflow, BootflowState},
};

pub use efi::Efi;
pub use extlinux::Extlinux;
pub use script::Script;

/// Largest boot file that is read into memory during discovery.
pub const MAX_FILE_SIZE: u64 = 0x10_0000;

/// A strategy for discovering a bootable OS.
///
/// Bootmeths are stateless: everything learned about a bootdev ends up in the [`Bootflow`].
pub trait Bootmeth {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether this method can work with `dev` at all.
    fn check(&self, dev: &Bootdev) -> Result<()> {
        if dev.uclass().is_block() {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    /// Look for a boot file in the filesystem mounted from `bflow.part`, advancing
    /// `bflow.state` as far as it gets.
    fn read_bootflow(
        &self,
        media: &mut dyn BootMedia,
        prefixes: &[String],
        bflow: &mut Bootflow,
    ) -> Result<()>;
}

/// Index of a registered bootmeth.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BootmethId(pub(crate) usize);

/// The closed set of boot methods this bootloader knows.
pub enum BootmethKind {
    Extlinux(Extlinux),
    Efi(Efi),
    Script(Script),
}

impl Bootmeth for BootmethKind {
    fn name(&self) -> &str {
        match self {
            BootmethKind::Extlinux(m) => m.name(),
            BootmethKind::Efi(m) => m.name(),
            BootmethKind::Script(m) => m.name(),
        }
    }

    fn description(&self) -> &str {
        match self {
            BootmethKind::Extlinux(m) => m.description(),
            BootmethKind::Efi(m) => m.description(),
            BootmethKind::Script(m) => m.description(),
        }
    }

    fn check(&self, dev: &Bootdev) -> Result<()> {
        match self {
            BootmethKind::Extlinux(m) => m.check(dev),
            BootmethKind::Efi(m) => m.check(dev),
            BootmethKind::Script(m) => m.check(dev),
        }
    }

    fn read_bootflow(
        &self,
        media: &mut dyn BootMedia,
        prefixes: &[String],
        bflow: &mut Bootflow,
    ) -> Result<()> {
        match self {
            BootmethKind::Extlinux(m) => m.read_bootflow(media, prefixes, bflow),
            BootmethKind::Efi(m) => m.read_bootflow(media, prefixes, bflow),
            BootmethKind::Script(m) => m.read_bootflow(media, prefixes, bflow),
        }
    }
}

/// Bootmeths in registration order; the sequence number is the position.
#[derive(Default)]
pub struct Bootmeths {
    meths: Vec<BootmethKind>,
}

impl Bootmeths {
    pub const fn new() -> Self {
        Self { meths: Vec::new() }
    }

    /// The methods built into this bootloader, in their default order.
    pub fn standard() -> Self {
        Self {
            meths: vec![
                BootmethKind::Extlinux(Extlinux),
                BootmethKind::Efi(Efi::default()),
                BootmethKind::Script(Script),
            ],
        }
    }

    pub fn register(&mut self, meth: BootmethKind) -> Result<BootmethId> {
        if self.find_by_name(meth.name()).is_some() {
            return Err(Error::InvalidConfig);
        }
        self.meths.push(meth);
        Ok(BootmethId(self.meths.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.meths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meths.is_empty()
    }

    pub fn get(&self, id: BootmethId) -> &BootmethKind {
        &self.meths[id.0]
    }

    pub fn seq(&self, id: BootmethId) -> u32 {
        id.0 as u32
    }

    pub fn ids(&self) -> impl Iterator<Item = BootmethId> + use<> {
        (0..self.meths.len()).map(BootmethId)
    }

    pub fn find_by_name(&self, name: &str) -> Option<BootmethId> {
        self.meths.iter().position(|m| m.name() == name).map(BootmethId)
    }

    /// Resolve a list of labels separated by spaces or commas.
    ///
    /// Nothing is returned unless every label resolves.
    pub fn parse_order(&self, order: &str) -> Result<Vec<BootmethId>> {
        order
            .split([' ', ','])
            .filter(|label| !label.is_empty())
            .map(|label| {
                self.find_by_name(label).ok_or_else(|| {
                    log::warn!("Unknown bootmeth '{label}'");
                    Error::NotFound
                })
            })
            .collect()
    }
}

/// Record `path` in `bflow` if it exists, moving it to [`BootflowState::File`].
pub(crate) fn try_file(
    media: &mut dyn BootMedia,
    bflow: &mut Bootflow,
    prefix: Option<&str>,
    path: String,
) -> Result<()> {
    let size = media.file_size(bflow.part, &path)?;
    bflow.subdir = prefix.map(String::from);
    bflow.fname = Some(path);
    bflow.size = size;
    bflow.state = BootflowState::File;
    Ok(())
}

/// Read the file located by [`try_file`] into the bootflow, making it ready.
pub(crate) fn read_file(media: &mut dyn BootMedia, bflow: &mut Bootflow) -> Result<()> {
    let fname = bflow.fname.as_deref().ok_or(Error::NotFound)?;
    if bflow.size > MAX_FILE_SIZE {
        return Err(Error::Range);
    }
    let mut buf = vec![0u8; bflow.size as usize];
    let len = media.read_file(bflow.part, fname, &mut buf)?;
    buf.truncate(len);
    bflow.buf = buf;
    bflow.state = BootflowState::Ready;
    Ok(())
}

/// Try `names` under each prefix in turn, stopping at the first file that exists.
pub(crate) fn find_under_prefixes(
    media: &mut dyn BootMedia,
    prefixes: &[String],
    names: &[&str],
    bflow: &mut Bootflow,
) -> Result<()> {
    let mut last = Error::NotFound;
    for prefix in prefixes {
        for name in names {
            let path = alloc::format!("{prefix}{name}");
            match try_file(media, bflow, Some(prefix), path) {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
        }
    }
    Err(last)
}
