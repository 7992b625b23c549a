//! Secondary program loader: fetch the next boot stage into RAM.
//!
//! A medium-specific loader (see [`spi`]) locates the payload and hands a reader to
//! [`spl_load`], which recognises FIT, legacy and raw images. Control is transferred
//! by the board once loading succeeded, through [`jump_to_image`].

pub mod fit;
pub mod legacy;
pub mod spi;

use alloc::{string::String, vec, vec::Vec};

use crate::{
    Error, Result,
    boot::Boot,
    fdt,
    memory::Memory,
    time::Timing,
};

/// Reads are split into chunks of this size so the watchdog can be fed in between.
pub const READ_CHUNK: usize = 0x1_0000;

/// Media the boot ROM or board can load the next stage from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootDevice {
    Ram,
    Mmc1,
    Mmc2,
    Nand,
    Nor,
    Spi,
    Usb,
    Uart,
}

impl BootDevice {
    pub const fn name(self) -> &'static str {
        match self {
            BootDevice::Ram => "RAM",
            BootDevice::Mmc1 => "MMC1",
            BootDevice::Mmc2 => "MMC2",
            BootDevice::Nand => "NAND",
            BootDevice::Nor => "NOR",
            BootDevice::Spi => "SPI",
            BootDevice::Usb => "USB",
            BootDevice::Uart => "UART",
        }
    }
}

/// Operating system (or firmware) an image contains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageOs {
    #[default]
    Invalid,
    Linux,
    UBoot,
    ArmTrustedFirmware,
    Tee,
    OpenSbi,
    Efi,
}

impl ImageOs {
    /// Decode the OS byte of a legacy image header.
    pub const fn from_legacy(os: u8) -> Self {
        match os {
            5 => ImageOs::Linux,
            17 => ImageOs::UBoot,
            25 => ImageOs::ArmTrustedFirmware,
            26 => ImageOs::Tee,
            27 => ImageOs::OpenSbi,
            28 => ImageOs::Efi,
            _ => ImageOs::Invalid,
        }
    }

    pub const fn to_legacy(self) -> u8 {
        match self {
            ImageOs::Invalid => 0,
            ImageOs::Linux => 5,
            ImageOs::UBoot => 17,
            ImageOs::ArmTrustedFirmware => 25,
            ImageOs::Tee => 26,
            ImageOs::OpenSbi => 27,
            ImageOs::Efi => 28,
        }
    }

    /// Decode the `os` property of a FIT image node.
    pub fn from_fit(name: &str) -> Self {
        match name {
            "linux" => ImageOs::Linux,
            "u-boot" => ImageOs::UBoot,
            "arm-trusted-firmware" => ImageOs::ArmTrustedFirmware,
            "tee" => ImageOs::Tee,
            "opensbi" => ImageOs::OpenSbi,
            "efi" => ImageOs::Efi,
            _ => ImageOs::Invalid,
        }
    }
}

/// One blob placed in RAM by the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    pub name: String,
    pub load: u64,
    pub size: u32,
    /// Offset of the data on the medium.
    pub offset: u32,
}

/// Description of the stage that was loaded and how to enter it.
#[derive(Clone, Debug, Default)]
pub struct SplImage {
    pub name: String,
    pub load_addr: u64,
    pub entry_point: u64,
    pub size: u32,
    pub os: ImageOs,
    /// Device tree placed next to the image, if the FIT provided one.
    pub fdt_addr: Option<u64>,
    pub boot_device: Option<BootDevice>,
    /// Everything placed in RAM, main image first.
    pub images: Vec<LoadedImage>,
}

/// Where a payload without any recognised header is assumed to go.
#[derive(Clone, Copy, Debug)]
pub struct RawImage {
    pub load_addr: u64,
    pub entry_point: u64,
    pub size: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDefaults {
    /// Accept payloads without a header; `None` rejects them.
    pub raw: Option<RawImage>,
    /// Check the data CRC of legacy images, not only the header CRC.
    pub verify_data_crc: bool,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            raw: None,
            verify_data_crc: true,
        }
    }
}

/// Byte-addressed access to a boot medium.
#[allow(async_fn_in_trait)]
pub trait ImageRead {
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()>;
}

/// A medium to load from, together with its read granularity.
pub struct SplLoadInfo<R: ImageRead> {
    pub reader: R,
    /// Reads are issued in whole units of this many bytes.
    pub bl_len: u32,
}

impl<R: ImageRead> SplLoadInfo<R> {
    pub fn new(reader: R, bl_len: u32) -> Self {
        Self { reader, bl_len }
    }

    /// Read at any byte offset, widening the request to whole blocks if needed.
    pub async fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        let bl_len = self.bl_len.max(1) as usize;
        let skip = offset as usize % bl_len;
        if skip == 0 && buf.len() % bl_len == 0 {
            return self.reader.read(offset, buf).await;
        }

        let total = (skip + buf.len()).div_ceil(bl_len) * bl_len;
        let mut tmp = vec![0u8; total];
        self.reader.read(offset - skip as u32, &mut tmp).await?;
        buf.copy_from_slice(&tmp[skip..skip + buf.len()]);
        Ok(())
    }
}

/// Board services available to a loader for the duration of one load.
pub struct SplContext<'a> {
    pub mem: &'a mut dyn Memory,
    pub timing: Timing<'a>,
    pub defaults: ImageDefaults,
}

/// Board hooks consulted while loading.
pub trait Board {
    /// Whether to load U-Boot proper; `false` asks for a direct OS boot.
    fn spl_start_uboot(&mut self) -> bool {
        true
    }
}

/// `base + delta` on the medium; offsets taken from an image header must not wrap.
pub(crate) fn medium_offset(base: u32, delta: usize) -> Result<u32> {
    u32::try_from(delta)
        .ok()
        .and_then(|delta| base.checked_add(delta))
        .ok_or_else(|| {
            log::error!("Image data beyond the end of the medium ({base:#x} + {delta:#x})");
            Error::InvalidImage
        })
}

/// Copy `len` bytes at medium `offset` to RAM at `addr`.
pub(crate) async fn read_to_memory<R: ImageRead>(
    info: &mut SplLoadInfo<R>,
    ctx: &mut SplContext<'_>,
    offset: u32,
    addr: u64,
    len: u32,
) -> Result<()> {
    offset.checked_add(len).ok_or(Error::InvalidImage)?;
    addr.checked_add(u64::from(len)).ok_or(Error::Range)?;

    let mut done = 0u32;
    while done < len {
        let chunk = (len - done).min(READ_CHUNK as u32);
        let dst = ctx.mem.slice_mut(addr + u64::from(done), chunk as usize)?;
        info.read_at(offset + done, dst).await?;
        ctx.timing.feed();
        done += chunk;
    }
    Ok(())
}

/// Load the image found at `offset`, whatever its format.
pub async fn spl_load<R: ImageRead>(
    spl_image: &mut SplImage,
    info: &mut SplLoadInfo<R>,
    ctx: &mut SplContext<'_>,
    offset: u32,
) -> Result<()> {
    let mut header = [0u8; legacy::HEADER_SIZE];
    info.read_at(offset, &mut header).await?;

    if let Some(size) = fdt::total_size(&header) {
        log::debug!("Found FIT at {offset:#x}, size {size:#x}");
        return fit::load(spl_image, info, ctx, offset, size).await;
    }

    if legacy::is_legacy(&header) {
        let hdr = legacy::LegacyHeader::parse(&header)?;
        log::debug!("Found legacy image '{}' at {offset:#x}", hdr.name);
        return legacy::load(spl_image, info, ctx, offset, &hdr).await;
    }

    let raw = ctx.defaults.raw.ok_or_else(|| {
        log::error!("No valid image header at {offset:#x}");
        Error::InvalidImage
    })?;
    log::debug!("Assuming raw image at {offset:#x}");
    read_to_memory(info, ctx, offset, raw.load_addr, raw.size).await?;
    spl_image.name = String::from("U-Boot");
    spl_image.os = ImageOs::UBoot;
    spl_image.load_addr = raw.load_addr;
    spl_image.entry_point = raw.entry_point;
    spl_image.size = raw.size;
    spl_image.images.push(LoadedImage {
        name: spl_image.name.clone(),
        load: raw.load_addr,
        size: raw.size,
        offset,
    });
    Ok(())
}

/// A set of medium loaders, keyed by boot device.
#[allow(async_fn_in_trait)]
pub trait SplLoaders {
    /// Load from `device`, or return `None` if no loader handles it.
    async fn load(
        &mut self,
        device: BootDevice,
        ctx: &mut SplContext<'_>,
        spl_image: &mut SplImage,
    ) -> Option<Result<()>>;
}

impl<A: SplLoaders, B: SplLoaders> SplLoaders for (A, B) {
    async fn load(
        &mut self,
        device: BootDevice,
        ctx: &mut SplContext<'_>,
        spl_image: &mut SplImage,
    ) -> Option<Result<()>> {
        match self.0.load(device, ctx, spl_image).await {
            Some(result) => Some(result),
            None => self.1.load(device, ctx, spl_image).await,
        }
    }
}

/// Try each boot device in `order`, returning the first one that loads.
pub async fn boot_from_devices(
    spl_image: &mut SplImage,
    order: &[BootDevice],
    loaders: &mut impl SplLoaders,
    ctx: &mut SplContext<'_>,
) -> Result<BootDevice> {
    let mut last = Error::NoDevice;
    for &device in order {
        *spl_image = SplImage::default();
        match loaders.load(device, ctx, spl_image).await {
            None => log::debug!("No loader for boot device {}", device.name()),
            Some(Ok(())) => {
                log::info!("Loaded '{}' from {}", spl_image.name, device.name());
                spl_image.boot_device = Some(device);
                return Ok(device);
            }
            Some(Err(e)) => {
                log::warn!("Failed to load from {}: {e}", device.name());
                last = e;
            }
        }
    }
    log::error!("Failed to boot from all boot devices");
    Err(last)
}

/// Transfer control to a loaded image.
///
/// # Safety
///
/// `spl_image` must describe an image that has been fully loaded and verified.
pub unsafe fn jump_to_image<B: Boot>(spl_image: &SplImage) -> ! {
    log::info!(
        "Jumping to '{}' at {:#x}",
        spl_image.name,
        spl_image.entry_point
    );
    unsafe { B::boot(spl_image.entry_point as usize as *const u32) }
}
