//! Loading the next stage from SPI NOR flash.

use embedded_storage_async::nor_flash::{NorFlashError, ReadNorFlash};

use crate::{
    Error, Result,
    fdt::Fdt,
    spl::{
        Board, BootDevice, ImageRead, SplContext, SplImage, SplLoadInfo, SplLoaders, legacy,
        read_to_memory, spl_load,
    },
    time::Timing,
};

/// Device tree property, under `/config`, that relocates the payload.
pub const PAYLOAD_OFFSET_PROP: &str = "u-boot,spl-payload-offset";

/// How long the flash may stay busy after a soft reset.
pub const SOFT_RESET_TIMEOUT_MS: u64 = 100;

#[derive(Clone, Debug)]
pub struct SpiConfig {
    pub bus: u32,
    pub cs: u32,
    pub max_hz: u32,
    pub mode: u8,
    /// Where the payload lives unless the device tree says otherwise.
    pub payload_offset: u32,
    /// Reset the flash to its power-on mode once loading is done.
    pub soft_reset: bool,
    /// Direct OS boot, skipping U-Boot proper.
    pub falcon: Option<FalconConfig>,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            cs: 0,
            max_hz: 1_000_000,
            mode: 0,
            payload_offset: 0x4_0000,
            soft_reset: false,
            falcon: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FalconConfig {
    /// Offset of the legacy kernel image.
    pub kernel_offset: u32,
    /// Offset and size of the argument blob (usually a device tree).
    pub args_offset: u32,
    pub args_size: u32,
    /// RAM address the argument blob is copied to.
    pub args_addr: u64,
}

/// A NOR flash chip on an SPI bus.
pub trait SpiFlash: ReadNorFlash {
    /// Return the chip to its power-on mode (e.g. leave 4-byte or octal mode).
    fn soft_reset(&mut self) -> Result<()>;

    fn is_busy(&mut self) -> Result<bool>;
}

/// Access to the flash at a bus/chip-select pair.
pub trait SpiFlashProbe {
    type Flash: SpiFlash;

    fn probe(&mut self, bus: u32, cs: u32, max_hz: u32, mode: u8) -> Result<&mut Self::Flash>;
}

pub struct FlashReader<'a, F>(pub &'a mut F);

impl<F: ReadNorFlash> ImageRead for FlashReader<'_, F> {
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.0.read(offset, buf).await.map_err(|e| {
            log::warn!("SPI flash read at {offset:#x} failed: {:?}", e.kind());
            Error::Io
        })
    }
}

/// Payload offset after applying the device tree override.
pub fn payload_offset(config: &SpiConfig, fdt: Option<&Fdt<'_>>) -> u32 {
    fdt.and_then(|fdt| fdt.find_node("/config"))
        .and_then(|node| node.u32(PAYLOAD_OFFSET_PROP))
        .unwrap_or(config.payload_offset)
}

/// Reset the flash and wait until it reports idle.
pub fn soft_reset<F: SpiFlash>(flash: &mut F, timing: &mut Timing<'_>) -> Result<()> {
    flash.soft_reset()?;
    timing
        .poll_timeout(SOFT_RESET_TIMEOUT_MS, || flash.is_busy().map(|busy| !busy))
        .inspect_err(|e| log::warn!("SPI flash not ready after reset: {e}"))
}

/// Load a legacy kernel and its argument blob for a direct OS boot.
async fn load_os<F: SpiFlash>(
    flash: &mut F,
    falcon: &FalconConfig,
    ctx: &mut SplContext<'_>,
    spl_image: &mut SplImage,
) -> Result<()> {
    let mut info = SplLoadInfo::new(FlashReader(flash), 1);
    let mut header = [0u8; legacy::HEADER_SIZE];
    info.read_at(falcon.kernel_offset, &mut header).await?;
    let hdr = legacy::LegacyHeader::parse(&header)?;
    legacy::load(spl_image, &mut info, ctx, falcon.kernel_offset, &hdr).await?;
    read_to_memory(
        &mut info,
        ctx,
        falcon.args_offset,
        falcon.args_addr,
        falcon.args_size,
    )
    .await
}

pub struct SpiLoader<'a, P, B> {
    pub config: SpiConfig,
    pub probe: P,
    pub board: B,
    /// Control device tree, consulted for the payload offset.
    pub fdt: Option<Fdt<'a>>,
}

impl<'a, P: SpiFlashProbe, B: Board> SpiLoader<'a, P, B> {
    pub fn new(config: SpiConfig, probe: P, board: B) -> Self {
        Self {
            config,
            probe,
            board,
            fdt: None,
        }
    }

    pub fn with_fdt(mut self, fdt: Fdt<'a>) -> Self {
        self.fdt = Some(fdt);
        self
    }

    pub fn payload_offset(&self) -> u32 {
        payload_offset(&self.config, self.fdt.as_ref())
    }

    pub async fn load_image(
        &mut self,
        ctx: &mut SplContext<'_>,
        spl_image: &mut SplImage,
        boot_device: BootDevice,
    ) -> Result<()> {
        let config = &self.config;
        let flash = self
            .probe
            .probe(config.bus, config.cs, config.max_hz, config.mode)
            .map_err(|e| {
                log::error!("SPI probe failed.");
                log::debug!("probe of bus {} cs {}: {e}", config.bus, config.cs);
                Error::NoDevice
            })?;

        let offset = payload_offset(config, self.fdt.as_ref());

        if let Some(falcon) = &config.falcon {
            if !self.board.spl_start_uboot() {
                match load_os(&mut *flash, falcon, ctx, spl_image).await {
                    Ok(()) => {
                        spl_image.boot_device = Some(boot_device);
                        return Ok(());
                    }
                    Err(e) => {
                        log::debug!("Direct OS boot failed ({e}), loading U-Boot");
                        *spl_image = SplImage::default();
                    }
                }
            }
        }

        let mut info = SplLoadInfo::new(FlashReader(&mut *flash), 1);
        let result = spl_load(spl_image, &mut info, ctx, offset).await;

        let result = if config.soft_reset {
            let cleanup = soft_reset(flash, &mut ctx.timing);
            result.and(cleanup)
        } else {
            result
        };
        if result.is_ok() {
            spl_image.boot_device = Some(boot_device);
        }
        result
    }
}

impl<P: SpiFlashProbe, B: Board> SplLoaders for SpiLoader<'_, P, B> {
    async fn load(
        &mut self,
        device: BootDevice,
        ctx: &mut SplContext<'_>,
        spl_image: &mut SplImage,
    ) -> Option<Result<()>> {
        if device != BootDevice::Spi {
            return None;
        }
        Some(self.load_image(ctx, spl_image, device).await)
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::String, vec, vec::Vec};

    use super::*;
    use crate::{
        crc32::crc32,
        fdt::FdtBuilder,
        memory::RamWindow,
        mock::{CountingWatchdog, FakeClock, MockSpiFlash, MockSpiProbe},
        spl::{ImageDefaults, ImageOs, legacy::LegacyHeader},
    };

    const RAM_BASE: u64 = 0x8000_0000;
    const FLASH_SIZE: usize = 0x5_0000;

    struct TestBoard {
        start_uboot: bool,
    }

    impl Board for TestBoard {
        fn spl_start_uboot(&mut self) -> bool {
            self.start_uboot
        }
    }

    fn legacy_image(name: &str, os: ImageOs, load: u32, payload: &[u8]) -> Vec<u8> {
        let hdr = LegacyHeader {
            time: 0,
            size: payload.len() as u32,
            load,
            ep: load,
            dcrc: crc32(payload),
            os: os.to_legacy(),
            arch: 2,
            kind: 2,
            comp: 0,
            name: String::from(name),
        };
        let mut image = hdr.encode().to_vec();
        image.extend_from_slice(payload);
        image
    }

    fn flash_with(images: &[(u32, Vec<u8>)]) -> MockSpiFlash {
        let mut data = vec![0xffu8; FLASH_SIZE];
        for (offset, image) in images {
            let offset = *offset as usize;
            data[offset..offset + image.len()].copy_from_slice(image);
        }
        MockSpiFlash::new(data)
    }

    fn loader(flash: MockSpiFlash, config: SpiConfig, start_uboot: bool) -> SpiLoader<'static, MockSpiProbe, TestBoard> {
        SpiLoader::new(config, MockSpiProbe::new(flash), TestBoard { start_uboot })
    }

    fn run<P: SpiFlashProbe, B: Board>(
        loader: &mut SpiLoader<'_, P, B>,
        ram: &mut [u8],
        watchdog: &mut CountingWatchdog,
    ) -> (Result<()>, SplImage) {
        let clock = FakeClock::new();
        let mut delay = clock.delay();
        let mut ctx = SplContext {
            mem: &mut RamWindow::new(RAM_BASE, ram),
            timing: Timing {
                ticks: &clock,
                delay: &mut delay,
                watchdog,
            },
            defaults: ImageDefaults::default(),
        };
        let mut image = SplImage::default();
        let result =
            embassy_futures::block_on(loader.load_image(&mut ctx, &mut image, BootDevice::Spi));
        (result, image)
    }

    fn two_payloads() -> MockSpiFlash {
        flash_with(&[
            (0x2_0000, legacy_image("relocated", ImageOs::UBoot, 0x8000_0000, b"relocated")),
            (0x4_0000, legacy_image("default", ImageOs::UBoot, 0x8000_0000, b"default")),
        ])
    }

    #[test]
    fn default_payload_offset() {
        let mut loader = loader(two_payloads(), SpiConfig::default(), true);
        let mut ram = vec![0u8; 0x1000];
        let (result, image) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Ok(()));
        assert_eq!(image.name, "default");
        assert_eq!(image.boot_device, Some(BootDevice::Spi));
        assert_eq!(&ram[..7], b"default");
    }

    #[test]
    fn device_tree_overrides_payload_offset() {
        let mut dt = FdtBuilder::new();
        dt.begin_node("config");
        dt.property_u32(PAYLOAD_OFFSET_PROP, 0x2_0000);
        dt.end_node();
        let dt = dt.finish().unwrap();

        let mut loader =
            loader(two_payloads(), SpiConfig::default(), true).with_fdt(Fdt::new(&dt).unwrap());
        assert_eq!(loader.payload_offset(), 0x2_0000);

        let mut ram = vec![0u8; 0x1000];
        let (result, image) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());
        assert_eq!(result, Ok(()));
        assert_eq!(image.name, "relocated");

        let flash = loader.probe.flash.as_ref().unwrap();
        assert_eq!(flash.reads.first().map(|r| r.0), Some(0x2_0000));
        assert!(flash.reads.iter().all(|&(off, _)| off < 0x4_0000));
    }

    #[test]
    fn probe_failure_is_fatal() {
        let mut loader = SpiLoader::new(
            SpiConfig::default(),
            MockSpiProbe::absent(),
            TestBoard { start_uboot: true },
        );
        let mut ram = vec![0u8; 0x1000];
        let (result, _) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());
        assert_eq!(result, Err(Error::NoDevice));
    }

    #[test]
    fn failing_soft_reset_overrides_success() {
        let mut flash = two_payloads();
        flash.reset_fails = true;
        let config = SpiConfig {
            soft_reset: true,
            ..SpiConfig::default()
        };
        let mut loader = loader(flash, config, true);
        let mut ram = vec![0u8; 0x1000];
        let (result, _) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Err(Error::Io));
        // The payload itself was read.
        assert_eq!(&ram[..7], b"default");
    }

    #[test]
    fn soft_reset_waits_for_idle() {
        let mut flash = two_payloads();
        flash.busy_polls = 3;
        let config = SpiConfig {
            soft_reset: true,
            ..SpiConfig::default()
        };
        let mut loader = loader(flash, config, true);
        let mut ram = vec![0u8; 0x1000];
        let (result, _) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Ok(()));
        let flash = loader.probe.flash.as_ref().unwrap();
        assert_eq!(flash.resets, 1);
        assert_eq!(flash.busy_polls, 0);
    }

    #[test]
    fn flash_stuck_busy_times_out() {
        let mut flash = two_payloads();
        flash.busy_polls = u32::MAX;
        let config = SpiConfig {
            soft_reset: true,
            ..SpiConfig::default()
        };
        let mut loader = loader(flash, config, true);
        let mut ram = vec![0u8; 0x1000];
        let mut watchdog = CountingWatchdog::default();
        let (result, _) = run(&mut loader, &mut ram, &mut watchdog);

        assert_eq!(result, Err(Error::Timeout));
        assert!(watchdog.fed > 1);
    }

    #[test]
    fn read_error_wins_over_cleanup_error() {
        let mut flash = flash_with(&[]);
        flash.reset_fails = true;
        let config = SpiConfig {
            soft_reset: true,
            ..SpiConfig::default()
        };
        let mut loader = loader(flash, config, true);
        let mut ram = vec![0u8; 0x1000];
        let (result, _) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Err(Error::InvalidImage));
        assert_eq!(loader.probe.flash.as_ref().unwrap().resets, 1);
    }

    fn falcon_config() -> SpiConfig {
        SpiConfig {
            falcon: Some(FalconConfig {
                kernel_offset: 0x1_0000,
                args_offset: 0x3_0000,
                args_size: 16,
                args_addr: 0x8000_0800,
            }),
            ..SpiConfig::default()
        }
    }

    #[test]
    fn direct_os_boot() {
        let mut flash = flash_with(&[
            (0x1_0000, legacy_image("Linux", ImageOs::Linux, 0x8000_0000, b"kernel")),
            (0x3_0000, [0xd0; 16].to_vec()),
            (0x4_0000, legacy_image("default", ImageOs::UBoot, 0x8000_0000, b"default")),
        ]);
        flash.reset_fails = true;
        let config = SpiConfig {
            soft_reset: true,
            ..falcon_config()
        };
        let mut loader = loader(flash, config, false);
        let mut ram = vec![0u8; 0x1000];
        let (result, image) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Ok(()));
        assert_eq!(image.os, ImageOs::Linux);
        assert_eq!(&ram[..6], b"kernel");
        assert_eq!(&ram[0x800..0x810], &[0xd0; 16]);
        let flash = loader.probe.flash.as_ref().unwrap();
        assert!(flash.reads.iter().all(|&(off, _)| off < 0x4_0000));
    }

    #[test]
    fn direct_os_boot_falls_back_to_uboot() {
        let flash = flash_with(&[(
            0x4_0000,
            legacy_image("default", ImageOs::UBoot, 0x8000_0000, b"default"),
        )]);
        let mut loader = loader(flash, falcon_config(), false);
        let mut ram = vec![0u8; 0x1000];
        let (result, image) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());

        assert_eq!(result, Ok(()));
        assert_eq!(image.name, "default");
        assert_eq!(image.os, ImageOs::UBoot);
    }

    #[test]
    fn board_can_ask_for_uboot() {
        let flash = flash_with(&[
            (0x1_0000, legacy_image("Linux", ImageOs::Linux, 0x8000_0000, b"kernel")),
            (0x4_0000, legacy_image("default", ImageOs::UBoot, 0x8000_0000, b"default")),
        ]);
        let mut loader = loader(flash, falcon_config(), true);
        let mut ram = vec![0u8; 0x1000];
        let (_, image) = run(&mut loader, &mut ram, &mut CountingWatchdog::default());
        assert_eq!(image.name, "default");
    }
}
