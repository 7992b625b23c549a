//! Flattened Image Tree payloads.
//!
//! Only the FIT structure is read up front. Image data stored outside the tree
//! (`data-offset`, `data-position`) is streamed straight into its load address.

use alloc::{string::String, vec};

use crate::{
    Error, Result,
    crc32::crc32,
    fdt::{self, Fdt, Node},
    spl::{
        ImageOs, ImageRead, LoadedImage, SplContext, SplImage, SplLoadInfo, medium_offset,
        read_to_memory,
    },
};

/// Largest FIT structure read into memory. Image data stored outside the
/// tree does not count towards it.
pub const MAX_FIT_SIZE: usize = 0x10_0000;

const fn align4(value: usize) -> usize {
    (value + 3) & !3
}

const fn align8(value: u64) -> Option<u64> {
    match value.checked_add(7) {
        Some(value) => Some(value & !7),
        None => None,
    }
}

/// First RAM address past `image`.
fn image_end(image: &LoadedImage) -> Result<u64> {
    image
        .load
        .checked_add(u64::from(image.size))
        .ok_or(Error::Range)
}

/// The configuration named by `/configurations/default`, or the first one.
fn select_config<'a>(fit: &Fdt<'a>) -> Result<Node<'a>> {
    let configs = fit.find_node("/configurations").ok_or_else(|| {
        log::error!("FIT has no configurations");
        Error::InvalidImage
    })?;
    match configs.str("default") {
        Some(name) => configs.subnode(name).ok_or_else(|| {
            log::error!("Default configuration '{name}' missing");
            Error::InvalidImage
        }),
        None => configs.children().next().ok_or(Error::InvalidImage),
    }
}

fn verify_hashes(node: &Node<'_>, data: &[u8]) -> Result<()> {
    for hash in node.children().filter(|n| n.name().starts_with("hash")) {
        match hash.str("algo") {
            Some("crc32") => {
                let expected = hash.u32("value").ok_or(Error::InvalidImage)?;
                if crc32(data) != expected {
                    log::warn!("Bad crc32 hash for image '{}'", node.name());
                    return Err(Error::InvalidImage);
                }
            }
            algo => log::debug!("Skipping unsupported hash {algo:?} in '{}'", node.name()),
        }
    }
    Ok(())
}

struct FitImage {
    loaded: LoadedImage,
    entry: u64,
    os: ImageOs,
}

/// Place one image of the FIT at its load address (or at `load_override`).
async fn load_fit_image<R: ImageRead>(
    node: &Node<'_>,
    info: &mut SplLoadInfo<R>,
    ctx: &mut SplContext<'_>,
    fit_offset: u32,
    data_base: u32,
    load_override: Option<u64>,
) -> Result<FitImage> {
    let load = load_override
        .or_else(|| node.u64("load"))
        .ok_or_else(|| {
            log::error!("Image '{}' has no load address", node.name());
            Error::InvalidImage
        })?;

    let (offset, size) = if let Some(data) = node.property("data") {
        ctx.mem.write(load, data.value)?;
        (0, data.value.len() as u32)
    } else {
        let size = node.u32("data-size").ok_or(Error::InvalidImage)?;
        let offset = match (node.u32("data-offset"), node.u32("data-position")) {
            (Some(off), _) => medium_offset(data_base, off as usize)?,
            (None, Some(pos)) => medium_offset(fit_offset, pos as usize)?,
            (None, None) => {
                log::error!("Image '{}' has no data", node.name());
                return Err(Error::InvalidImage);
            }
        };
        read_to_memory(info, ctx, offset, load, size).await?;
        (offset, size)
    };

    verify_hashes(node, ctx.mem.slice(load, size as usize)?)?;

    Ok(FitImage {
        loaded: LoadedImage {
            name: String::from(node.name()),
            load,
            size,
            offset,
        },
        entry: node.u64("entry").unwrap_or(load),
        os: node.str("os").map_or(ImageOs::UBoot, ImageOs::from_fit),
    })
}

/// Load the firmware, loadables and device tree named by the FIT at `offset`.
pub async fn load<R: ImageRead>(
    spl_image: &mut SplImage,
    info: &mut SplLoadInfo<R>,
    ctx: &mut SplContext<'_>,
    offset: u32,
    fit_size: usize,
) -> Result<()> {
    if !(fdt::HEADER_SIZE..=MAX_FIT_SIZE).contains(&fit_size) {
        log::error!("FIT size {fit_size:#x} out of bounds");
        return Err(Error::InvalidImage);
    }
    let data_base = medium_offset(offset, align4(fit_size))?;
    let mut blob = vec![0u8; fit_size];
    info.read_at(offset, &mut blob).await?;
    let fit = Fdt::new(&blob)?;

    let conf = select_config(&fit)?;
    let images = fit.find_node("/images").ok_or(Error::InvalidImage)?;
    let firmware = conf
        .str("firmware")
        .or_else(|| conf.property("loadables")?.as_str_list().next())
        .ok_or_else(|| {
            log::error!("Configuration '{}' names no firmware", conf.name());
            Error::InvalidImage
        })?;

    let node = images.subnode(firmware).ok_or(Error::NotFound)?;
    let main = load_fit_image(&node, info, ctx, offset, data_base, None).await?;
    spl_image.name = String::from(firmware);
    spl_image.os = main.os;
    spl_image.load_addr = main.loaded.load;
    spl_image.entry_point = main.entry;
    spl_image.size = main.loaded.size;
    let mut end = image_end(&main.loaded)?;
    spl_image.images.push(main.loaded);

    if let Some(loadables) = conf.property("loadables") {
        for name in loadables.as_str_list().filter(|&name| name != firmware) {
            let node = images.subnode(name).ok_or(Error::NotFound)?;
            let image = load_fit_image(&node, info, ctx, offset, data_base, None).await?;
            log::debug!("Loaded '{name}' at {:#x}", image.loaded.load);
            spl_image.images.push(image.loaded);
        }
    }

    if let Some(name) = conf.str("fdt") {
        let node = images.subnode(name).ok_or(Error::NotFound)?;
        // The device tree goes right after the firmware unless it names its own address.
        let dest = match node.u64("load") {
            Some(load) => load,
            None => align8(end).ok_or(Error::Range)?,
        };
        let image = load_fit_image(&node, info, ctx, offset, data_base, Some(dest)).await?;
        end = image_end(&image.loaded)?;
        spl_image.fdt_addr = Some(dest);
        spl_image.images.push(image.loaded);
    }

    log::debug!("FIT images end at {end:#x}");
    Ok(())
}
