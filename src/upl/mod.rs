//! Universal Payload handoff.
//!
//! The handoff is a device tree describing what the loader set up for the
//! payload:
//!
//! ```text
//! / {
//!     #address-cells, #size-cells;
//!     options {
//!         upl-params { smbios; acpi; bootmode; addr-width; };
//!         upl-image {
//!             fit; conf-offset;
//!             image@<load> { load; size; offset; entry; description; };
//!         };
//!     };
//!     memory@<base> { device_type = "memory"; reg; hotpluggable; };
//!     serial@<base> { compatible; clock-frequency; current-speed; reg; ... };
//! };
//! ```

use alloc::{format, string::String, vec::Vec};
use core::fmt;

use crate::{
    Error, Result,
    fdt::{Fdt, FdtBuilder, Node},
    spl::SplImage,
};

const PARAMS_PATH: &str = "/options/upl-params";
const IMAGE_PATH: &str = "/options/upl-image";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootMode {
    Full,
    Minimal,
    Fast,
    Diag,
    Default,
    S2,
    S3,
    S4,
    S5,
    Factory,
    Flash,
    Recovery,
}

impl BootMode {
    const ALL: [BootMode; 12] = [
        BootMode::Full,
        BootMode::Minimal,
        BootMode::Fast,
        BootMode::Diag,
        BootMode::Default,
        BootMode::S2,
        BootMode::S3,
        BootMode::S4,
        BootMode::S5,
        BootMode::Factory,
        BootMode::Flash,
        BootMode::Recovery,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BootMode::Full => "full",
            BootMode::Minimal => "minimal",
            BootMode::Fast => "fast",
            BootMode::Diag => "diag",
            BootMode::Default => "default",
            BootMode::S2 => "s2",
            BootMode::S3 => "s3",
            BootMode::S4 => "s4",
            BootMode::S5 => "s5",
            BootMode::Factory => "factory",
            BootMode::Flash => "flash",
            BootMode::Recovery => "recovery",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UplImage {
    pub load: u64,
    pub size: u64,
    /// Offset of the image within the FIT.
    pub offset: u32,
    pub entry: u64,
    pub description: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemRegion {
    pub base: u64,
    pub size: u64,
}

/// One `memory` node: a set of regions sharing attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UplMemory {
    pub regions: Vec<MemRegion>,
    pub hotpluggable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UplSerial {
    pub compatible: String,
    pub clock_frequency: u32,
    pub current_speed: u32,
    pub reg: MemRegion,
    pub reg_io_shift: u32,
    pub reg_io_width: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upl {
    pub addr_cells: u32,
    pub size_cells: u32,
    pub smbios: u64,
    pub acpi: u64,
    pub bootmode: Vec<BootMode>,
    pub addr_width: u32,
    /// Location of the FIT the payload came from.
    pub fit: MemRegion,
    pub conf_offset: u32,
    pub images: Vec<UplImage>,
    pub mem: Vec<UplMemory>,
    pub serial: Option<UplSerial>,
}

impl Default for Upl {
    fn default() -> Self {
        Self {
            addr_cells: 1,
            size_cells: 1,
            smbios: 0,
            acpi: 0,
            bootmode: Vec::new(),
            addr_width: 32,
            fit: MemRegion::default(),
            conf_offset: 0,
            images: Vec::new(),
            mem: Vec::new(),
            serial: None,
        }
    }
}

fn push_cells(bytes: &mut Vec<u8>, value: u64, cells: u32) {
    if cells >= 2 {
        bytes.extend_from_slice(&((value >> 32) as u32).to_be_bytes());
    }
    bytes.extend_from_slice(&(value as u32).to_be_bytes());
}

fn read_cells(value: &[u8], cells: u32) -> Option<u64> {
    if value.len() != cells as usize * 4 {
        return None;
    }
    Some(
        value
            .chunks_exact(4)
            .fold(0, |acc, c| acc << 32 | u64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
    )
}

impl Upl {
    /// Describe the images SPL placed in RAM.
    pub fn from_spl_image(image: &SplImage, fit: MemRegion) -> Self {
        let images = image
            .images
            .iter()
            .enumerate()
            .map(|(i, loaded)| UplImage {
                load: loaded.load,
                size: u64::from(loaded.size),
                offset: loaded.offset,
                entry: if i == 0 { image.entry_point } else { loaded.load },
                description: loaded.name.clone(),
            })
            .collect();
        Self {
            addr_cells: 2,
            size_cells: 1,
            addr_width: 64,
            bootmode: alloc::vec![BootMode::Default],
            fit,
            images,
            ..Self::default()
        }
    }

    fn addr(&self, bytes: &mut Vec<u8>, value: u64) {
        push_cells(bytes, value, self.addr_cells);
    }

    fn reg(&self, regions: &[MemRegion]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for region in regions {
            push_cells(&mut bytes, region.base, self.addr_cells);
            push_cells(&mut bytes, region.size, self.size_cells);
        }
        bytes
    }

    fn addr_property(&self, fdt: &mut FdtBuilder, name: &str, value: u64) {
        let mut bytes = Vec::new();
        self.addr(&mut bytes, value);
        fdt.property(name, &bytes);
    }

    fn size_property(&self, fdt: &mut FdtBuilder, name: &str, value: u64) {
        let mut bytes = Vec::new();
        push_cells(&mut bytes, value, self.size_cells);
        fdt.property(name, &bytes);
    }

    /// Encode the handoff as a device tree blob.
    pub fn write(&self) -> Result<Vec<u8>> {
        if !(1..=2).contains(&self.addr_cells) || !(1..=2).contains(&self.size_cells) {
            return Err(Error::InvalidConfig);
        }

        let mut fdt = FdtBuilder::new();
        fdt.property_u32("#address-cells", self.addr_cells);
        fdt.property_u32("#size-cells", self.size_cells);

        fdt.begin_node("options");
        fdt.begin_node("upl-params");
        self.addr_property(&mut fdt, "smbios", self.smbios);
        self.addr_property(&mut fdt, "acpi", self.acpi);
        fdt.property_str_list("bootmode", self.bootmode.iter().map(|m| m.name()));
        fdt.property_u32("addr-width", self.addr_width);
        fdt.end_node();

        fdt.begin_node("upl-image");
        fdt.property("fit", &self.reg(&[self.fit]));
        fdt.property_u32("conf-offset", self.conf_offset);
        for image in &self.images {
            fdt.begin_node(&format!("image@{:x}", image.load));
            self.addr_property(&mut fdt, "load", image.load);
            self.size_property(&mut fdt, "size", image.size);
            fdt.property_u32("offset", image.offset);
            self.addr_property(&mut fdt, "entry", image.entry);
            fdt.property_str("description", &image.description);
            fdt.end_node();
        }
        fdt.end_node();
        fdt.end_node();

        for mem in &self.mem {
            let base = mem.regions.first().map_or(0, |r| r.base);
            fdt.begin_node(&format!("memory@{base:x}"));
            fdt.property_str("device_type", "memory");
            fdt.property("reg", &self.reg(&mem.regions));
            if mem.hotpluggable {
                fdt.property_empty("hotpluggable");
            }
            fdt.end_node();
        }

        if let Some(serial) = &self.serial {
            fdt.begin_node(&format!("serial@{:x}", serial.reg.base));
            fdt.property_str("compatible", &serial.compatible);
            fdt.property_u32("clock-frequency", serial.clock_frequency);
            fdt.property_u32("current-speed", serial.current_speed);
            fdt.property("reg", &self.reg(&[serial.reg]));
            fdt.property_u32("reg-io-shift", serial.reg_io_shift);
            fdt.property_u32("reg-io-width", serial.reg_io_width);
            fdt.end_node();
        }

        fdt.finish()
    }

    fn read_addr(&self, node: &Node<'_>, name: &str) -> Result<u64> {
        node.property(name)
            .and_then(|p| read_cells(p.value, self.addr_cells))
            .ok_or_else(|| {
                log::debug!("UPL: bad '{name}' in {}", node.name());
                Error::InvalidImage
            })
    }

    fn read_reg(&self, node: &Node<'_>, name: &str) -> Result<Vec<MemRegion>> {
        let value = node.property(name).ok_or(Error::InvalidImage)?.value;
        let (ac, sc) = (self.addr_cells as usize * 4, self.size_cells as usize * 4);
        if value.len() % (ac + sc) != 0 {
            return Err(Error::InvalidImage);
        }
        value
            .chunks_exact(ac + sc)
            .map(|pair| {
                Ok(MemRegion {
                    base: read_cells(&pair[..ac], self.addr_cells).ok_or(Error::InvalidImage)?,
                    size: read_cells(&pair[ac..], self.size_cells).ok_or(Error::InvalidImage)?,
                })
            })
            .collect()
    }

    /// Decode a handoff written by [`Upl::write`] or another UPL producer.
    pub fn read(blob: &[u8]) -> Result<Self> {
        let fdt = Fdt::new(blob)?;
        let root = fdt.root();
        let mut upl = Upl {
            addr_cells: root.u32("#address-cells").unwrap_or(2),
            size_cells: root.u32("#size-cells").unwrap_or(1),
            ..Upl::default()
        };
        if !(1..=2).contains(&upl.addr_cells) || !(1..=2).contains(&upl.size_cells) {
            return Err(Error::InvalidImage);
        }

        let params = fdt.find_node(PARAMS_PATH).ok_or(Error::NotFound)?;
        upl.smbios = upl.read_addr(&params, "smbios")?;
        upl.acpi = upl.read_addr(&params, "acpi")?;
        if let Some(modes) = params.property("bootmode") {
            for name in modes.as_str_list() {
                match BootMode::from_name(name) {
                    Some(mode) => upl.bootmode.push(mode),
                    None => log::warn!("UPL: unknown boot mode '{name}'"),
                }
            }
        }
        upl.addr_width = params.u32("addr-width").ok_or(Error::InvalidImage)?;

        let image = fdt.find_node(IMAGE_PATH).ok_or(Error::NotFound)?;
        upl.fit = upl
            .read_reg(&image, "fit")?
            .first()
            .copied()
            .ok_or(Error::InvalidImage)?;
        upl.conf_offset = image.u32("conf-offset").ok_or(Error::InvalidImage)?;
        for node in image.children() {
            let size = node
                .property("size")
                .and_then(|p| read_cells(p.value, upl.size_cells))
                .ok_or(Error::InvalidImage)?;
            let entry = UplImage {
                load: upl.read_addr(&node, "load")?,
                size,
                offset: node.u32("offset").unwrap_or(0),
                entry: upl.read_addr(&node, "entry").unwrap_or(0),
                description: String::from(node.str("description").unwrap_or("")),
            };
            upl.images.push(entry);
        }

        for node in root.children() {
            match node.name().split_once('@').map_or(node.name(), |(base, _)| base) {
                "memory" => {
                    let regions = upl.read_reg(&node, "reg")?;
                    upl.mem.push(UplMemory {
                        regions,
                        hotpluggable: node.property("hotpluggable").is_some(),
                    });
                }
                "serial" => {
                    let reg = upl.read_reg(&node, "reg")?;
                    upl.serial = Some(UplSerial {
                        compatible: String::from(node.str("compatible").unwrap_or("")),
                        clock_frequency: node.u32("clock-frequency").unwrap_or(0),
                        current_speed: node.u32("current-speed").unwrap_or(0),
                        reg: reg.first().copied().ok_or(Error::InvalidImage)?,
                        reg_io_shift: node.u32("reg-io-shift").unwrap_or(0),
                        reg_io_width: node.u32("reg-io-width").unwrap_or(1),
                    });
                }
                _ => {}
            }
        }

        Ok(upl)
    }

    /// Human-readable dump, one field per line.
    pub fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{:<20}{}", "address cells", self.addr_cells)?;
        writeln!(out, "{:<20}{}", "size cells", self.size_cells)?;
        writeln!(out, "{:<20}{:x}", "smbios", self.smbios)?;
        writeln!(out, "{:<20}{:x}", "acpi", self.acpi)?;
        write!(out, "{:<20}", "bootmode")?;
        for mode in &self.bootmode {
            write!(out, " {}", mode.name())?;
        }
        writeln!(out)?;
        writeln!(out, "{:<20}{}", "addr-width", self.addr_width)?;
        writeln!(out, "{:<20}{:x} size {:x}", "fit", self.fit.base, self.fit.size)?;
        writeln!(out, "{:<20}{:x}", "conf-offset", self.conf_offset)?;
        for (i, image) in self.images.iter().enumerate() {
            writeln!(
                out,
                "image {i:<14}load {:x} size {:x} offset {:x} entry {:x}: {}",
                image.load, image.size, image.offset, image.entry, image.description
            )?;
        }
        for (i, mem) in self.mem.iter().enumerate() {
            writeln!(out, "memory {i:<13}{}", if mem.hotpluggable { "hotpluggable" } else { "" })?;
            for region in &mem.regions {
                writeln!(out, "    {:x} size {:x}", region.base, region.size)?;
            }
        }
        if let Some(serial) = &self.serial {
            writeln!(
                out,
                "{:<20}{} at {:x}, {} baud",
                "serial", serial.compatible, serial.reg.base, serial.current_speed
            )?;
        }
        Ok(())
    }
}
