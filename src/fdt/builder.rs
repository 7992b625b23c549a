//! Sequential device tree writer.

use alloc::vec::Vec;

use super::{FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_MAGIC, FDT_PROP, HEADER_SIZE};
use crate::{Error, Result};

const VERSION: u32 = 17;
const LAST_COMP_VERSION: u32 = 16;
/// An empty memory reservation map is a single zero entry.
const RSVMAP_SIZE: usize = 16;

/// Builds a blob node by node; the root node is open from the start.
pub struct FdtBuilder {
    structs: Vec<u8>,
    strings: Vec<u8>,
    depth: usize,
}

impl FdtBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            structs: Vec::new(),
            strings: Vec::new(),
            depth: 0,
        };
        builder.begin_node("");
        builder
    }

    fn push32(&mut self, value: u32) {
        self.structs.extend_from_slice(&value.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.structs.len() % 4 != 0 {
            self.structs.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let mut offset = 0;
        for entry in self.strings.split(|&b| b == 0) {
            if entry == name.as_bytes() && offset < self.strings.len() {
                return offset as u32;
            }
            offset += entry.len() + 1;
        }
        let offset = self.strings.len();
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset as u32
    }

    pub fn begin_node(&mut self, name: &str) {
        self.push32(FDT_BEGIN_NODE);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
        self.depth += 1;
    }

    pub fn end_node(&mut self) {
        self.push32(FDT_END_NODE);
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn property(&mut self, name: &str, value: &[u8]) {
        let nameoff = self.string_offset(name);
        self.push32(FDT_PROP);
        self.push32(value.len() as u32);
        self.push32(nameoff);
        self.structs.extend_from_slice(value);
        self.pad();
    }

    pub fn property_u32(&mut self, name: &str, value: u32) {
        self.property(name, &value.to_be_bytes());
    }

    pub fn property_u64(&mut self, name: &str, value: u64) {
        self.property(name, &value.to_be_bytes());
    }

    pub fn property_str(&mut self, name: &str, value: &str) {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.property(name, &bytes);
    }

    pub fn property_str_list<'s>(&mut self, name: &str, values: impl IntoIterator<Item = &'s str>) {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        self.property(name, &bytes);
    }

    /// Write each value as `cells` big-endian 32-bit cells (1 or 2).
    pub fn property_cells(&mut self, name: &str, values: &[u64], cells: usize) {
        let mut bytes = Vec::with_capacity(values.len() * cells * 4);
        for &value in values {
            if cells >= 2 {
                bytes.extend_from_slice(&((value >> 32) as u32).to_be_bytes());
            }
            bytes.extend_from_slice(&(value as u32).to_be_bytes());
        }
        self.property(name, &bytes);
    }

    pub fn property_empty(&mut self, name: &str) {
        self.property(name, &[]);
    }

    /// Close the root node and lay out the final blob.
    ///
    /// Fails if a node other than the root is still open.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.depth != 1 {
            return Err(Error::InvalidConfig);
        }
        self.end_node();
        self.push32(FDT_END);

        let off_rsvmap = HEADER_SIZE;
        let off_struct = off_rsvmap + RSVMAP_SIZE;
        let off_strings = off_struct + self.structs.len();
        let total = off_strings + self.strings.len();

        let mut blob = Vec::with_capacity(total);
        for field in [
            FDT_MAGIC,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            off_rsvmap as u32,
            VERSION,
            LAST_COMP_VERSION,
            0,
            self.strings.len() as u32,
            self.structs.len() as u32,
        ] {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        blob.resize(off_struct, 0);
        blob.extend_from_slice(&self.structs);
        blob.extend_from_slice(&self.strings);
        Ok(blob)
    }
}

impl Default for FdtBuilder {
    fn default() -> Self {
        Self::new()
    }
}
