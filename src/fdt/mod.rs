//! Flattened device tree access.
//!
//! The reader works directly on a borrowed blob and never allocates; it is used for
//! configuration overrides, FIT images and UPL handoffs. [`builder`] produces blobs.

pub mod builder;

use core::str;

use crate::{Error, Result};

pub use builder::FdtBuilder;

pub const FDT_MAGIC: u32 = 0xd00d_feed;
pub const HEADER_SIZE: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

fn be32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

const fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

/// Total size of the blob described by a header, or `None` if `header` does not start with an FDT.
pub fn total_size(header: &[u8]) -> Option<usize> {
    if be32(header, 0)? != FDT_MAGIC {
        return None;
    }
    be32(header, 4).map(|size| size as usize)
}

/// Read-only view of a device tree blob.
#[derive(Clone, Copy, Debug)]
pub struct Fdt<'a> {
    structs: &'a [u8],
    strings: &'a [u8],
}

impl<'a> Fdt<'a> {
    pub fn new(blob: &'a [u8]) -> Result<Self> {
        let size = total_size(blob).ok_or(Error::InvalidImage)?;
        let blob = blob.get(..size).ok_or(Error::InvalidImage)?;

        let field = |offset| be32(blob, offset).map(|v| v as usize).ok_or(Error::InvalidImage);
        let off_struct = field(8)?;
        let off_strings = field(12)?;
        let size_strings = field(32)?;
        let size_struct = field(36)?;

        let structs = blob
            .get(off_struct..off_struct.saturating_add(size_struct))
            .ok_or(Error::InvalidImage)?;
        let strings = blob
            .get(off_strings..off_strings.saturating_add(size_strings))
            .ok_or(Error::InvalidImage)?;

        let fdt = Fdt { structs, strings };
        match fdt.token(0) {
            Some((Token::BeginNode(_), _)) => Ok(fdt),
            _ => Err(Error::InvalidImage),
        }
    }

    pub fn root(&self) -> Node<'a> {
        // Validated in `new` to start with the root node.
        let body = match self.token(0) {
            Some((Token::BeginNode(_), next)) => next,
            _ => self.structs.len(),
        };
        Node {
            fdt: *self,
            name: "",
            body,
        }
    }

    /// Look up a node by absolute path, e.g. `/options/upl-image`.
    ///
    /// A path component without a unit address matches a node name with one, so
    /// `/memory` finds `memory@80000000`.
    pub fn find_node(&self, path: &str) -> Option<Node<'a>> {
        path.split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root(), |node, component| node.subnode(component))
    }

    fn string(&self, offset: usize) -> Option<&'a str> {
        let tail = self.strings.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        str::from_utf8(&tail[..end]).ok()
    }

    fn token(&self, offset: usize) -> Option<(Token<'a>, usize)> {
        let tag = be32(self.structs, offset)?;
        let offset = offset + 4;
        match tag {
            FDT_BEGIN_NODE => {
                let tail = self.structs.get(offset..)?;
                let end = tail.iter().position(|&b| b == 0)?;
                let name = str::from_utf8(&tail[..end]).ok()?;
                Some((Token::BeginNode(name), align4(offset + end + 1)))
            }
            FDT_END_NODE => Some((Token::EndNode, offset)),
            FDT_PROP => {
                let len = be32(self.structs, offset)? as usize;
                let name = self.string(be32(self.structs, offset + 4)? as usize)?;
                let start = offset + 8;
                let value = self.structs.get(start..start.checked_add(len)?)?;
                Some((Token::Prop(Property { name, value }), align4(start + len)))
            }
            FDT_NOP => Some((Token::Nop, offset)),
            FDT_END => Some((Token::End, offset)),
            _ => None,
        }
    }

    /// Offset just past the END_NODE matching a node body starting at `offset`.
    fn skip_node(&self, mut offset: usize) -> Option<usize> {
        let mut depth = 1usize;
        loop {
            let (token, next) = self.token(offset)?;
            match token {
                Token::BeginNode(_) => depth += 1,
                Token::EndNode => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(next);
                    }
                }
                Token::End => return None,
                Token::Prop(_) | Token::Nop => {}
            }
            offset = next;
        }
    }
}

enum Token<'a> {
    BeginNode(&'a str),
    EndNode,
    Prop(Property<'a>),
    Nop,
    End,
}

#[derive(Clone, Copy, Debug)]
pub struct Node<'a> {
    fdt: Fdt<'a>,
    name: &'a str,
    body: usize,
}

impl<'a> Node<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Unit address part of the name, parsed as hex.
    pub fn unit_address(&self) -> Option<u64> {
        let (_, addr) = self.name.split_once('@')?;
        u64::from_str_radix(addr, 16).ok()
    }

    pub fn properties(&self) -> Properties<'a> {
        Properties {
            fdt: self.fdt,
            offset: Some(self.body),
        }
    }

    pub fn property(&self, name: &str) -> Option<Property<'a>> {
        self.properties().find(|prop| prop.name == name)
    }

    pub fn children(&self) -> Children<'a> {
        Children {
            fdt: self.fdt,
            offset: Some(self.body),
        }
    }

    pub fn subnode(&self, name: &str) -> Option<Node<'a>> {
        self.children().find(|child| {
            child.name == name
                || (!name.contains('@')
                    && child
                        .name
                        .split_once('@')
                        .is_some_and(|(base, _)| base == name))
        })
    }

    pub fn u32(&self, name: &str) -> Option<u32> {
        self.property(name)?.as_u32()
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.property(name)?.as_u64()
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.property(name)?.as_str()
    }
}

pub struct Properties<'a> {
    fdt: Fdt<'a>,
    offset: Option<usize>,
}

impl<'a> Iterator for Properties<'a> {
    type Item = Property<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (token, next) = self.fdt.token(self.offset?)?;
            match token {
                Token::Prop(prop) => {
                    self.offset = Some(next);
                    return Some(prop);
                }
                Token::Nop => self.offset = Some(next),
                // Properties always precede subnodes.
                _ => {
                    self.offset = None;
                    return None;
                }
            }
        }
    }
}

pub struct Children<'a> {
    fdt: Fdt<'a>,
    offset: Option<usize>,
}

impl<'a> Iterator for Children<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (token, next) = self.fdt.token(self.offset?)?;
            match token {
                Token::Prop(_) | Token::Nop => self.offset = Some(next),
                Token::BeginNode(name) => {
                    self.offset = self.fdt.skip_node(next);
                    return Some(Node {
                        fdt: self.fdt,
                        name,
                        body: next,
                    });
                }
                Token::EndNode | Token::End => {
                    self.offset = None;
                    return None;
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Property<'a> {
    pub name: &'a str,
    pub value: &'a [u8],
}

impl<'a> Property<'a> {
    pub fn as_u32(&self) -> Option<u32> {
        match self.value.len() {
            4 => be32(self.value, 0),
            _ => None,
        }
    }

    /// One or two cells, as written for `#address-cells` of 1 or 2.
    pub fn as_u64(&self) -> Option<u64> {
        match self.value.len() {
            4 => be32(self.value, 0).map(u64::from),
            8 => Some(u64::from(be32(self.value, 0)?) << 32 | u64::from(be32(self.value, 4)?)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        let (last, head) = self.value.split_last()?;
        if *last != 0 {
            return None;
        }
        str::from_utf8(head).ok()
    }

    /// Entries of a NUL-separated string list.
    pub fn as_str_list(self) -> impl Iterator<Item = &'a str> + 'a {
        let value = self.value.strip_suffix(&[0]).unwrap_or(self.value);
        value
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .filter_map(|s| str::from_utf8(s).ok())
    }

    /// Split the value into numbers of `cells` 32-bit cells each.
    pub fn as_cells(self, cells: usize) -> impl Iterator<Item = u64> + 'a {
        let width = cells.clamp(1, 2) * 4;
        self.value.chunks_exact(width).map(move |chunk| {
            chunk
                .chunks_exact(4)
                .fold(0u64, |acc, c| acc << 32 | u64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
        })
    }
}
