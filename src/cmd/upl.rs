//! `upl info [-v]`, `upl write`, `upl read <addr>`.

use core::fmt;

use super::{Args, CmdResult, CmdRet, Shell};
use crate::{
    Error, Result,
    env::{UPLADDR, UPLSIZE},
    fdt,
    memory::Memory,
    upl::Upl,
};

fn read_handoff(mem: &dyn Memory, addr: u64) -> Result<Upl> {
    let header = mem.slice(addr, fdt::HEADER_SIZE)?;
    let size = fdt::total_size(header).ok_or(Error::InvalidImage)?;
    Upl::read(mem.slice(addr, size)?)
}

pub(super) fn run(shell: &mut Shell<'_>, args: &[&str], out: &mut dyn fmt::Write) -> CmdResult {
    let Some((&sub, rest)) = args.split_first() else {
        return Ok(CmdRet::Usage);
    };
    let args = Args::parse(rest);

    match sub {
        "info" => {
            let active = shell.upl.active.as_ref();
            writeln!(out, "UPL state: {}active", if active.is_some() { "" } else { "in" })?;
            if let Some(upl) = active {
                if args.has('v') {
                    upl.show(out)?;
                }
            }
        }
        "write" => {
            let addr = shell.upl.buf_addr;
            let written = shell
                .upl
                .handoff
                .write()
                .and_then(|blob| shell.mem.write(addr, &blob).map(|()| blob.len()));
            let size = match written {
                Ok(size) => size as u64,
                Err(e) => {
                    writeln!(out, "Failed to write UPL (err={})", e.errno())?;
                    return Ok(CmdRet::Failure);
                }
            };
            writeln!(out, "UPL handoff written to {addr:x} size {size:x}")?;
            shell.env.set_hex(UPLADDR, addr);
            shell.env.set_hex(UPLSIZE, size);
        }
        "read" => {
            let Some(addr) = args.first() else {
                return Ok(CmdRet::Usage);
            };
            let Ok(addr) = u64::from_str_radix(addr.trim_start_matches("0x"), 16) else {
                return Ok(CmdRet::Usage);
            };
            writeln!(out, "Reading UPL at {addr:x}")?;
            match read_handoff(&*shell.mem, addr) {
                Ok(upl) => shell.upl.active = Some(upl),
                Err(e) => {
                    writeln!(out, "Cannot read UPL (err={})", e.errno())?;
                    return Ok(CmdRet::Failure);
                }
            }
        }
        _ => return Ok(CmdRet::Usage),
    }
    Ok(CmdRet::Success)
}
