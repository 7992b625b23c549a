//! `bootflow scan [-aelGH] [<label>]`, `bootflow list [-e]`,
//! `bootflow select [<n>|<name>]`, `bootflow info [-d]`.
//!
//! `-G` and `-H` are accepted for compatibility and have no effect.

use alloc::string::String;
use core::fmt;

use super::{Args, CmdResult, CmdRet, Shell, bootstd_priv};
use crate::{
    bootflow::Bootflow,
    bootmeth::Bootmeth,
    bootstd::{BootstdPriv, ScanFlags},
};

const HEADER: &str = "Seq  Method       State   Uclass    Part  Name                      Filename";
const RULE: &str =
    "---  -----------  ------  --------  ----  ------------------------  ----------------";

fn show_bootflow(
    out: &mut dyn fmt::Write,
    state: &BootstdPriv,
    seq: usize,
    bflow: &Bootflow,
    errors: bool,
) -> fmt::Result {
    writeln!(
        out,
        "{:3x}  {:<11}  {:<6}  {:<9.9} {:4x}  {:<25.25} {}",
        seq,
        state.bootmeths().get(bflow.method).name(),
        bflow.state.name(),
        state.bootdevs().get(bflow.dev).uclass().name(),
        bflow.part,
        bflow.name,
        bflow.fname.as_deref().unwrap_or("")
    )?;
    if errors {
        if let Some(e) = bflow.err {
            writeln!(out, "     ** {}, err={}: {e}", bflow.state.failure(), e.errno())?;
        }
    }
    Ok(())
}

fn show_footer(out: &mut dyn fmt::Write, count: usize, valid: usize) -> fmt::Result {
    writeln!(out, "{RULE}")?;
    writeln!(
        out,
        "({count} bootflow{}, {valid} valid)",
        if count == 1 { "" } else { "s" }
    )
}

fn scan(state: &mut BootstdPriv, args: &Args<'_>, out: &mut dyn fmt::Write) -> CmdResult {
    let label = args.first();
    let list = args.has('l');
    let errors = args.has('e');

    if list {
        match (label, state.cur_bootdev()) {
            (Some(label), _) => writeln!(out, "Scanning for bootflows with label '{label}'")?,
            (None, Some(dev)) => writeln!(
                out,
                "Scanning for bootflows in bootdev '{}'",
                state.bootdevs().get(dev).name()
            )?,
            (None, None) => writeln!(out, "Scanning for bootflows in all bootdevs")?,
        }
        writeln!(out, "{HEADER}")?;
        writeln!(out, "{RULE}")?;
    }

    let visited = match state.scan(label, ScanFlags { all: args.has('a') }) {
        Ok(visited) => visited,
        Err(e) => {
            writeln!(out, "Cannot find '{}' (err={})", label.unwrap_or(""), e.errno())?;
            return Ok(CmdRet::Failure);
        }
    };
    if !list {
        return Ok(CmdRet::Success);
    }

    let mut seq = 0;
    for &id in &visited {
        writeln!(out, "Scanning bootdev '{}':", state.bootdevs().get(id).name())?;
        for bflow in state.glob().iter().filter(|b| b.dev == id) {
            show_bootflow(out, state, seq, bflow, errors)?;
            seq += 1;
        }
    }
    writeln!(out, "No more bootdevs")?;
    let valid = state.glob().iter().filter(|b| b.is_ready()).count();
    show_footer(out, state.glob().len(), valid)?;
    Ok(CmdRet::Success)
}

fn list(state: &BootstdPriv, args: &Args<'_>, out: &mut dyn fmt::Write) -> CmdResult {
    match state.cur_bootdev() {
        Some(dev) => writeln!(
            out,
            "Showing bootflows for bootdev '{}'",
            state.bootdevs().get(dev).name()
        )?,
        None => writeln!(out, "Showing all bootflows")?,
    }
    writeln!(out, "{HEADER}")?;
    writeln!(out, "{RULE}")?;

    let shown = state.shown_bootflows();
    let mut valid = 0;
    for (seq, &index) in shown.iter().enumerate() {
        let bflow = &state.glob()[index];
        show_bootflow(out, state, seq, bflow, args.has('e'))?;
        valid += usize::from(bflow.is_ready());
    }
    show_footer(out, shown.len(), valid)?;
    Ok(CmdRet::Success)
}

fn info(state: &BootstdPriv, args: &Args<'_>, out: &mut dyn fmt::Write) -> CmdResult {
    let Some(bflow) = state.cur_bootflow() else {
        writeln!(out, "No bootflow selected")?;
        return Ok(CmdRet::Failure);
    };

    writeln!(out, "Name:      {}", bflow.name)?;
    writeln!(out, "Device:    {}", state.bootdevs().get(bflow.dev).name())?;
    writeln!(out, "Method:    {}", state.bootmeths().get(bflow.method).name())?;
    writeln!(out, "State:     {}", bflow.state.name())?;
    writeln!(out, "Partition: {}", bflow.part)?;
    writeln!(out, "Subdir:    {}", bflow.subdir.as_deref().unwrap_or("(none)"))?;
    writeln!(out, "Filename:  {}", bflow.fname.as_deref().unwrap_or("<NULL>"))?;
    writeln!(out, "Size:      {:x} ({} bytes)", bflow.size, bflow.size)?;
    writeln!(out, "Error:     {}", bflow.err.map_or(0, |e| e.errno()))?;

    if args.has('d') {
        writeln!(out, "Contents:")?;
        writeln!(out)?;
        let text = String::from_utf8_lossy(&bflow.buf);
        write!(out, "{text}")?;
        if !text.ends_with('\n') {
            writeln!(out)?;
        }
    }
    Ok(CmdRet::Success)
}

pub(super) fn run(shell: &mut Shell<'_>, args: &[&str], out: &mut dyn fmt::Write) -> CmdResult {
    let Some((&sub, rest)) = args.split_first() else {
        return Ok(CmdRet::Usage);
    };
    let Some(state) = bootstd_priv(&mut shell.bootstd, out)? else {
        return Ok(CmdRet::Failure);
    };
    let args = Args::parse(rest);

    match sub {
        "scan" => scan(state, &args, out),
        "list" => list(state, &args, out),
        "select" => {
            if state.select_bootflow(args.first()).is_err() {
                writeln!(out, "Cannot find bootflow '{}'", args.first().unwrap_or(""))?;
                return Ok(CmdRet::Failure);
            }
            Ok(CmdRet::Success)
        }
        "info" => info(state, &args, out),
        _ => Ok(CmdRet::Usage),
    }
}
