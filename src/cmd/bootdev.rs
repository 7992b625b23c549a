//! `bootdev list [-p]`, `bootdev select [<label>]`, `bootdev info [-p]`.

use alloc::{format, string::String};
use core::fmt;

use super::{Args, CmdResult, CmdRet, Shell, bootstd_priv};
use crate::Result;

const RULE: &str = "---  ------  ------  --------  ------------------";

fn status(status: &Result<()>) -> String {
    match status {
        Ok(()) => String::from("OK"),
        Err(e) => format!("{}", -e.errno()),
    }
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
        "list" => {
            let rows = state.bootdev_list(args.has('p'));
            writeln!(out, "Seq  Probed  Status  Uclass    Name")?;
            writeln!(out, "{RULE}")?;
            for row in &rows {
                writeln!(
                    out,
                    "{:3x}   [ {} ]  {:>6}  {:<9.9} {}",
                    row.seq,
                    if row.probed { '+' } else { ' ' },
                    status(&row.status),
                    row.uclass,
                    row.name
                )?;
            }
            writeln!(out, "{RULE}")?;
            writeln!(
                out,
                "({} bootdev{})",
                rows.len(),
                if rows.len() == 1 { "" } else { "s" }
            )?;
        }
        "select" => {
            if let Err(e) = state.select_bootdev(args.first()) {
                writeln!(out, "Cannot find '{}' (err={})", args.first().unwrap_or(""), e.errno())?;
                return Ok(CmdRet::Failure);
            }
        }
        "info" => {
            let Ok(info) = state.bootdev_info(args.has('p')) else {
                writeln!(out, "Please use 'bootdev select' first")?;
                return Ok(CmdRet::Failure);
            };
            let status = match info.status {
                Err(e) => format!("{}", -e.errno()),
                Ok(()) if info.probed => String::from("Probed"),
                Ok(()) => String::from("OK"),
            };
            writeln!(out, "Name:      {}", info.name)?;
            writeln!(out, "Sequence:  {}", info.seq)?;
            writeln!(out, "Status:    {status}")?;
            writeln!(out, "Uclass:    {}", info.uclass)?;
            writeln!(out, "Bootflows: {} ({} valid)", info.bootflows, info.valid)?;
        }
        _ => return Ok(CmdRet::Usage),
    }
    Ok(CmdRet::Success)
}
