//! `bootmeth list [-a]`, `bootmeth order [<labels>]`.

use core::fmt;

use super::{Args, CmdResult, CmdRet, Shell, bootstd_priv};

const RULE: &str = "-----  ---  ------------------  ------------------";

pub(super) fn run(shell: &mut Shell<'_>, args: &[&str], out: &mut dyn fmt::Write) -> CmdResult {
    let Some((&sub, rest)) = args.split_first() else {
        return Ok(CmdRet::Usage);
    };
    let Some(state) = bootstd_priv(&mut shell.bootstd, out)? else {
        return Ok(CmdRet::Failure);
    };

    match sub {
        "list" => {
            let rows = state.bootmeth_list(Args::parse(rest).has('a'));
            writeln!(out, "Order  Seq  Name                Description")?;
            writeln!(out, "{RULE}")?;
            for row in &rows {
                match row.order {
                    Some(order) => write!(out, "{order:5x}")?,
                    None => write!(out, "{:>5}", "-")?,
                }
                writeln!(out, "  {:3x}  {:<19.19} {}", row.seq, row.name, row.description)?;
            }
            writeln!(out, "{RULE}")?;
            writeln!(
                out,
                "({} bootmeth{})",
                rows.len(),
                if rows.len() == 1 { "" } else { "s" }
            )?;
        }
        // No labels clears the order.
        "order" => {
            let order = rest.join(" ");
            if let Err(e) = state.set_bootmeth_order(&order, &mut shell.env) {
                writeln!(out, "Failed (err={})", e.errno())?;
                return Ok(CmdRet::Failure);
            }
        }
        _ => return Ok(CmdRet::Usage),
    }
    Ok(CmdRet::Success)
}
