//! Console commands.
//!
//! [`Shell`] holds everything the commands act on and dispatches one command
//! line at a time. Output goes to any [`fmt::Write`] sink, normally the board's
//! serial console.

mod bootdev;
mod bootflow;
mod bootmeth;
mod upl;

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{
    bootstd::{Bootstd, BootstdPriv},
    env::Env,
    memory::Memory,
    upl::Upl,
};

/// Command exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdRet {
    Success = 0,
    Failure = 1,
    /// Bad arguments; the caller should print the command's help.
    Usage = 2,
}

type CmdResult = Result<CmdRet, fmt::Error>;

/// Universal Payload state of the session.
#[derive(Clone, Debug, Default)]
pub struct UplState {
    /// Handoff that `upl write` produces.
    pub handoff: Upl,
    /// Address `upl write` places the handoff at.
    pub buf_addr: u64,
    /// Handoff accepted by `upl read`.
    active: Option<Upl>,
}

impl UplState {
    pub fn new(handoff: Upl, buf_addr: u64) -> Self {
        Self {
            handoff,
            buf_addr,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&Upl> {
        self.active.as_ref()
    }
}

pub struct Shell<'a> {
    pub bootstd: Bootstd,
    pub env: Env,
    /// RAM the handoff commands read and write.
    pub mem: Box<dyn Memory + 'a>,
    pub upl: UplState,
}

impl<'a> Shell<'a> {
    pub fn new(bootstd: Bootstd, env: Env, mem: Box<dyn Memory + 'a>) -> Self {
        Self {
            bootstd,
            env,
            mem,
            upl: UplState::default(),
        }
    }

    /// Run one command line.
    ///
    /// A console write error fails the command.
    pub fn run_command(&mut self, line: &str, out: &mut dyn fmt::Write) -> CmdRet {
        let args = split_args(line);
        log::trace!("run: {args:?}");
        let ret = match args.as_slice() {
            ["bootdev", sub @ ..] => bootdev::run(self, sub, out),
            ["bootflow", sub @ ..] => bootflow::run(self, sub, out),
            ["bootmeth", sub @ ..] => bootmeth::run(self, sub, out),
            ["upl", sub @ ..] => upl::run(self, sub, out),
            _ => Ok(CmdRet::Usage),
        };
        ret.unwrap_or(CmdRet::Failure)
    }
}

/// Split a command line on whitespace; double quotes group words.
fn split_args(line: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut rest = line.trim_start();
    while !rest.is_empty() {
        let (arg, tail) = match rest.strip_prefix('"') {
            Some(quoted) => quoted.split_once('"').unwrap_or((quoted, "")),
            None => rest.split_once(char::is_whitespace).unwrap_or((rest, "")),
        };
        args.push(arg);
        rest = tail.trim_start();
    }
    args
}

/// Single-letter flags (`-ale`) and the remaining arguments.
struct Args<'s> {
    flags: Vec<char>,
    positional: Vec<&'s str>,
}

impl<'s> Args<'s> {
    fn parse(args: &[&'s str]) -> Self {
        let mut flags = Vec::new();
        let mut positional = Vec::new();
        for &arg in args {
            match arg.strip_prefix('-') {
                Some(letters) if !letters.is_empty() => flags.extend(letters.chars()),
                _ => positional.push(arg),
            }
        }
        Self { flags, positional }
    }

    fn has(&self, flag: char) -> bool {
        self.flags.contains(&flag)
    }

    fn first(&self) -> Option<&'s str> {
        self.positional.first().copied()
    }
}

/// Bootstd state, or `None` after reporting that there is none.
fn bootstd_priv<'b>(
    bootstd: &'b mut Bootstd,
    out: &mut dyn fmt::Write,
) -> Result<Option<&'b mut BootstdPriv>, fmt::Error> {
    match bootstd.get_priv() {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            writeln!(out, "Cannot get bootstd (err={})", e.errno())?;
            Ok(None)
        }
    }
}
