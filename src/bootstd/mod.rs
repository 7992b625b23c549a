//! The boot-standard context.
//!
//! [`Bootstd`] is created once by the boot entry point and passed by reference to
//! everything that needs discovery state. It owns the registered bootdevs and
//! bootmeths, the configured orders, the current selections and the list of
//! bootflows found by the last scan.

mod scan;

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    Error, Result,
    bootdev::{BootdevId, Bootdevs},
    bootflow::Bootflow,
    bootmeth::{Bootmeth, BootmethId, Bootmeths},
    env::{self, Env},
};

pub use scan::ScanFlags;

/// Prefixes searched for boot files when none are configured.
pub const DEFAULT_PREFIXES: [&str; 2] = ["/", "/boot/"];

/// Start-up configuration, normally taken from the control device tree.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Filename prefixes for bootflow file search.
    pub prefixes: Option<Vec<String>>,
    /// Bootdev labels to scan, in order; `None` scans all of them.
    pub bootdev_order: Option<Vec<String>>,
    /// Bootmeth labels, separated by spaces or commas.
    pub bootmeth_order: Option<String>,
}

/// Owner of the boot-standard state, present only if bootstd was bound.
pub struct Bootstd {
    inner: Option<BootstdPriv>,
}

impl Bootstd {
    /// A build without a bootstd device.
    pub const fn unbound() -> Self {
        Self { inner: None }
    }

    /// Set up bootstd with its drivers.
    ///
    /// The `bootmeths` and `boot_targets` variables take precedence over `config`;
    /// an invalid variable is ignored with a warning, an invalid `config` is an error.
    pub fn bind(config: Config, bootdevs: Bootdevs, bootmeths: Bootmeths, env: &Env) -> Result<Self> {
        let mut bootmeth_order = match &config.bootmeth_order {
            Some(order) => bootmeths.parse_order(order)?,
            None => Vec::new(),
        };
        if let Some(order) = env.get(env::BOOTMETHS) {
            match bootmeths.parse_order(order) {
                Ok(ids) => bootmeth_order = ids,
                Err(e) => log::warn!("Ignoring {}='{order}': {e}", env::BOOTMETHS),
            }
        }

        let bootdev_order = match env.get(env::BOOT_TARGETS) {
            Some(targets) => Some(split_labels(targets)),
            None => config.bootdev_order,
        };

        log::debug!(
            "bootstd bound with {} bootdevs, {} bootmeths",
            bootdevs.len(),
            bootmeths.len()
        );
        Ok(Self {
            inner: Some(BootstdPriv {
                bootdevs,
                bootmeths,
                bootdev_order,
                bootmeth_order,
                prefixes: config.prefixes,
                cur_bootdev: None,
                cur_bootflow: None,
                glob: Vec::new(),
            }),
        })
    }

    pub fn get_priv(&mut self) -> Result<&mut BootstdPriv> {
        self.inner.as_mut().ok_or(Error::NotFound)
    }
}

fn split_labels(list: &str) -> Vec<String> {
    list.split([' ', ','])
        .filter(|label| !label.is_empty())
        .map(String::from)
        .collect()
}

pub struct BootstdPriv {
    bootdevs: Bootdevs,
    bootmeths: Bootmeths,
    bootdev_order: Option<Vec<String>>,
    /// Empty when no order is configured.
    bootmeth_order: Vec<BootmethId>,
    prefixes: Option<Vec<String>>,
    cur_bootdev: Option<BootdevId>,
    /// Index into `glob`.
    cur_bootflow: Option<usize>,
    glob: Vec<Bootflow>,
}

/// One line of `bootmeth list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootmethRow {
    /// Position in the configured order; `None` if not part of it.
    pub order: Option<usize>,
    pub seq: u32,
    pub name: String,
    pub description: String,
}

/// One line of `bootdev list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootdevRow {
    pub seq: u32,
    pub probed: bool,
    /// Outcome of the probe, if one was requested.
    pub status: Result<()>,
    pub uclass: &'static str,
    pub name: String,
}

/// What `bootdev info` reports about the selected bootdev.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootdevInfo {
    pub name: String,
    pub seq: u32,
    pub status: Result<()>,
    pub probed: bool,
    pub uclass: &'static str,
    pub bootflows: usize,
    pub valid: usize,
}

impl BootstdPriv {
    pub fn bootdevs(&self) -> &Bootdevs {
        &self.bootdevs
    }

    pub fn bootmeths(&self) -> &Bootmeths {
        &self.bootmeths
    }

    /// Drop all bootflows, leaving registrations alone.
    pub fn clear_glob(&mut self) {
        self.glob.clear();
        self.cur_bootflow = None;
    }

    /// Configured bootdev labels; `None` means every bootdev in registration order.
    pub fn bootdev_order(&self) -> Option<&[String]> {
        self.bootdev_order.as_deref()
    }

    pub fn prefixes(&self) -> Option<&[String]> {
        self.prefixes.as_deref()
    }

    pub fn glob(&self) -> &[Bootflow] {
        &self.glob
    }

    pub fn cur_bootdev(&self) -> Option<BootdevId> {
        self.cur_bootdev
    }

    /// Select a bootdev by sequence number, name or label; `None` clears the
    /// selection together with all bootflows.
    ///
    /// A failed lookup leaves the selection unchanged.
    pub fn select_bootdev(&mut self, label: Option<&str>) -> Result<()> {
        match label {
            Some(label) => {
                let id = self.bootdevs.find_by_any(label)?;
                self.cur_bootdev = Some(id);
            }
            None => {
                self.cur_bootdev = None;
                self.clear_glob();
            }
        }
        Ok(())
    }

    /// Bootmeths used for discovery, in order.
    pub fn effective_bootmeths(&self) -> Vec<BootmethId> {
        if self.bootmeth_order.is_empty() {
            self.bootmeths.ids().collect()
        } else {
            self.bootmeth_order.clone()
        }
    }

    pub fn bootmeth_list(&self, all: bool) -> Vec<BootmethRow> {
        let row = |id: BootmethId, order: Option<usize>| {
            let meth = self.bootmeths.get(id);
            BootmethRow {
                order,
                seq: self.bootmeths.seq(id),
                name: meth.name().to_string(),
                description: meth.description().to_string(),
            }
        };

        if all {
            self.bootmeths
                .ids()
                .map(|id| row(id, self.bootmeth_order.iter().position(|&o| o == id)))
                .collect()
        } else {
            self.effective_bootmeths()
                .into_iter()
                .enumerate()
                .map(|(i, id)| row(id, Some(i)))
                .collect()
        }
    }

    /// Replace the bootmeth order and record it in `env`.
    ///
    /// Nothing changes unless every label resolves.
    pub fn set_bootmeth_order(&mut self, order: &str, env: &mut Env) -> Result<()> {
        let ids = self.bootmeths.parse_order(order)?;
        log::info!("Bootmeth order set to '{order}'");
        self.bootmeth_order = ids;
        env.set(env::BOOTMETHS, order);
        Ok(())
    }

    /// List every bootdev; a failed probe is reported in its row.
    pub fn bootdev_list(&mut self, probe: bool) -> Vec<BootdevRow> {
        self.bootdevs
            .ids()
            .map(|id| {
                let dev = self.bootdevs.get_mut(id);
                let status = if probe { dev.probe() } else { Ok(()) };
                BootdevRow {
                    seq: dev.seq(),
                    probed: dev.is_active(),
                    status,
                    uclass: dev.uclass().name(),
                    name: dev.name().to_string(),
                }
            })
            .collect()
    }

    /// Report on the selected bootdev.
    ///
    /// Bootflows are counted before probing, so the counts describe what was known
    /// before this call while the status reflects the probe.
    pub fn bootdev_info(&mut self, probe: bool) -> Result<BootdevInfo> {
        let id = self.cur_bootdev.ok_or(Error::NotFound)?;

        let (bootflows, valid) = self
            .glob
            .iter()
            .filter(|bflow| bflow.dev == id)
            .fold((0, 0), |(total, valid), bflow| {
                (total + 1, valid + usize::from(bflow.is_ready()))
            });

        let dev = self.bootdevs.get_mut(id);
        let status = if probe { dev.probe() } else { Ok(()) };
        Ok(BootdevInfo {
            name: dev.name().to_string(),
            seq: dev.seq(),
            status,
            probed: dev.is_active(),
            uclass: dev.uclass().name(),
            bootflows,
            valid,
        })
    }

    /// Indices into the global list of the bootflows `bootflow list` shows:
    /// those of the selected bootdev, or all of them.
    pub fn shown_bootflows(&self) -> Vec<usize> {
        self.glob
            .iter()
            .enumerate()
            .filter(|(_, bflow)| self.cur_bootdev.is_none_or(|dev| bflow.dev == dev))
            .map(|(i, _)| i)
            .collect()
    }

    /// Select a bootflow by hex position in the shown list, or by name.
    pub fn select_bootflow(&mut self, which: Option<&str>) -> Result<()> {
        let Some(which) = which else {
            self.cur_bootflow = None;
            return Ok(());
        };
        let shown = self.shown_bootflows();
        let found = match usize::from_str_radix(which, 16) {
            Ok(pos) => shown.get(pos).copied(),
            Err(_) => shown.into_iter().find(|&i| self.glob[i].name == which),
        };
        let index = found.ok_or_else(|| {
            log::debug!("No bootflow '{which}'");
            Error::NotFound
        })?;
        self.cur_bootflow = Some(index);
        Ok(())
    }

    pub fn cur_bootflow(&self) -> Option<&Bootflow> {
        self.cur_bootflow.and_then(|i| self.glob.get(i))
    }
}
