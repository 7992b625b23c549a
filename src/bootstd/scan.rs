//! Bootflow discovery: apply every bootmeth to every partition of every bootdev.

use alloc::{string::String, vec::Vec};

use super::{BootstdPriv, DEFAULT_PREFIXES};
use crate::{
    Error, Result,
    bootdev::{BootMedia, Bootdev, BootdevId},
    bootflow::{Bootflow, BootflowState},
    bootmeth::{Bootmeth, BootmethId, BootmethKind, Bootmeths},
};

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanFlags {
    /// Keep bootflows that did not become ready.
    pub all: bool,
}

/// Advance `bflow` from [`BootflowState::Media`] as far as the media allows.
fn discover(
    media: &mut dyn BootMedia,
    meth: &BootmethKind,
    prefixes: &[String],
    bflow: &mut Bootflow,
) -> Result<()> {
    media.check_part(bflow.part)?;
    bflow.state = BootflowState::Part;
    media.mount(bflow.part)?;
    bflow.state = BootflowState::Fs;
    meth.read_bootflow(media, prefixes, bflow)
}

fn scan_bootdev(
    id: BootdevId,
    dev: &mut Bootdev,
    bootmeths: &Bootmeths,
    meths: &[BootmethId],
    prefixes: &[String],
    flags: ScanFlags,
    glob: &mut Vec<Bootflow>,
) {
    let usable: Vec<BootmethId> = meths
        .iter()
        .copied()
        .filter(|&m| bootmeths.get(m).check(dev).is_ok())
        .collect();
    let name = String::from(dev.name());

    if let Err(e) = dev.probe() {
        log::debug!("Cannot probe bootdev '{name}': {e}");
        if flags.all {
            glob.extend(usable.iter().map(|&m| Bootflow {
                err: Some(e),
                ..Bootflow::new(id, &name, m, 0)
            }));
        }
        return;
    }

    let max_part = dev.media().max_part().unwrap_or_else(|e| {
        log::debug!("No partition table on '{name}': {e}");
        0
    });

    for part in 0..=max_part {
        for &m in &usable {
            let mut bflow = Bootflow::new(id, &name, m, part);
            bflow.state = BootflowState::Media;
            if let Err(e) = discover(dev.media(), bootmeths.get(m), prefixes, &mut bflow) {
                bflow.err = Some(e);
            }
            if bflow.is_ready() || flags.all {
                glob.push(bflow);
            }
        }
    }
}

impl BootstdPriv {
    /// Bootdevs a scan visits: the one named by `label`, otherwise the selected
    /// one, otherwise those in the configured order, otherwise all of them.
    ///
    /// A label that is not a bootdev may be a uclass name such as `mmc`.
    pub fn scan_targets(&self, label: Option<&str>) -> Result<Vec<BootdevId>> {
        if let Some(label) = label {
            if let Ok(id) = self.bootdevs.find_by_any(label) {
                return Ok(alloc::vec![id]);
            }
            let ids: Vec<BootdevId> = self
                .bootdevs
                .iter()
                .filter(|(_, dev)| dev.uclass().name() == label)
                .map(|(id, _)| id)
                .collect();
            return if ids.is_empty() {
                Err(Error::NotFound)
            } else {
                Ok(ids)
            };
        }

        if let Some(id) = self.cur_bootdev {
            return Ok(alloc::vec![id]);
        }

        match &self.bootdev_order {
            Some(order) => Ok(order
                .iter()
                .filter_map(|label| {
                    self.bootdevs
                        .find_by_any(label)
                        .inspect_err(|_| log::warn!("Skipping unknown boot target '{label}'"))
                        .ok()
                })
                .collect()),
            None => Ok(self.bootdevs.ids().collect()),
        }
    }

    /// Replace the global bootflow list with a fresh scan.
    ///
    /// Returns the bootdevs visited, in order.
    pub fn scan(&mut self, label: Option<&str>, flags: ScanFlags) -> Result<Vec<BootdevId>> {
        self.clear_glob();
        let targets = self.scan_targets(label)?;
        let meths = self.effective_bootmeths();
        let prefixes: Vec<String> = match &self.prefixes {
            Some(prefixes) => prefixes.clone(),
            None => DEFAULT_PREFIXES.iter().map(|&p| String::from(p)).collect(),
        };

        for &id in &targets {
            scan_bootdev(
                id,
                self.bootdevs.get_mut(id),
                &self.bootmeths,
                &meths,
                &prefixes,
                flags,
                &mut self.glob,
            );
        }

        log::debug!(
            "Scan found {} bootflows, {} ready",
            self.glob.len(),
            self.glob.iter().filter(|b| b.is_ready()).count()
        );
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, vec};

    use super::*;
    use crate::{
        bootdev::{Bootdevs, Uclass},
        bootstd::{Bootstd, Config},
        env::Env,
        mock::MockMedia,
    };

    fn bootstd(order: Option<Vec<String>>) -> Bootstd {
        let mut devs = Bootdevs::new();
        devs.register(Bootdev::new("mmc2", Uclass::Mmc, Box::new(MockMedia::empty())))
            .unwrap();
        devs.register(Bootdev::new(
            "mmc1",
            Uclass::Mmc,
            Box::new(
                MockMedia::new(2)
                    .file(1, "/extlinux/extlinux.conf", b"label linux")
                    .file(2, "/boot/boot.scr", b"script"),
            ),
        ))
        .unwrap();
        devs.register(Bootdev::new("eth0", Uclass::Ethernet, Box::new(MockMedia::new(0))))
            .unwrap();
        devs.register(Bootdev::new("usb0", Uclass::Usb, Box::new(MockMedia::broken())))
            .unwrap();
        let config = Config {
            bootdev_order: order,
            ..Config::default()
        };
        Bootstd::bind(config, devs, Bootmeths::standard(), &Env::new()).unwrap()
    }

    fn summary(state: &BootstdPriv) -> Vec<(&str, &str, BootflowState)> {
        state
            .glob()
            .iter()
            .map(|b| (b.name.as_str(), state.bootmeths().get(b.method).name(), b.state))
            .collect()
    }

    #[test]
    fn only_ready_bootflows_by_default() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();

        let visited = state.scan(None, ScanFlags::default()).unwrap();
        assert_eq!(visited.len(), 4);
        assert_eq!(
            summary(state),
            [
                ("mmc1.bootdev.part_1", "extlinux", BootflowState::Ready),
                ("mmc1.bootdev.part_2", "script", BootflowState::Ready),
            ]
        );
        let script = &state.glob()[1];
        assert_eq!(script.fname.as_deref(), Some("/boot/boot.scr"));
        assert_eq!(script.buf, b"script");
    }

    #[test]
    fn all_keeps_failures_with_their_state() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();
        state.select_bootdev(Some("mmc1")).unwrap();
        state.scan(None, ScanFlags { all: true }).unwrap();

        let flows = state.glob();
        assert_eq!(flows.len(), 9);
        let whole = &flows[0];
        assert_eq!(whole.name, "mmc1.bootdev.whole");
        assert_eq!(whole.state, BootflowState::Media);
        assert_eq!(whole.err, Some(Error::NotFound));

        let efi = &flows[4];
        assert_eq!(state.bootmeths().get(efi.method).name(), "efi");
        assert_eq!(efi.state, BootflowState::Fs);
        assert!(efi.fname.as_deref().is_some_and(|f| f.starts_with("/EFI/BOOT/")));
    }

    #[test]
    fn empty_slot_and_broken_controller() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();

        state.scan(Some("mmc2"), ScanFlags { all: true }).unwrap();
        assert!(state.glob().iter().all(|b| b.state == BootflowState::Media));
        assert!(state.glob().iter().all(|b| b.err == Some(Error::NoMedia)));

        state.scan(Some("usb0"), ScanFlags { all: true }).unwrap();
        assert_eq!(state.glob().len(), 3);
        assert!(state.glob().iter().all(|b| b.state == BootflowState::Base));
        assert!(state.glob().iter().all(|b| b.err == Some(Error::NoDevice)));
    }

    #[test]
    fn network_bootdevs_are_skipped_by_block_bootmeths() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();
        state.scan(Some("eth0"), ScanFlags { all: true }).unwrap();
        assert!(state.glob().is_empty());
    }

    #[test]
    fn bootdev_order_and_uclass_labels() {
        let mut ctx = bootstd(Some(vec!["usb0".into(), "nvme0".into(), "mmc1".into()]));
        let state = ctx.get_priv().unwrap();

        let visited = state.scan(None, ScanFlags::default()).unwrap();
        let names: Vec<&str> = visited
            .iter()
            .map(|&id| state.bootdevs().get(id).name())
            .collect();
        assert_eq!(names, ["usb0.bootdev", "mmc1.bootdev"]);

        let visited = state.scan(Some("mmc"), ScanFlags::default()).unwrap();
        assert_eq!(visited.len(), 2);
        assert_eq!(state.scan(Some("scsi"), ScanFlags::default()), Err(Error::NotFound));
    }

    #[test]
    fn bootmeth_order_limits_discovery() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();
        state.set_bootmeth_order("script", &mut Env::new()).unwrap();

        state.scan(Some("mmc1"), ScanFlags::default()).unwrap();
        assert_eq!(
            summary(state),
            [("mmc1.bootdev.part_2", "script", BootflowState::Ready)]
        );
    }

    #[test]
    fn bootflow_selection() {
        let mut ctx = bootstd(None);
        let state = ctx.get_priv().unwrap();
        state.scan(None, ScanFlags::default()).unwrap();

        state.select_bootflow(Some("1")).unwrap();
        assert_eq!(state.cur_bootflow().unwrap().name, "mmc1.bootdev.part_2");
        state.select_bootflow(Some("mmc1.bootdev.part_1")).unwrap();
        assert_eq!(state.cur_bootflow().unwrap().part, 1);
        assert_eq!(state.select_bootflow(Some("5")), Err(Error::NotFound));
        state.select_bootflow(None).unwrap();
        assert!(state.cur_bootflow().is_none());
    }
}
