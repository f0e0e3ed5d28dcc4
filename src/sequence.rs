//! sdmmc-mount - Mount, test, format, test, unmount
//!
//! The whole demo in one call. A failing step is logged and recorded, and
//! the next step runs anyway: a failed mount is followed by a demo that
//! fails to open its file, then by a format that starts from scratch.

use crate::config::{HostConfig, MountConfig, SlotConfig};
use crate::controller::Controller;
use crate::demo::{self, Line};
use crate::host::{FatFs, SdHost};
use crate::vfs::Vfs;
use crate::MOUNT_POINT;

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

/// What to mount, where and how.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SequenceConfig<'a> {
    pub mount_point: &'a str,
    pub host: HostConfig,
    pub slot: SlotConfig,
    pub mount: MountConfig,
}

impl Default for SequenceConfig<'static> {
    /// `/sdcard`, default host, four bit bus with internal pull-ups, five
    /// open files, 16 KiB allocation unit, no format on mount failure.
    fn default() -> Self {
        SequenceConfig {
            mount_point: MOUNT_POINT,
            host: HostConfig::default(),
            slot: SlotConfig::four_bit_with_pullups(),
            mount: MountConfig::default(),
        }
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    Mount,
    Demo,
    Format,
    DemoAfterFormat,
    Unmount,
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Step::Mount => "mount",
            Step::Demo => "demo",
            Step::Format => "format",
            Step::DemoAfterFormat => "demo after format",
            Step::Unmount => "unmount",
        }
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
    /// Nothing to do, e.g. no card left to unmount.
    Skipped,
}

/// How each step went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mount: Outcome,
    pub demo: Outcome,
    pub format: Outcome,
    pub demo_after_format: Outcome,
    pub unmount: Outcome,
    /// Line read back by the last demo that got that far.
    pub line: Option<Line>,
}

impl Default for RunReport {
    fn default() -> Self {
        RunReport {
            mount: Outcome::Skipped,
            demo: Outcome::Skipped,
            format: Outcome::Skipped,
            demo_after_format: Outcome::Skipped,
            unmount: Outcome::Skipped,
            line: None,
        }
    }
}

impl RunReport {
    pub fn outcome(&self, step: Step) -> Outcome {
        match step {
            Step::Mount => self.mount,
            Step::Demo => self.demo,
            Step::Format => self.format,
            Step::DemoAfterFormat => self.demo_after_format,
            Step::Unmount => self.unmount,
        }
    }

    pub fn all_done(&self) -> bool {
        [
            Step::Mount,
            Step::Demo,
            Step::Format,
            Step::DemoAfterFormat,
            Step::Unmount,
        ]
        .iter()
        .all(|step| self.outcome(*step) == Outcome::Done)
    }

    fn record(&mut self, step: Step, outcome: Outcome) {
        match outcome {
            Outcome::Failed => warn!("{} failed", step.label()),
            _ => info!("{}: {:?}", step.label(), outcome),
        }
        match step {
            Step::Mount => self.mount = outcome,
            Step::Demo => self.demo = outcome,
            Step::Format => self.format = outcome,
            Step::DemoAfterFormat => self.demo_after_format = outcome,
            Step::Unmount => self.unmount = outcome,
        }
    }
}

/// Mount the card, run the demo, reformat the card, run the demo again and
/// unmount. Every step is attempted whatever happened before it.
pub fn run<H, F, V, const CARDS: usize>(
    controller: &mut Controller<H, F, CARDS>,
    vfs: &mut V,
    config: &SequenceConfig,
) -> RunReport
where
    H: SdHost,
    F: FatFs,
    V: Vfs,
{
    let mut report = RunReport::default();

    let card = controller
        .mount(config.mount_point, &config.host, &config.slot, &config.mount)
        .ok();
    report.record(Step::Mount, outcome_of(card.is_some()));

    run_demo(vfs, config.mount_point, Step::Demo, &mut report);

    let card = controller
        .format(
            card,
            config.mount_point,
            &config.host,
            &config.slot,
            &config.mount,
        )
        .ok();
    report.record(Step::Format, outcome_of(card.is_some()));

    run_demo(vfs, config.mount_point, Step::DemoAfterFormat, &mut report);

    let unmounted = match card {
        Some(card) => outcome_of(controller.unmount(card).is_ok()),
        None => Outcome::Skipped,
    };
    report.record(Step::Unmount, unmounted);

    report
}

fn run_demo<V: Vfs>(vfs: &mut V, mount_point: &str, step: Step, report: &mut RunReport) {
    match demo::run(vfs, mount_point) {
        Ok(line) => {
            report.line = Some(line);
            report.record(step, Outcome::Done);
        }
        Err(e) => {
            warn!("{} stopped ({:?})", step.label(), dbg_fmt!(e));
            report.record(step, Outcome::Failed);
        }
    }
}

fn outcome_of(ok: bool) -> Outcome {
    if ok {
        Outcome::Done
    } else {
        Outcome::Failed
    }
}
