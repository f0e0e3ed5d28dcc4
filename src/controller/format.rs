//! Partitioning and formatting a card.

use super::{attach, detach, is_mount_path, report, Controller, ControllerError, Error};
use crate::card::CardInfo;
use crate::config::{HostConfig, MountConfig, PartitionLayout, SlotConfig};
use crate::handle::{prepare_handle, CardHandle, Drive};
use crate::host::{FatFs, FsMountError, MountMode, SdHost};

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

/// Size of the scratch buffer handed to the partitioner and the formatter.
pub const WORKBUF_SIZE: usize = 4096;

impl<H, F, const CARDS: usize> Controller<H, F, CARDS>
where
    H: SdHost,
    F: FatFs,
{
    /// Wipe the card: one FAT partition over the whole card, formatted with
    /// the allocation unit from `mount_config`, mounted read-write at `path`.
    ///
    /// `previous` and anything else mounted at `path` is unmounted first.
    /// Every step runs once, in order, and the first failure aborts. **All
    /// data on the card is lost.**
    pub fn format(
        &mut self,
        previous: Option<CardHandle>,
        path: &str,
        host_config: &HostConfig,
        slot_config: &SlotConfig,
        mount_config: &MountConfig,
    ) -> Result<CardHandle, ControllerError<H, F>> {
        if let Some(card) = previous {
            if let Err(e) = self.unmount(card) {
                warn!("unmount before format failed ({:?})", dbg_fmt!(e));
            }
        }
        match self.unmount_at(path) {
            Ok(true) => debug!("unmounted stale card at {}", path),
            Ok(false) => {}
            Err(e) => warn!("unmount before format failed ({:?})", dbg_fmt!(e)),
        }

        let result = self.try_format(path, host_config, slot_config, mount_config);
        match &result {
            Ok(_) => info!("Card formatted"),
            Err(e) => report(e),
        }
        result
    }

    fn try_format(
        &mut self,
        path: &str,
        host_config: &HostConfig,
        slot_config: &SlotConfig,
        mount_config: &MountConfig,
    ) -> Result<CardHandle, ControllerError<H, F>> {
        if !is_mount_path(path) {
            return Err(Error::InvalidPath);
        }
        slot_config.validate(host_config)?;
        mount_config.validate()?;
        if self.cards.find_path(path).is_some() {
            warn!("a card is still mounted at {}", path);
            return Err(Error::AlreadyMounted);
        }

        let host_shared = self.cards.in_use() > 0;
        let Controller {
            host,
            fs,
            drives,
            cards,
        } = self;
        let pending = prepare_handle(drives, cards, path).map_err(|e| {
            error!("mount_prepare failed");
            e
        })?;

        match format_card(
            host,
            fs,
            pending.drive(),
            pending.path(),
            host_config,
            slot_config,
            mount_config,
        ) {
            Ok(info) => Ok(pending.commit(info)),
            Err(e) => {
                detach(host, fs, pending.path(), pending.drive(), host_shared);
                Err(e)
            }
        }
    }
}

fn format_card<H, F>(
    host: &mut H,
    fs: &mut F,
    drive: Drive,
    path: &str,
    host_config: &HostConfig,
    slot_config: &SlotConfig,
    mount_config: &MountConfig,
) -> Result<CardInfo, ControllerError<H, F>>
where
    H: SdHost,
    F: FatFs,
{
    let info = attach(host, fs, drive, host_config, slot_config)?;
    match fs.mount(path, drive, mount_config.max_files, MountMode::Immediate) {
        // A blank card has nothing to mount yet.
        Ok(()) | Err(FsMountError::NoFilesystem) => {}
        Err(e) => return Err(Error::MountFailure(e)),
    }
    partition_and_format::<H, F>(fs, drive, &info, mount_config)?;
    fs.mount(path, drive, mount_config.max_files, MountMode::Deferred)
        .map_err(ControllerError::<H, F>::MountFailure)?;
    Ok(info)
}

/// Write a single partition spanning the card and create a FAT filesystem
/// on it.
pub(crate) fn partition_and_format<H, F>(
    fs: &mut F,
    drive: Drive,
    info: &CardInfo,
    mount_config: &MountConfig,
) -> Result<(), ControllerError<H, F>>
where
    H: SdHost,
    F: FatFs,
{
    let mut workbuf = [0u8; WORKBUF_SIZE];
    warn!("partitioning card");
    fs.partition(drive, &PartitionLayout::WHOLE_CARD, &mut workbuf)
        .map_err(ControllerError::<H, F>::PartitionFailure)?;
    let allocation_unit_size =
        fs.allocation_unit_size(info.sector_size(), mount_config.allocation_unit_size);
    warn!("formatting card, allocation unit size={}", allocation_unit_size);
    fs.format(drive, allocation_unit_size, &mut workbuf)
        .map_err(Error::FormatFailure)
}
