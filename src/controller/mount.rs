//! Mounting a card.

use super::format::partition_and_format;
use super::{attach, detach, is_mount_path, report, Controller, ControllerError, Error};
use crate::card::CardInfo;
use crate::config::{HostConfig, MountConfig, SlotConfig};
use crate::handle::{prepare_handle, CardHandle, Drive};
use crate::host::{FatFs, FsMountError, MountMode, SdHost};

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

impl<H, F, const CARDS: usize> Controller<H, F, CARDS>
where
    H: SdHost,
    F: FatFs,
{
    /// Initialize the card in the configured slot and mount its FAT volume at
    /// `path`.
    ///
    /// If the card holds no filesystem and
    /// [`MountConfig::format_if_mount_failed`] is set, the card is
    /// partitioned and formatted first. On failure everything acquired on
    /// the way is given back and the host is shut down again.
    pub fn mount(
        &mut self,
        path: &str,
        host_config: &HostConfig,
        slot_config: &SlotConfig,
        mount_config: &MountConfig,
    ) -> Result<CardHandle, ControllerError<H, F>> {
        let result = self.try_mount(path, host_config, slot_config, mount_config);
        if let Err(e) = &result {
            report(e);
        }
        result
    }

    fn try_mount(
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
            warn!("a card is already mounted at {}", path);
            return Err(Error::AlreadyMounted);
        }

        info!("Initializing SD card");
        let host_shared = self.cards.in_use() > 0;
        let Controller {
            host,
            fs,
            drives,
            cards,
        } = self;
        let pending = prepare_handle(drives, cards, path)?;

        info!("Mounting filesystem");
        match mount_card(
            host,
            fs,
            pending.drive(),
            pending.path(),
            host_config,
            slot_config,
            mount_config,
        ) {
            Ok(info) => {
                info!("Filesystem mounted");
                info.log_info();
                Ok(pending.commit(info))
            }
            Err(e) => {
                detach(host, fs, pending.path(), pending.drive(), host_shared);
                Err(e)
            }
        }
    }
}

fn mount_card<H, F>(
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
        Ok(()) => Ok(info),
        Err(FsMountError::NoFilesystem) if mount_config.format_if_mount_failed => {
            warn!("failed to mount card, no filesystem");
            partition_and_format::<H, F>(fs, drive, &info, mount_config)?;
            fs.mount(path, drive, mount_config.max_files, MountMode::Deferred)
                .map_err(ControllerError::<H, F>::MountFailure)?;
            Ok(info)
        }
        Err(e) => Err(Error::MountFailure(e)),
    }
}
