//! sdmmc-mount - Driver stack seams
//!
//! The SD/MMC protocol, the FAT implementation and the partitioner all live
//! in the platform's driver stack. These traits are the calls this crate
//! makes into it.

use core::fmt::Debug;

use crate::card::{CardInfo, CardRegisters};
use crate::config::{HostConfig, PartitionLayout, SlotConfig};
use crate::handle::Drive;

/// An SDMMC or SPI host controller with a card slot.
pub trait SdHost {
    /// The errors the host driver can return. Must be debug formattable.
    type Error: Debug;

    /// Bring up the host controller.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Configure a card slot on the initialized host.
    fn init_slot(&mut self, slot: u8, config: &SlotConfig) -> Result<(), Self::Error>;

    /// Probe the card in the configured slot and read its registers.
    fn init_card(&mut self, config: &HostConfig) -> Result<CardRegisters, Self::Error>;

    /// Shut the host controller down.
    fn deinit(&mut self) -> Result<(), Self::Error>;
}

/// Why the filesystem layer refused to mount.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsMountError<E> {
    /// The volume holds no FAT filesystem.
    NoFilesystem,
    /// Anything else the filesystem layer reported.
    Device(E),
}

impl<E> From<E> for FsMountError<E> {
    fn from(e: E) -> Self {
        Self::Device(e)
    }
}

/// When the volume gets mounted.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MountMode {
    /// Read the volume now and fail if there is no filesystem.
    Immediate,
    /// Bind the path now and read the volume on first access.
    Deferred,
}

/// The FAT layer with its disk I/O registry.
pub trait FatFs {
    /// The errors the filesystem layer can return. Must be debug formattable.
    type Error: Debug;

    /// Make `card` the block device behind `drive`.
    fn register(&mut self, drive: Drive, card: &CardInfo) -> Result<(), Self::Error>;

    /// Forget the block device behind `drive`. Does nothing if none is registered.
    fn unregister(&mut self, drive: Drive);

    /// Rewrite the partition table of the device behind `drive`.
    fn partition(
        &mut self,
        drive: Drive,
        layout: &PartitionLayout,
        work: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Cluster size the formatter will use for a card with `sector_size`
    /// byte sectors when `requested` bytes were asked for.
    fn allocation_unit_size(&self, sector_size: usize, requested: usize) -> usize;

    /// Create a FAT filesystem on the first partition of `drive`.
    fn format(
        &mut self,
        drive: Drive,
        allocation_unit_size: usize,
        work: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Make the volume on `drive` visible under `path`.
    fn mount(
        &mut self,
        path: &str,
        drive: Drive,
        max_files: usize,
        mode: MountMode,
    ) -> Result<(), FsMountError<Self::Error>>;

    /// Detach the volume mounted under `path`.
    fn unmount(&mut self, path: &str, drive: Drive) -> Result<(), Self::Error>;
}
