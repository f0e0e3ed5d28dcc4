//! # sdmmc-mount
//!
//! > Mount, format and smoke-test FAT formatted SD cards on embedded hosts
//!
//! The SD/MMC protocol, the FAT implementation and the partitioner belong to
//! your platform's driver stack. This crate sequences them: it hands out
//! logical drive numbers, brings the host and card up, mounts the volume (or
//! partitions and formats the card into a single FAT partition), logs what
//! it finds and tears everything down again. It is `#![no_std]` and does not
//! allocate.
//!
//! ## Using the crate
//!
//! Implement [`SdHost`] over your host controller driver, [`FatFs`] over your
//! FAT layer and [`Vfs`] over whatever file API the mounted volume shows up
//! in. Then:
//!
//! ```rust,ignore
//! use sdmmc_mount::sim::{SimBoard, SimCard};
//! use sdmmc_mount::{
//!     config::{HostConfig, MountConfig, SlotConfig},
//!     Controller, MOUNT_POINT,
//! };
//!
//! let board = SimBoard::new(SimCard::formatted(4096));
//! let (host, fat) = (&board, &board);
//! let mut controller = Controller::new(host, fat);
//! let card = controller
//!     .mount(
//!         MOUNT_POINT,
//!         &HostConfig::default(),
//!         &SlotConfig::four_bit_with_pullups(),
//!         &MountConfig::default(),
//!     )
//!     .unwrap();
//! println!("{} bytes", controller.card(&card).unwrap().capacity_bytes());
//! controller.unmount(card).unwrap();
//! ```
//!
//! [`sequence::run`] strings mount, demo, format, demo and unmount together.
//!
//! ## Features
//!
//! * `log` (default): log through the `log` facade.
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `std`: adds [`vfs::StdVfs`], a [`Vfs`] over `std::fs`.
//! * `sim`: adds [`sim::SimBoard`], an in-memory driver stack for tests.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[cfg(test)]
mod test;

#[cfg(feature = "log")]
macro_rules! dbg_fmt {
    ($value:expr) => {
        $value
    };
}

#[cfg(feature = "defmt-log")]
macro_rules! dbg_fmt {
    ($value:expr) => {
        defmt::Debug2Format(&$value)
    };
}

#[macro_use]
mod structure;

pub mod block_device;
pub mod card;
pub mod config;
pub mod controller;
pub mod demo;
pub mod handle;
pub mod host;
pub mod mbr;
pub mod sequence;
pub mod vfs;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice, OutOfRange};
pub use crate::card::{CardInfo, CardRegisters};
pub use crate::controller::{Controller, ControllerError, Error};
pub use crate::handle::{CardHandle, Drive};
pub use crate::host::{FatFs, FsMountError, MountMode, SdHost};
pub use crate::vfs::Vfs;

/// Where the card shows up.
pub const MOUNT_POINT: &str = "/sdcard";

/// Longest mount or file path we keep a copy of, in bytes.
pub const SD_PATH_MAX: usize = 64;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
