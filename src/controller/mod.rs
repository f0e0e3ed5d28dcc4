//! sdmmc-mount - Controller
//!
//! Owns the host driver, the filesystem layer and the drive/card bookkeeping.
//! Every mount, format and unmount goes through here.

mod format;
mod mount;

pub use format::WORKBUF_SIZE;

use core::fmt::Debug;

use crate::card::{CardError, CardInfo};
use crate::config::{ConfigError, HostConfig, SlotConfig};
use crate::handle::{AllocError, CardHandle, CardTable, Drive, DrivePool};
use crate::host::{FatFs, FsMountError, SdHost};

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

/// The possible errors the `Controller` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<HE, FE> {
    /// A configuration value was rejected before touching the card
    InvalidConfig(ConfigError),
    /// Mount paths must be non-empty and absolute
    InvalidPath,
    /// Another card is already mounted at this path
    AlreadyMounted,
    /// Every logical drive number is in use
    ResourceExhausted,
    /// No room for a card record or a mount path copy
    OutOfMemory,
    /// The handle does not belong to a card mounted by this controller
    InvalidHandle,
    /// The host, the slot or the card did not come up
    CardInitFailure(HE),
    /// The card answered with registers we cannot decode
    UnsupportedCard(CardError),
    /// The filesystem could not be mounted
    MountFailure(FsMountError<FE>),
    /// The filesystem layer failed outside of a mount
    Filesystem(FE),
    /// Writing the partition table failed
    PartitionFailure(FE),
    /// Creating the filesystem failed
    FormatFailure(FE),
    /// The host did not shut down cleanly
    HostDeinit(HE),
}

/// [`Error`] for a given host and filesystem layer.
pub type ControllerError<H, F> = Error<<H as SdHost>::Error, <F as FatFs>::Error>;

/// [`Error`] without its payload.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfig,
    InvalidPath,
    AlreadyMounted,
    ResourceExhausted,
    OutOfMemory,
    InvalidHandle,
    CardInitFailure,
    UnsupportedCard,
    MountFailure,
    Filesystem,
    PartitionFailure,
    FormatFailure,
    HostDeinit,
}

impl<HE, FE> Error<HE, FE> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::InvalidPath => ErrorKind::InvalidPath,
            Error::AlreadyMounted => ErrorKind::AlreadyMounted,
            Error::ResourceExhausted => ErrorKind::ResourceExhausted,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::InvalidHandle => ErrorKind::InvalidHandle,
            Error::CardInitFailure(_) => ErrorKind::CardInitFailure,
            Error::UnsupportedCard(_) => ErrorKind::UnsupportedCard,
            Error::MountFailure(_) => ErrorKind::MountFailure,
            Error::Filesystem(_) => ErrorKind::Filesystem,
            Error::PartitionFailure(_) => ErrorKind::PartitionFailure,
            Error::FormatFailure(_) => ErrorKind::FormatFailure,
            Error::HostDeinit(_) => ErrorKind::HostDeinit,
        }
    }

    /// Wiring, pull-up or missing card trouble, as opposed to trouble with
    /// what is stored on the card.
    pub fn is_card_init(&self) -> bool {
        matches!(self, Error::CardInitFailure(_) | Error::UnsupportedCard(_))
    }
}

impl<HE, FE> From<AllocError> for Error<HE, FE> {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::ResourceExhausted => Error::ResourceExhausted,
            AllocError::OutOfMemory => Error::OutOfMemory,
        }
    }
}

impl<HE, FE> From<ConfigError> for Error<HE, FE> {
    fn from(e: ConfigError) -> Self {
        Error::InvalidConfig(e)
    }
}

/// Brings cards up and down.
///
/// `CARDS` is how many cards can be mounted at once. It is further limited
/// by [`MAX_DRIVES`](crate::handle::MAX_DRIVES).
pub struct Controller<H, F, const CARDS: usize = 1>
where
    H: SdHost,
    F: FatFs,
{
    host: H,
    fs: F,
    drives: DrivePool,
    cards: CardTable<CARDS>,
}

impl<H, F> Controller<H, F>
where
    H: SdHost,
    F: FatFs,
{
    /// Create a controller that mounts one card at a time.
    pub fn new(host: H, fs: F) -> Self {
        Self::with_card_table(host, fs)
    }
}

impl<H, F, const CARDS: usize> Controller<H, F, CARDS>
where
    H: SdHost,
    F: FatFs,
{
    /// Create a controller with room for `CARDS` cards.
    pub fn with_card_table(host: H, fs: F) -> Self {
        Controller {
            host,
            fs,
            drives: DrivePool::new(),
            cards: CardTable::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Give back the host and filesystem layer. Cards still mounted stay
    /// mounted as far as the driver stack is concerned.
    pub fn release(self) -> (H, F) {
        (self.host, self.fs)
    }

    /// What we know about the card behind `handle`.
    pub fn card(&self, handle: &CardHandle) -> Option<&CardInfo> {
        self.cards.lookup(handle)?.info()
    }

    pub fn mount_path(&self, handle: &CardHandle) -> Option<&str> {
        self.cards.lookup(handle).map(|record| record.path())
    }

    /// Logical drive numbers still available.
    pub fn free_drives(&self) -> usize {
        self.drives.free()
    }

    pub fn mounted_cards(&self) -> usize {
        self.cards.in_use()
    }

    /// Unmount the card, unregister its block device and, once no card is
    /// left, shut the host down. The drive number and card record are given
    /// back even when the driver stack reports an error.
    pub fn unmount(&mut self, card: CardHandle) -> Result<(), ControllerError<H, F>> {
        if self.cards.lookup(&card).is_none() {
            return Err(Error::InvalidHandle);
        }
        self.unmount_index(card.index())
    }

    /// Unmount whatever card is mounted at `path`. Returns `false` if nothing
    /// was.
    pub fn unmount_at(&mut self, path: &str) -> Result<bool, ControllerError<H, F>> {
        match self.cards.find_path(path) {
            Some(index) => self.unmount_index(index).map(|_| true),
            None => Ok(false),
        }
    }

    fn unmount_index(&mut self, index: usize) -> Result<(), ControllerError<H, F>> {
        let record = match self.cards.take(index) {
            Some(record) => record,
            None => return Err(Error::InvalidHandle),
        };
        let unmounted = self
            .fs
            .unmount(record.path(), record.drive())
            .map_err(Error::Filesystem);
        self.fs.unregister(record.drive());
        let deinit = if self.cards.in_use() == 0 {
            self.host.deinit().map_err(Error::HostDeinit)
        } else {
            Ok(())
        };
        self.drives.release(record.drive());

        let result = unmounted.and(deinit);
        match &result {
            Ok(()) => info!("Card unmounted"),
            Err(e) => warn!("Card unmounted with errors ({:?})", dbg_fmt!(e)),
        }
        result
    }
}

/// Mount paths are absolute.
pub(crate) fn is_mount_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Host, slot and card init, then register the card as the block device of
/// `drive`.
pub(crate) fn attach<H, F>(
    host: &mut H,
    fs: &mut F,
    drive: Drive,
    host_config: &HostConfig,
    slot_config: &SlotConfig,
) -> Result<CardInfo, ControllerError<H, F>>
where
    H: SdHost,
    F: FatFs,
{
    host.init()
        .map_err(ControllerError::<H, F>::CardInitFailure)?;
    host.init_slot(host_config.slot, slot_config)
        .map_err(ControllerError::<H, F>::CardInitFailure)?;
    let registers = host
        .init_card(host_config)
        .map_err(ControllerError::<H, F>::CardInitFailure)?;
    let info = CardInfo::decode(&registers).map_err(ControllerError::<H, F>::UnsupportedCard)?;
    debug!(
        "card on slot {} is {} sectors of {} bytes",
        host_config.slot,
        info.capacity().0,
        info.sector_size()
    );
    fs.register(drive, &info)
        .map_err(ControllerError::<H, F>::Filesystem)?;
    Ok(info)
}

/// Undo a failed [`attach`] and whatever was mounted after it. Errors are
/// logged, not returned.
pub(crate) fn detach<H, F>(host: &mut H, fs: &mut F, path: &str, drive: Drive, host_shared: bool)
where
    H: SdHost,
    F: FatFs,
{
    if let Err(e) = fs.unmount(path, drive) {
        debug!("nothing to unmount at {} ({:?})", path, dbg_fmt!(e));
    }
    fs.unregister(drive);
    if !host_shared {
        if let Err(e) = host.deinit() {
            warn!("host deinit failed ({:?})", dbg_fmt!(e));
        }
    }
}

/// Log a mount or format failure the way a user can act on it.
pub(crate) fn report<HE, FE>(e: &Error<HE, FE>)
where
    HE: Debug,
    FE: Debug,
{
    if let Error::MountFailure(_) = e {
        error!(
            "Failed to mount filesystem. If you want the card to be formatted, set format_if_mount_failed in the mount config."
        );
    } else if e.is_card_init() {
        error!(
            "Failed to initialize the card ({:?}). Make sure SD card lines have pull-up resistors in place.",
            dbg_fmt!(e)
        );
    } else {
        error!("SD card operation failed ({:?})", dbg_fmt!(e));
    }
}
