//! sdmmc-mount - Drive numbers, card records and card handles
//!
//! Before anything touches the bus, a mount or format attempt reserves a
//! logical drive number, a card record and its own copy of the mount path.
//! The reservation is a [`Pending`] guard: if the attempt fails, dropping the
//! guard gives everything back.

use core::fmt::Write;

use crate::card::CardInfo;
use crate::SD_PATH_MAX;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// How many volumes can be mounted at the same time.
pub const MAX_DRIVES: usize = 2;

/// A mount path, owned independently of whatever buffer it was copied from.
pub type MountPath = heapless::String<SD_PATH_MAX>;

/// Raised by [`prepare_handle`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Every logical drive number is taken.
    ResourceExhausted,
    /// No room for the card record or the mount path copy.
    OutOfMemory,
}

/// A logical drive number.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Drive(u8);

impl Drive {
    pub fn new(number: u8) -> Option<Drive> {
        if (number as usize) < MAX_DRIVES {
            Some(Drive(number))
        } else {
            None
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// The drive as the filesystem layer spells it, e.g. `"0:"`.
    pub fn prefix(&self) -> heapless::String<4> {
        let mut prefix = heapless::String::new();
        // Four bytes always hold a u8 and a colon.
        let _ = write!(prefix, "{}:", self.0);
        prefix
    }
}

/// Pool of logical drive numbers.
#[derive(Debug, Default)]
pub struct DrivePool {
    in_use: [bool; MAX_DRIVES],
}

impl DrivePool {
    pub const fn new() -> Self {
        DrivePool {
            in_use: [false; MAX_DRIVES],
        }
    }

    /// Take the lowest free drive number.
    pub fn acquire(&mut self) -> Option<Drive> {
        let number = self.in_use.iter().position(|used| !used)?;
        self.in_use[number] = true;
        Some(Drive(number as u8))
    }

    pub fn release(&mut self, drive: Drive) {
        self.in_use[drive.0 as usize] = false;
    }

    pub fn free(&self) -> usize {
        self.in_use.iter().filter(|used| !**used).count()
    }
}

/// Bookkeeping for one card, from reservation until unmount.
#[derive(Debug, Clone)]
pub struct CardRecord {
    id: u32,
    drive: Drive,
    path: MountPath,
    info: Option<CardInfo>,
}

impl CardRecord {
    const fn zeroed(id: u32, drive: Drive) -> Self {
        CardRecord {
            id,
            drive,
            path: MountPath::new(),
            info: None,
        }
    }

    pub fn drive(&self) -> Drive {
        self.drive
    }

    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// `None` until the card has been initialized.
    pub fn info(&self) -> Option<&CardInfo> {
        self.info.as_ref()
    }
}

/// Handle to a mounted card.
///
/// Not `Clone`: give it back to the controller exactly once to unmount.
#[must_use = "dropping a CardHandle leaves the card mounted"]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub struct CardHandle {
    id: u32,
    index: usize,
    drive: Drive,
}

impl CardHandle {
    pub fn drive(&self) -> Drive {
        self.drive
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }
}

/// Fixed capacity table of card records.
#[derive(Debug)]
pub struct CardTable<const N: usize> {
    records: [Option<CardRecord>; N],
    next_id: u32,
}

impl<const N: usize> CardTable<N> {
    const EMPTY_RECORD: Option<CardRecord> = None;

    pub const fn new() -> Self {
        CardTable {
            records: [Self::EMPTY_RECORD; N],
            next_id: 0,
        }
    }

    pub fn get(&self, index: usize) -> Option<&CardRecord> {
        self.records.get(index)?.as_ref()
    }

    /// The record behind `handle`, if the handle belongs to this table.
    pub(crate) fn lookup(&self, handle: &CardHandle) -> Option<&CardRecord> {
        self.get(handle.index()).filter(|record| record.id == handle.id())
    }

    /// Index of the record mounted at `path`.
    pub fn find_path(&self, path: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| matches!(record, Some(record) if record.path.as_str() == path))
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<CardRecord> {
        self.records.get_mut(index)?.take()
    }

    pub fn in_use(&self) -> usize {
        self.records.iter().filter(|record| record.is_some()).count()
    }

    /// Claim a free record for `drive`. Returns its index and id.
    fn allocate(&mut self, drive: Drive) -> Option<(usize, u32)> {
        let index = self.records.iter().position(|record| record.is_none())?;
        self.next_id = self.next_id.wrapping_add(1);
        self.records[index] = Some(CardRecord::zeroed(self.next_id, drive));
        Some((index, self.next_id))
    }

    fn record_mut(&mut self, index: usize) -> Option<&mut CardRecord> {
        self.records.get_mut(index)?.as_mut()
    }
}

impl<const N: usize> Default for CardTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A drive and card record reserved for a mount or format attempt.
///
/// Dropping it without calling [`Pending::commit`] releases both.
pub struct Pending<'a, const N: usize> {
    drives: &'a mut DrivePool,
    cards: &'a mut CardTable<N>,
    drive: Drive,
    index: usize,
    id: u32,
    committed: bool,
}

impl<'a, const N: usize> Pending<'a, N> {
    pub fn drive(&self) -> Drive {
        self.drive
    }

    /// The owned copy of the mount path.
    pub fn path(&self) -> &str {
        self.cards.get(self.index).map_or("", |record| record.path())
    }

    /// Attach the card descriptor and hand out the handle. The drive and
    /// record now stay reserved until the handle is unmounted.
    pub fn commit(mut self, info: CardInfo) -> CardHandle {
        if let Some(record) = self.cards.record_mut(self.index) {
            record.info = Some(info);
        }
        self.committed = true;
        CardHandle {
            id: self.id,
            index: self.index,
            drive: self.drive,
        }
    }
}

impl<'a, const N: usize> Drop for Pending<'a, N> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.cards.take(self.index);
        self.drives.release(self.drive);
    }
}

/// Reserve a drive number and a card record, and copy `base_path` into the
/// record.
pub fn prepare_handle<'a, const N: usize>(
    drives: &'a mut DrivePool,
    cards: &'a mut CardTable<N>,
    base_path: &str,
) -> Result<Pending<'a, N>, AllocError> {
    let drive = match drives.acquire() {
        Some(drive) => drive,
        None => {
            debug!("the maximum count of volumes is already mounted");
            return Err(AllocError::ResourceExhausted);
        }
    };
    let (index, id) = match cards.allocate(drive) {
        Some(slot) => slot,
        None => {
            debug!("could not allocate a card record");
            drives.release(drive);
            return Err(AllocError::OutOfMemory);
        }
    };
    let pending = Pending {
        drives,
        cards,
        drive,
        index,
        id,
        committed: false,
    };

    let path = match MountPath::try_from(base_path) {
        Ok(path) => path,
        Err(()) => {
            debug!("could not copy base_path");
            return Err(AllocError::OutOfMemory);
        }
    };
    if let Some(record) = pending.cards.record_mut(index) {
        record.path = path;
    }

    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_hands_out_lowest_free_drive() {
        let mut pool = DrivePool::new();
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!((first.number(), second.number()), (0, 1));
        assert_eq!(pool.acquire(), None);
        pool.release(first);
        assert_eq!(pool.free(), 1);
        assert_eq!(pool.acquire(), Some(first));
        assert_eq!(second.prefix().as_str(), "1:");
        assert_eq!(Drive::new(MAX_DRIVES as u8), None);
    }

    #[test]
    fn dropped_reservation_releases_everything() {
        let mut drives = DrivePool::new();
        let mut cards = CardTable::<1>::new();
        {
            let pending = prepare_handle(&mut drives, &mut cards, "/sdcard").unwrap();
            assert_eq!(pending.path(), "/sdcard");
            assert_eq!(pending.drive().number(), 0);
        }
        assert_eq!(drives.free(), MAX_DRIVES);
        assert_eq!(cards.in_use(), 0);
    }

    #[test]
    fn exhausted_pool_is_reported() {
        let mut drives = DrivePool::new();
        while drives.acquire().is_some() {}
        let mut cards = CardTable::<1>::new();
        assert_eq!(
            prepare_handle(&mut drives, &mut cards, "/sdcard").err(),
            Some(AllocError::ResourceExhausted)
        );
        assert_eq!(cards.in_use(), 0);
    }

    #[test]
    fn full_table_releases_the_drive() {
        let mut drives = DrivePool::new();
        let mut cards = CardTable::<0>::new();
        assert_eq!(
            prepare_handle(&mut drives, &mut cards, "/sdcard").err(),
            Some(AllocError::OutOfMemory)
        );
        assert_eq!(drives.free(), MAX_DRIVES);
    }

    #[test]
    fn oversized_path_releases_drive_and_record() {
        let mut drives = DrivePool::new();
        let mut cards = CardTable::<1>::new();
        let long = [b'a'; SD_PATH_MAX + 1];
        let long = core::str::from_utf8(&long).unwrap();
        assert_eq!(
            prepare_handle(&mut drives, &mut cards, long).err(),
            Some(AllocError::OutOfMemory)
        );
        assert_eq!(drives.free(), MAX_DRIVES);
        assert_eq!(cards.in_use(), 0);
    }

    #[test]
    fn committed_handle_keeps_its_reservation() {
        let mut drives = DrivePool::new();
        let mut cards = CardTable::<2>::new();
        let registers = crate::card::CardRegisters {
            ocr: 0xC0FF_8000,
            cid: [0x20; 16],
            csd: crate::card::CsdV2::for_capacity(2048).data,
            scr: [0; 8],
            is_mmc: false,
            max_freq_khz: 20_000,
        };
        let info = CardInfo::decode(&registers).unwrap();
        let handle = prepare_handle(&mut drives, &mut cards, "/sdcard")
            .unwrap()
            .commit(info);
        assert_eq!(drives.free(), MAX_DRIVES - 1);
        let record = cards.lookup(&handle).unwrap();
        assert_eq!(record.path(), "/sdcard");
        assert_eq!(record.info(), Some(&info));
        assert_eq!(cards.find_path("/sdcard"), Some(handle.index()));
        assert_eq!(cards.find_path("/other"), None);
    }
}
