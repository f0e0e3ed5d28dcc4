//! sdmmc-mount - Simulated driver stack
//!
//! [`SimBoard`] stands in for a host controller with one slot, the FAT layer
//! and the file API on top of it. The card is a [`SimCard`]: an in-memory
//! sector image whose partition table and boot sector are real, and whose
//! files are kept by name.
//!
//! The traits are implemented for `&SimBoard`, so one board can serve as
//! host, filesystem layer and file API at the same time and still be
//! inspected by the test that owns it.

mod card;

pub use card::SimCard;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::card::{CardInfo, CardRegisters};
use crate::config::{HostConfig, PartitionLayout, SlotConfig, SlotFlags};
use crate::handle::{Drive, MAX_DRIVES};
use crate::host::{FatFs, FsMountError, MountMode, SdHost};
use crate::mbr;
use crate::vfs::{Mode, Vfs};
use crate::{Block, OutOfRange};

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// Calls into the simulated driver stack, in the order they were made.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimStep {
    HostInit,
    SlotInit,
    CardInit,
    Register,
    Unregister,
    Mount,
    Partition,
    Format,
    Unmount,
    HostDeinit,
    Open,
    Write,
    Read,
    Remove,
    Rename,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum SimError {
    /// Nothing in the slot
    NoCard,
    /// The card did not answer, typically because the lines float
    Timeout,
    HostNotInitialized,
    SlotNotInitialized,
    CardNotInitialized,
    /// No block device behind the drive
    NotRegistered,
    /// No volume mounted at the path
    NotMounted,
    /// The mounted volume holds no filesystem
    NoFilesystem,
    InvalidArgument,
    NoSuchFile,
    AlreadyExists,
    TooManyOpenFiles,
    /// Wrong direction for the file's open mode
    BadMode,
    Disk(mbr::Error<OutOfRange>),
    /// Failure requested through [`SimBoard::fail_on`]
    Injected(SimStep),
}

impl From<mbr::Error<OutOfRange>> for SimError {
    fn from(e: mbr::Error<OutOfRange>) -> Self {
        SimError::Disk(e)
    }
}

#[derive(Debug, Clone)]
struct Binding {
    path: String,
    drive: Drive,
    max_files: usize,
}

/// A file opened through [`Vfs::open`] on a `&SimBoard`.
///
/// Writes are buffered and land on the card when the file is closed.
#[derive(Debug)]
pub struct SimFile {
    name: String,
    mode: Mode,
    data: Vec<u8>,
    pos: usize,
}

/// Host controller, FAT layer and file API in one.
#[derive(Debug, Default)]
pub struct SimBoard {
    card: RefCell<Option<SimCard>>,
    host_up: Cell<bool>,
    slot: Cell<Option<SlotConfig>>,
    card_ready: Cell<bool>,
    registered: Cell<[bool; MAX_DRIVES]>,
    bindings: RefCell<Vec<Binding>>,
    open_files: Cell<usize>,
    fail_at: Cell<Option<SimStep>>,
    calls: RefCell<Vec<SimStep>>,
}

impl SimBoard {
    pub fn new(card: SimCard) -> Self {
        let board = Self::default();
        board.insert_card(card);
        board
    }

    /// A board with an empty slot.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert_card(&self, card: SimCard) {
        self.card.replace(Some(card));
    }

    /// Make every call of `step` fail until [`SimBoard::clear_fault`].
    pub fn fail_on(&self, step: SimStep) {
        self.fail_at.set(Some(step));
    }

    pub fn clear_fault(&self) {
        self.fail_at.set(None);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<SimStep> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn is_host_up(&self) -> bool {
        self.host_up.get()
    }

    pub fn registered_drives(&self) -> usize {
        self.registered.get().iter().filter(|r| **r).count()
    }

    /// Paths with a volume mounted on them.
    pub fn mount_points(&self) -> Vec<String> {
        self.bindings
            .borrow()
            .iter()
            .map(|binding| binding.path.clone())
            .collect()
    }

    pub fn open_files(&self) -> usize {
        self.open_files.get()
    }

    /// Run `f` on the card in the slot.
    pub fn with_card<R>(&self, f: impl FnOnce(&mut SimCard) -> R) -> Option<R> {
        self.card.borrow_mut().as_mut().map(f)
    }

    /// Make the card's volume visible at `path` without going through card
    /// init.
    pub fn bind_mount(&self, path: &str) {
        self.bindings.borrow_mut().push(Binding {
            path: path.to_string(),
            drive: Drive::new(0).expect("drive 0 always exists"),
            max_files: 5,
        });
    }

    /// Contents of the file at the absolute `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let (name, _) = self.resolve(path).ok()?;
        self.with_card(|card| card.files().get(&name).cloned())?
    }

    /// Put a file at the absolute `path`, bypassing open file limits.
    pub fn put_file(&self, path: &str, data: &[u8]) {
        if let Ok((name, _)) = self.resolve(path) {
            self.with_card(|card| card.files_mut().insert(name, data.to_vec()));
        }
    }

    fn step(&self, step: SimStep) -> Result<(), SimError> {
        self.calls.borrow_mut().push(step);
        if self.fail_at.get() == Some(step) {
            debug!("injected failure at {:?}", step);
            Err(SimError::Injected(step))
        } else {
            Ok(())
        }
    }

    fn is_registered(&self, drive: Drive) -> bool {
        self.registered.get()[drive.number() as usize]
    }

    fn set_registered(&self, drive: Drive, registered: bool) {
        let mut drives = self.registered.get();
        drives[drive.number() as usize] = registered;
        self.registered.set(drives);
    }

    fn registered_card<R>(
        &self,
        drive: Drive,
        f: impl FnOnce(&mut SimCard) -> Result<R, SimError>,
    ) -> Result<R, SimError> {
        if !self.is_registered(drive) {
            return Err(SimError::NotRegistered);
        }
        self.with_card(f).unwrap_or(Err(SimError::NoCard))
    }

    /// Split an absolute path into the file name on the volume and the open
    /// file limit of the mount it falls under.
    fn resolve(&self, path: &str) -> Result<(String, usize), SimError> {
        let bindings = self.bindings.borrow();
        let binding = bindings
            .iter()
            .find(|binding| {
                path.strip_prefix(binding.path.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
            })
            .ok_or(SimError::NotMounted)?;
        let name = &path[binding.path.len() + 1..];
        if name.is_empty() || name.contains('/') {
            return Err(SimError::InvalidArgument);
        }
        Ok((name.to_string(), binding.max_files))
    }

    /// Like [`SimBoard::resolve`], and the volume must hold a filesystem.
    fn resolve_file(&self, path: &str) -> Result<(String, usize), SimError> {
        let resolved = self.resolve(path)?;
        match self.with_card(|card| card.has_filesystem()) {
            Some(true) => Ok(resolved),
            Some(false) => Err(SimError::NoFilesystem),
            None => Err(SimError::NoCard),
        }
    }
}

impl SdHost for &SimBoard {
    type Error = SimError;

    fn init(&mut self) -> Result<(), SimError> {
        self.step(SimStep::HostInit)?;
        self.host_up.set(true);
        Ok(())
    }

    fn init_slot(&mut self, slot: u8, config: &SlotConfig) -> Result<(), SimError> {
        self.step(SimStep::SlotInit)?;
        if !self.host_up.get() {
            return Err(SimError::HostNotInitialized);
        }
        if slot > HostConfig::SLOT_1 {
            return Err(SimError::InvalidArgument);
        }
        self.slot.set(Some(*config));
        Ok(())
    }

    fn init_card(&mut self, config: &HostConfig) -> Result<CardRegisters, SimError> {
        self.step(SimStep::CardInit)?;
        let slot = self.slot.get().ok_or(SimError::SlotNotInitialized)?;
        let card = self.card.borrow();
        let card = card.as_ref().ok_or(SimError::NoCard)?;
        if card.needs_pullups() && !slot.flags.contains(SlotFlags::INTERNAL_PULLUP) {
            return Err(SimError::Timeout);
        }
        let mut registers = *card.registers();
        registers.max_freq_khz = registers.max_freq_khz.min(config.max_freq_khz);
        self.card_ready.set(true);
        Ok(registers)
    }

    fn deinit(&mut self) -> Result<(), SimError> {
        self.step(SimStep::HostDeinit)?;
        self.host_up.set(false);
        self.slot.set(None);
        self.card_ready.set(false);
        Ok(())
    }
}

impl FatFs for &SimBoard {
    type Error = SimError;

    fn register(&mut self, drive: Drive, _card: &CardInfo) -> Result<(), SimError> {
        self.step(SimStep::Register)?;
        if !self.card_ready.get() {
            return Err(SimError::CardNotInitialized);
        }
        self.set_registered(drive, true);
        Ok(())
    }

    fn unregister(&mut self, drive: Drive) {
        self.calls.borrow_mut().push(SimStep::Unregister);
        self.set_registered(drive, false);
    }

    fn partition(
        &mut self,
        drive: Drive,
        layout: &PartitionLayout,
        work: &mut [u8],
    ) -> Result<(), SimError> {
        self.step(SimStep::Partition)?;
        if work.len() < Block::LEN || layout.validate().is_err() {
            return Err(SimError::InvalidArgument);
        }
        self.registered_card(drive, |card| Ok(card.partition(layout)?))
    }

    fn allocation_unit_size(&self, sector_size: usize, requested: usize) -> usize {
        let max_size = sector_size * 128;
        sector_size.max(requested.min(max_size))
    }

    fn format(
        &mut self,
        drive: Drive,
        allocation_unit_size: usize,
        work: &mut [u8],
    ) -> Result<(), SimError> {
        self.step(SimStep::Format)?;
        if work.len() < Block::LEN {
            return Err(SimError::InvalidArgument);
        }
        let sectors_per_cluster = (allocation_unit_size / Block::LEN).clamp(1, 128) as u8;
        self.registered_card(drive, |card| Ok(card.format(sectors_per_cluster)?))
    }

    fn mount(
        &mut self,
        path: &str,
        drive: Drive,
        max_files: usize,
        mode: MountMode,
    ) -> Result<(), FsMountError<SimError>> {
        self.step(SimStep::Mount)?;
        let has_filesystem = self.registered_card(drive, |card| Ok(card.has_filesystem()))?;
        if mode == MountMode::Immediate && !has_filesystem {
            return Err(FsMountError::NoFilesystem);
        }
        let mut bindings = self.bindings.borrow_mut();
        bindings.retain(|binding| binding.path != path);
        bindings.push(Binding {
            path: path.to_string(),
            drive,
            max_files,
        });
        Ok(())
    }

    fn unmount(&mut self, path: &str, drive: Drive) -> Result<(), SimError> {
        self.step(SimStep::Unmount)?;
        let mut bindings = self.bindings.borrow_mut();
        let before = bindings.len();
        bindings.retain(|binding| !(binding.path == path && binding.drive == drive));
        if bindings.len() == before {
            Err(SimError::NotMounted)
        } else {
            Ok(())
        }
    }
}

impl Vfs for &SimBoard {
    type Error = SimError;
    type File = SimFile;

    fn open(&mut self, path: &str, mode: Mode) -> Result<SimFile, SimError> {
        self.step(SimStep::Open)?;
        let (name, max_files) = self.resolve_file(path)?;
        if self.open_files.get() >= max_files {
            return Err(SimError::TooManyOpenFiles);
        }
        let data = match mode {
            Mode::Read => self
                .with_card(|card| card.files().get(&name).cloned())
                .flatten()
                .ok_or(SimError::NoSuchFile)?,
            Mode::WriteTruncate => {
                self.with_card(|card| card.files_mut().insert(name.clone(), Vec::new()));
                Vec::new()
            }
        };
        self.open_files.set(self.open_files.get() + 1);
        Ok(SimFile {
            name,
            mode,
            data,
            pos: 0,
        })
    }

    fn write(&mut self, file: &mut SimFile, data: &[u8]) -> Result<usize, SimError> {
        self.step(SimStep::Write)?;
        if file.mode != Mode::WriteTruncate {
            return Err(SimError::BadMode);
        }
        file.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, file: &mut SimFile, buf: &mut [u8]) -> Result<usize, SimError> {
        self.step(SimStep::Read)?;
        if file.mode != Mode::Read {
            return Err(SimError::BadMode);
        }
        let remaining = &file.data[file.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        file.pos += n;
        Ok(n)
    }

    fn close(&mut self, file: SimFile) -> Result<(), SimError> {
        self.open_files.set(self.open_files.get().saturating_sub(1));
        if file.mode == Mode::WriteTruncate {
            let SimFile { name, data, .. } = file;
            self.with_card(|card| card.files_mut().insert(name, data))
                .ok_or(SimError::NoCard)?;
        }
        Ok(())
    }

    fn exists(&mut self, path: &str) -> bool {
        match self.resolve_file(path) {
            Ok((name, _)) => self
                .with_card(|card| card.files().contains_key(&name))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn remove(&mut self, path: &str) -> Result<(), SimError> {
        self.step(SimStep::Remove)?;
        let (name, _) = self.resolve_file(path)?;
        self.with_card(|card| card.files_mut().remove(&name))
            .flatten()
            .map(|_| ())
            .ok_or(SimError::NoSuchFile)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SimError> {
        self.step(SimStep::Rename)?;
        let (from, _) = self.resolve_file(from)?;
        let (to, _) = self.resolve_file(to)?;
        self.with_card(|card| {
            let files = card.files_mut();
            if files.contains_key(&to) {
                return Err(SimError::AlreadyExists);
            }
            let data = files.remove(&from).ok_or(SimError::NoSuchFile)?;
            files.insert(to, data);
            Ok(())
        })
        .unwrap_or(Err(SimError::NoCard))
    }
}

/// Files on the card as a sorted name to contents map.
pub fn snapshot(board: &SimBoard) -> BTreeMap<String, Vec<u8>> {
    board
        .with_card(|card| card.files().clone())
        .unwrap_or_default()
}
