//! sdmmc-mount - Master Boot Record
//!
//! Decodes and encodes the four primary partition entries of an MBR. The
//! driver stack writes the table when a card is partitioned; this module is
//! how the result is inspected.

use crate::{Block, BlockCount, BlockDevice, BlockIdx};
use core::convert::TryInto;
use core::fmt::Debug;

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum Error<BlockDeviceError>
where
    BlockDeviceError: Debug,
{
    DeviceError(BlockDeviceError),
    InvalidMbrSignature,
    InvalidPartitionStatus,
    InfoTooShort,
}

impl<BDE> From<BDE> for Error<BDE>
where
    BDE: Debug,
{
    fn from(e: BDE) -> Self {
        Self::DeviceError(e)
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionNumber {
    One,
    Two,
    Three,
    Four,
}

impl PartitionNumber {
    pub const ALL: [PartitionNumber; 4] = [Self::One, Self::Two, Self::Three, Self::Four];

    pub fn from_number(number: usize) -> Option<Self> {
        let partition = match number {
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            _ => return None,
        };
        Some(partition)
    }

    fn info_start(self) -> usize {
        let index = match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Three => 2,
            Self::Four => 3,
        };
        Mbr::PARTITION1_START + index * Partition::PARTITION_INFO_LENGTH
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionType {
    Empty,
    Fat32ChsLba,
    Fat32Lba,
    Fat16Lba,
    Fat16,
    Unknown(u8),
}

impl PartitionType {
    const EMPTY: u8 = 0x00;
    /// Marker for a FAT32 partition. What Macosx disk utility (and also SD-Card formatter?)
    /// use.
    const FAT32_CHS_LBA: u8 = 0x0B;
    /// Marker for a FAT32 partition. Sometimes also use for FAT16 formatted
    /// partitions.
    const FAT32_LBA: u8 = 0x0C;
    /// Marker for a FAT16 partition with LBA. Seen on a Raspberry Pi SD card.
    const FAT16_LBA: u8 = 0x0E;
    /// Marker for a FAT16 partition. Seen on a card formatted with the official
    /// SD-Card formatter.
    const FAT16: u8 = 0x06;

    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::EMPTY => Self::Empty,
            Self::FAT32_CHS_LBA => Self::Fat32ChsLba,
            Self::FAT32_LBA => Self::Fat32Lba,
            Self::FAT16_LBA => Self::Fat16Lba,
            Self::FAT16 => Self::Fat16,
            _ => Self::Unknown(value),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Empty => Self::EMPTY,
            Self::Fat32ChsLba => Self::FAT32_CHS_LBA,
            Self::Fat32Lba => Self::FAT32_LBA,
            Self::Fat16Lba => Self::FAT16_LBA,
            Self::Fat16 => Self::FAT16,
            Self::Unknown(value) => value,
        }
    }

    pub fn is_fat(self) -> bool {
        !matches!(self, Self::Empty | Self::Unknown(_))
    }
}

/// One primary partition entry.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Partition {
    pub ty: PartitionType,
    pub lba_start: BlockIdx,
    pub block_count: BlockCount,
}

impl Partition {
    const STATUS_IDX: usize = 0;
    const TYPE_IDX: usize = 4;
    const LBA_START_IDX: usize = 8;
    const NUM_BLOCKS_IDX: usize = 12;
    pub(crate) const PARTITION_INFO_LENGTH: usize = 16;

    /// Decode a 16 byte partition entry. Empty entries decode to `None`.
    pub fn from_info<E>(info: &[u8]) -> Result<Option<Self>, Error<E>>
    where
        E: Debug,
    {
        if info.len() != Self::PARTITION_INFO_LENGTH {
            return Err(Error::InfoTooShort);
        }

        let pstatus = info[Self::STATUS_IDX];
        if pstatus != 0x80 && pstatus != 0x00 {
            return Err(Error::InvalidPartitionStatus);
        }

        let ty = PartitionType::from_u8(info[Self::TYPE_IDX]);
        if ty == PartitionType::Empty {
            return Ok(None);
        }

        let lba_start = u32::from_le_bytes(
            info[Self::LBA_START_IDX..Self::LBA_START_IDX + 4]
                .try_into()
                .expect("Infallible"),
        );

        let num_blocks = u32::from_le_bytes(
            info[Self::NUM_BLOCKS_IDX..Self::NUM_BLOCKS_IDX + 4]
                .try_into()
                .expect("Infallible"),
        );

        Ok(Some(Partition {
            ty,
            lba_start: BlockIdx(lba_start),
            block_count: BlockCount(num_blocks),
        }))
    }

    /// Encode this entry. CHS fields are left zero, LBA addressing only.
    pub fn write_info(&self, info: &mut [u8]) {
        info.fill(0);
        info[Self::TYPE_IDX] = self.ty.to_u8();
        info[Self::LBA_START_IDX..Self::LBA_START_IDX + 4]
            .copy_from_slice(&self.lba_start.0.to_le_bytes());
        info[Self::NUM_BLOCKS_IDX..Self::NUM_BLOCKS_IDX + 4]
            .copy_from_slice(&self.block_count.0.to_le_bytes());
    }

    /// One past the last block of this partition.
    pub fn end(&self) -> BlockIdx {
        self.lba_start + self.block_count
    }
}

pub struct Mbr;

impl Mbr {
    const FOOTER_START: usize = 510;
    const FOOTER_VALUE: u16 = 0xAA55;
    const PARTITION1_START: usize = 446;

    /// Read a single partition entry from block 0.
    pub fn read_partition<BlockDev>(
        block_dev: &mut BlockDev,
        partition_num: PartitionNumber,
    ) -> Result<Option<Partition>, Error<BlockDev::Error>>
    where
        BlockDev: BlockDevice,
    {
        let block = Self::read_mbr(block_dev)?;
        let start = partition_num.info_start();
        Partition::from_info(&block[start..start + Partition::PARTITION_INFO_LENGTH])
    }

    /// Read all four partition entries from block 0.
    pub fn read_partitions<BlockDev>(
        block_dev: &mut BlockDev,
    ) -> Result<[Option<Partition>; 4], Error<BlockDev::Error>>
    where
        BlockDev: BlockDevice,
    {
        let block = Self::read_mbr(block_dev)?;
        let mut partitions = [None; 4];
        for (slot, number) in partitions.iter_mut().zip(PartitionNumber::ALL.iter()) {
            let start = number.info_start();
            *slot = Partition::from_info::<BlockDev::Error>(
                &block[start..start + Partition::PARTITION_INFO_LENGTH],
            )?;
        }
        Ok(partitions)
    }

    /// Write a fresh MBR holding `partitions` to block 0. Boot code is zeroed.
    pub fn write_partitions<BlockDev>(
        block_dev: &mut BlockDev,
        partitions: &[Option<Partition>; 4],
    ) -> Result<(), Error<BlockDev::Error>>
    where
        BlockDev: BlockDevice,
    {
        let mut block = Block::new();
        for (partition, number) in partitions.iter().zip(PartitionNumber::ALL.iter()) {
            if let Some(partition) = partition {
                let start = number.info_start();
                partition.write_info(&mut block[start..start + Partition::PARTITION_INFO_LENGTH]);
            }
        }
        block[Self::FOOTER_START..Self::FOOTER_START + 2]
            .copy_from_slice(&Self::FOOTER_VALUE.to_le_bytes());
        block_dev.write(&[block], BlockIdx(0))?;
        Ok(())
    }

    fn read_mbr<BlockDev>(block_dev: &mut BlockDev) -> Result<Block, Error<BlockDev::Error>>
    where
        BlockDev: BlockDevice,
    {
        let block = block_dev.read_block(BlockIdx(0), "read_mbr")?;

        let footer = u16::from_le_bytes(
            block[Self::FOOTER_START..Self::FOOTER_START + 2]
                .try_into()
                .expect("Infallible"),
        );

        if footer != Self::FOOTER_VALUE {
            return Err(Error::InvalidMbrSignature);
        }
        Ok(block)
    }
}
