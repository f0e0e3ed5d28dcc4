//! The card sitting in the simulated slot.

use std::collections::BTreeMap;

use crate::card::{CardRegisters, CsdV2};
use crate::config::PartitionLayout;
use crate::mbr::{self, Mbr, Partition, PartitionType};
use crate::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice, OutOfRange};

/// Identification the simulated card answers with: "SIMSD", rev 1.0,
/// made 2021-10.
const CID: [u8; 16] = [
    0x03, b'S', b'D', b'S', b'I', b'M', b'S', b'D', 0x10, 0x12, 0x34, 0x56, 0x78, 0x01, 0x5A, 0x01,
];

/// Physical layer 2.0, 1 and 4 bit bus.
const SCR: [u8; 8] = [0x02, 0x35, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00];

/// SDHC, powered up.
const OCR: u32 = 0xC0FF_8000;

/// Boot sector of a FAT32 volume, as far as the simulation cares.
struct BootSector {
    block: Block,
}

impl BootSector {
    const SIGNATURE: [u8; 2] = [0x55, 0xAA];
    const FS_TYPE: &'static [u8; 8] = b"FAT32   ";
    const RESERVED_SECTORS: u16 = 32;

    fn new(sectors_per_cluster: u8, total_sectors: u32) -> Self {
        let mut block = Block::new();
        block[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        block[3..11].copy_from_slice(b"SDMMCSIM");
        block[11..13].copy_from_slice(&(Block::LEN as u16).to_le_bytes());
        block[13] = sectors_per_cluster;
        block[14..16].copy_from_slice(&Self::RESERVED_SECTORS.to_le_bytes());
        block[16] = 2;
        block[21] = 0xF8;
        block[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        block[82..90].copy_from_slice(Self::FS_TYPE);
        block[510..512].copy_from_slice(&Self::SIGNATURE);
        BootSector { block }
    }

    fn is_valid(&self) -> bool {
        self.block[510..512] == Self::SIGNATURE && &self.block[82..90] == Self::FS_TYPE
    }

    fn bytes_per_sec(&self) -> u16 {
        u16::from_le_bytes([self.block[11], self.block[12]])
    }

    fn sec_per_clu(&self) -> u8 {
        self.block[13]
    }
}

/// An SDHC card: registers, a sector image and, once formatted, the files
/// on its FAT volume.
///
/// Files are kept by name next to the image rather than in FAT clusters.
#[derive(Debug, Clone)]
pub struct SimCard {
    registers: CardRegisters,
    image: Vec<u8>,
    files: BTreeMap<String, Vec<u8>>,
    needs_pullups: bool,
}

impl SimCard {
    /// Smallest card we simulate.
    pub const MIN_BLOCKS: u32 = 4096;
    /// First partition starts on this block, like most partitioners do.
    pub const PARTITION_ALIGN: u32 = 2048;

    /// A card that has never been partitioned. `blocks` is rounded up to
    /// what a version 2 CSD can describe.
    pub fn blank(blocks: u32) -> Self {
        let csd = CsdV2::for_capacity(blocks.max(Self::MIN_BLOCKS) + 1023);
        let capacity = csd.card_capacity_blocks();
        SimCard {
            registers: CardRegisters {
                ocr: OCR,
                cid: CID,
                csd: csd.data,
                scr: SCR,
                is_mmc: false,
                max_freq_khz: 20_000,
            },
            image: vec![0u8; capacity as usize * Block::LEN],
            files: BTreeMap::new(),
            needs_pullups: false,
        }
    }

    /// A card with one FAT32 partition spanning it and 4 KiB clusters.
    pub fn formatted(blocks: u32) -> Self {
        let mut card = Self::blank(blocks);
        card.partition(&PartitionLayout::WHOLE_CARD)
            .and_then(|_| card.format(8))
            .expect("a fresh image fits its own partition table");
        card
    }

    /// The card only answers when the slot's pull-ups are enabled.
    pub fn needing_pullups(mut self) -> Self {
        self.needs_pullups = true;
        self
    }

    /// Answer card init with these registers instead.
    pub fn with_registers(mut self, registers: CardRegisters) -> Self {
        self.registers = registers;
        self
    }

    pub fn registers(&self) -> &CardRegisters {
        &self.registers
    }

    pub fn needs_pullups(&self) -> bool {
        self.needs_pullups
    }

    pub fn num_blocks(&self) -> BlockCount {
        BlockCount((self.image.len() / Block::LEN) as u32)
    }

    pub fn device(&mut self) -> MemoryBlockDevice<'_> {
        MemoryBlockDevice::new(&mut self.image)
    }

    /// The partition table as it is on the card right now.
    pub fn partitions(&mut self) -> Result<[Option<Partition>; 4], mbr::Error<OutOfRange>> {
        Mbr::read_partitions(&mut self.device())
    }

    /// Cluster size of the FAT volume on the first partition, if there is
    /// one.
    pub fn cluster_size(&mut self) -> Option<usize> {
        let boot = self.boot_sector().ok()??;
        if boot.is_valid() {
            Some(boot.bytes_per_sec() as usize * boot.sec_per_clu() as usize)
        } else {
            None
        }
    }

    pub fn has_filesystem(&mut self) -> bool {
        self.cluster_size().is_some()
    }

    pub(crate) fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub(crate) fn files_mut(&mut self) -> &mut BTreeMap<String, Vec<u8>> {
        &mut self.files
    }

    /// Write a fresh MBR. Shares are percentages of the blocks after the
    /// aligned start.
    pub(crate) fn partition(
        &mut self,
        layout: &PartitionLayout,
    ) -> Result<(), mbr::Error<OutOfRange>> {
        let total = self.num_blocks().0;
        let usable = total.saturating_sub(Self::PARTITION_ALIGN) as u64;
        let mut partitions = [None; 4];
        let mut start = Self::PARTITION_ALIGN;
        for (slot, share) in partitions.iter_mut().zip(layout.shares().iter()) {
            if *share == 0 {
                continue;
            }
            let mut count = (usable * u64::from(*share) / 100) as u32;
            if *share == 100 || start + count > total {
                count = total - start;
            }
            *slot = Some(Partition {
                ty: PartitionType::Fat32Lba,
                lba_start: BlockIdx(start),
                block_count: BlockCount(count),
            });
            start += count;
        }
        Mbr::write_partitions(&mut self.device(), &partitions)?;
        self.files.clear();
        Ok(())
    }

    /// Lay a FAT32 boot sector on the first partition and drop every file.
    pub(crate) fn format(&mut self, sectors_per_cluster: u8) -> Result<(), mbr::Error<OutOfRange>> {
        let first = Mbr::read_partitions(&mut self.device())?[0]
            .ok_or(mbr::Error::<OutOfRange>::InvalidPartitionStatus)?;
        let boot = BootSector::new(sectors_per_cluster, first.block_count.0);
        self.device().write(&[boot.block], first.lba_start)?;
        self.files.clear();
        Ok(())
    }

    fn boot_sector(&mut self) -> Result<Option<BootSector>, mbr::Error<OutOfRange>> {
        let first = match Mbr::read_partitions(&mut self.device())?[0] {
            Some(partition) if partition.ty.is_fat() => partition,
            _ => return Ok(None),
        };
        let block = self.device().read_block(first.lba_start, "boot_sector")?;
        Ok(Some(BootSector { block }))
    }
}
