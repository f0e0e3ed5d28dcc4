//! sdmmc-mount - Block Device support
//!
//! Sector level access to a card. The driver stack owns the real block device
//! of a mounted card; this trait is what partition tables are read from and
//! written to, and what the simulated board keeps its card image behind.

mod block;
pub use block::*;

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read a single block.
    fn read_block(&mut self, block_idx: BlockIdx, reason: &str) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, reason)?;
        let [block] = blocks;
        Ok(block)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        (*self).read(blocks, start_block_idx, reason)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).write(blocks, start_block_idx)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        (*self).num_blocks()
    }
}

/// Raised when a [`MemoryBlockDevice`] access runs past the end of memory.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutOfRange {
    /// First block that does not exist.
    pub block_idx: BlockIdx,
}

/// A block device over a borrowed byte slice. Trailing bytes that do not make
/// up a whole block are ignored.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    fn block_range(&self, block_idx: u32) -> Result<core::ops::Range<usize>, OutOfRange> {
        let start = block_idx as usize * Block::LEN;
        let end = start + Block::LEN;
        if end > self.memory.len() {
            Err(OutOfRange {
                block_idx: BlockIdx(block_idx),
            })
        } else {
            Ok(start..end)
        }
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = OutOfRange;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter_mut().enumerate() {
            let range = self.block_range(start_block_idx.0 + idx as u32)?;
            block.contents.copy_from_slice(&self.memory[range]);
        }
        Ok(())
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter().enumerate() {
            let range = self.block_range(start_block_idx.0 + idx as u32)?;
            self.memory[range].copy_from_slice(&block.contents);
        }
        Ok(())
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.memory.len() / Block::LEN) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trips_a_block() {
        let mut memory = [0u8; 4 * Block::LEN];
        let mut bd = MemoryBlockDevice::new(&mut memory);
        let mut block = Block::new();
        block[0] = 0xA5;
        block[511] = 0x5A;
        bd.write(&[block.clone()], BlockIdx(2)).unwrap();
        assert_eq!(bd.read_block(BlockIdx(2), "test").unwrap(), block);
        assert_eq!(bd.read_block(BlockIdx(1), "test").unwrap(), Block::new());
    }

    #[test]
    fn memory_device_rejects_access_past_the_end() {
        let mut memory = [0u8; 2 * Block::LEN + 100];
        let mut bd = MemoryBlockDevice::new(&mut memory);
        assert_eq!(bd.num_blocks().unwrap(), BlockCount(2));
        assert_eq!(
            bd.read_block(BlockIdx(2), "test"),
            Err(OutOfRange {
                block_idx: BlockIdx(2)
            })
        );
        let blocks = [Block::new(), Block::new()];
        assert!(bd.write(&blocks, BlockIdx(1)).is_err());
    }
}
