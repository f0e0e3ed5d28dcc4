//! sdmmc-mount - Card descriptors
//!
//! Card initialization is done by the host driver, which hands back the raw
//! OCR/CID/CSD/SCR registers. This module turns them into a [`CardInfo`]:
//! geometry, identification and the speed the bus was brought up at.

mod cid;
mod csd;

pub use cid::{Cid, Scr};
pub use csd::{CardError, Csd, CsdV1, CsdV2};

use crate::config::HostConfig;
use crate::{Block, BlockCount};

#[cfg(feature = "log")]
use log::info;

#[cfg(feature = "defmt-log")]
use defmt::info;

/// Registers as read from the card during initialization, most significant
/// byte first.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardRegisters {
    pub ocr: u32,
    pub cid: [u8; 16],
    pub csd: [u8; 16],
    pub scr: [u8; 8],
    pub is_mmc: bool,
    /// Bus clock the host settled on, in kHz.
    pub max_freq_khz: u32,
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    /// Standard capacity SD card, byte addressed.
    Sdsc,
    /// High or eXtended capacity SD card, block addressed.
    Sdhc,
    Mmc,
}

impl CardKind {
    /// Card Capacity Status bit of the OCR.
    const OCR_CCS: u32 = 1 << 30;

    fn from_registers(registers: &CardRegisters) -> CardKind {
        if registers.is_mmc {
            CardKind::Mmc
        } else if registers.ocr & Self::OCR_CCS != 0 {
            CardKind::Sdhc
        } else {
            CardKind::Sdsc
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CardKind::Sdsc => "SDSC",
            CardKind::Sdhc => "SDHC/SDXC",
            CardKind::Mmc => "MMC",
        }
    }
}

/// Everything we know about an initialized card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    kind: CardKind,
    csd: Csd,
    cid: Cid,
    scr: Scr,
    max_freq_khz: u32,
    sector_size: usize,
    capacity: BlockCount,
}

impl CardInfo {
    pub fn decode(registers: &CardRegisters) -> Result<CardInfo, CardError> {
        let csd = Csd::from_bytes(registers.csd)?;
        let block_length = csd.read_block_length();
        if !(9..=11).contains(&block_length) {
            return Err(CardError::InvalidBlockLength(block_length));
        }
        let sector_size = core::cmp::min(1usize << block_length, Block::LEN);
        let sectors = csd.card_capacity_bytes() / sector_size as u64;
        let capacity =
            BlockCount(u32::try_from(sectors).map_err(|_| CardError::CapacityOverflow)?);
        Ok(CardInfo {
            kind: CardKind::from_registers(registers),
            csd,
            cid: Cid {
                data: registers.cid,
            },
            scr: Scr {
                data: registers.scr,
            },
            max_freq_khz: registers.max_freq_khz,
            sector_size,
            capacity,
        })
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    pub fn csd(&self) -> &Csd {
        &self.csd
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn scr(&self) -> &Scr {
        &self.scr
    }

    /// Native sector size in bytes.
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Capacity in native sectors.
    pub fn capacity(&self) -> BlockCount {
        self.capacity
    }

    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.capacity.0) * self.sector_size as u64
    }

    pub fn name(&self) -> &str {
        self.cid.product_name(self.kind == CardKind::Mmc)
    }

    pub fn max_freq_khz(&self) -> u32 {
        self.max_freq_khz
    }

    pub fn is_high_speed(&self) -> bool {
        self.max_freq_khz > HostConfig::FREQ_DEFAULT_KHZ
    }

    /// Dump the card descriptor to the log.
    pub fn log_info(&self) {
        let speed = if self.is_high_speed() {
            "high speed"
        } else {
            "default speed"
        };
        let csd_ver = match self.kind {
            CardKind::Mmc => self.csd.csd_ver(),
            _ => self.csd.csd_ver() + 1,
        };
        info!("Name: {}", self.name());
        info!("Type: {}", self.kind.label());
        info!("Speed: {} ({} kHz)", speed, self.max_freq_khz);
        info!("Size: {}MB", self.capacity_bytes() / (1024 * 1024));
        info!(
            "CSD: ver={}, sector_size={}, capacity={} read_bl_len={}",
            csd_ver,
            self.sector_size,
            self.capacity.0,
            self.csd.read_block_length()
        );
        info!(
            "SCR: sd_spec={}, bus_width={}",
            self.scr.sd_spec(),
            self.scr.bus_widths()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sdhc_registers() -> CardRegisters {
        CardRegisters {
            ocr: 0xC0FF_8000,
            cid: hex!("035344534331364780A1B2C3D4015A01"),
            csd: hex!("400E00325B5900003B377F800A404013"),
            scr: hex!("0235800000000000"),
            is_mmc: false,
            max_freq_khz: 40_000,
        }
    }

    #[test]
    fn decodes_sdhc_card() {
        let info = CardInfo::decode(&sdhc_registers()).unwrap();
        assert_eq!(info.kind(), CardKind::Sdhc);
        assert_eq!(info.name(), "SC16G");
        assert_eq!(info.sector_size(), 512);
        assert_eq!(info.capacity(), BlockCount(15_523_840));
        assert_eq!(info.capacity_bytes() / (1024 * 1024), 7580);
        assert!(info.is_high_speed());
        info.log_info();
    }

    #[test]
    fn sdsc_sectors_are_clamped_to_512_bytes() {
        let registers = CardRegisters {
            ocr: 0x80FF_8000,
            csd: hex!("002600325F5A83AEFEFBCFFF928040DF"),
            max_freq_khz: 20_000,
            ..sdhc_registers()
        };
        let info = CardInfo::decode(&registers).unwrap();
        assert_eq!(info.kind(), CardKind::Sdsc);
        assert_eq!(info.csd().read_block_length(), 10);
        assert_eq!(info.sector_size(), 512);
        assert_eq!(info.capacity(), BlockCount(3772 << 10));
        assert!(!info.is_high_speed());
    }

    #[test]
    fn unknown_csd_layout_is_an_error() {
        let registers = CardRegisters {
            csd: [0xC0; 16],
            ..sdhc_registers()
        };
        assert_eq!(
            CardInfo::decode(&registers),
            Err(CardError::UnsupportedCsdVersion(3))
        );
    }

    #[test]
    fn garbage_block_length_is_an_error() {
        let mut registers = CardRegisters {
            ocr: 0x80FF_8000,
            csd: hex!("002600325F5A83AEFEFBCFFF928040DF"),
            ..sdhc_registers()
        };
        registers.csd[5] = 0x52;
        assert_eq!(
            CardInfo::decode(&registers),
            Err(CardError::InvalidBlockLength(2))
        );
    }

    #[test]
    fn oversized_card_is_an_error() {
        let mut registers = sdhc_registers();
        // C_SIZE all ones: 2^22 * 512 KiB
        registers.csd[7] = 0x3F;
        registers.csd[8] = 0xFF;
        registers.csd[9] = 0xFF;
        assert_eq!(
            CardInfo::decode(&registers),
            Err(CardError::CapacityOverflow)
        );
    }
}
