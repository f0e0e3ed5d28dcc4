//! sdmmc-mount - Card Specific Data register.

/// Card Specific Data, version 1 (Standard Capacity cards).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2 (High Capacity and eXtended Capacity cards).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// A Card Specific Data register of either version.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Raised when the card registers describe something we cannot use.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardError {
    /// CSD_STRUCTURE names a layout we cannot decode
    UnsupportedCsdVersion(u8),
    /// READ_BL_LEN outside of 512 to 2048 bytes
    InvalidBlockLength(u8),
    /// More sectors than a 32 bit sector count holds
    CapacityOverflow,
}

impl Csd {
    /// Pick the layout from the CSD_STRUCTURE field.
    pub fn from_bytes(data: [u8; 16]) -> Result<Csd, CardError> {
        match data[0] >> 6 {
            0 => Ok(Csd::V1(CsdV1 { data })),
            1 => Ok(Csd::V2(CsdV2 { data })),
            other => Err(CardError::UnsupportedCsdVersion(other)),
        }
    }

    pub fn csd_ver(&self) -> u8 {
        match self {
            Csd::V1(csd) => csd.csd_ver(),
            Csd::V2(csd) => csd.csd_ver(),
        }
    }

    pub fn read_block_length(&self) -> u8 {
        match self {
            Csd::V1(csd) => csd.read_block_length(),
            Csd::V2(csd) => csd.read_block_length(),
        }
    }

    pub fn max_data_transfer_rate(&self) -> u8 {
        match self {
            Csd::V1(csd) => csd.max_data_transfer_rate(),
            Csd::V2(csd) => csd.max_data_transfer_rate(),
        }
    }

    pub fn card_command_classes(&self) -> u16 {
        match self {
            Csd::V1(csd) => csd.card_command_classes(),
            Csd::V2(csd) => csd.card_command_classes(),
        }
    }

    /// Capacity in 512 byte sectors.
    pub fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }

    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_bytes(),
            Csd::V2(csd) => csd.card_capacity_bytes(),
        }
    }

    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.erase_single_block_enabled(),
            Csd::V2(csd) => csd.erase_single_block_enabled(),
        }
    }
}

impl CsdV1 {
    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(write_block_misalignment, bool, 6, 6);
    define_field!(read_block_misalignment, bool, 6, 5);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format_group_set, bool, 14, 7);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let multiplier = self.device_size_multiplier() + self.read_block_length() + 2;
        (u64::from(self.device_size()) + 1) << multiplier
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.card_capacity_bytes() / 512) as u32
    }
}

impl CsdV2 {
    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(write_block_misalignment, bool, 6, 6);
    define_field!(read_block_misalignment, bool, 6, 5);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format_group_set, bool, 14, 7);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.device_size() + 1) * 1024
    }

    /// Build a CSD for a high capacity card of `blocks` 512-byte sectors,
    /// rounded down to whole 512 KiB units.
    pub fn for_capacity(blocks: u32) -> CsdV2 {
        let device_size = (blocks / 1024).saturating_sub(1);
        let mut data = [
            0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x00, 0x00, 0x7F, 0x80, 0x0A, 0x40,
            0x00, 0x01,
        ];
        data[7] = ((device_size >> 16) & 0x3F) as u8;
        data[8] = (device_size >> 8) as u8;
        data[9] = device_size as u8;
        CsdV2 { data }
    }
}
