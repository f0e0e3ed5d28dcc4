//! sdmmc-mount - Host, slot and mount configuration
//!
//! The defaults mirror what an SDMMC host driver uses out of the box. The
//! demo configuration narrows the bus to four data lines and turns on the
//! internal pull-ups.

use crate::Block;

bitflags::bitflags! {
    /// What the host controller is able to do.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct HostFlags: u32 {
        /// Host can drive a 1-bit data bus.
        const BIT1 = 1 << 0;
        /// Host can drive a 4-bit data bus.
        const BIT4 = 1 << 1;
        /// Host can drive an 8-bit data bus.
        const BIT8 = 1 << 2;
        /// Host talks to the card over SPI.
        const SPI = 1 << 3;
        /// Host supports double data rate.
        const DDR = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Per-slot options.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct SlotFlags: u32 {
        /// Enable the internal pull-ups on the CMD and DAT lines. Not a
        /// replacement for external resistors, but enough for a bench setup.
        const INTERNAL_PULLUP = 1 << 0;
    }
}

/// Raised by the `validate` methods.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one file must be allowed open at a time.
    MaxFiles,
    /// Allocation unit must be a power of two of at least one sector.
    AllocationUnit(usize),
    /// The slot asks for a bus width the host does not drive.
    BusWidth(BusWidth),
    /// Partition shares must add up to at most 100 %.
    PartitionLayout,
}

/// Host controller configuration.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub flags: HostFlags,
    /// Which host slot the card sits in.
    pub slot: u8,
    pub max_freq_khz: u32,
    pub io_voltage_mv: u16,
    /// Zero leaves the driver's own timeout in place.
    pub command_timeout_ms: u32,
}

impl HostConfig {
    pub const SLOT_0: u8 = 0;
    pub const SLOT_1: u8 = 1;

    /// Default speed mode clock.
    pub const FREQ_DEFAULT_KHZ: u32 = 20_000;

    pub fn is_spi(&self) -> bool {
        self.flags.contains(HostFlags::SPI)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            flags: HostFlags::BIT1 | HostFlags::BIT4 | HostFlags::BIT8 | HostFlags::DDR,
            slot: Self::SLOT_1,
            max_freq_khz: Self::FREQ_DEFAULT_KHZ,
            io_voltage_mv: 3300,
            command_timeout_ms: 0,
        }
    }
}

/// Number of data lines used between host and card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusWidth {
    /// Widest bus the slot supports.
    SlotDefault,
    One,
    Four,
    Eight,
}

impl BusWidth {
    pub fn lines(self) -> Option<u8> {
        match self {
            BusWidth::SlotDefault => None,
            BusWidth::One => Some(1),
            BusWidth::Four => Some(4),
            BusWidth::Eight => Some(8),
        }
    }
}

/// Slot configuration.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    pub width: BusWidth,
    /// Card detect GPIO, if wired.
    pub card_detect: Option<u8>,
    /// Write protect GPIO, if wired.
    pub write_protect: Option<u8>,
    pub flags: SlotFlags,
}

impl SlotConfig {
    /// Four data lines with the internal pull-ups enabled.
    pub fn four_bit_with_pullups() -> Self {
        SlotConfig::default()
            .with_width(BusWidth::Four)
            .with_flags(SlotFlags::INTERNAL_PULLUP)
    }

    pub fn with_width(mut self, width: BusWidth) -> Self {
        self.width = width;
        self
    }

    /// Adds to the flags already set.
    pub fn with_flags(mut self, flags: SlotFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn validate(&self, host: &HostConfig) -> Result<(), ConfigError> {
        let supported = match self.width {
            BusWidth::SlotDefault => true,
            BusWidth::One => host.flags.contains(HostFlags::BIT1) || host.is_spi(),
            BusWidth::Four => host.flags.contains(HostFlags::BIT4),
            BusWidth::Eight => host.flags.contains(HostFlags::BIT8),
        };
        if supported {
            Ok(())
        } else {
            Err(ConfigError::BusWidth(self.width))
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        SlotConfig {
            width: BusWidth::SlotDefault,
            card_detect: None,
            write_protect: None,
            flags: SlotFlags::empty(),
        }
    }
}

/// How the filesystem gets mounted.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Partition and format the card when it holds no filesystem. Destroys
    /// whatever was on it.
    pub format_if_mount_failed: bool,
    /// Maximum number of files open at the same time.
    pub max_files: usize,
    /// Requested cluster size in bytes. The filesystem layer clamps it to
    /// what the card geometry allows.
    pub allocation_unit_size: usize,
}

impl MountConfig {
    pub const DEFAULT_MAX_FILES: usize = 5;
    pub const DEFAULT_ALLOCATION_UNIT_SIZE: usize = 16 * 1024;

    pub fn with_format_if_mount_failed(mut self, format: bool) -> Self {
        self.format_if_mount_failed = format;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_files == 0 {
            return Err(ConfigError::MaxFiles);
        }
        let au = self.allocation_unit_size;
        if !au.is_power_of_two() || au < Block::LEN {
            return Err(ConfigError::AllocationUnit(au));
        }
        Ok(())
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            format_if_mount_failed: false,
            max_files: Self::DEFAULT_MAX_FILES,
            allocation_unit_size: Self::DEFAULT_ALLOCATION_UNIT_SIZE,
        }
    }
}

/// Share of the card, in percent, given to each of the four primary
/// partitions. A zero share leaves the entry empty.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionLayout(pub [u8; 4]);

impl PartitionLayout {
    /// One partition over the whole card.
    pub const WHOLE_CARD: PartitionLayout = PartitionLayout([100, 0, 0, 0]);

    pub fn shares(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let total: u32 = self.0.iter().map(|share| u32::from(*share)).sum();
        if total == 0 || total > 100 {
            Err(ConfigError::PartitionLayout)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_values() {
        let mount = MountConfig::default();
        assert!(!mount.format_if_mount_failed);
        assert_eq!(mount.max_files, 5);
        assert_eq!(mount.allocation_unit_size, 16384);
        assert_eq!(mount.validate(), Ok(()));

        let slot = SlotConfig::four_bit_with_pullups();
        assert_eq!(slot.width.lines(), Some(4));
        assert!(slot.flags.contains(SlotFlags::INTERNAL_PULLUP));
        assert_eq!(slot.validate(&HostConfig::default()), Ok(()));

        let host = HostConfig::default();
        assert_eq!(host.slot, HostConfig::SLOT_1);
        assert_eq!(host.max_freq_khz, 20_000);
    }

    #[test]
    fn rejects_odd_allocation_units() {
        for au in [0, 256, 3000, 16385] {
            let config = MountConfig {
                allocation_unit_size: au,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::AllocationUnit(au)));
        }
        let config = MountConfig {
            max_files: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MaxFiles));
    }

    #[test]
    fn bus_width_must_be_driven_by_the_host() {
        let host = HostConfig {
            flags: HostFlags::BIT1 | HostFlags::BIT4,
            ..Default::default()
        };
        let slot = SlotConfig::default().with_width(BusWidth::Eight);
        assert_eq!(
            slot.validate(&host),
            Err(ConfigError::BusWidth(BusWidth::Eight))
        );
        let spi = HostConfig {
            flags: HostFlags::SPI,
            ..Default::default()
        };
        assert_eq!(
            SlotConfig::default().with_width(BusWidth::One).validate(&spi),
            Ok(())
        );
    }

    #[test]
    fn partition_layout_shares() {
        assert_eq!(PartitionLayout::WHOLE_CARD.validate(), Ok(()));
        assert_eq!(
            PartitionLayout([60, 50, 0, 0]).validate(),
            Err(ConfigError::PartitionLayout)
        );
        assert_eq!(
            PartitionLayout([0; 4]).validate(),
            Err(ConfigError::PartitionLayout)
        );
    }
}
