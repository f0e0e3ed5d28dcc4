//! sdmmc-mount - Card Identification and SD Configuration registers.

/// Card IDentification register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cid {
    pub data: [u8; 16],
}

impl Cid {
    const NAME_START: usize = 3;

    define_field!(manufacturer_id, u8, 0, 0, 8);
    define_field!(oem_id, u16, [(1, 0, 8), (2, 0, 8)]);
    define_field!(product_revision, u8, 8, 0, 8);
    define_field!(serial_number, u32, [(9, 0, 8), (10, 0, 8), (11, 0, 8), (12, 0, 8)]);
    define_field!(manufacture_year_offset, u8, [(13, 0, 4), (14, 4, 4)]);
    define_field!(manufacture_month, u8, 14, 0, 4);
    define_field!(crc, u8, 15, 1, 7);

    /// The product name. SD cards carry five characters, MMC cards six.
    /// Anything that is not ASCII comes back as `"?"`.
    pub fn product_name(&self, is_mmc: bool) -> &str {
        let len = if is_mmc { 6 } else { 5 };
        let name = &self.data[Self::NAME_START..Self::NAME_START + len];
        match core::str::from_utf8(name) {
            Ok(name) if name.is_ascii() => name.trim_end_matches(|c: char| c == ' ' || c == '\0'),
            _ => "?",
        }
    }

    pub fn manufacture_year(&self) -> u16 {
        2000 + u16::from(self.manufacture_year_offset())
    }
}

/// SD CARD Configuration Register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Scr {
    pub data: [u8; 8],
}

impl Scr {
    define_field!(scr_structure, u8, 0, 4, 4);
    define_field!(sd_spec, u8, 0, 0, 4);
    define_field!(data_stat_after_erase, bool, 1, 7);
    define_field!(sd_security, u8, 1, 4, 3);
    define_field!(bus_widths, u8, 1, 0, 4);

    /// Does the card accept a 4-bit data bus.
    pub fn supports_4bit(&self) -> bool {
        self.bus_widths() & 0b0100 != 0
    }
}
