//! embedded-sdspi - Constants from the SD Specifications
//!
//! Based on SdFat, under the following terms:
//!
//! > Copyright (c) 2011-2018 Bill Greiman
//! > This file is part of the SdFat library for SD memory cards.
//! >
//! > MIT License
//! >
//! > Permission is hereby granted, free of charge, to any person obtaining a
//! > copy of this software and associated documentation files (the "Software"),
//! > to deal in the Software without restriction, including without limitation
//! > the rights to use, copy, modify, merge, publish, distribute, sublicense,
//! > and/or sell copies of the Software, and to permit persons to whom the
//! > Software is furnished to do so, subject to the following conditions:
//! >
//! > The above copyright notice and this permission notice shall be included
//! > in all copies or substantial portions of the Software.
//! >
//! > THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//! > OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//! > FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//! > AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//! > LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//! > FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//! > DEALINGS IN THE SOFTWARE.

use byteorder::{BigEndian, ByteOrder};

//==============================================================================

// Possible errors the SD card can return

/// Card indicates last operation was a success
pub const ERROR_OK: u8 = 0x00;

//==============================================================================

// SD Card Commands

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - activate the initialisation process of an MMC card
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.*/
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SEND_CID - read the card identification information (CID register)
pub const CMD10: u8 = 0x0A;
/// STOP_TRANSMISSION - end multiple block read sequence
pub const CMD12: u8 = 0x0C;
/// SET_BLOCKLEN - set the block length used by standard capacity cards
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// CRC_ON_OFF - enable or disable CRC checking
pub const CMD59: u8 = 0x3B;
/// SET_WR_BLK_ERASE_COUNT - Set the number of write blocks to be
/// pre-erased before writing
pub const ACMD23: u8 = 0x17;
/// ACMD23 carries the block count in a 23 bit field
pub const ACMD23_MAX_BLOCKS: u32 = 0x7F_FFFF;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

//==============================================================================

/// Argument for CMD8: 2.7-3.6V supply, check pattern 0xAA. A v2 card echoes
/// it back unchanged.
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// Host Capacity Support bit for the ACMD41 argument
pub const ACMD41_HCS: u32 = 0x4000_0000;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// status bit for an erase sequence that was cleared before executing
pub const R1_ERASE_RESET: u8 = 0x02;

/// status bit for illegal command
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;

/// status bit for a command CRC check failure
pub const R1_COM_CRC_ERROR: u8 = 0x08;

/// status bit for an error in the sequence of erase commands
pub const R1_ERASE_SEQUENCE_ERROR: u8 = 0x10;

/// status bit for a misaligned address
pub const R1_ADDRESS_ERROR: u8 = 0x20;

/// status bit for an argument outside the allowed range
pub const R1_PARAMETER_ERROR: u8 = 0x40;

/// bit 7 is always zero in a valid R1 response
pub const R1_INVALID: u8 = 0x80;

/// start data token for read or write single block*/
pub const DATA_START_BLOCK: u8 = 0xFE;

/// stop token for write multiple blocks*/
pub const STOP_TRAN_TOKEN: u8 = 0xFD;

/// start data token for write multiple blocks*/
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// write data rejected due to a CRC error
pub const DATA_RES_CRC_ERROR: u8 = 0x0B;

/// write data rejected due to a write error
pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;

//==============================================================================

/// Card Specific Data, version 1
#[derive(Default, Clone, PartialEq, Eq)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2
#[derive(Default, Clone, PartialEq, Eq)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Csd {
    /// A version 1 CSD (standard capacity)
    V1(CsdV1),
    /// A version 2 CSD (high or extended capacity)
    V2(CsdV2),
}

impl Csd {
    /// Decode a raw CSD register.
    ///
    /// The structure version lives in the top two bits of the register, so
    /// the layout is picked from the data itself and not from the card type.
    /// Returns `None` for structure versions we cannot decode.
    pub fn from_bytes(data: [u8; 16]) -> Option<Csd> {
        match data[0] >> 6 {
            0 => Some(Csd::V1(CsdV1 { data })),
            1 => Some(Csd::V2(CsdV2 { data })),
            _ => None,
        }
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(contents) => contents.card_capacity_bytes(),
            Csd::V2(contents) => contents.card_capacity_bytes(),
        }
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(contents) => contents.card_capacity_blocks(),
            Csd::V2(contents) => contents.card_capacity_blocks(),
        }
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(contents) => contents.erase_single_block_enabled(),
            Csd::V2(contents) => contents.erase_single_block_enabled(),
        }
    }
}

impl CsdV1 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV1 {
        CsdV1::default()
    }

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
    define_field!(max_read_current_vdd_max, u8, 8, 0, 3);
    define_field!(max_read_current_vdd_min, u8, 8, 3, 3);
    define_field!(max_write_current_vdd_max, u8, 9, 2, 3);
    define_field!(max_write_current_vdd_min, u8, 9, 5, 3);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(file_format_group_set, bool, 14, 7);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    ///
    /// `(C_SIZE + 1) * 2^(C_SIZE_MULT + 2) * 2^READ_BL_LEN`
    pub fn card_capacity_bytes(&self) -> u64 {
        let multiplier =
            u32::from(self.device_size_multiplier()) + u32::from(self.read_block_length()) + 2;
        (u64::from(self.device_size()) + 1) << multiplier
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        blocks_for(self.card_capacity_bytes())
    }
}

impl core::fmt::Debug for CsdV1 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsdV1")
            .field("device_size", &self.device_size())
            .field("device_size_multiplier", &self.device_size_multiplier())
            .field("read_block_length", &self.read_block_length())
            .field("capacity", &self.card_capacity_bytes())
            .finish()
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for CsdV1 {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "CsdV1 {{ device_size: {}, multiplier: {}, read_bl_len: {} }}",
            self.device_size(),
            self.device_size_multiplier(),
            self.read_block_length()
        );
    }
}

impl CsdV2 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV2 {
        CsdV2::default()
    }

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
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(file_format_group_set, bool, 14, 7);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in KiB: `(C_SIZE + 1) * 512`
    pub fn card_capacity_kib(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        self.card_capacity_kib() * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        blocks_for(self.card_capacity_bytes())
    }
}

impl core::fmt::Debug for CsdV2 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsdV2")
            .field("device_size", &self.device_size())
            .field("capacity", &self.card_capacity_bytes())
            .finish()
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for CsdV2 {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "CsdV2 {{ device_size: {} }}", self.device_size());
    }
}

/// Whole blocks in `bytes`, capped at the 2 TiB a `u32` block index reaches.
fn blocks_for(bytes: u64) -> u32 {
    u32::try_from(bytes / crate::BLOCK_LEN_U64).unwrap_or(u32::MAX)
}

/// Card Identification register
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Cid {
    /// The 16-bytes of data in this Card Identification block
    pub data: [u8; 16],
}

impl Cid {
    /// Create a new, empty, CID
    pub fn new() -> Cid {
        Cid::default()
    }

    define_field!(manufacturer_id, u8, 0, 0, 8);
    define_field!(oem_id, u16, 1);
    define_field!(product_revision, u8, 8, 0, 8);
    define_field!(serial_number, u32, 9);
    define_field!(manufacturing_year_offset, u8, [(13, 0, 4), (14, 4, 4)]);
    define_field!(manufacturing_month, u8, 14, 0, 4);
    define_field!(crc, u8, 15, 1, 7);

    /// The five ASCII characters of the product name.
    pub fn product_name(&self) -> &[u8] {
        &self.data[3..8]
    }

    /// The product name, if it is valid UTF-8.
    pub fn product_name_str(&self) -> Option<&str> {
        core::str::from_utf8(self.product_name()).ok()
    }

    /// The manufacturing year, e.g. 2013.
    pub fn manufacturing_year(&self) -> u16 {
        2000 + u16::from(self.manufacturing_year_offset())
    }
}

impl core::fmt::Debug for Cid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cid")
            .field("manufacturer_id", &self.manufacturer_id())
            .field("oem_id", &self.oem_id())
            .field("product_name", &self.product_name_str())
            .field("product_revision", &self.product_revision())
            .field("serial_number", &self.serial_number())
            .field("year", &self.manufacturing_year())
            .field("month", &self.manufacturing_month())
            .finish()
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for Cid {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Cid {{ mid: {=u8:x}, serial: {=u32:x} }}",
            self.manufacturer_id(),
            self.serial_number()
        );
    }
}

/// Operating Conditions Register, as returned by CMD58
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// Decode the four bytes that follow the R1 of a CMD58.
    pub fn from_bytes(bytes: &[u8; 4]) -> Ocr {
        Ocr(BigEndian::read_u32(bytes))
    }

    /// The card has finished its power up routine.
    pub fn power_up_complete(&self) -> bool {
        (self.0 & (1 << 31)) != 0
    }

    /// Card Capacity Status: set for block-addressed (SDHC/SDXC) cards.
    pub fn card_capacity_status(&self) -> bool {
        (self.0 & (1 << 30)) != 0
    }

    /// The supported voltage window, bits 15..=23 (2.7V to 3.6V).
    pub fn voltage_window(&self) -> u16 {
        ((self.0 >> 15) & 0x1FF) as u16
    }
}

/// Build the six byte frame for a command.
///
/// The CRC is always computed, so the frame is valid whether or not the card
/// has CRC checking switched on.
pub fn command_frame(command: u8, arg: u32) -> [u8; 6] {
    let mut buf = [0x40 | command, 0, 0, 0, 0, 0];
    BigEndian::write_u32(&mut buf[1..5], arg);
    buf[5] = crc7(&buf[0..5]);
    buf
}

/// Perform the 7-bit CRC used on the SD card
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}

/// Perform the X25 CRC calculation, as used for data blocks.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
