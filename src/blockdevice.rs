//! Traits and types for working with Block Devices.
//!
//! Generic code for handling block devices, such as types for identifying
//! a particular block on a block device by its index, and the contract a
//! filesystem layer uses to drive one.

/// All our blocks are a fixed length of 512 bytes. SD and MMC cards in SPI
/// mode are always driven with 512 byte blocks (the block length is forced
/// with CMD16 on cards that might default to something else).
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// Sometimes we want `LEN` as a `u64` and the casts don't look nice.
pub const BLOCK_LEN_U64: u64 = 512;

/// A standard 512 byte block (also known as a sector).
///
/// This library does not support partial blocks, nor devices with a block
/// size other than 512 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    /// The 512 bytes in this block (or sector).
    pub contents: [u8; BLOCK_LEN],
}

impl Block {
    /// All our blocks are a fixed length of 512 bytes.
    pub const LEN: usize = BLOCK_LEN;

    /// Create a new block full of zeros.
    pub const fn new() -> Block {
        Block {
            contents: [0u8; BLOCK_LEN],
        }
    }

    /// Create a new block from the given bytes.
    pub const fn from_bytes(contents: [u8; BLOCK_LEN]) -> Block {
        Block { contents }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for Block {
    type Target = [u8; BLOCK_LEN];
    fn deref(&self) -> &[u8; BLOCK_LEN] {
        &self.contents
    }
}

impl core::ops::DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8; BLOCK_LEN] {
        &mut self.contents
    }
}

impl core::fmt::Debug for Block {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        writeln!(fmt, "Block:")?;
        for line in self.contents.chunks(32) {
            for b in line {
                write!(fmt, "{:02x}", b)?;
            }
            write!(fmt, " ")?;
            for &b in line {
                if (0x20..=0x7F).contains(&b) {
                    write!(fmt, "{}", b as char)?;
                } else {
                    write!(fmt, ".")?;
                }
            }
            writeln!(fmt)?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for Block {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Block {=[u8]:x}", &self.contents[..]);
    }
}

/// The linear numeric address of a block (or sector).
///
/// The first block on a disk gets `BlockIdx(0)` (which usually contains the
/// Master Boot Record).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub u32);

/// The a number of blocks (or sectors).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCount(pub u32);

impl BlockCount {
    /// How many blocks are required to hold this many bytes.
    ///
    /// ```
    /// # use embedded_sdspi::BlockCount;
    /// assert_eq!(BlockCount::from_bytes(511), BlockCount(1));
    /// assert_eq!(BlockCount::from_bytes(512), BlockCount(1));
    /// assert_eq!(BlockCount::from_bytes(513), BlockCount(2));
    /// ```
    pub const fn from_bytes(byte_count: u32) -> BlockCount {
        let mut count = byte_count / BLOCK_LEN_U32;
        if (count * BLOCK_LEN_U32) != byte_count {
            count += 1;
        }
        BlockCount(count)
    }
}

/// A block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
///
/// This is the contract a filesystem layer drives a card through. Any `Err`
/// is an I/O failure for that one operation; the caller decides whether to
/// re-issue it.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Bring the device into a state where blocks can be transferred.
    fn init(&self) -> Result<(), Self::Error>;
    /// Return the device to an idle state. The device must be initialised
    /// again before further transfers.
    fn deinit(&self) -> Result<(), Self::Error>;
    /// Succeeds if the device is initialised and ready for a transfer.
    fn status(&self) -> Result<(), Self::Error>;
    /// Read one or more blocks, starting at the given block index.
    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> Result<BlockCount, Self::Error>;
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
