//! # embedded-sdspi
//!
//! > A block driver for SD and MMC cards in SPI mode, written in Embedded Rust
//!
//! This crate talks the SD simplified-SPI protocol to a card: power-up and
//! voltage negotiation, card type detection (MMC, SDv1, SDv2, SDHC, SDXC),
//! command framing, and single and multi-block reads and writes. It exposes
//! the card through the [`BlockDevice`] trait, which is what a filesystem
//! layer needs. It is `#![no_std]` and does not use `alloc`.
//!
//! ## Using the crate
//!
//! Build a [`SpiTransport`] from your SPI bus, the card's chip-select pin and
//! something that can change the bus clock, then hand it to [`SdCard`]:
//!
//! ```rust
//! use embedded_sdspi::{BlockDevice, Block, BlockIdx, FixedClock, SdCard, SdCardError, SpiTransport};
//!
//! fn example<S, CS>(spi: S, cs: CS) -> Result<(), SdCardError>
//! where
//!     S: embedded_hal::spi::SpiBus,
//!     CS: embedded_hal::digital::OutputPin,
//! {
//!     let sdcard = SdCard::new(SpiTransport::new(spi, cs, FixedClock));
//!     let info = sdcard.acquire()?;
//!     println!("Found {}", info);
//!     let mut blocks = [Block::new()];
//!     sdcard.read(&mut blocks, BlockIdx(0))?;
//!     println!("Boot signature: {:02x}{:02x}", blocks[0][510], blocks[0][511]);
//!     Ok(())
//! }
//! ```
//!
//! If your platform can move SPI data with DMA, use
//! [`SpiTransport::with_bulk`] with a `Dma` capability instead. The
//! protocol engine is the same either way.
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//! * `embassy-sync-06`: Enabled by default. Provides the `Dma` bulk-transfer
//!   capability, which waits on an `embassy-sync` signal.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod sdcard;

pub use crate::blockdevice::{
    Block, BlockCount, BlockDevice, BlockIdx, BLOCK_LEN, BLOCK_LEN_U32, BLOCK_LEN_U64,
};

pub use crate::sdcard::proto::{Cid, Csd, CsdV1, CsdV2, Ocr};
pub use crate::sdcard::transport::{BulkTransfer, BusClock, FixedClock, Polled, SpiTransport, Transport};
pub use crate::sdcard::{
    AcquireOpts, Addressing, CardInfo, CardType, Error as SdCardError, Retry, SdCard,
};

#[cfg(feature = "embassy-sync-06")]
pub use crate::sdcard::dma::{Dma, DmaChannel};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
