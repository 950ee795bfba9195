//! The byte-level transport underneath the card protocol engine.
//!
//! The engine only ever talks to a [`Transport`]. The provided
//! [`SpiTransport`] drives an [`SpiBus`] and a chip-select [`OutputPin`]
//! directly, because an SD card wants a dummy byte clocked out *after*
//! chip-select goes high, which an `SpiDevice` cannot express.
//!
//! How bulk data moves (CPU polling or a DMA channel) is a capability chosen
//! when the transport is built. See [`BulkTransfer`].

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use super::Error;

/// The operations the card protocol engine needs from the bus.
///
/// None of these generate protocol-level errors; they only report a failure
/// of the underlying peripheral.
pub trait Transport {
    /// Send one byte and return the byte clocked in at the same time. Does
    /// not touch chip-select.
    fn exchange_byte(&mut self, out: u8) -> Result<u8, Error>;

    /// Fill `buffer` with bytes from the card, clocking out 0xFF.
    fn read_buffer(&mut self, buffer: &mut [u8]) -> Result<(), Error>;

    /// Send `buffer` to the card, ignoring what comes back.
    fn write_buffer(&mut self, buffer: &[u8]) -> Result<(), Error>;

    /// Assert chip-select, then clock one dummy byte.
    fn select(&mut self) -> Result<(), Error>;

    /// Deassert chip-select, then clock one dummy byte.
    fn release(&mut self) -> Result<(), Error>;

    /// Change the bus clock.
    fn set_clock(&mut self, hz: u32) -> Result<(), Error>;
}

/// Something that can change the clock rate of an SPI bus.
///
/// `embedded-hal` has no notion of bus speed, so the platform supplies this.
/// Cards must be initialised at 400 kHz or below and can then run at up to
/// 25 MHz.
pub trait BusClock<BUS> {
    /// The error type returned if the clock could not be changed.
    type Error: core::fmt::Debug;

    /// Reconfigure `bus` to run at (or below) `hz`.
    fn set_clock(&mut self, bus: &mut BUS, hz: u32) -> Result<(), Self::Error>;
}

/// A [`BusClock`] for buses with a fixed clock, which ignores requests.
///
/// Only suitable if the fixed clock is already slow enough for card
/// initialisation.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone)]
pub struct FixedClock;

impl<BUS> BusClock<BUS> for FixedClock {
    type Error = core::convert::Infallible;

    fn set_clock(&mut self, _bus: &mut BUS, _hz: u32) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// How multi-byte transfers are carried out.
///
/// Single bytes always go through the bus directly. Buffers (command frames,
/// register contents and data blocks) go through this capability.
pub trait BulkTransfer<BUS> {
    /// Replace the contents of `buffer` with bytes read from the bus. The
    /// buffer is pre-filled with 0xFF, which is what must be clocked out.
    fn read(&mut self, bus: &mut BUS, buffer: &mut [u8]) -> Result<(), Error>;

    /// Write `buffer` to the bus, discarding the bytes read back.
    fn write(&mut self, bus: &mut BUS, buffer: &[u8]) -> Result<(), Error>;
}

/// Bulk transfers carried out by the CPU, using the bus's own methods.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone)]
pub struct Polled;

impl<BUS> BulkTransfer<BUS> for Polled
where
    BUS: SpiBus<u8>,
{
    fn read(&mut self, bus: &mut BUS, buffer: &mut [u8]) -> Result<(), Error> {
        bus.transfer_in_place(buffer).map_err(|_e| Error::Transport)
    }

    fn write(&mut self, bus: &mut BUS, buffer: &[u8]) -> Result<(), Error> {
        bus.write(buffer).map_err(|_e| Error::Transport)
    }
}

/// A [`Transport`] over an exclusively owned SPI bus and chip-select pin.
pub struct SpiTransport<BUS, CS, CLK, X = Polled> {
    bus: BUS,
    cs: CS,
    clock: CLK,
    bulk: X,
}

impl<BUS, CS, CLK> SpiTransport<BUS, CS, CLK, Polled>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLK: BusClock<BUS>,
{
    /// Create a transport which moves bulk data by polling the bus.
    pub fn new(bus: BUS, cs: CS, clock: CLK) -> Self {
        Self::with_bulk(bus, cs, clock, Polled)
    }
}

impl<BUS, CS, CLK, X> SpiTransport<BUS, CS, CLK, X>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLK: BusClock<BUS>,
    X: BulkTransfer<BUS>,
{
    /// Create a transport with the given bulk-transfer capability.
    pub fn with_bulk(bus: BUS, cs: CS, clock: CLK, bulk: X) -> Self {
        SpiTransport {
            bus,
            cs,
            clock,
            bulk,
        }
    }

    /// Get a mutable borrow on the underlying SPI bus.
    pub fn bus_mut(&mut self) -> &mut BUS {
        &mut self.bus
    }

    /// Give back the parts this transport was built from.
    pub fn free(self) -> (BUS, CS, CLK, X) {
        (self.bus, self.cs, self.clock, self.bulk)
    }
}

impl<BUS, CS, CLK, X> Transport for SpiTransport<BUS, CS, CLK, X>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLK: BusClock<BUS>,
    X: BulkTransfer<BUS>,
{
    fn exchange_byte(&mut self, out: u8) -> Result<u8, Error> {
        let mut buf = [out];
        self.bus
            .transfer_in_place(&mut buf)
            .map_err(|_e| Error::Transport)?;
        Ok(buf[0])
    }

    fn read_buffer(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        buffer.fill(0xFF);
        self.bulk.read(&mut self.bus, buffer)
    }

    fn write_buffer(&mut self, buffer: &[u8]) -> Result<(), Error> {
        self.bulk.write(&mut self.bus, buffer)
    }

    fn select(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_e| Error::GpioError)?;
        self.exchange_byte(0xFF)?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), Error> {
        // The bus may still be shifting out the last byte
        let flush_res = self.bus.flush().map_err(|_e| Error::Transport);
        self.cs.set_high().map_err(|_e| Error::GpioError)?;
        flush_res?;
        // The card only lets go of MISO after seeing a clock with CS high
        self.exchange_byte(0xFF)?;
        Ok(())
    }

    fn set_clock(&mut self, hz: u32) -> Result<(), Error> {
        self.clock
            .set_clock(&mut self.bus, hz)
            .map_err(|_e| Error::ClockError)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
