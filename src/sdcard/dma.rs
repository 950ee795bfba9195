//! DMA-assisted bulk transfers.
//!
//! The platform starts a hardware transfer through [`DmaChannel`] and its
//! transfer-complete interrupt handler calls [`Signal::signal`] on the shared
//! signal. The caller of [`Dma`] still sees a blocking call: we spin on the
//! signal until it fires, or until the spin budget runs out, in which case
//! the transfer is aborted.
//!
//! ```rust,ignore
//! static DMA_DONE: Signal<CriticalSectionRawMutex, ()> = Signal::new();
//!
//! #[interrupt]
//! fn DMA1_STREAM3() {
//!     // acknowledge the interrupt, then
//!     DMA_DONE.signal(());
//! }
//!
//! let bulk = Dma::new(my_channel, &DMA_DONE);
//! let transport = SpiTransport::with_bulk(spi, cs, clock, bulk);
//! ```

use embassy_sync_06::{blocking_mutex::raw::RawMutex, signal::Signal};
use embedded_hal::spi::SpiBus;

use super::{transport::BulkTransfer, Error, Retry};
use crate::blockdevice::BLOCK_LEN;
use crate::{trace, warn};

/// Clocked out while reading, as the card expects.
static IDLE_FILL: [u8; BLOCK_LEN] = [0xFF; BLOCK_LEN];

/// A DMA channel pair (TX and RX) wired to the SPI peripheral.
pub trait DmaChannel {
    /// The error type returned if a transfer cannot be started.
    type Error: core::fmt::Debug;

    /// Start a full-duplex transfer of `tx.len()` bytes. `rx` is the same
    /// length.
    ///
    /// Completion is reported out of band, through the signal given to
    /// [`Dma::new`]. Both buffers stay borrowed until that signal has been
    /// observed, or until [`DmaChannel::abort`] has returned.
    fn start(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    /// Stop the transfer in progress, if any.
    ///
    /// Called when the completion signal did not arrive in time. When this
    /// returns the hardware must no longer touch either buffer given to
    /// [`DmaChannel::start`].
    fn abort(&mut self);
}

/// Bulk transfers carried out by a DMA channel.
pub struct Dma<'a, CH, M>
where
    M: RawMutex,
{
    channel: CH,
    done: &'a Signal<M, ()>,
    scratch: [u8; BLOCK_LEN],
    max_spins: u32,
}

impl<'a, CH, M> Dma<'a, CH, M>
where
    CH: DmaChannel,
    M: RawMutex,
{
    /// How many times we poll the completion signal before giving up on a
    /// transfer.
    pub const DEFAULT_MAX_SPINS: u32 = 1_000_000;

    /// Create a new DMA bulk-transfer capability.
    pub fn new(channel: CH, done: &'a Signal<M, ()>) -> Self {
        Self::with_max_spins(channel, done, Self::DEFAULT_MAX_SPINS)
    }

    /// Create a new DMA bulk-transfer capability with a custom spin budget.
    pub fn with_max_spins(channel: CH, done: &'a Signal<M, ()>, max_spins: u32) -> Self {
        Dma {
            channel,
            done,
            scratch: [0u8; BLOCK_LEN],
            max_spins,
        }
    }

    /// Give back the DMA channel.
    pub fn free(self) -> CH {
        self.channel
    }
}

/// Run one transfer to completion.
fn run<CH, M>(
    channel: &mut CH,
    done: &Signal<M, ()>,
    max_spins: u32,
    tx: &[u8],
    rx: &mut [u8],
) -> Result<(), Error>
where
    CH: DmaChannel,
    M: RawMutex,
{
    // A stale completion from an earlier transfer must not count
    done.reset();
    channel.start(tx, rx).map_err(|_e| Error::Transport)?;
    let mut spins = Retry::new(max_spins);
    while done.try_take().is_none() {
        if let Err(e) = spins.spend(Error::TimeoutDma) {
            warn!("DMA transfer of {} bytes never completed", tx.len());
            // The buffers are handed back to the caller on return
            channel.abort();
            return Err(e);
        }
        core::hint::spin_loop();
    }
    trace!("DMA transfer of {} bytes complete", tx.len());
    Ok(())
}

impl<BUS, CH, M> BulkTransfer<BUS> for Dma<'_, CH, M>
where
    BUS: SpiBus<u8>,
    CH: DmaChannel,
    M: RawMutex,
{
    fn read(&mut self, bus: &mut BUS, buffer: &mut [u8]) -> Result<(), Error> {
        bus.flush().map_err(|_e| Error::Transport)?;
        for chunk in buffer.chunks_mut(BLOCK_LEN) {
            let tx = &IDLE_FILL[..chunk.len()];
            run(&mut self.channel, self.done, self.max_spins, tx, chunk)?;
        }
        Ok(())
    }

    fn write(&mut self, bus: &mut BUS, buffer: &[u8]) -> Result<(), Error> {
        bus.flush().map_err(|_e| Error::Transport)?;
        for chunk in buffer.chunks(BLOCK_LEN) {
            let rx = &mut self.scratch[..chunk.len()];
            run(&mut self.channel, self.done, self.max_spins, chunk, rx)?;
        }
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
