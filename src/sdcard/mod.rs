//! Implements the BlockDevice trait for an SD/MMC card in SPI mode.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

pub mod proto;
pub mod transport;

#[cfg(feature = "embassy-sync-06")]
pub mod dma;

use core::cell::RefCell;

use byteorder::{BigEndian, ByteOrder};

use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx, BLOCK_LEN_U32};
use proto::*;
use transport::Transport;

// ****************************************************************************
// Imports
// ****************************************************************************

use crate::{debug, trace, warn};

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// Driver for an SD or MMC card on an SPI bus.
///
/// Built from a [`Transport`], which owns the bus, the chip-select pin, the
/// bus clock and the choice between polled and DMA transfers.
///
/// The card must be initialised with [`BlockDevice::init`] (or
/// [`SdCard::acquire`]) before blocks can be transferred. Until then, block
/// operations return [`Error::BadState`].
///
/// All the APIs take `&self` - mutability is handled using an inner `RefCell`.
pub struct SdCard<T>
where
    T: Transport,
{
    inner: RefCell<SdCardInner<T>>,
}

impl<T> SdCard<T>
where
    T: Transport,
{
    /// Create a new SD/MMC Card driver over the given transport.
    ///
    /// The card will not be initialised at this time.
    ///
    /// Uses the default options.
    pub fn new(transport: T) -> SdCard<T> {
        Self::new_with_options(transport, AcquireOpts::default())
    }

    /// Create a new SD/MMC Card driver over the given transport, using the
    /// given options.
    ///
    /// The card will not be initialised at this time.
    pub fn new_with_options(transport: T, options: AcquireOpts) -> SdCard<T> {
        SdCard {
            inner: RefCell::new(SdCardInner {
                transport,
                card_info: None,
                options,
            }),
        }
    }

    /// Get a temporary borrow on the underlying transport.
    ///
    /// The given closure will be called exactly once, and will be passed a
    /// mutable reference to the transport. Does not perform card
    /// initialisation.
    pub fn transport<R, F>(&self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut inner = self.inner.borrow_mut();
        func(&mut inner.transport)
    }

    /// Run the card initialisation sequence, returning what we found.
    ///
    /// Any previous card information is forgotten first, so on failure the
    /// card is left uninitialised.
    pub fn acquire(&self) -> Result<CardInfo, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.acquire()
    }

    /// Get the information gathered when the card was initialised.
    pub fn card_info(&self) -> Option<CardInfo> {
        self.inner.borrow().card_info
    }

    /// Get the card type, if the card has been initialised.
    pub fn get_card_type(&self) -> Option<CardType> {
        self.card_info().map(|info| info.card_type)
    }

    /// Read the Card Identification register.
    pub fn read_cid(&self) -> Result<Cid, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_init()?;
        let mut cid = Cid::new();
        inner.read_register(CMD10, &mut cid.data)?;
        debug!("CID: {:?}", cid);
        Ok(cid)
    }

    /// Read the Card Specific Data register.
    pub fn read_csd(&self) -> Result<Csd, Error> {
        let mut inner = self.inner.borrow_mut();
        let info = inner.check_init()?;
        inner.read_csd(info.card_type)
    }

    /// Return the usable size of this card in bytes.
    pub fn num_bytes(&self) -> Result<u64, Error> {
        let inner = self.inner.borrow();
        Ok(inner.check_init()?.capacity)
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&self) -> Result<bool, Error> {
        Ok(self.read_csd()?.erase_single_block_enabled())
    }

    /// Mark the card as requiring a reset.
    ///
    /// Block operations will fail until the card is initialised again.
    pub fn mark_card_uninit(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.card_info = None;
    }

    /// Tell the driver the card has been initialised.
    ///
    /// This is here in case you were previously using the SD Card, and then a
    /// previous instance of this object got destroyed but you know for certain
    /// the SD Card remained powered up and initialised, and you'd just like to
    /// read/write to/from the card again without going through the
    /// initialisation sequence again.
    ///
    /// # Safety
    ///
    /// Only do this if the SD Card has actually been initialised, and the
    /// given information matches it. The addressing mode used for every
    /// transfer is taken from `info.card_type`, so getting it wrong will
    /// corrupt data on the card.
    pub unsafe fn mark_card_as_init(&self, info: CardInfo) {
        let mut inner = self.inner.borrow_mut();
        inner.card_info = Some(info);
    }

    /// Give back the transport.
    pub fn free(self) -> T {
        self.inner.into_inner().transport
    }
}

impl<T> BlockDevice for SdCard<T>
where
    T: Transport,
{
    type Error = Error;

    /// Run the card initialisation sequence.
    fn init(&self) -> Result<(), Self::Error> {
        self.acquire().map(|_info| ())
    }

    /// Put the card back in the idle state and forget about it.
    fn deinit(&self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.deinit()
    }

    /// Succeeds if the card is initialised and not busy.
    fn status(&self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.status()
    }

    /// Read one or more blocks, starting at the given block index.
    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Read {} blocks @ {}", blocks.len(), start_block_idx.0);
        inner.read(blocks, start_block_idx)
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Writing {} blocks @ {}", blocks.len(), start_block_idx.0);
        inner.write(blocks, start_block_idx)
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        let inner = self.inner.borrow();
        Ok(BlockCount(inner.check_init()?.block_count))
    }
}

/// Inner details for the SD Card driver.
///
/// All the APIs required `&mut self`.
struct SdCardInner<T>
where
    T: Transport,
{
    transport: T,
    card_info: Option<CardInfo>,
    options: AcquireOpts,
}

impl<T> SdCardInner<T>
where
    T: Transport,
{
    /// Check the card is initialised.
    fn check_init(&self) -> Result<CardInfo, Error> {
        self.card_info.ok_or(Error::BadState)
    }

    /// Read one or more blocks, starting at the given block index.
    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let info = self.check_init()?;
        if blocks.is_empty() {
            return Ok(());
        }
        let address = info.card_type.addressing().address(start_block_idx)?;
        let result = if blocks.len() == 1 {
            self.read_single(&mut blocks[0], address)
        } else {
            self.read_multi(blocks, address)
        };
        let released = self.transport.release();
        result.and(released)
    }

    fn read_single(&mut self, block: &mut Block, address: u32) -> Result<(), Error> {
        let r1 = self.card_command(CMD17, address)?;
        if r1 != R1_READY_STATE {
            return Err(Error::CommandRejected(CMD17, r1));
        }
        self.receive_block(&mut block.contents)
    }

    fn read_multi(&mut self, blocks: &mut [Block], address: u32) -> Result<(), Error> {
        let result = match self.card_command(CMD18, address) {
            // The card never came ready, so the command frame was not sent
            Err(Error::TimeoutWaitNotBusy) => return Err(Error::TimeoutWaitNotBusy),
            Ok(R1_READY_STATE) => self.receive_blocks(blocks),
            Ok(r1) => Err(Error::CommandRejected(CMD18, r1)),
            Err(e) => Err(e),
        };
        // The card may be streaming even if we never saw its R1
        let stopped = self.card_command(CMD12, 0).map(|_r1| ());
        result.and(stopped)
    }

    fn receive_blocks(&mut self, blocks: &mut [Block]) -> Result<(), Error> {
        for (_idx, block) in blocks.iter_mut().enumerate() {
            if let Err(e) = self.receive_block(&mut block.contents) {
                warn!("Multi-block read failed at block {}: {:?}", _idx, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let info = self.check_init()?;
        if blocks.is_empty() {
            return Ok(());
        }
        let address = info.card_type.addressing().address(start_block_idx)?;
        let result = if blocks.len() == 1 {
            self.write_single(&blocks[0], address)
        } else {
            self.write_multi(info.card_type, blocks, address)
        };
        let released = self.transport.release();
        result.and(released)
    }

    fn write_single(&mut self, block: &Block, address: u32) -> Result<(), Error> {
        let err = match self.card_command(CMD24, address) {
            Ok(R1_READY_STATE) => return self.send_block(DATA_START_BLOCK, &block.contents),
            Ok(r1) => Error::CommandRejected(CMD24, r1),
            Err(e) => e,
        };
        warn!("Write command failed ({:?}), re-initialising card", err);
        if let Err(_e) = self.acquire() {
            warn!("Re-initialisation failed: {:?}", _e);
        }
        Err(err)
    }

    fn write_multi(
        &mut self,
        card_type: CardType,
        blocks: &[Block],
        address: u32,
    ) -> Result<(), Error> {
        if card_type != CardType::MMC {
            // > It is recommended using this command preceding CMD25, some of
            // > the cards will be faster for Multiple Write Blocks operation.
            let _r1 = self.card_acmd(ACMD23, pre_erase_count(blocks.len()))?;
            trace!("ACMD23 -> {:x}", _r1);
        }
        let r1 = self.card_command(CMD25, address)?;
        if r1 != R1_READY_STATE {
            return Err(Error::CommandRejected(CMD25, r1));
        }
        let mut result = Ok(());
        for (_idx, block) in blocks.iter().enumerate() {
            if let Err(e) = self.send_block(WRITE_MULTIPLE_TOKEN, &block.contents) {
                warn!("Multi-block write failed at block {}: {:?}", _idx, e);
                result = Err(e);
                break;
            }
        }
        let stopped = self.send_stop_token();
        result.and(stopped)
    }

    /// Read the 'card specific data' block.
    fn read_csd(&mut self, card_type: CardType) -> Result<Csd, Error> {
        let mut data = [0u8; 16];
        self.read_register(CMD9, &mut data)?;
        let csd = match card_type {
            // MMC cards use the version 1 layout whatever CSD_STRUCTURE says
            CardType::MMC => Csd::V1(CsdV1 { data }),
            _ => Csd::from_bytes(data).ok_or(Error::RegisterReadError)?,
        };
        debug!("CSD: {:?}", csd);
        Ok(csd)
    }

    /// Read a 16 byte register (CSD or CID), which arrives as a data block.
    fn read_register(&mut self, command: u8, data: &mut [u8; 16]) -> Result<(), Error> {
        let result = match self.card_command(command, 0) {
            Ok(R1_READY_STATE) => self.receive_block(data),
            Ok(_r1) => Err(Error::RegisterReadError),
            Err(e) => Err(e),
        };
        let released = self.transport.release();
        result.and(released)
    }

    /// Succeeds if the card is initialised and ready for a command.
    fn status(&mut self) -> Result<(), Error> {
        self.check_init()?;
        self.transport.select()?;
        let ready = self.wait_ready();
        let released = self.transport.release();
        ready.and(released)
    }

    /// Return the card to the idle state and forget everything we know
    /// about it.
    fn deinit(&mut self) -> Result<(), Error> {
        debug!("De-initialising card");
        self.card_info = None;
        self.transport.release()?;
        for _ in 0..16 {
            self.transport.exchange_byte(0xFF)?;
        }
        let mut attempts = Retry::new(self.options.acquire_retries);
        loop {
            match self.card_command(CMD0, 0) {
                Ok(R1_IDLE_STATE) => break,
                Ok(_r1) => {
                    warn!("Got response: {:x}, trying again..", _r1);
                }
                Err(Error::TimeoutCommand(CMD0)) => {
                    warn!("Timed out, trying again..");
                }
                Err(e) => return Err(e),
            }
            if attempts.spend(Error::CardNotFound).is_err() {
                warn!("Card did not return to the idle state");
                break;
            }
        }
        self.transport.release()
    }

    /// Initializes the card into a known state (or at least tries to).
    fn acquire(&mut self) -> Result<CardInfo, Error> {
        debug!("acquiring card with opts: {:?}", self.options);
        self.card_info = None;
        self.transport.set_clock(self.options.init_clock_hz)?;
        self.transport.release()?;
        // At least 74 clocks with CS high puts the card in native mode
        for _ in 0..10 {
            self.transport.exchange_byte(0xFF)?;
        }
        let classified = self.classify();
        let released = self.transport.release();
        let card_type = classified?;
        released?;
        debug!("Card version: {:?}", card_type);

        self.transport.set_clock(self.options.clock_hz)?;

        let csd = self.read_csd(card_type)?;
        let capacity = csd.card_capacity_bytes();
        let info = CardInfo {
            card_type: card_type.with_capacity(capacity),
            capacity,
            block_size: BLOCK_LEN_U32,
            block_count: csd.card_capacity_blocks(),
        };
        debug!("Card info: {:?}", info);
        self.card_info = Some(info);
        Ok(info)
    }

    /// Reset the card into SPI mode and work out what it is.
    fn classify(&mut self) -> Result<CardType, Error> {
        trace!("Reset card..");
        let mut attempts = Retry::new(self.options.acquire_retries);
        for _attempt in 1.. {
            trace!("Enter SPI mode, attempt: {}..", _attempt);
            match self.card_command(CMD0, 0) {
                Ok(R1_IDLE_STATE) => break,
                Ok(_r1) => {
                    warn!("Got response: {:x}, trying again..", _r1);
                }
                Err(Error::TimeoutCommand(CMD0)) => {
                    warn!("Timed out, trying again..");
                }
                Err(e) => return Err(e),
            }
            attempts.spend(Error::CardNotFound)?;
        }

        // "The SPI interface is initialized in the CRC OFF mode in default"
        // -- SD Part 1 Physical Layer Specification v9.00, Section 7.2.2 Bus Transfer Protection
        debug!("Enable CRC: {}", self.options.use_crc);
        if self.options.use_crc && self.card_command(CMD59, 1)? != R1_IDLE_STATE {
            return Err(Error::CantEnableCRC);
        }

        match self.card_command(CMD8, IF_COND_ARG) {
            Ok(R1_IDLE_STATE) => self.negotiate_v2(),
            Ok(_r1) => {
                debug!("CMD8 rejected with {:x}, assuming v1 card", _r1);
                self.negotiate_v1()
            }
            Err(Error::TimeoutCommand(CMD8)) => {
                debug!("No answer to CMD8, assuming v1 card");
                self.negotiate_v1()
            }
            Err(e) => Err(e),
        }
    }

    /// The card accepted CMD8, so it is an SD card of version 2 or later.
    fn negotiate_v2(&mut self) -> Result<CardType, Error> {
        let mut echo = [0xFF; 4];
        self.transport.read_buffer(&mut echo)?;
        if BigEndian::read_u32(&echo) != IF_COND_ARG {
            warn!("Bad CMD8 echo: {:?}", echo);
            return Err(Error::Cmd8Error);
        }

        let mut attempts = Retry::new(Retry::ACMD41_V2);
        while self.card_acmd(ACMD41, ACMD41_HCS)? != R1_READY_STATE {
            attempts.spend(Error::TimeoutACommand(ACMD41))?;
        }

        if self.card_command(CMD58, 0)? != R1_READY_STATE {
            return Err(Error::Cmd58Error);
        }
        let mut buffer = [0xFF; 4];
        self.transport.read_buffer(&mut buffer)?;
        let ocr = Ocr::from_bytes(&buffer);
        trace!("OCR: {:?}", ocr);
        if ocr.card_capacity_status() {
            Ok(CardType::SDHC)
        } else {
            Ok(CardType::SD2)
        }
    }

    /// The card ignored CMD8, so it is a version 1 SD card or an MMC card.
    fn negotiate_v1(&mut self) -> Result<CardType, Error> {
        let card_type = match self.card_acmd(ACMD41, 0) {
            Ok(r1) if r1 <= R1_IDLE_STATE => {
                let mut attempts = Retry::new(Retry::ACMD41_V1);
                let mut r1 = r1;
                while r1 != R1_READY_STATE {
                    attempts.spend(Error::TimeoutACommand(ACMD41))?;
                    r1 = self.card_acmd(ACMD41, 0)?;
                }
                CardType::SD1
            }
            Ok(_) | Err(Error::TimeoutACommand(ACMD41)) => {
                debug!("ACMD41 not supported, trying MMC");
                let mut attempts = Retry::new(Retry::ACMD41_V1);
                while self.card_command(CMD1, 0)? != R1_READY_STATE {
                    attempts.spend(Error::TimeoutCommand(CMD1))?;
                }
                CardType::MMC
            }
            Err(e) => return Err(e),
        };

        // Byte-addressed cards may power up with some other block length
        if self.card_command(CMD16, BLOCK_LEN_U32)? != R1_READY_STATE {
            return Err(Error::SetBlockLenError);
        }
        Ok(card_type)
    }

    /// Perform an application-specific command.
    ///
    /// If the card refuses the APP_CMD prefix, that response is returned
    /// instead.
    fn card_acmd(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        let r1 = self.card_command(CMD55, 0)?;
        if r1 > R1_IDLE_STATE {
            return Ok(r1);
        }
        self.card_command(command, arg).map_err(|e| match e {
            Error::TimeoutCommand(c) => Error::TimeoutACommand(c),
            e => e,
        })
    }

    /// Perform a command.
    ///
    /// Leaves the card selected. Callers release it when their exchange is
    /// over.
    fn card_command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        self.transport.release()?;
        self.transport.select()?;
        // A card fresh out of reset, or one in the middle of sending us data,
        // does not idle at 0xFF.
        if command != CMD0 && command != CMD12 {
            if let Err(e) = self.wait_ready() {
                let _ = self.transport.release();
                return Err(e);
            }
        }

        let frame = command_frame(command, arg);
        self.transport.write_buffer(&frame)?;

        // skip stuff byte for stop read
        if command == CMD12 {
            let _result = self.read_byte()?;
        }

        let mut retry = Retry::new(Retry::COMMAND);
        loop {
            let result = self.read_byte()?;
            if (result & R1_INVALID) == ERROR_OK {
                return Ok(result);
            }
            retry.spend(Error::TimeoutCommand(command))?;
        }
    }

    /// Wait for a specific byte, normally a data start token.
    fn get_response(&mut self, expected: u8) -> Result<(), Error> {
        let mut retry = Retry::new(Retry::DATA_TOKEN);
        loop {
            if self.read_byte()? == expected {
                return Ok(());
            }
            retry.spend(Error::TimeoutReadBuffer)?;
        }
    }

    /// Receive one data block into `buffer`, with its start token and
    /// trailing CRC.
    fn receive_block(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        self.get_response(DATA_START_BLOCK)?;
        self.transport.read_buffer(buffer)?;

        // These two bytes are always sent. They are either a valid CRC, or
        // junk, depending on whether CRC mode was enabled.
        let mut crc_bytes = [0xFF; 2];
        self.transport.read_buffer(&mut crc_bytes)?;
        if self.options.use_crc {
            let crc = BigEndian::read_u16(&crc_bytes);
            let calc_crc = crc16(buffer);
            if crc != calc_crc {
                return Err(Error::CrcError(crc, calc_crc));
            }
        }
        Ok(())
    }

    /// Send one data block, preceded by `token`, and wait for the card to
    /// finish programming it.
    fn send_block(&mut self, token: u8, buffer: &[u8]) -> Result<(), Error> {
        self.wait_ready()?;
        self.transport.exchange_byte(token)?;
        self.transport.write_buffer(buffer)?;
        let crc_bytes = if self.options.use_crc {
            crc16(buffer).to_be_bytes()
        } else {
            [0xFF, 0xFF]
        };
        self.transport.write_buffer(&crc_bytes)?;

        let status = self.read_byte()?;
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            return Err(Error::WriteError(status));
        }
        self.wait_ready()
    }

    /// End a multi-block write.
    ///
    /// The stop token goes out even if the card never came ready.
    fn send_stop_token(&mut self) -> Result<(), Error> {
        let ready = self.wait_ready();
        self.transport.exchange_byte(STOP_TRAN_TOKEN)?;
        ready
    }

    /// Receive a byte by clocking out an 0xFF byte.
    fn read_byte(&mut self) -> Result<u8, Error> {
        self.transport.exchange_byte(0xFF)
    }

    /// Spin until the card returns 0xFF, or we spin too many times and
    /// timeout.
    fn wait_ready(&mut self) -> Result<(), Error> {
        let mut retry = Retry::new(Retry::WAIT_READY);
        loop {
            if self.read_byte()? == 0xFF {
                return Ok(());
            }
            retry.spend(Error::TimeoutWaitNotBusy)?;
        }
    }
}

/// The ACMD23 argument for a write of `len` blocks.
///
/// The field is only 23 bits wide. The count is a hint, so longer writes
/// just ask for as many as fit.
fn pre_erase_count(len: usize) -> u32 {
    u32::try_from(len)
        .unwrap_or(u32::MAX)
        .min(ACMD23_MAX_BLOCKS)
}

/// Options for acquiring the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct AcquireOpts {
    /// Set to true to enable CRC checking on reading/writing blocks of data.
    ///
    /// Off by default. Command frames always carry a valid CRC7, so this
    /// only affects data blocks.
    pub use_crc: bool,

    /// Sets the number of times we will send CMD0 before giving up and
    /// returning `Err(Error::CardNotFound)`.
    ///
    /// CMD0 is always sent at least once, so zero behaves like one.
    pub acquire_retries: u32,

    /// The bus clock used while the card is initialised. Must be 400 kHz or
    /// less.
    pub init_clock_hz: u32,

    /// The bus clock used once the card is initialised.
    pub clock_hz: u32,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            use_crc: false,
            acquire_retries: 20,
            init_clock_hz: 400_000,
            clock_hz: 25_000_000,
        }
    }
}

/// The possible errors this crate can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// Couldn't change the bus clock
    ClockError,
    /// We failed to enable CRC checking on the SD card
    CantEnableCRC,
    /// We didn't get a data start token when reading data from the card
    TimeoutReadBuffer,
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// We didn't get a response when executing this application-specific command
    TimeoutACommand(u8),
    /// The DMA transfer-complete notification never arrived
    TimeoutDma,
    /// The card answered CMD8 but did not echo our check pattern
    Cmd8Error,
    /// We got a bad response from Command 58
    Cmd58Error,
    /// The card refused a 512 byte block length
    SetBlockLenError,
    /// We failed to read the Card Specific Data or Card Identification register
    RegisterReadError,
    /// We got a CRC mismatch (card gave us, we calculated)
    CrcError(u16, u16),
    /// The card rejected this command with this R1 response
    CommandRejected(u8, u8),
    /// The card rejected a data block with this data response
    WriteError(u8),
    /// Can't perform this operation with the card in this state
    BadState,
    /// Couldn't find the card
    CardNotFound,
    /// The block index is out of range for a byte-addressed card
    AddressOverflow,
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardType {
    /// A MultiMediaCard, initialised with CMD1.
    ///
    /// Uses byte-addressing internally.
    MMC,
    /// An standard-capacity SD Card supporting v1.x of the standard.
    ///
    /// Uses byte-addressing internally, so limited to 2GiB in size.
    SD1,
    /// An standard-capacity SD Card supporting v2.x of the standard.
    ///
    /// Uses byte-addressing internally, so limited to 2GiB in size.
    SD2,
    /// An high-capacity 'SDHC' Card.
    ///
    /// Uses block-addressing internally to support capacities above 2GiB.
    SDHC,
    /// An extended-capacity 'SDXC' Card, larger than 32 GiB.
    ///
    /// Identifies itself exactly like an SDHC card; we tell them apart by
    /// capacity.
    SDXC,
}

impl CardType {
    /// High capacity cards above this size are SDXC.
    pub const SDXC_THRESHOLD_BYTES: u64 = 32 * 1024 * 1024 * 1024;

    /// How this type of card expects block addresses to be given.
    pub fn addressing(self) -> Addressing {
        match self {
            CardType::SDHC | CardType::SDXC => Addressing::Block,
            CardType::MMC | CardType::SD1 | CardType::SD2 => Addressing::Byte,
        }
    }

    /// Refine the type once the capacity is known.
    pub fn with_capacity(self, capacity_bytes: u64) -> CardType {
        match self {
            CardType::SDHC if capacity_bytes > Self::SDXC_THRESHOLD_BYTES => CardType::SDXC,
            other => other,
        }
    }
}

impl core::fmt::Display for CardType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            CardType::MMC => "MMC",
            CardType::SD1 => "SDv1",
            CardType::SD2 => "SDv2",
            CardType::SDHC => "SDHC",
            CardType::SDXC => "SDXC",
        };
        f.write_str(name)
    }
}

/// How a card expects the address argument of a read or write command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// The argument is a byte offset (block index * 512).
    Byte,
    /// The argument is the block index itself.
    Block,
}

impl Addressing {
    /// The command argument which addresses the given block.
    pub fn address(self, idx: BlockIdx) -> Result<u32, Error> {
        match self {
            Addressing::Byte => idx
                .0
                .checked_mul(BLOCK_LEN_U32)
                .ok_or(Error::AddressOverflow),
            Addressing::Block => Ok(idx.0),
        }
    }
}

/// What we learned about the card when it was initialised.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// What kind of card this is
    pub card_type: CardType,
    /// Total capacity in bytes
    pub capacity: u64,
    /// Always 512
    pub block_size: u32,
    /// Total capacity in blocks
    pub block_count: u32,
}

impl CardInfo {
    /// A short, human readable summary, e.g. `SDHC, Capacity: 7.3GB`.
    pub fn describe(&self) -> heapless::String<32> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        // The longest possible summary fits, so this cannot fail
        let _ = write!(s, "{}", self);
        s
    }
}

impl core::fmt::Display for CardInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        if self.capacity >= GIB {
            let tenths = self.capacity * 10 / GIB;
            write!(
                f,
                "{}, Capacity: {}.{}GB",
                self.card_type,
                tenths / 10,
                tenths % 10
            )
        } else {
            write!(f, "{}, Capacity: {}MB", self.card_type, self.capacity / MIB)
        }
    }
}

/// A bounded busy-wait budget.
///
/// Lets you call `spend` up to `attempts - 1` times before `spend` returns
/// an error, so a loop which checks before spending makes exactly `attempts`
/// checks. Such a loop always makes its first check, so a budget of zero
/// allows one attempt, the same as a budget of one. The budgets are iteration counts sized for the bus clock, not
/// wall-clock times.
#[derive(Debug)]
pub struct Retry {
    left: u32,
}

impl Retry {
    /// Reads while waiting for the card to stop holding MISO low.
    pub const WAIT_READY: u32 = 0x8000;

    /// Reads while waiting for an R1 response.
    pub const COMMAND: u32 = 0xFF;

    /// Reads while waiting for a data start token.
    pub const DATA_TOKEN: u32 = 0x1FFF;

    /// ACMD41 attempts for a version 2 card.
    pub const ACMD41_V2: u32 = 100;

    /// ACMD41 (or CMD1) attempts for a version 1 SD or MMC card.
    pub const ACMD41_V1: u32 = 0x1FFF;

    /// Create a budget allowing the given number of attempts.
    pub fn new(attempts: u32) -> Retry {
        Retry { left: attempts }
    }

    /// Record a failed attempt, returning `err` if none are left.
    pub fn spend(&mut self, err: Error) -> Result<(), Error> {
        self.left = self.left.saturating_sub(1);
        if self.left == 0 {
            Err(err)
        } else {
            Ok(())
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
