//! Useful library code for tests
//!
//! The centrepiece is [`FakeCard`], a byte-level model of an SD card in SPI
//! mode. It sits behind an `SpiBus` and an `OutputPin`, parses command frames
//! off MOSI and queues responses for MISO, and records everything it sees so
//! tests can make assertions about the exact exchange.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::{digital, spi};
use embedded_sdspi::{
    sdcard::proto::crc16, AcquireOpts, BusClock, SdCard, SpiTransport, BLOCK_LEN,
};

/// A standard capacity CSD (version 1) with 1_984_000 blocks.
pub const CSD_V1: [u8; 16] = [
    0x00, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xC8, 0xAD, 0xDB, 0xCF, 0xFF, 0xD2, 0x40, 0x40, 0xA5,
];

/// A standard capacity CSD (version 1) with 1024 byte native blocks and
/// 3_864_576 blocks of 512 bytes.
pub const CSD_V1_1K: [u8; 16] = [
    0x00, 0x7F, 0x00, 0x32, 0x5B, 0x5A, 0x83, 0xAF, 0x7F, 0xFF, 0xCF, 0x80, 0x16, 0x80, 0x00, 0x6F,
];

/// A high capacity CSD (version 2) with 7_710_720 blocks.
pub const CSD_V2: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x8B,
];

/// A version 2 CSD with C_SIZE 0x01DA7F, i.e. about 59 GiB.
pub const CSD_V2_64G: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x01, 0xDA, 0x7F, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x01,
];

/// A version 2 CSD with C_SIZE 0x00FFFF, exactly 32 GiB.
pub const CSD_V2_32G: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0xFF, 0xFF, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x01,
];

/// An MMC CSD, which says CSD_STRUCTURE 2 but uses the version 1 layout.
pub const CSD_MMC: [u8; 16] = [
    0x90, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xC8, 0xAD, 0xDB, 0xCF, 0xFF, 0xD2, 0x40, 0x40, 0xA5,
];

/// A CID for a made-up SanDisk card.
pub const CID: [u8; 16] = [
    0x03, 0x53, 0x44, 0x53, 0x55, 0x30, 0x38, 0x47, 0x80, 0x12, 0x34, 0x56, 0x78, 0x00, 0xD7, 0x01,
];

/// The byte a fake card sends straight after the CMD12 frame.
pub const CMD12_STUFF: u8 = 0x3F;

/// What sort of card the fake pretends to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    /// Rejects CMD8, accepts ACMD41
    Sd1,
    /// Accepts CMD8, OCR without CCS
    Sd2,
    /// Accepts CMD8, OCR with CCS, block addressed
    Sdhc,
    /// Rejects CMD8 and CMD55, initialised with CMD1
    Mmc,
    /// Never drives MISO
    Absent,
}

enum State {
    Command,
    ReadStream { next: u32 },
    WriteToken { multi: bool, block: u32 },
    WriteData { multi: bool, block: u32, buf: Vec<u8> },
}

/// A byte-level model of an SD card in SPI mode.
pub struct FakeCard {
    pub kind: Kind,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    /// How many times ACMD41 (or CMD1) answers "still idle" before "ready"
    pub acmd41_idle_polls: u32,
    /// The data response byte sent after each written block
    pub data_response: u8,
    /// Busy (0x00) bytes sent after each accepted block
    pub busy_after_write: usize,
    /// Answer CMD24 with an address error
    pub reject_cmd24: bool,
    /// Answer CMD18 with a parameter error
    pub reject_cmd18: bool,
    /// Answer this block of a multi-block write with a write error
    pub reject_block: Option<u32>,
    /// Stop sending data tokens after this many blocks of a CMD18 stream
    pub read_stream_limit: Option<usize>,
    /// Hold MISO low forever
    pub stuck_busy: bool,
    /// Echo the wrong check pattern in answer to CMD8
    pub bad_cmd8_echo: bool,
    /// Send a wrong CRC after every data block
    pub corrupt_read_crc: bool,
    /// Whether the DMA channel raises its completion interrupt
    pub dma_irq: bool,
    /// Every command frame received, as (index, argument)
    pub commands: Vec<(u8, u32)>,
    /// Every byte exchanged, as (chip-select asserted, MOSI, MISO)
    pub trace: Vec<(bool, u8, u8)>,
    /// Every bus clock requested
    pub clocks: Vec<u32>,
    /// How many multi-block write stop tokens were received
    pub stop_tokens: usize,
    /// How many DMA transfers were started
    pub dma_transfers: usize,
    /// How many DMA transfers were aborted
    pub dma_aborts: usize,
    blocks: HashMap<u32, [u8; BLOCK_LEN]>,
    cs_low: bool,
    idle: bool,
    app_cmd: bool,
    cmd_buf: Vec<u8>,
    out: VecDeque<u8>,
    state: State,
    streamed: usize,
}

/// The contents of a block nobody has written to.
pub fn pattern(idx: u32) -> [u8; BLOCK_LEN] {
    let mut data = [0u8; BLOCK_LEN];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (idx as usize).wrapping_mul(7).wrapping_add(i) as u8;
    }
    data
}

impl FakeCard {
    pub fn new(kind: Kind) -> FakeCard {
        let csd = match kind {
            Kind::Sd1 | Kind::Absent => CSD_V1,
            Kind::Sd2 => CSD_V1_1K,
            Kind::Sdhc => CSD_V2,
            Kind::Mmc => CSD_MMC,
        };
        FakeCard {
            kind,
            csd,
            cid: CID,
            acmd41_idle_polls: 0,
            data_response: 0xE5,
            busy_after_write: 4,
            reject_cmd24: false,
            reject_cmd18: false,
            reject_block: None,
            read_stream_limit: None,
            stuck_busy: false,
            bad_cmd8_echo: false,
            corrupt_read_crc: false,
            dma_irq: true,
            commands: Vec::new(),
            trace: Vec::new(),
            clocks: Vec::new(),
            stop_tokens: 0,
            dma_transfers: 0,
            dma_aborts: 0,
            blocks: HashMap::new(),
            cs_low: false,
            idle: false,
            app_cmd: false,
            cmd_buf: Vec::new(),
            out: VecDeque::new(),
            state: State::Command,
            streamed: 0,
        }
    }

    /// Get the current contents of a block.
    pub fn block(&self, idx: u32) -> [u8; BLOCK_LEN] {
        self.blocks.get(&idx).copied().unwrap_or_else(|| pattern(idx))
    }

    /// How many times we received the given command.
    pub fn command_count(&self, cmd: u8) -> usize {
        self.commands.iter().filter(|(c, _)| *c == cmd).count()
    }

    /// The arguments given to every instance of the given command.
    pub fn args_of(&self, cmd: u8) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|(c, _)| *c == cmd)
            .map(|(_, a)| *a)
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear_logs(&mut self) {
        self.commands.clear();
        self.trace.clear();
        self.clocks.clear();
        self.stop_tokens = 0;
        self.dma_transfers = 0;
        self.dma_aborts = 0;
    }

    /// Number of bytes exchanged with chip-select asserted.
    pub fn selected_exchanges(&self) -> usize {
        self.trace.iter().filter(|(cs, _, _)| *cs).count()
    }

    fn set_cs(&mut self, low: bool) {
        self.cs_low = low;
        if !low {
            self.cmd_buf.clear();
        }
    }

    /// Clock one byte each way.
    pub fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.cs_low {
            self.trace.push((false, mosi, 0xFF));
            return 0xFF;
        }
        let miso = self.next_out();
        self.consume(mosi);
        self.trace.push((true, mosi, miso));
        miso
    }

    fn next_out(&mut self) -> u8 {
        if self.stuck_busy {
            return 0x00;
        }
        if let Some(b) = self.out.pop_front() {
            return b;
        }
        if let State::ReadStream { next } = self.state {
            let more = self
                .read_stream_limit
                .map_or(true, |limit| self.streamed < limit);
            if more {
                self.streamed += 1;
                self.state = State::ReadStream { next: next + 1 };
                let data = self.block(next);
                self.queue_data(&data);
                return self.out.pop_front().unwrap_or(0xFF);
            }
        }
        0xFF
    }

    fn consume(&mut self, mosi: u8) {
        let state = std::mem::replace(&mut self.state, State::Command);
        match state {
            State::WriteToken { multi, block } => {
                self.state = match mosi {
                    0xFE if !multi => State::WriteData {
                        multi,
                        block,
                        buf: Vec::new(),
                    },
                    0xFC if multi => State::WriteData {
                        multi,
                        block,
                        buf: Vec::new(),
                    },
                    0xFD if multi => {
                        self.stop_tokens += 1;
                        State::Command
                    }
                    b if b & 0xC0 == 0x40 => {
                        self.parse_command_byte(b);
                        return;
                    }
                    _ => State::WriteToken { multi, block },
                };
            }
            State::WriteData {
                multi,
                block,
                mut buf,
            } => {
                buf.push(mosi);
                if buf.len() < BLOCK_LEN + 2 {
                    self.state = State::WriteData { multi, block, buf };
                } else {
                    self.finish_block(block, &buf);
                    if multi {
                        self.state = State::WriteToken {
                            multi,
                            block: block + 1,
                        };
                    }
                }
            }
            other => {
                self.state = other;
                self.parse_command_byte(mosi);
            }
        }
    }

    fn finish_block(&mut self, block: u32, buf: &[u8]) {
        let response = if self.reject_block == Some(block) {
            0xED
        } else {
            self.data_response
        };
        self.out.push_back(response);
        if response & 0x1F == 0x05 {
            let mut data = [0u8; BLOCK_LEN];
            data.copy_from_slice(&buf[..BLOCK_LEN]);
            self.blocks.insert(block, data);
            // programming
            for _ in 0..self.busy_after_write {
                self.out.push_back(0x00);
            }
        }
    }

    fn parse_command_byte(&mut self, mosi: u8) {
        if self.cmd_buf.is_empty() && (mosi & 0xC0) != 0x40 {
            return;
        }
        self.cmd_buf.push(mosi);
        if self.cmd_buf.len() == 6 {
            let frame = std::mem::take(&mut self.cmd_buf);
            self.handle_command(&frame);
        }
    }

    fn r1(&mut self, value: u8) {
        // One byte of NCR before the response
        self.out.push_back(0xFF);
        self.out.push_back(value);
    }

    fn queue_data(&mut self, data: &[u8]) {
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(data.iter().copied());
        let mut crc = crc16(data);
        if self.corrupt_read_crc {
            crc ^= 0xFFFF;
        }
        self.out.extend(crc.to_be_bytes());
    }

    fn addr_to_block(&self, arg: u32) -> u32 {
        if self.kind == Kind::Sdhc {
            arg
        } else {
            assert_eq!(arg % BLOCK_LEN as u32, 0, "misaligned byte address");
            arg / BLOCK_LEN as u32
        }
    }

    fn handle_command(&mut self, frame: &[u8]) {
        let cmd = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push((cmd, arg));
        if self.kind == Kind::Absent {
            return;
        }
        let app = std::mem::take(&mut self.app_cmd);
        let idle_r1 = if self.idle { 0x01 } else { 0x00 };
        match (app, cmd) {
            (_, 0) => {
                self.idle = true;
                self.state = State::Command;
                self.out.clear();
                self.r1(0x01);
            }
            (_, 12) => {
                self.state = State::Command;
                self.out.clear();
                // A stuff byte which looks like an R1, then the real R1
                self.out.push_back(CMD12_STUFF);
                self.out.push_back(0x00);
            }
            (false, 8) => match self.kind {
                Kind::Sd1 | Kind::Mmc => self.r1(0x05),
                _ => {
                    self.r1(idle_r1);
                    let check = if self.bad_cmd8_echo { 0x55 } else { 0xAA };
                    self.out.extend([0x00, 0x00, 0x01, check]);
                }
            },
            (false, 55) if self.kind == Kind::Mmc => self.r1(0x05),
            (false, 55) => {
                self.app_cmd = true;
                self.r1(idle_r1);
            }
            (true, 41) | (false, 1) => {
                if self.acmd41_idle_polls > 0 {
                    self.acmd41_idle_polls -= 1;
                    self.r1(0x01);
                } else {
                    self.idle = false;
                    self.r1(0x00);
                }
            }
            (true, 23) => self.r1(0x00),
            (false, 58) => {
                self.r1(idle_r1);
                let ccs = if self.kind == Kind::Sdhc { 0x40 } else { 0x00 };
                self.out.extend([0x80 | ccs, 0xFF, 0x80, 0x00]);
            }
            (false, 16) | (false, 59) => self.r1(idle_r1),
            (false, 9) => {
                self.r1(0x00);
                let csd = self.csd;
                self.queue_data(&csd);
            }
            (false, 10) => {
                self.r1(0x00);
                let cid = self.cid;
                self.queue_data(&cid);
            }
            (false, 17) => {
                let block = self.addr_to_block(arg);
                self.r1(0x00);
                let data = self.block(block);
                self.queue_data(&data);
            }
            (false, 18) if self.reject_cmd18 => self.r1(0x40),
            (false, 18) => {
                let block = self.addr_to_block(arg);
                self.r1(0x00);
                self.streamed = 0;
                self.state = State::ReadStream { next: block };
            }
            (false, 24) if self.reject_cmd24 => self.r1(0x20),
            (false, 24) => {
                let block = self.addr_to_block(arg);
                self.r1(0x00);
                self.state = State::WriteToken {
                    multi: false,
                    block,
                };
            }
            (false, 25) => {
                let block = self.addr_to_block(arg);
                self.r1(0x00);
                self.state = State::WriteToken { multi: true, block };
            }
            _ => self.r1(0x04 | idle_r1),
        }
    }
}

/// The SPI bus the fake card sits on.
pub struct FakeBus {
    card: Rc<RefCell<FakeCard>>,
}

impl spi::ErrorType for FakeBus {
    type Error = Infallible;
}

impl spi::SpiBus<u8> for FakeBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        for word in words.iter_mut() {
            *word = card.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        for &word in words {
            card.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        for i in 0..read.len().max(write.len()) {
            let got = card.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(i) {
                *slot = got;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        for word in words.iter_mut() {
            *word = card.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// The fake card's chip-select line.
pub struct FakePin {
    card: Rc<RefCell<FakeCard>>,
}

impl digital::ErrorType for FakePin {
    type Error = Infallible;
}

impl digital::OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.card.borrow_mut().set_cs(true);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.card.borrow_mut().set_cs(false);
        Ok(())
    }
}

/// A bus clock which writes down every rate asked of it.
pub struct RecordingClock {
    card: Rc<RefCell<FakeCard>>,
}

impl BusClock<FakeBus> for RecordingClock {
    type Error = Infallible;

    fn set_clock(&mut self, _bus: &mut FakeBus, hz: u32) -> Result<(), Self::Error> {
        self.card.borrow_mut().clocks.push(hz);
        Ok(())
    }
}

pub type FakeTransport = SpiTransport<FakeBus, FakePin, RecordingClock>;

/// Make a fake card of the given kind.
pub fn make_card(kind: Kind) -> Rc<RefCell<FakeCard>> {
    Rc::new(RefCell::new(FakeCard::new(kind)))
}

pub fn make_bus(card: &Rc<RefCell<FakeCard>>) -> (FakeBus, FakePin, RecordingClock) {
    (
        FakeBus { card: card.clone() },
        FakePin { card: card.clone() },
        RecordingClock { card: card.clone() },
    )
}

/// Make a driver talking to the given fake card by polling.
pub fn make_sdcard(card: &Rc<RefCell<FakeCard>>) -> SdCard<FakeTransport> {
    make_sdcard_with_options(card, AcquireOpts::default())
}

pub fn make_sdcard_with_options(
    card: &Rc<RefCell<FakeCard>>,
    options: AcquireOpts,
) -> SdCard<FakeTransport> {
    let (bus, cs, clock) = make_bus(card);
    SdCard::new_with_options(SpiTransport::new(bus, cs, clock), options)
}

#[cfg(feature = "embassy-sync-06")]
pub use self::dma::*;

#[cfg(feature = "embassy-sync-06")]
mod dma {
    use super::*;

    use embassy_sync_06::{blocking_mutex::raw::NoopRawMutex, signal::Signal};
    use embedded_sdspi::{Dma, DmaChannel};

    /// A DMA channel which moves the bytes at once, then raises the
    /// completion "interrupt" (unless told not to).
    pub struct FakeDma<'a> {
        card: Rc<RefCell<FakeCard>>,
        done: &'a Signal<NoopRawMutex, ()>,
    }

    impl DmaChannel for FakeDma<'_> {
        type Error = Infallible;

        fn start(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
            let mut card = self.card.borrow_mut();
            card.dma_transfers += 1;
            for (slot, &out) in rx.iter_mut().zip(tx) {
                *slot = card.exchange(out);
            }
            if card.dma_irq {
                self.done.signal(());
            }
            Ok(())
        }

        fn abort(&mut self) {
            self.card.borrow_mut().dma_aborts += 1;
        }
    }

    pub type DmaTransport<'a> =
        SpiTransport<FakeBus, FakePin, RecordingClock, Dma<'a, FakeDma<'a>, NoopRawMutex>>;

    /// Make a driver talking to the given fake card over DMA.
    pub fn make_dma_sdcard<'a>(
        card: &Rc<RefCell<FakeCard>>,
        done: &'a Signal<NoopRawMutex, ()>,
        max_spins: u32,
    ) -> SdCard<DmaTransport<'a>> {
        let (bus, cs, clock) = make_bus(card);
        let channel = FakeDma {
            card: card.clone(),
            done,
        };
        let bulk = Dma::with_max_spins(channel, done, max_spins);
        SdCard::new(SpiTransport::with_bulk(bus, cs, clock, bulk))
    }
}

/// Send log output to the test harness.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
