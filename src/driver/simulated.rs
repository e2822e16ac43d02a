/*!
    software emulation of the board, implementing [Transport]

    it follows the board's frame protocol: one inbound frame per exchange, the sub-device answer comes in the frame following its request, counter resets are acknowledged while their request is held, the sign of life is echoed.
    The test side can drive the inputs, inject transport failures and inspect every frame received.
*/

use std::{
    collections::HashMap,
    sync::Arc,
    vec::Vec,
    future::{Future, ready},
    };
use log::*;

use crate::{
    mutex::BusyMutex,
    frame::{TxFrame, RxFrame, SdcSlot},
    registers::{self, SdcAddress},
    };
use super::{Transport, TransportSettings, TransportError};


/// simulated board, clones share the same board
#[derive(Clone)]
pub struct Device {
    board: Arc<BusyMutex<Board>>,
}

struct Board {
    settings: TransportSettings,
    registers: HashMap<SdcAddress, Cell>,
    /// sub-device answer to send with the next frame
    answer: SdcSlot,
    din: u8,
    /// digital inputs mirror the digital outputs received
    loopback: bool,
    counters: [u32; 3],
    ain: [u16; 2],
    /// counter reset requests seen in the last frame
    reset_requests: [bool; 2],
    /// number of resets performed per counter
    resets: [u32; 2],
    sent: Vec<TxFrame>,
    fail_next: u32,
    fail_rate: f64,
    exchanges: u64,
    closed: bool,
}

#[derive(Copy, Clone, Debug)]
struct Cell {
    value: u16,
    writable: bool,
}


impl Device {
    pub fn new() -> Self {
        Self::with_settings(TransportSettings::default())
    }
    pub fn with_settings(settings: TransportSettings) -> Self {
        let mut registers = HashMap::new();
        registers.insert(registers::FIRMWARE_VERSION.address(), Cell {value: 0x0102, writable: false});
        registers.insert(registers::HARDWARE_VERSION.address(), Cell {value: 0x0003, writable: false});
        for address in [
                registers::HW_CONFIG.address(),
                registers::COUNTER1_CONFIG.address(),
                registers::COUNTER2_CONFIG.address(),
                ] {
            registers.insert(address, Cell {value: 0, writable: true});
        }
        Self {board: Arc::new(BusyMutex::new(Board {
            settings,
            registers,
            answer: SdcSlot::default(),
            din: 0,
            loopback: false,
            counters: [0; 3],
            ain: [0; 2],
            reset_requests: [false; 2],
            resets: [0; 2],
            sent: Vec::new(),
            fail_next: 0,
            fail_rate: 0.,
            exchanges: 0,
            closed: false,
        }))}
    }

    /// digital inputs levels, one bit per input starting at DIN1
    pub fn set_digital_inputs(&self, din: u8) {
        self.board.blocking_lock().din = din;
    }
    pub fn set_loopback(&self, enable: bool) {
        self.board.blocking_lock().loopback = enable;
    }
    /// raw value of analog input `port` (1 or 2), other ports are ignored
    pub fn set_analog_input(&self, port: u8, raw: u16) {
        if let Some(ain) = self.board.blocking_lock().ain.get_mut(usize::from(port).wrapping_sub(1)) {
            *ain = raw;
        }
    }
    /// count pulses on counter `counter` (1 to 3), other counters are ignored
    pub fn pulse(&self, counter: u8, pulses: u32) {
        if let Some(value) = self.board.blocking_lock().counters.get_mut(usize::from(counter).wrapping_sub(1)) {
            *value = value.wrapping_add(pulses);
        }
    }

    /// fail the given number of coming exchanges
    pub fn fail_next(&self, exchanges: u32) {
        self.board.blocking_lock().fail_next = exchanges;
    }
    /// probability in `[0, 1]` for every exchange to fail
    pub fn set_fail_rate(&self, rate: f64) {
        self.board.blocking_lock().fail_rate = rate;
    }

    /// every frame received so far
    pub fn sent(&self) -> Vec<TxFrame> {
        self.board.blocking_lock().sent.clone()
    }
    pub fn last_sent(&self) -> Option<TxFrame> {
        self.board.blocking_lock().sent.last().copied()
    }
    /// current value of a register, `None` if the board has no such register
    pub fn register(&self, address: SdcAddress) -> Option<u16> {
        self.board.blocking_lock().registers.get(&address).map(|cell| cell.value)
    }
    /// add or replace a register
    pub fn define_register(&self, address: SdcAddress, value: u16, writable: bool) {
        self.board.blocking_lock().registers.insert(address, Cell {value, writable});
    }
    /// number of resets performed on counter `counter` (1 or 2)
    pub fn resets(&self, counter: u8) -> u32 {
        self.board.blocking_lock().resets.get(usize::from(counter).wrapping_sub(1)).copied().unwrap_or(0)
    }
    /// number of exchanges attempted, failed ones included
    pub fn exchanges(&self) -> u64 {
        self.board.blocking_lock().exchanges
    }
    pub fn is_closed(&self) -> bool {
        self.board.blocking_lock().closed
    }
}

impl Default for Device {
    fn default() -> Self {Self::new()}
}

impl Transport for Device {
    fn open(settings: &TransportSettings) -> Result<Self, TransportError> {
        let device = Self::with_settings(settings.clone());
        if settings.verbosity.info() {
            info!("{}: simulated board on {}", settings.label, settings.interface);
        }
        Ok(device)
    }
    fn exchange(&mut self, tx: &[u8]) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send {
        ready(self.board.blocking_lock().exchange(tx))
    }
    fn close(self) -> Result<(), TransportError> {
        let mut board = self.board.blocking_lock();
        if board.closed
            {return Err(TransportError::Closed)}
        board.closed = true;
        if board.settings.verbosity.info() {
            info!("{}: simulated board closed", board.settings.label);
        }
        Ok(())
    }
}


impl Board {
    fn exchange(&mut self, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.exchanges += 1;
        if self.closed
            {return Err(TransportError::Closed)}
        if self.fail_next != 0 {
            self.fail_next -= 1;
            return Err(self.failure());
        }
        if self.fail_rate > 0. && rand::random::<f64>() < self.fail_rate
            {return Err(self.failure())}

        let tx = TxFrame::decode(tx)
            .map_err(|error| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, error)))?;
        if self.settings.verbosity.write_trace() {
            trace!("{}: received {:?}", self.settings.label, tx);
        }
        self.sent.push(tx);

        let answer = self.service(&tx.sdc_request);
        let mut rx = RxFrame::default();
        rx.sdc_response = core::mem::replace(&mut self.answer, answer);

        for index in 0 .. 2 {
            let requested = tx.control.counter_reset(index);
            if requested && ! self.reset_requests[index] {
                self.counters[index] = 0;
                self.resets[index] += 1;
                if self.settings.verbosity.verbose() {
                    debug!("{}: counter {} reset", self.settings.label, index+1);
                }
            }
            self.reset_requests[index] = requested;
            rx.status.set_counter_reset_done(index, requested);
        }
        rx.status.set_sign_of_life(tx.control.sign_of_life());

        rx.din = if self.loopback {tx.dout & 0x0f} else {self.din};
        for (index, &value) in self.counters.iter().enumerate() {
            if let Some(counter) = rx.counter_mut(index)
                {*counter = value}
        }
        [rx.ain1, rx.ain2] = self.ain;

        if self.settings.verbosity.read_trace() {
            trace!("{}: sending {:?}", self.settings.label, rx);
        }
        Ok(Vec::from(&rx.encode()[..]))
    }

    /// perform a sub-device request, return the answer for the next frame
    fn service(&mut self, request: &SdcSlot) -> SdcSlot {
        if request.is_idle()
            {return SdcSlot::default()}
        let mut answer = *request;
        match self.registers.get_mut(&request.address()) {
            Some(cell) if request.write() => {
                if cell.writable
                    {cell.value = request.value}
                else
                    {answer.flags.set_error(true)}
            },
            Some(cell) => answer.value = cell.value,
            None => answer.flags.set_error(true),
        }
        if answer.error() && self.settings.verbosity.warning() {
            warn!("{}: rejected sub-device operation on register {:#05x}", self.settings.label, request.address());
        }
        answer
    }

    fn failure(&self) -> TransportError {
        if self.settings.verbosity.verbose() {
            debug!("{}: injected exchange failure", self.settings.label);
        }
        TransportError::Crc
    }
}
