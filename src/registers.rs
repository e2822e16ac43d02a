/*!
    sub-device registers of the board, reachable through the SDC slot of the frames

    each register is described by a constant of type [Register] giving its address, typed with the value it holds. Every register holds 16 bits, structured registers are bilge bitfields converting from and to `u16`.
*/

use core::marker::PhantomData;
use bilge::prelude::*;


/**
    a register is a typed address in the board's sub-device register space

    it only holds the address, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Eq, Hash, Debug)]
pub struct Register<T> {
    addr: SdcAddress,
    ty: PhantomData<T>,
}
impl<T> Register<T> {
    /// create a register from its address, which must fit in 12 bits
    pub const fn new(address: SdcAddress) -> Self {
        assert!(address <= MAX_ADDRESS, "register address exceeds 12 bits");
        Self{addr: address, ty: PhantomData}
    }
    pub const fn address(&self) -> SdcAddress {self.addr}
}
impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        Self::new(self.address())
    }
}
impl<T> Copy for Register<T> {}


/// integer used for addressing sub-device registers
pub type SdcAddress = u16;
/// highest address the 12 bit address field can hold
pub const MAX_ADDRESS: SdcAddress = 0x0fff;

/// address 0 is not a register, a slot addressing it is idle
pub const IDLE: SdcAddress = 0x000;
/// firmware version of the board, read only
pub const FIRMWARE_VERSION: Register<u16> = Register::new(0x001);
/// hardware revision of the board, read only
pub const HARDWARE_VERSION: Register<u16> = Register::new(0x002);
/// analog inputs measurement mode
pub const HW_CONFIG: Register<HardwareConfig> = Register::new(0x010);
/// counter 1 operation mode
pub const COUNTER1_CONFIG: Register<CounterConfig> = Register::new(0x024);
/// counter 2 operation mode, shares its hardware with PWM channel 2
pub const COUNTER2_CONFIG: Register<CounterConfig> = Register::new(0x025);

/// configuration register of the counter at the given index
pub fn counter_config(index: usize) -> Option<Register<CounterConfig>> {
    match index {
        0 => Some(COUNTER1_CONFIG),
        1 => Some(COUNTER2_CONFIG),
        _ => None,
    }
}


/// analog inputs measurement mode, an input not in current mode measures voltage
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct HardwareConfig {
    pub ain1_current: bool,
    pub ain2_current: bool,
    reserved_0: u14,
}
impl HardwareConfig {
    pub fn current(&self, index: usize) -> bool {
        match index {
            0 => self.ain1_current(),
            1 => self.ain2_current(),
            _ => false,
        }
    }
    pub fn set_current(&mut self, index: usize, value: bool) {
        match index {
            0 => self.set_ain1_current(value),
            1 => self.set_ain2_current(value),
            _ => {},
        }
    }
}

/// counter operation mode, encoded as `mode | direction << 3 | edge << 6`
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct CounterConfig {
    mode: u3,
    direction: u3,
    edge: u2,
    reserved_0: u8,
}
impl CounterConfig {
    pub fn build(mode: CounterMode, direction: CounterDirection, edge: CounterEdge) -> Self {
        let mut config = Self::default();
        config.set_mode(u3::new(mode as u8));
        config.set_direction(u3::new(direction as u8));
        config.set_edge(u2::new(edge as u8));
        config
    }
}

/// what a counter input is counting
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterMode {
    #[default]
    Off = 0,
    /// count pulses on the counter input
    Pulse = 1,
    /// decode a quadrature encoder on the counter inputs pair
    Quadrature = 2,
}

/// how pulses change the counter value
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterDirection {
    #[default]
    Up = 0,
    /// counting direction given by the next digital input
    External = 1,
    Down = 2,
}

/// which signal edges are counted
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterEdge {
    #[default]
    Rising = 0,
    Falling = 1,
    Both = 2,
}
