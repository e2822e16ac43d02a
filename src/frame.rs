/*!
    byte-exact layout of the frames exchanged with the board every cycle

    both frames are packed without padding, multi-byte fields are little endian, bitfields are filled from the least significant bit. The trailing `crc` field is owned by the transport: it is computed on transmission and checked on reception, the driver leaves it alone.
*/

use packbytes::{FromBytes, ToBytes, ByteArray};
use bilge::prelude::*;
use crate::pack_bilge;


/// size in bytes of both the outbound and the inbound frame
pub const FRAME_SIZE: usize = 26;

const _: () = assert!(<<TxFrame as ToBytes>::Bytes as ByteArray>::SIZE == FRAME_SIZE);
const _: () = assert!(<<RxFrame as ToBytes>::Bytes as ByteArray>::SIZE == FRAME_SIZE);


/// error raised when decoding a buffer that cannot hold a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    Length {expected: usize, got: usize},
}
impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Length {expected, got} => write!(f, "frame must be {} bytes, got {}", expected, got),
        }
    }
}
impl core::error::Error for FrameError {}


/// frame sent to the board
#[derive(Copy, Clone, Default, Debug, PartialEq, FromBytes, ToBytes)]
pub struct TxFrame {
    /// sub-device register request
    pub sdc_request: SdcSlot,
    pub control: ControlByte,
    /// user LEDs driven by the host, other LEDs are left to the firmware
    pub led_mask: u8,
    /// state of the user LEDs selected by `led_mask`
    pub led_value: u8,
    /// digital outputs, one bit per output starting at DOUT1
    pub dout: u8,
    /// frequency divider of PWM channel 1, driving DOUT1..3
    pub pwm1_div: u16,
    pub pwm1a_dc: u16,
    pub pwm1b_dc: u16,
    pub pwm1c_dc: u16,
    /// frequency divider of PWM channel 2, driving DOUT4
    pub pwm2_div: u16,
    pub pwm2a_dc: u16,
    pub aout1: u16,
    pub aout2: u16,
    pub crc: u16,
}

/// frame received from the board
#[derive(Copy, Clone, Default, Debug, PartialEq, FromBytes, ToBytes)]
pub struct RxFrame {
    /// answer of the sub-device register request sent in the previous frame
    pub sdc_response: SdcSlot,
    pub status: StatusByte,
    pub reserved: u16,
    /// digital inputs, one bit per input starting at DIN1
    pub din: u8,
    pub cnt1: u32,
    pub cnt2: u32,
    pub cnt3: u32,
    pub ain1: u16,
    pub ain2: u16,
    pub crc: u16,
}

/// sub-device register operation slot, identical in both directions
#[derive(Copy, Clone, Default, Debug, PartialEq, FromBytes, ToBytes)]
pub struct SdcSlot {
    /// value to write, or value read
    pub value: u16,
    pub flags: SdcFlags,
}

#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct SdcFlags {
    /// register address, 0 leaves the slot idle
    pub address: u12,
    /// the operation is a write, otherwise a read
    pub write: bool,
    /// set by the board on a rejected operation
    pub error: bool,
    reserved_0: u2,
}
pack_bilge!(SdcFlags);

#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct ControlByte {
    /// host takes control of the status LED
    pub status_led_mask: bool,
    /// status LED state when controlled by the host
    pub status_led_value: bool,
    pub shutdown: bool,
    reserved_0: u1,
    /// request a reset of counter 1, to hold until acknowledged
    pub counter1_reset: bool,
    /// request a reset of counter 2, to hold until acknowledged
    pub counter2_reset: bool,
    /// rolling token letting the board detect a stalled host
    pub sign_of_life: u2,
}
pack_bilge!(ControlByte);

#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct StatusByte {
    reserved_0: u4,
    pub counter1_reset_done: bool,
    pub counter2_reset_done: bool,
    /// sign of life echoed by the board
    pub sign_of_life: u2,
}
pack_bilge!(StatusByte);


impl TxFrame {
    pub fn encode(self) -> <Self as ToBytes>::Bytes {
        self.to_le_bytes()
    }
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(Self::from_le_bytes(frame_bytes(bytes)?))
    }
    /// duty cycle register of the PWM output at the given index (DOUT1 is 0)
    pub fn duty_mut(&mut self, index: usize) -> Option<&mut u16> {
        match index {
            0 => Some(&mut self.pwm1a_dc),
            1 => Some(&mut self.pwm1b_dc),
            2 => Some(&mut self.pwm1c_dc),
            3 => Some(&mut self.pwm2a_dc),
            _ => None,
        }
    }
    /// frequency divider of the PWM channel at the given index
    pub fn divider_mut(&mut self, index: usize) -> Option<&mut u16> {
        match index {
            0 => Some(&mut self.pwm1_div),
            1 => Some(&mut self.pwm2_div),
            _ => None,
        }
    }
    pub fn aout_mut(&mut self, index: usize) -> Option<&mut u16> {
        match index {
            0 => Some(&mut self.aout1),
            1 => Some(&mut self.aout2),
            _ => None,
        }
    }
}

impl RxFrame {
    pub fn encode(self) -> <Self as ToBytes>::Bytes {
        self.to_le_bytes()
    }
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(Self::from_le_bytes(frame_bytes(bytes)?))
    }
    pub fn counter(&self, index: usize) -> Option<u32> {
        match index {
            0 => Some(self.cnt1),
            1 => Some(self.cnt2),
            2 => Some(self.cnt3),
            _ => None,
        }
    }
    pub fn counter_mut(&mut self, index: usize) -> Option<&mut u32> {
        match index {
            0 => Some(&mut self.cnt1),
            1 => Some(&mut self.cnt2),
            2 => Some(&mut self.cnt3),
            _ => None,
        }
    }
    pub fn ain(&self, index: usize) -> Option<u16> {
        match index {
            0 => Some(self.ain1),
            1 => Some(self.ain2),
            _ => None,
        }
    }
}

fn frame_bytes<B: for<'a> TryFrom<&'a [u8]>>(bytes: &[u8]) -> Result<B, FrameError> {
    B::try_from(bytes).map_err(|_| FrameError::Length {expected: FRAME_SIZE, got: bytes.len()})
}

impl SdcSlot {
    /// build a request slot for the given register operation
    pub fn request(address: u16, value: u16, write: bool) -> Self {
        let mut slot = Self {value, flags: SdcFlags::default()};
        slot.flags.set_address(u12::new(address & 0x0fff));
        slot.flags.set_write(write);
        slot
    }
    pub fn address(&self) -> u16 {self.flags.address().value()}
    pub fn write(&self) -> bool {self.flags.write()}
    pub fn error(&self) -> bool {self.flags.error()}
    pub fn is_idle(&self) -> bool {self.address() == 0}
}

impl ControlByte {
    /// reset request bit of the counter at the given index
    pub fn counter_reset(&self, index: usize) -> bool {
        match index {
            0 => self.counter1_reset(),
            1 => self.counter2_reset(),
            _ => false,
        }
    }
    pub fn set_counter_reset(&mut self, index: usize, value: bool) {
        match index {
            0 => self.set_counter1_reset(value),
            1 => self.set_counter2_reset(value),
            _ => {},
        }
    }
    /// step the sign of life, wrapping around its 2 bits
    pub fn advance_sign_of_life(&mut self) {
        let next = self.sign_of_life().value().wrapping_add(1) & 0b11;
        self.set_sign_of_life(u2::new(next));
    }
}

impl StatusByte {
    /// reset acknowledge bit of the counter at the given index
    pub fn counter_reset_done(&self, index: usize) -> bool {
        match index {
            0 => self.counter1_reset_done(),
            1 => self.counter2_reset_done(),
            _ => false,
        }
    }
    pub fn set_counter_reset_done(&mut self, index: usize, value: bool) {
        match index {
            0 => self.set_counter1_reset_done(value),
            1 => self.set_counter2_reset_done(value),
            _ => {},
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_layout() {
        let mut frame = TxFrame::default();
        frame.sdc_request = SdcSlot::request(0x024, 0xbeef, true);
        frame.control.set_status_led_mask(true);
        frame.control.set_counter2_reset(true);
        frame.control.set_sign_of_life(u2::new(2));
        frame.led_mask = 0x0f;
        frame.led_value = 0x05;
        frame.dout = 0b1010;
        frame.pwm1_div = 0x1234;
        frame.pwm1a_dc = 0x0001;
        frame.pwm1b_dc = 0x0002;
        frame.pwm1c_dc = 0x0003;
        frame.pwm2_div = 0x5678;
        frame.pwm2a_dc = 0x0004;
        frame.aout1 = 0x0fff;
        frame.aout2 = 0x0800;

        let bytes = frame.encode();
        assert_eq!(bytes, [
            0xef, 0xbe,  0x24, 0x10,
            0b1010_0001,
            0x0f, 0x05, 0b1010,
            0x34, 0x12,  0x01, 0x00,  0x02, 0x00,  0x03, 0x00,
            0x78, 0x56,  0x04, 0x00,
            0xff, 0x0f,  0x00, 0x08,
            0x00, 0x00,
            ]);
        assert_eq!(TxFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn rx_layout() {
        let bytes = [
            0x02, 0x01,  0x01, 0x20,
            0b1101_0000,
            0x00, 0x00,
            0b0110,
            0x10, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00,
            0xff, 0xff, 0xff, 0xff,
            0xff, 0x0f,  0x00, 0x00,
            0xaa, 0x55,
            ];
        let frame = RxFrame::decode(&bytes).unwrap();
        assert_eq!(frame.sdc_response.value, 0x0102);
        assert_eq!(frame.sdc_response.address(), 0x001);
        assert!(! frame.sdc_response.write());
        assert!(frame.sdc_response.error());
        assert!(frame.status.counter1_reset_done());
        assert!(! frame.status.counter2_reset_done());
        assert_eq!(frame.status.sign_of_life().value(), 3);
        assert_eq!(frame.din, 0b0110);
        assert_eq!(frame.cnt1, 16);
        assert_eq!(frame.cnt2, 0x10000);
        assert_eq!(frame.cnt3, u32::MAX);
        assert_eq!(frame.ain1, 4095);
        assert_eq!(frame.ain2, 0);
        assert_eq!(frame.crc, 0x55aa);
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn reserved_bits_stay_zero() {
        let mut control = ControlByte::default();
        control.set_status_led_mask(true);
        control.set_status_led_value(true);
        control.set_shutdown(true);
        control.set_counter1_reset(true);
        control.set_counter2_reset(true);
        control.set_sign_of_life(u2::new(3));
        assert_eq!(u8::from(control), 0b1111_0111);

        let slot = SdcSlot::request(0xfff, 0, true);
        assert_eq!(u16::from(slot.flags), 0x1fff);
    }

    #[test]
    fn wrong_length() {
        assert_eq!(
            RxFrame::decode(&[0; FRAME_SIZE - 1]),
            Err(FrameError::Length {expected: FRAME_SIZE, got: FRAME_SIZE - 1}),
            );
        assert!(TxFrame::decode(&[0; FRAME_SIZE + 1]).is_err());
    }

    #[test]
    fn sign_of_life_wraps() {
        let mut control = ControlByte::default();
        let mut seen = [0; 6];
        for value in seen.iter_mut() {
            *value = control.sign_of_life().value();
            control.advance_sign_of_life();
        }
        assert_eq!(seen, [0, 1, 2, 3, 0, 1]);
    }
}
