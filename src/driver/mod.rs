/*!
    cyclic driver of the board in `std` environment

    The central resource is the [Monarco] struct: it owns the frames and the sub-device queue behind a single lock, and the [Transport] exchanging frames with the board.

    - [Monarco::run] (or [Monarco::spawn]) performs one frame exchange per cycle, it **must** be running for the channels to reach the board
    - the channel methods of [Monarco] (digital, analog, PWM, counters, registers) are synchronous and can be called from any thread, they only wait for the lock
    - [Monarco::close] stops the cycle before releasing the transport
*/

/// cyclic exchange and frame state transitions, this is the tricky part of the code
mod cycle;
/// engineering units access to the channels packed in the frames
mod channels;
/// interface to the physical link
mod transport;
/// board emulation for tests and demos
pub mod simulated;


pub use cycle::{Monarco, Cycle, Phase, Stats, THROTTLE};
pub use channels::*;
pub use transport::*;
pub use crate::{
    units::AnalogMode,
    sdc::{SdcHandle, SdcStatus},
    };

use std::time::Duration;
use thiserror::Error;
use crate::{
    frame::FrameError,
    sdc::CapacityExceeded,
    };


/// error regarding the board access
#[derive(Error, Debug)]
pub enum Error {
    #[error("no channel {0} of this kind on the board")]
    InvalidChannel(u8),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("too many sub-device operations pending")]
    CapacityExceeded,
    #[error("problem with the transport")]
    Transport(#[from] TransportError),
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("driver state does not allow this: {0}")]
    State(&'static str),
    #[error("failed to start the cycle thread")]
    Runtime(#[source] std::io::Error),
}
impl From<CapacityExceeded> for Error {
    fn from(_: CapacityExceeded) -> Self {
        Self::CapacityExceeded
    }
}


/// longest cycle interval accepted
pub const MAX_CYCLE: Duration = Duration::from_secs(3600);

/// driver settings
#[derive(Clone, Debug)]
pub struct Config {
    /// how to reach the board
    pub transport: TransportSettings,
    /// delay between frame exchanges
    pub cycle: Duration,
    /// measurement mode of the analog inputs, configured on the board at start
    pub analog: [AnalogMode; 2],
}
impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            cycle: Duration::from_millis(10),
            analog: [AnalogMode::Volt; 2],
        }
    }
}
impl Config {
    pub fn with_transport(mut self, transport: TransportSettings) -> Self {
        self.transport = transport;
        self
    }
    pub fn with_cycle(mut self, cycle: Duration) -> Self {
        self.cycle = cycle;
        self
    }
    /// measurement mode of analog input `port` (1 or 2), other ports are ignored
    pub fn with_analog(mut self, port: u8, mode: AnalogMode) -> Self {
        if let Some(slot) = self.analog.get_mut(usize::from(port).wrapping_sub(1)) {
            *slot = mode;
        }
        self
    }
    fn validate(&self) -> Result<(), Error> {
        if self.cycle.is_zero()
            {return Err(Error::InvalidArgument("cycle interval must not be null"))}
        if self.cycle > MAX_CYCLE
            {return Err(Error::InvalidArgument("cycle interval must not exceed an hour"))}
        Ok(())
    }
}
