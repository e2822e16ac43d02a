/*!
    driver for the Monarco HAT, a PLC expansion board exchanging one fixed frame per cycle with its host

    - [frame] defines the byte-exact layout of the frames exchanged every cycle
    - [registers] lists the sub-device registers and their value encodings
    - [units] converts between engineering units and the raw values in the frames
    - [sdc] implements the sub-device communication queue, servicing register reads/writes one at a time
    - `driver` (feature `driver`) runs the cyclic exchange and exposes the channels to application threads
*/
#![no_std]
#[cfg(feature = "std")]
extern crate std;

mod mutex;
mod utils;

pub mod frame;
pub mod registers;
pub mod units;
pub mod sdc;
#[cfg(feature = "driver")]
pub mod driver;

pub use mutex::{BusyMutex, BusyMutexGuard};
