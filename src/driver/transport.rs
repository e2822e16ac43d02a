use std::{
    future::Future,
    string::String,
    vec::Vec,
    };
use bilge::prelude::*;
use thiserror::Error;


/// failure of one frame exchange, the next cycle retries
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("frame integrity check failed")]
    Crc,
    #[error("problem with the link to the board")]
    Io(#[from] std::io::Error),
    #[error("transport is closed")]
    Closed,
}

/**
    physical link to the board

    an implementation handles the byte exchange and the frames integrity field (computed on transmission, checked on reception). It is opened once, exchanges exactly one frame per call, and is closed once after the cycle stopped.
*/
pub trait Transport: Send + Sized {
    fn open(settings: &TransportSettings) -> Result<Self, TransportError>;
    /// send an outbound frame and return the inbound frame received meanwhile
    fn exchange(&mut self, tx: &[u8]) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
    fn close(self) -> Result<(), TransportError>;
}

/// settings for opening a [Transport]
#[derive(Clone, Debug)]
pub struct TransportSettings {
    /// device path of the link
    pub interface: String,
    /// link clock frequency (Hz)
    pub clock_speed: u32,
    /// prefix of the transport's log messages
    pub label: String,
    pub verbosity: Verbosity,
}
impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            interface: String::from("/dev/spidev0.0"),
            clock_speed: 4_000_000,
            label: String::from("monarco"),
            verbosity: Verbosity::default(),
        }
    }
}

/// independent diagnostic flags of a transport, with no effect on its behavior
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Verbosity {
    pub error: bool,
    pub warning: bool,
    pub info: bool,
    pub verbose: bool,
    /// dump every received frame
    pub read_trace: bool,
    /// dump every transmitted frame
    pub write_trace: bool,
    reserved_0: u2,
}
impl Default for Verbosity {
    /// errors and warnings only
    fn default() -> Self {
        Self::from(0b0000_0011u8)
    }
}
impl Verbosity {
    pub fn quiet() -> Self {
        Self::from(0u8)
    }
    pub fn all() -> Self {
        Self::from(0b0011_1111u8)
    }
}
