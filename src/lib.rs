//! Instrument drivers for a measurement-automation setup: the ATS9360 PCIe
//! digitizer with its continuous-streaming acquisition path, and a ZNB20
//! vector network analyzer front-end.
//!
//! The digitizer core is the interesting part: a fixed pool of DMA buffers
//! cycles between the board and the host ([`ring::BufferRing`]), completed
//! buffers flow through code-to-voltage conversion ([`codec`]), channel
//! de-interleaving and per-buffer reduction ([`demux`]), and a numerically
//! stable running average across buffers ([`average`]), orchestrated by
//! [`acquire::Acquisition`]. The vendor SDK sits behind the
//! [`board::AcquisitionBoard`] capability trait; [`sim::SimBoard`] stands in
//! for it off-hardware.

pub mod acquire;
pub mod average;
pub mod board;
pub mod codec;
pub mod config;
pub mod demux;
pub mod error;
pub mod ring;
pub mod sim;
pub mod stats;
pub mod vna;
pub mod writer;

pub use acquire::{AcqState, Acquisition, CancelToken, Measurement};
pub use average::ChannelAccumulator;
pub use board::{AcquisitionBoard, ApiReturn, Channel, Coupling, Impedance, InputRange};
pub use codec::{buffer_to_volts, to_voltage};
pub use config::{
    AcquisitionConfig, ClockEdge, ClockSource, TriggerRange, TriggerSlope,
};
pub use demux::split_and_reduce;
pub use error::DaqError;
pub use ring::{BufferRing, RawBuffer};
pub use sim::{FillPattern, SimBoard};
pub use stats::Counter;
pub use vna::{SParameter, ScpiTransport, SweepConfig, Znb20};
pub use writer::RawDump;
