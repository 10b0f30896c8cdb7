//! Capability interface over the vendor acquisition SDK.
//!
//! The digitizer is driven through the [`AcquisitionBoard`] trait, which
//! mirrors the handful of ATSApi entry points the driver actually uses:
//! clock/input/trigger setup, record geometry, and the AutoDMA streaming
//! calls. The vendor library itself is an external dependency; the FFI-backed
//! implementation lives behind the `alazar` cargo feature, while tests and
//! the demo binary run against [`crate::sim::SimBoard`].

use std::fmt;
use std::time::Duration;

use crate::config::{ClockEdge, ClockSource, TriggerRange, TriggerSlope};
use crate::ring::RawBuffer;

/// Return codes of the vendor API. Unrecognized codes are preserved verbatim
/// so nothing is lost when an error propagates up to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiReturn {
    Success,
    Failed,
    AccessDenied,
    DmaChannelUnavailable,
    DmaChannelInvalid,
    DmaInProgress,
    WaitTimeout,
    Unknown(u32),
}

impl ApiReturn {
    pub fn code(self) -> u32 {
        match self {
            ApiReturn::Success => 512,
            ApiReturn::Failed => 513,
            ApiReturn::AccessDenied => 514,
            ApiReturn::DmaChannelUnavailable => 515,
            ApiReturn::DmaChannelInvalid => 516,
            ApiReturn::DmaInProgress => 518,
            ApiReturn::WaitTimeout => 579,
            ApiReturn::Unknown(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ApiReturn::Success
    }
}

impl From<u32> for ApiReturn {
    fn from(value: u32) -> Self {
        match value {
            512 => Self::Success,
            513 => Self::Failed,
            514 => Self::AccessDenied,
            515 => Self::DmaChannelUnavailable,
            516 => Self::DmaChannelInvalid,
            518 => Self::DmaInProgress,
            579 => Self::WaitTimeout,
            code => Self::Unknown(code),
        }
    }
}

impl fmt::Display for ApiReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {})", self, self.code())
    }
}

/// Input channels of the board. The streaming path always captures both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub fn mask(self) -> u32 {
        match self {
            Channel::A => 0x1,
            Channel::B => 0x2,
        }
    }

    /// Channel mask selecting A and B together.
    pub fn both_mask() -> u32 {
        Channel::A.mask() | Channel::B.mask()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    pub fn code(self) -> u32 {
        match self {
            Coupling::Ac => 1,
            Coupling::Dc => 2,
        }
    }
}

/// Full-scale input ranges supported by the front-end, with the vendor codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRange {
    Pm100Mv,
    Pm200Mv,
    Pm400Mv,
    Pm800Mv,
    Pm1V,
    Pm2V,
    Pm4V,
}

impl InputRange {
    pub fn code(self) -> u32 {
        match self {
            InputRange::Pm100Mv => 5,
            InputRange::Pm200Mv => 6,
            InputRange::Pm400Mv => 7,
            InputRange::Pm800Mv => 9,
            InputRange::Pm1V => 10,
            InputRange::Pm2V => 11,
            InputRange::Pm4V => 12,
        }
    }

    pub fn volts(self) -> f64 {
        match self {
            InputRange::Pm100Mv => 0.1,
            InputRange::Pm200Mv => 0.2,
            InputRange::Pm400Mv => 0.4,
            InputRange::Pm800Mv => 0.8,
            InputRange::Pm1V => 1.0,
            InputRange::Pm2V => 2.0,
            InputRange::Pm4V => 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impedance {
    Ohm1M,
    Ohm50,
}

impl Impedance {
    pub fn code(self) -> u32 {
        match self {
            Impedance::Ohm1M => 1,
            Impedance::Ohm50 => 2,
        }
    }
}

// AutoDMA mode flags for `begin_async_read`.
pub const ADMA_TRADITIONAL_MODE: u32 = 0x0;
pub const ADMA_EXTERNAL_STARTCAPTURE: u32 = 0x1;
pub const ADMA_CONTINUOUS_MODE: u32 = 0x100;
pub const ADMA_NPT: u32 = 0x200;
pub const ADMA_TRIGGERED_STREAMING: u32 = 0x400;
pub const ADMA_FIFO_ONLY_STREAMING: u32 = 0x800;

/// The acquisition-engine capability the driver consumes.
///
/// Buffer ownership is explicit: `post_buffer` hands a buffer to the engine,
/// and `wait_buffer_complete` returns the oldest posted buffer once the
/// engine has filled it. Completion is strictly FIFO in post order; an
/// implementation must never surface buffers out of order.
pub trait AcquisitionBoard: Send {
    fn configure_clock(
        &mut self,
        source: ClockSource,
        rate: u32,
        edge: ClockEdge,
        decimation: u32,
    ) -> Result<(), ApiReturn>;

    fn configure_channel(
        &mut self,
        channel: Channel,
        coupling: Coupling,
        range: InputRange,
        impedance: Impedance,
    ) -> Result<(), ApiReturn>;

    fn configure_trigger(
        &mut self,
        slope: TriggerSlope,
        level_code: u8,
        range: TriggerRange,
        delay_samples: u32,
    ) -> Result<(), ApiReturn>;

    fn set_record_size(&mut self, pre_trigger: u32, post_trigger: u32) -> Result<(), ApiReturn>;

    /// Arm the AutoDMA engine for a streaming read. Must be called before any
    /// buffer is posted.
    fn begin_async_read(
        &mut self,
        channel_mask: u32,
        samples_per_record: u32,
        records_per_buffer: u32,
        records_per_acquisition: u32,
        mode_flags: u32,
    ) -> Result<(), ApiReturn>;

    /// Hand a buffer to the engine for it to fill via DMA.
    fn post_buffer(&mut self, buffer: RawBuffer) -> Result<(), ApiReturn>;

    /// Block until the oldest posted buffer has been filled, bounded by
    /// `timeout`. Returns `ApiReturn::WaitTimeout` when the bound expires.
    fn wait_buffer_complete(&mut self, timeout: Duration) -> Result<RawBuffer, ApiReturn>;

    fn start_capture(&mut self) -> Result<(), ApiReturn>;

    /// Abort an in-progress asynchronous read and release every posted
    /// buffer. Safe to call after partial completion.
    fn abort_async_read(&mut self) -> Result<(), ApiReturn>;
}

/// FFI-backed board over the vendor ATSApi shared library.
#[cfg(feature = "alazar")]
pub mod alazar {
    use std::collections::VecDeque;

    use libc::{c_long, c_void};

    use super::*;

    // Trigger-engine codes used by `configure_trigger`.
    const TRIG_ENGINE_OP_J: u32 = 0;
    const TRIG_ENGINE_J: u32 = 0;
    const TRIG_ENGINE_K: u32 = 1;
    const TRIG_EXTERNAL: u32 = 0x2;
    const TRIG_DISABLE: u32 = 0x3;
    // Unused second engine is parked at mid-level.
    const LEVEL_MIDSCALE: u32 = 128;

    type BoardHandle = *mut c_void;

    #[allow(non_snake_case)]
    #[link(name = "ATSApi")]
    extern "C" {
        fn AlazarGetBoardBySystemID(system_id: u32, board_id: u32) -> BoardHandle;
        fn AlazarSetCaptureClock(
            handle: BoardHandle,
            source: u32,
            rate: u32,
            edge: u32,
            decimation: u32,
        ) -> u32;
        fn AlazarInputControl(
            handle: BoardHandle,
            channel: u8,
            coupling: u32,
            input_range: u32,
            impedance: u32,
        ) -> u32;
        fn AlazarSetTriggerOperation(
            handle: BoardHandle,
            operation: u32,
            engine1: u32,
            source1: u32,
            slope1: u32,
            level1: u32,
            engine2: u32,
            source2: u32,
            slope2: u32,
            level2: u32,
        ) -> u32;
        fn AlazarSetExternalTrigger(handle: BoardHandle, coupling: u32, range: u32) -> u32;
        fn AlazarSetTriggerDelay(handle: BoardHandle, delay: u32) -> u32;
        fn AlazarSetTriggerTimeOut(handle: BoardHandle, timeout_ticks: u32) -> u32;
        fn AlazarSetRecordSize(handle: BoardHandle, pre_trigger: u32, post_trigger: u32) -> u32;
        fn AlazarBeforeAsyncRead(
            handle: BoardHandle,
            channel_mask: u32,
            transfer_offset: c_long,
            samples_per_record: u32,
            records_per_buffer: u32,
            records_per_acquisition: u32,
            flags: u32,
        ) -> u32;
        fn AlazarPostAsyncBuffer(handle: BoardHandle, buffer: *mut c_void, buffer_bytes: u32)
            -> u32;
        fn AlazarWaitAsyncBufferComplete(
            handle: BoardHandle,
            buffer: *mut c_void,
            timeout_ms: u32,
        ) -> u32;
        fn AlazarStartCapture(handle: BoardHandle) -> u32;
        fn AlazarAbortAsyncRead(handle: BoardHandle) -> u32;
    }

    fn check(code: u32) -> Result<(), ApiReturn> {
        match ApiReturn::from(code) {
            ApiReturn::Success => Ok(()),
            err => Err(err),
        }
    }

    /// One physical board. Buffers posted to the engine are parked in an
    /// in-flight queue so the DMA target memory stays alive while the board
    /// writes into it; `wait_buffer_complete` always waits on the queue head,
    /// which is the C API's own ordering contract.
    pub struct AlazarBoard {
        handle: BoardHandle,
        in_flight: VecDeque<RawBuffer>,
    }

    // The handle is an opaque token owned by this struct; the vendor library
    // serializes access per handle.
    unsafe impl Send for AlazarBoard {}

    impl AlazarBoard {
        pub fn open(system_id: u32, board_id: u32) -> Result<Self, ApiReturn> {
            let handle = unsafe { AlazarGetBoardBySystemID(system_id, board_id) };
            if handle.is_null() {
                return Err(ApiReturn::Failed);
            }
            Ok(Self {
                handle,
                in_flight: VecDeque::new(),
            })
        }
    }

    impl AcquisitionBoard for AlazarBoard {
        fn configure_clock(
            &mut self,
            source: ClockSource,
            rate: u32,
            edge: ClockEdge,
            decimation: u32,
        ) -> Result<(), ApiReturn> {
            check(unsafe {
                AlazarSetCaptureClock(self.handle, source.code(), rate, edge.code(), decimation)
            })
        }

        fn configure_channel(
            &mut self,
            channel: Channel,
            coupling: Coupling,
            range: InputRange,
            impedance: Impedance,
        ) -> Result<(), ApiReturn> {
            check(unsafe {
                AlazarInputControl(
                    self.handle,
                    channel.mask() as u8,
                    coupling.code(),
                    range.code(),
                    impedance.code(),
                )
            })
        }

        fn configure_trigger(
            &mut self,
            slope: TriggerSlope,
            level_code: u8,
            range: TriggerRange,
            delay_samples: u32,
        ) -> Result<(), ApiReturn> {
            check(unsafe {
                AlazarSetTriggerOperation(
                    self.handle,
                    TRIG_ENGINE_OP_J,
                    TRIG_ENGINE_J,
                    TRIG_EXTERNAL,
                    slope.code(),
                    u32::from(level_code),
                    TRIG_ENGINE_K,
                    TRIG_DISABLE,
                    slope.code(),
                    LEVEL_MIDSCALE,
                )
            })?;
            check(unsafe {
                AlazarSetExternalTrigger(self.handle, Coupling::Dc.code(), range.code())
            })?;
            check(unsafe { AlazarSetTriggerDelay(self.handle, delay_samples) })?;
            // Wait forever for a hardware trigger; auto-triggering on a
            // timeout would corrupt an averaged measurement.
            check(unsafe { AlazarSetTriggerTimeOut(self.handle, 0) })
        }

        fn set_record_size(&mut self, pre_trigger: u32, post_trigger: u32) -> Result<(), ApiReturn> {
            check(unsafe { AlazarSetRecordSize(self.handle, pre_trigger, post_trigger) })
        }

        fn begin_async_read(
            &mut self,
            channel_mask: u32,
            samples_per_record: u32,
            records_per_buffer: u32,
            records_per_acquisition: u32,
            mode_flags: u32,
        ) -> Result<(), ApiReturn> {
            check(unsafe {
                AlazarBeforeAsyncRead(
                    self.handle,
                    channel_mask,
                    0, // NPT: no pre-trigger samples
                    samples_per_record,
                    records_per_buffer,
                    records_per_acquisition,
                    mode_flags,
                )
            })
        }

        fn post_buffer(&mut self, buffer: RawBuffer) -> Result<(), ApiReturn> {
            let bytes = buffer.byte_len() as u32;
            self.in_flight.push_back(buffer);
            let parked = self
                .in_flight
                .back_mut()
                .expect("in-flight queue cannot be empty after push");
            check(unsafe {
                AlazarPostAsyncBuffer(self.handle, parked.as_mut_slice().as_mut_ptr().cast(), bytes)
            })
        }

        fn wait_buffer_complete(&mut self, timeout: Duration) -> Result<RawBuffer, ApiReturn> {
            let head = self
                .in_flight
                .front_mut()
                .ok_or(ApiReturn::Failed)?;
            let addr = head.as_mut_slice().as_mut_ptr().cast();
            check(unsafe {
                AlazarWaitAsyncBufferComplete(self.handle, addr, timeout.as_millis() as u32)
            })?;
            Ok(self
                .in_flight
                .pop_front()
                .expect("in-flight queue head vanished during wait"))
        }

        fn start_capture(&mut self) -> Result<(), ApiReturn> {
            check(unsafe { AlazarStartCapture(self.handle) })
        }

        fn abort_async_read(&mut self) -> Result<(), ApiReturn> {
            let ret = check(unsafe { AlazarAbortAsyncRead(self.handle) });
            self.in_flight.clear();
            ret
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_return_roundtrips_known_codes() {
        for code in [512, 513, 514, 515, 516, 518, 579] {
            assert_eq!(ApiReturn::from(code).code(), code);
        }
        assert_eq!(ApiReturn::from(9999), ApiReturn::Unknown(9999));
        assert!(ApiReturn::from(512).is_ok());
        assert!(!ApiReturn::from(579).is_ok());
    }

    #[test]
    fn channel_masks_combine() {
        assert_eq!(Channel::both_mask(), 0x3);
    }
}
