//! In-memory acquisition engine for tests and hardware-free runs.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::board::{AcquisitionBoard, ApiReturn, Channel, Coupling, Impedance, InputRange};
use crate::config::{ClockEdge, ClockSource, TriggerRange, TriggerSlope};
use crate::ring::RawBuffer;

/// What the simulated board writes into a completed buffer.
///
/// `Constant` and `ConstantPair` take raw 16-bit words (a 12-bit code shifted
/// left by 4); `Noise` takes a 12-bit mid code and amplitude and does the
/// shifting itself.
#[derive(Debug, Clone, Copy)]
pub enum FillPattern {
    /// Every sample of both channels is the same raw word.
    Constant(u16),
    /// Channel A gets the first word, channel B the second.
    ConstantPair(u16, u16),
    /// Sample index modulo the 12-bit range, shifted into raw position.
    Ramp,
    /// Uniform noise of ±`amplitude` codes around `mid`.
    Noise { mid: u16, amplitude: u16 },
}

/// Software stand-in for the acquisition engine.
///
/// Posted buffers queue in FIFO order and complete instantly on wait, filled
/// with the configured pattern. The `stalled` variant never completes, which
/// is how the timeout path is exercised. Configuration and arm/start calls
/// are tracked so ordering mistakes in the orchestration show up as errors
/// here rather than on real hardware.
pub struct SimBoard {
    pattern: FillPattern,
    stalled: bool,
    reject_config: bool,
    clock_set: bool,
    channel_mask_set: u32,
    trigger_set: bool,
    record_size: Option<(u32, u32)>,
    armed: bool,
    capture_started: bool,
    posted: VecDeque<RawBuffer>,
    rng: StdRng,
}

impl SimBoard {
    pub fn new(pattern: FillPattern) -> Self {
        Self {
            pattern,
            stalled: false,
            reject_config: false,
            clock_set: false,
            channel_mask_set: 0,
            trigger_set: false,
            record_size: None,
            armed: false,
            capture_started: false,
            posted: VecDeque::new(),
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    /// A board whose completions never arrive.
    pub fn stalled(pattern: FillPattern) -> Self {
        Self {
            stalled: true,
            ..Self::new(pattern)
        }
    }

    /// A board that declines every configuration call.
    pub fn rejecting() -> Self {
        Self {
            reject_config: true,
            ..Self::new(FillPattern::Constant(0))
        }
    }

    fn fill(&mut self, buffer: &mut RawBuffer) {
        match self.pattern {
            FillPattern::Constant(word) => buffer.as_mut_slice().fill(word),
            FillPattern::ConstantPair(a, b) => {
                for (i, sample) in buffer.as_mut_slice().iter_mut().enumerate() {
                    *sample = if i % 2 == 0 { a } else { b };
                }
            }
            FillPattern::Ramp => {
                for (i, sample) in buffer.as_mut_slice().iter_mut().enumerate() {
                    *sample = ((i % 4096) as u16) << 4;
                }
            }
            FillPattern::Noise { mid, amplitude } => {
                let amplitude = i32::from(amplitude);
                for sample in buffer.as_mut_slice().iter_mut() {
                    let jitter = self.rng.random_range(-amplitude..=amplitude);
                    let code = (i32::from(mid) + jitter).clamp(0, 4095) as u16;
                    *sample = code << 4;
                }
            }
        }
    }

    fn config_result(&self) -> Result<(), ApiReturn> {
        if self.reject_config {
            Err(ApiReturn::Failed)
        } else {
            Ok(())
        }
    }
}

impl AcquisitionBoard for SimBoard {
    fn configure_clock(
        &mut self,
        _source: ClockSource,
        _rate: u32,
        _edge: ClockEdge,
        _decimation: u32,
    ) -> Result<(), ApiReturn> {
        self.config_result()?;
        self.clock_set = true;
        Ok(())
    }

    fn configure_channel(
        &mut self,
        channel: Channel,
        _coupling: Coupling,
        _range: InputRange,
        _impedance: Impedance,
    ) -> Result<(), ApiReturn> {
        self.config_result()?;
        self.channel_mask_set |= channel.mask();
        Ok(())
    }

    fn configure_trigger(
        &mut self,
        _slope: TriggerSlope,
        _level_code: u8,
        _range: TriggerRange,
        _delay_samples: u32,
    ) -> Result<(), ApiReturn> {
        self.config_result()?;
        self.trigger_set = true;
        Ok(())
    }

    fn set_record_size(&mut self, pre_trigger: u32, post_trigger: u32) -> Result<(), ApiReturn> {
        self.config_result()?;
        self.record_size = Some((pre_trigger, post_trigger));
        Ok(())
    }

    fn begin_async_read(
        &mut self,
        channel_mask: u32,
        _samples_per_record: u32,
        _records_per_buffer: u32,
        _records_per_acquisition: u32,
        _mode_flags: u32,
    ) -> Result<(), ApiReturn> {
        if self.capture_started {
            return Err(ApiReturn::DmaInProgress);
        }
        if channel_mask == 0 {
            return Err(ApiReturn::Failed);
        }
        self.armed = true;
        Ok(())
    }

    fn post_buffer(&mut self, buffer: RawBuffer) -> Result<(), ApiReturn> {
        if !self.armed {
            return Err(ApiReturn::Failed);
        }
        self.posted.push_back(buffer);
        Ok(())
    }

    fn wait_buffer_complete(&mut self, timeout: Duration) -> Result<RawBuffer, ApiReturn> {
        if self.stalled {
            thread::sleep(timeout);
            return Err(ApiReturn::WaitTimeout);
        }
        if !self.capture_started {
            return Err(ApiReturn::Failed);
        }
        let mut buffer = self.posted.pop_front().ok_or(ApiReturn::Failed)?;
        self.fill(&mut buffer);
        Ok(buffer)
    }

    fn start_capture(&mut self) -> Result<(), ApiReturn> {
        if !self.armed {
            return Err(ApiReturn::Failed);
        }
        self.capture_started = true;
        Ok(())
    }

    fn abort_async_read(&mut self) -> Result<(), ApiReturn> {
        self.posted.clear();
        self.capture_started = false;
        self.armed = false;
        Ok(())
    }
}
