//! Acquisition parameters and their validation rules.
//!
//! Parameters live in a plain [`AcquisitionConfig`] value that is handed by
//! reference into the acquisition session; validating setters reject bad
//! values outright instead of clamping them, and `validate()` re-checks the
//! whole snapshot before it is pushed to hardware.

use std::path::Path;

use confique::Config;
use serde::Deserialize;

use crate::error::DaqError;

/// The number of acquired samples per record must be a multiple of this.
pub const SAMPLE_GRANULARITY: usize = 128;
/// Shortest record the board accepts.
pub const MIN_ACQUIRED_SAMPLES: usize = 256;
/// The streaming path always captures channels A and B.
pub const CHANNEL_COUNT: usize = 2;
/// ADC resolution; 12-bit codes are stored in the top bits of 16-bit words.
pub const BITS_PER_SAMPLE: u32 = 12;

/// Sample rates the internal clock can produce, in MS/s, with the vendor
/// rate codes. With the external 10 MHz reference any rate inside
/// [300, 1800] MS/s is reachable instead.
const INTERNAL_RATES_MSPS: &[(f64, u32)] = &[
    (1e-3, 0x1),
    (2e-3, 0x2),
    (5e-3, 0x4),
    (10e-3, 0x8),
    (20e-3, 0xA),
    (50e-3, 0xC),
    (100e-3, 0xE),
    (200e-3, 0x10),
    (500e-3, 0x12),
    (1.0, 0x14),
    (2.0, 0x18),
    (5.0, 0x1A),
    (10.0, 0x1C),
    (20.0, 0x1E),
    (50.0, 0x22),
    (100.0, 0x24),
    (200.0, 0x28),
    (500.0, 0x30),
    (800.0, 0x32),
    (1000.0, 0x35),
    (1200.0, 0x37),
    (1500.0, 0x3A),
    (1800.0, 0x3D),
];

const EXTERNAL_RATE_MIN_MSPS: f64 = 300.0;
const EXTERNAL_RATE_MAX_MSPS: f64 = 1800.0;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Internal,
    /// External 10 MHz reference.
    External,
}

impl ClockSource {
    pub fn code(self) -> u32 {
        match self {
            ClockSource::Internal => 0x1,
            ClockSource::External => 0x7,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockEdge {
    Rising,
    Falling,
}

impl ClockEdge {
    pub fn code(self) -> u32 {
        match self {
            ClockEdge::Rising => 0,
            ClockEdge::Falling => 1,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSlope {
    Positive,
    Negative,
}

impl TriggerSlope {
    pub fn code(self) -> u32 {
        match self {
            TriggerSlope::Positive => 1,
            TriggerSlope::Negative => 2,
        }
    }
}

/// Input range of the external trigger channel. Only three ranges exist;
/// the TTL mode is deliberately not offered.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "f64")]
pub enum TriggerRange {
    Etr5V,
    Etr2V5,
    Etr1V,
}

impl TriggerRange {
    pub fn volts(self) -> f64 {
        match self {
            TriggerRange::Etr5V => 5.0,
            TriggerRange::Etr2V5 => 2.5,
            TriggerRange::Etr1V => 1.0,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            TriggerRange::Etr5V => 0,
            TriggerRange::Etr1V => 1,
            TriggerRange::Etr2V5 => 3,
        }
    }
}

impl TryFrom<f64> for TriggerRange {
    type Error = String;

    fn try_from(volts: f64) -> Result<Self, Self::Error> {
        match volts {
            v if v == 5.0 => Ok(TriggerRange::Etr5V),
            v if v == 2.5 => Ok(TriggerRange::Etr2V5),
            v if v == 1.0 => Ok(TriggerRange::Etr1V),
            v => Err(format!("trigger range must be 5, 2.5 or 1 V, got {v}")),
        }
    }
}

/// Snapshot of one acquisition's parameters.
///
/// Loadable from a TOML file; every field has the board's power-on default.
#[derive(Config, Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    #[config(default = "external")]
    pub clock_source: ClockSource,
    #[config(default = "rising")]
    pub clock_edge: ClockEdge,
    /// Sample rate in MS/s.
    #[config(default = 1800.0)]
    pub samplerate_msps: f64,

    #[config(default = 5.0)]
    pub trigger_range: TriggerRange,
    #[config(default = "positive")]
    pub trigger_slope: TriggerSlope,
    /// Trigger level in V; must lie strictly inside the trigger range.
    #[config(default = 0.5)]
    pub trigger_level: f64,
    /// Delay between trigger event and record capture, in ns.
    #[config(default = 0.0)]
    pub trigger_delay_ns: f64,

    /// Samples per record (NPT mode: all post-trigger).
    #[config(default = 10240)]
    pub acquired_samples: usize,
    #[config(default = 20)]
    pub records_per_buffer: usize,
    /// DMA buffer pool size.
    #[config(default = 10)]
    pub nb_buffer_allocated: usize,
    #[config(default = 10)]
    pub buffers_per_acquisition: usize,

    /// Bound on each wait for a buffer completion, in ms.
    #[config(default = 5000)]
    pub wait_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            clock_source: ClockSource::External,
            clock_edge: ClockEdge::Rising,
            samplerate_msps: 1800.0,
            trigger_range: TriggerRange::Etr5V,
            trigger_slope: TriggerSlope::Positive,
            trigger_level: 0.5,
            trigger_delay_ns: 0.0,
            acquired_samples: 10240,
            records_per_buffer: 20,
            nb_buffer_allocated: 10,
            buffers_per_acquisition: 10,
            wait_timeout_ms: 5000,
        }
    }
}

fn rejected(msg: String) -> DaqError {
    DaqError::ConfigurationRejected(msg)
}

impl AcquisitionConfig {
    /// Load settings from a TOML file, with environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DaqError> {
        Ok(Self::builder().env().file(path.as_ref()).load()?)
    }

    pub fn set_clock_source(&mut self, source: ClockSource) {
        self.clock_source = source;
    }

    pub fn set_clock_edge(&mut self, edge: ClockEdge) {
        self.clock_edge = edge;
    }

    /// Set the sample rate in MS/s. The internal clock only produces rates
    /// from a fixed table; the external 10 MHz reference covers a continuous
    /// band instead.
    pub fn set_samplerate(&mut self, msps: f64) -> Result<(), DaqError> {
        self.check_samplerate(msps)?;
        self.samplerate_msps = msps;
        Ok(())
    }

    fn check_samplerate(&self, msps: f64) -> Result<(), DaqError> {
        match self.clock_source {
            ClockSource::Internal => {
                if internal_rate_code(msps).is_none() {
                    return Err(rejected(format!(
                        "{msps} MS/s is not one of the internal clock's rates"
                    )));
                }
            }
            ClockSource::External => {
                if !(EXTERNAL_RATE_MIN_MSPS..=EXTERNAL_RATE_MAX_MSPS).contains(&msps) {
                    return Err(rejected(format!(
                        "{msps} MS/s is outside the external clock band \
                         [{EXTERNAL_RATE_MIN_MSPS}, {EXTERNAL_RATE_MAX_MSPS}] MS/s"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Set the trigger level in V; it must lie strictly inside the trigger
    /// range.
    pub fn set_trigger_level(&mut self, volts: f64) -> Result<(), DaqError> {
        let range = self.trigger_range.volts();
        if volts.abs() >= range {
            return Err(rejected(format!(
                "trigger level {volts} V is outside the ±{range} V trigger range"
            )));
        }
        self.trigger_level = volts;
        Ok(())
    }

    /// Change the trigger range; the new range has to contain the current
    /// level.
    pub fn set_trigger_range(&mut self, range: TriggerRange) -> Result<(), DaqError> {
        if self.trigger_level.abs() >= range.volts() {
            return Err(rejected(format!(
                "trigger range ±{} V does not contain the {} V trigger level",
                range.volts(),
                self.trigger_level
            )));
        }
        self.trigger_range = range;
        Ok(())
    }

    pub fn set_trigger_slope(&mut self, slope: TriggerSlope) {
        self.trigger_slope = slope;
    }

    pub fn set_trigger_delay_ns(&mut self, ns: f64) -> Result<(), DaqError> {
        if ns < 0.0 {
            return Err(rejected(format!("trigger delay {ns} ns is negative")));
        }
        self.trigger_delay_ns = ns;
        Ok(())
    }

    /// Set the number of samples per record. Must be a multiple of
    /// [`SAMPLE_GRANULARITY`] and at least [`MIN_ACQUIRED_SAMPLES`].
    pub fn set_acquired_samples(&mut self, samples: usize) -> Result<(), DaqError> {
        if samples < MIN_ACQUIRED_SAMPLES {
            return Err(rejected(format!(
                "{samples} samples per record is below the minimum of {MIN_ACQUIRED_SAMPLES}"
            )));
        }
        if samples % SAMPLE_GRANULARITY != 0 {
            return Err(rejected(format!(
                "{samples} samples per record is not a multiple of {SAMPLE_GRANULARITY}"
            )));
        }
        self.acquired_samples = samples;
        Ok(())
    }

    /// Set the acquisition window by duration. The requested time is rounded
    /// to the closest sample count the granularity allows; the achieved
    /// window in ns is returned.
    pub fn set_acquisition_time(&mut self, ns: f64) -> Result<f64, DaqError> {
        let min_ns = MIN_ACQUIRED_SAMPLES as f64 / self.samplerate_msps * 1e3;
        if ns <= min_ns {
            return Err(rejected(format!(
                "acquisition time {ns} ns must be longer than {min_ns:.2} ns"
            )));
        }
        let samples = (self.samplerate_msps * ns * 1e-3).round();
        let granules = (samples / SAMPLE_GRANULARITY as f64).round().max(2.0);
        self.acquired_samples = granules as usize * SAMPLE_GRANULARITY;
        Ok(self.acquisition_time_ns())
    }

    pub fn set_records_per_buffer(&mut self, records: usize) -> Result<(), DaqError> {
        if records == 0 {
            return Err(rejected("records_per_buffer must be at least 1".into()));
        }
        self.records_per_buffer = records;
        Ok(())
    }

    pub fn set_nb_buffer_allocated(&mut self, buffers: usize) -> Result<(), DaqError> {
        if buffers == 0 {
            return Err(rejected("nb_buffer_allocated must be at least 1".into()));
        }
        self.nb_buffer_allocated = buffers;
        Ok(())
    }

    pub fn set_buffers_per_acquisition(&mut self, buffers: usize) -> Result<(), DaqError> {
        if buffers == 0 {
            return Err(rejected(
                "buffers_per_acquisition must be at least 1".into(),
            ));
        }
        self.buffers_per_acquisition = buffers;
        Ok(())
    }

    /// Re-check the whole snapshot. Run before any value is pushed to the
    /// hardware, so a config assembled field-by-field cannot smuggle an
    /// inconsistent combination past the setters.
    pub fn validate(&self) -> Result<(), DaqError> {
        self.check_samplerate(self.samplerate_msps)?;
        if self.trigger_level.abs() >= self.trigger_range.volts() {
            return Err(rejected(format!(
                "trigger level {} V is outside the ±{} V trigger range",
                self.trigger_level,
                self.trigger_range.volts()
            )));
        }
        if self.acquired_samples < MIN_ACQUIRED_SAMPLES
            || self.acquired_samples % SAMPLE_GRANULARITY != 0
        {
            return Err(rejected(format!(
                "{} samples per record violates the {}-sample granularity (min {})",
                self.acquired_samples, SAMPLE_GRANULARITY, MIN_ACQUIRED_SAMPLES
            )));
        }
        if self.records_per_buffer == 0
            || self.nb_buffer_allocated == 0
            || self.buffers_per_acquisition == 0
        {
            return Err(rejected(
                "record and buffer counts must all be at least 1".into(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(rejected("wait_timeout_ms must be nonzero".into()));
        }
        Ok(())
    }

    /// Samples per record; NPT mode captures no pre-trigger samples.
    pub fn samples_per_record(&self) -> usize {
        self.acquired_samples
    }

    /// Interleaved samples held by one DMA buffer (both channels).
    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_record() * self.records_per_buffer * CHANNEL_COUNT
    }

    /// 12-bit samples are stored in whole bytes.
    pub fn bytes_per_sample() -> usize {
        ((BITS_PER_SAMPLE + 7) / 8) as usize
    }

    pub fn bytes_per_buffer(&self) -> usize {
        self.samples_per_buffer() * Self::bytes_per_sample()
    }

    pub fn records_per_acquisition(&self) -> usize {
        self.records_per_buffer * self.buffers_per_acquisition
    }

    /// Acquisition window in ns for the current rate and record length.
    pub fn acquisition_time_ns(&self) -> f64 {
        self.acquired_samples as f64 * 1e3 / self.samplerate_msps
    }

    /// Rate argument for the capture-clock call: a table code for the
    /// internal clock, the rate in Hz for the external reference.
    pub fn samplerate_code(&self) -> Result<u32, DaqError> {
        match self.clock_source {
            ClockSource::Internal => internal_rate_code(self.samplerate_msps).ok_or_else(|| {
                rejected(format!(
                    "{} MS/s is not one of the internal clock's rates",
                    self.samplerate_msps
                ))
            }),
            ClockSource::External => Ok((self.samplerate_msps * 1e6) as u32),
        }
    }

    pub fn clock_decimation(&self) -> u32 {
        match self.clock_source {
            ClockSource::Internal => 0,
            ClockSource::External => 1,
        }
    }

    /// Trigger level as the 8-bit code the trigger engine takes
    /// (128 = 0 V, full scale at 0/255).
    pub fn trigger_level_code(&self) -> u8 {
        let fraction = self.trigger_level / self.trigger_range.volts();
        let code = 128.0 + (127.0 * fraction).round();
        code.clamp(0.0, 255.0) as u8
    }

    pub fn trigger_delay_samples(&self) -> u32 {
        let rate_hz = self.samplerate_msps * 1e6;
        (self.trigger_delay_ns * 1e-9 * rate_hz + 0.5) as u32
    }
}

fn internal_rate_code(msps: f64) -> Option<u32> {
    INTERNAL_RATES_MSPS
        .iter()
        .find(|(rate, _)| (rate - msps).abs() <= 1e-9 * rate.max(1.0))
        .map(|&(_, code)| code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AcquisitionConfig::default().validate().unwrap();
    }

    #[test]
    fn internal_clock_accepts_only_table_rates() {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_clock_source(ClockSource::Internal);
        cfg.set_samplerate(1800.0).unwrap();
        cfg.set_samplerate(0.001).unwrap();
        assert!(cfg.set_samplerate(333.0).is_err());
        assert_eq!(cfg.samplerate_msps, 0.001);
    }

    #[test]
    fn external_clock_accepts_the_band() {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_samplerate(1234.0).unwrap();
        cfg.set_samplerate(300.0).unwrap();
        cfg.set_samplerate(1800.0).unwrap();
        assert!(cfg.set_samplerate(299.9).is_err());
        assert!(cfg.set_samplerate(1800.1).is_err());
    }

    #[test]
    fn trigger_level_must_sit_inside_range() {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_trigger_level(4.9).unwrap();
        assert!(cfg.set_trigger_level(5.0).is_err());
        assert!(cfg.set_trigger_level(-5.0).is_err());
        // Narrowing the range below the level is rejected too.
        assert!(cfg.set_trigger_range(TriggerRange::Etr2V5).is_err());
        cfg.set_trigger_level(0.5).unwrap();
        cfg.set_trigger_range(TriggerRange::Etr1V).unwrap();
    }

    #[test]
    fn record_length_keeps_granularity() {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_acquired_samples(128 * 80).unwrap();
        assert!(cfg.set_acquired_samples(100).is_err());
        assert!(cfg.set_acquired_samples(1000).is_err());
    }

    #[test]
    fn acquisition_time_rounds_to_granularity() {
        let mut cfg = AcquisitionConfig::default();
        let achieved = cfg.set_acquisition_time(5689.0).unwrap();
        assert_eq!(cfg.acquired_samples, 10240);
        assert!((achieved - 10240.0 * 1e3 / 1800.0).abs() < 1e-9);
        assert!(cfg.set_acquisition_time(10.0).is_err());
    }

    #[test]
    fn buffer_sizing_counts_both_channels() {
        let cfg = AcquisitionConfig::default();
        assert_eq!(cfg.samples_per_buffer(), 10240 * 20 * 2);
        assert_eq!(cfg.bytes_per_buffer(), 10240 * 20 * 2 * 2);
        assert_eq!(cfg.records_per_acquisition(), 200);
    }

    #[test]
    fn trigger_level_code_is_midscale_anchored() {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_trigger_level(0.0).unwrap();
        assert_eq!(cfg.trigger_level_code(), 128);
        cfg.set_trigger_level(0.5).unwrap();
        assert_eq!(cfg.trigger_level_code(), 141);
        cfg.set_trigger_level(-2.5).unwrap();
        assert_eq!(cfg.trigger_level_code(), 64);
    }

    #[test]
    fn trigger_range_parses_from_volts() {
        assert_eq!(TriggerRange::try_from(2.5), Ok(TriggerRange::Etr2V5));
        assert!(TriggerRange::try_from(3.3).is_err());
    }
}
