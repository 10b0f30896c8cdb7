//! ZNB20 vector network analyzer driver.
//!
//! Pure synchronous request/reply over SCPI text commands; the VISA session
//! sits behind the [`ScpiTransport`] seam so the driver can be exercised
//! without an instrument. Command coverage is limited to what the
//! measurement scripts actually use.

use std::fmt;

use confique::Config;
use serde::Deserialize;

use crate::error::DaqError;

const FREQ_MIN_HZ: f64 = 100e3;
const FREQ_MAX_HZ: f64 = 20e9;
const POWER_MAX_DBM: f64 = 30.0;
const BANDWIDTH_MIN_HZ: f64 = 0.1;
const BANDWIDTH_MAX_HZ: f64 = 500e3;
const POINTS_MAX: usize = 100_000;
const AVERAGES_MAX: usize = 100_000;

/// Text-command session with the instrument.
pub trait ScpiTransport: Send {
    fn write(&mut self, command: &str) -> Result<(), DaqError>;
    fn query(&mut self, command: &str) -> Result<String, DaqError>;
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SParameter {
    S11,
    S12,
    S21,
    S22,
}

impl fmt::Display for SParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Frequency-sweep settings pushed to the instrument in one go.
#[derive(Config, Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Start frequency in Hz.
    #[config(default = 4e9)]
    pub start_hz: f64,
    /// Stop frequency in Hz.
    #[config(default = 8e9)]
    pub stop_hz: f64,
    #[config(default = 1001)]
    pub points: usize,
    /// Source power in dBm.
    #[config(default = -10.0)]
    pub power_dbm: f64,
    /// Measurement bandwidth in Hz.
    #[config(default = 1000.0)]
    pub bandwidth_hz: f64,
    #[config(default = 1)]
    pub averages: usize,
    #[config(default = "S21")]
    pub s_parameter: SParameter,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: 4e9,
            stop_hz: 8e9,
            points: 1001,
            power_dbm: -10.0,
            bandwidth_hz: 1000.0,
            averages: 1,
            s_parameter: SParameter::S21,
        }
    }
}

fn rejected(msg: String) -> DaqError {
    DaqError::ConfigurationRejected(msg)
}

fn check_frequency(hz: f64, what: &str) -> Result<(), DaqError> {
    if !(FREQ_MIN_HZ..=FREQ_MAX_HZ).contains(&hz) {
        return Err(rejected(format!(
            "{what} {hz} Hz is outside [{FREQ_MIN_HZ}, {FREQ_MAX_HZ}] Hz"
        )));
    }
    Ok(())
}

fn parse_number(text: &str, what: &str) -> Result<f64, DaqError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| DaqError::Scpi(format!("unparseable {what} reply: {text:?}")))
}

/// Driver for one ZNB20, generic over the transport.
pub struct Znb20<T: ScpiTransport> {
    io: T,
}

impl<T: ScpiTransport> Znb20<T> {
    pub fn new(io: T) -> Self {
        Self { io }
    }

    pub fn identify(&mut self) -> Result<String, DaqError> {
        self.io.query("*IDN?")
    }

    /// Reset the instrument to its default state.
    pub fn reset(&mut self) -> Result<(), DaqError> {
        self.io.write("*RST")
    }

    /// Delete all traces, define a fresh one for `s_parameter`, feed it to
    /// window 1 and leave the instrument in single-sweep mode.
    pub fn create_trace(&mut self, name: &str, s_parameter: SParameter) -> Result<(), DaqError> {
        self.io.write("calc:parameter:del:all")?;
        self.io
            .write(&format!("calc:parameter:sdef \"{name}\",\"{s_parameter}\""))?;
        self.io.write("disp:wind1:stat on")?;
        self.io.write(&format!("disp:wind1:trac1:feed \"{name}\""))?;
        self.io.write("syst:disp:upd on")?;
        self.io.write("init:cont off")
    }

    /// Push a whole sweep configuration, then define the trace.
    pub fn apply(&mut self, config: &SweepConfig) -> Result<(), DaqError> {
        if config.stop_hz <= config.start_hz {
            return Err(rejected(format!(
                "sweep stop {} Hz is not above start {} Hz",
                config.stop_hz, config.start_hz
            )));
        }
        self.set_start_frequency(config.start_hz)?;
        self.set_stop_frequency(config.stop_hz)?;
        self.set_points(config.points)?;
        self.set_power(config.power_dbm)?;
        self.set_bandwidth(config.bandwidth_hz)?;
        self.set_averages(config.averages)?;
        self.set_average_enabled(config.averages > 1)?;
        self.create_trace("Trc1", config.s_parameter)
    }

    pub fn set_start_frequency(&mut self, hz: f64) -> Result<(), DaqError> {
        check_frequency(hz, "start frequency")?;
        self.io.write(&format!("frequency:start {hz}"))
    }

    pub fn start_frequency(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("frequency:start?")?;
        parse_number(&reply, "start frequency")
    }

    pub fn set_stop_frequency(&mut self, hz: f64) -> Result<(), DaqError> {
        check_frequency(hz, "stop frequency")?;
        self.io.write(&format!("frequency:stop {hz}"))
    }

    pub fn stop_frequency(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("frequency:stop?")?;
        parse_number(&reply, "stop frequency")
    }

    pub fn set_center_frequency(&mut self, hz: f64) -> Result<(), DaqError> {
        check_frequency(hz, "center frequency")?;
        self.io.write(&format!("frequency:center {hz}"))
    }

    pub fn center_frequency(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("frequency:center?")?;
        parse_number(&reply, "center frequency")
    }

    pub fn set_span(&mut self, hz: f64) -> Result<(), DaqError> {
        check_frequency(hz, "frequency span")?;
        self.io.write(&format!("freq:span {hz}"))
    }

    pub fn span(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("frequency:span?")?;
        parse_number(&reply, "frequency span")
    }

    pub fn set_cw_frequency(&mut self, hz: f64) -> Result<(), DaqError> {
        check_frequency(hz, "CW frequency")?;
        self.io.write(&format!("sour:freq:cw {hz}"))
    }

    pub fn set_power(&mut self, dbm: f64) -> Result<(), DaqError> {
        if dbm > POWER_MAX_DBM {
            return Err(rejected(format!(
                "power {dbm} dBm is above the {POWER_MAX_DBM} dBm limit"
            )));
        }
        self.io.write(&format!("source:power {dbm}"))
    }

    pub fn power(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("source:power?")?;
        parse_number(&reply, "power")
    }

    pub fn set_points(&mut self, points: usize) -> Result<(), DaqError> {
        if points == 0 || points > POINTS_MAX {
            return Err(rejected(format!(
                "{points} sweep points is outside [1, {POINTS_MAX}]"
            )));
        }
        self.io.write(&format!("sens:sweep:points {points}"))
    }

    pub fn points(&mut self) -> Result<usize, DaqError> {
        let reply = self.io.query("sens:sweep:points?")?;
        Ok(parse_number(&reply, "sweep points")? as usize)
    }

    pub fn set_bandwidth(&mut self, hz: f64) -> Result<(), DaqError> {
        if !(BANDWIDTH_MIN_HZ..=BANDWIDTH_MAX_HZ).contains(&hz) {
            return Err(rejected(format!(
                "measurement bandwidth {hz} Hz is outside \
                 [{BANDWIDTH_MIN_HZ}, {BANDWIDTH_MAX_HZ}] Hz"
            )));
        }
        self.io.write(&format!("sens:band {hz}"))
    }

    pub fn bandwidth(&mut self) -> Result<f64, DaqError> {
        let reply = self.io.query("sens:band?")?;
        parse_number(&reply, "bandwidth")
    }

    pub fn set_sweep_count(&mut self, sweeps: usize) -> Result<(), DaqError> {
        if sweeps == 0 {
            return Err(rejected("sweep count must be at least 1".into()));
        }
        self.io.write("initiate:cont off")?;
        self.io.write(&format!("sens:sweep:count {sweeps}"))
    }

    pub fn sweep_count(&mut self) -> Result<usize, DaqError> {
        let reply = self.io.query("sens:sweep:count?")?;
        Ok(parse_number(&reply, "sweep count")? as usize)
    }

    pub fn set_averages(&mut self, count: usize) -> Result<(), DaqError> {
        if count == 0 || count > AVERAGES_MAX {
            return Err(rejected(format!(
                "{count} averages is outside [1, {AVERAGES_MAX}]"
            )));
        }
        self.io.write(&format!("average:count {count}"))
    }

    pub fn set_average_enabled(&mut self, enabled: bool) -> Result<(), DaqError> {
        self.io
            .write(if enabled { "average ON" } else { "average OFF" })
    }

    pub fn average_enabled(&mut self) -> Result<bool, DaqError> {
        match self.io.query("average?")?.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(DaqError::Scpi(format!("average status reply: {other:?}"))),
        }
    }

    pub fn clear_averages(&mut self) -> Result<(), DaqError> {
        self.io.write("average:clear")
    }

    pub fn set_output(&mut self, enabled: bool) -> Result<(), DaqError> {
        self.io
            .write(if enabled { "output ON" } else { "output OFF" })
    }

    pub fn output(&mut self) -> Result<bool, DaqError> {
        match self.io.query("output?")?.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(DaqError::Scpi(format!("output status reply: {other:?}"))),
        }
    }

    /// Launch one sweep and gate the operation-complete flag on it.
    pub fn single_sweep(&mut self) -> Result<(), DaqError> {
        self.io.write("initiate:cont off")?;
        self.io.write("*CLS")?;
        self.io.write("initiate:immediate; *OPC")
    }

    /// Block until the running sweep reports completion.
    pub fn wait_sweep_done(&mut self) -> Result<(), DaqError> {
        self.io.query("*OPC?").map(|_| ())
    }

    /// Read the active trace as (re, im) pairs.
    pub fn read_trace(&mut self) -> Result<Vec<(f64, f64)>, DaqError> {
        let reply = self.io.query("calculate:data? sdata")?;
        let values: Vec<f64> = reply
            .trim()
            .split(',')
            .map(|field| parse_number(field, "trace field"))
            .collect::<Result<_, _>>()?;
        if values.len() % 2 != 0 {
            return Err(DaqError::Scpi(format!(
                "trace reply holds {} values, expected re/im pairs",
                values.len()
            )));
        }
        Ok(values.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
    }
}
