use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use ats_daq::{
    AcquisitionBoard, AcquisitionConfig, Acquisition, FillPattern, Measurement, RawDump, SimBoard,
};

/// Run one averaged streaming acquisition and report the result.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Acquisition settings file (TOML); board defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump every raw buffer to this flat binary file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the configured number of buffers.
    #[arg(long)]
    buffers: Option<usize>,

    /// Drive the PCIe board instead of the simulated engine
    /// (requires the `alazar` build feature).
    #[arg(long)]
    hardware: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_config = ConfigBuilder::new()
        .set_time_format_custom(time::macros::format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();
    TermLogger::init(level, log_config, TerminalMode::Mixed, ColorChoice::Auto)?;

    let mut config = match &cli.config {
        Some(path) => AcquisitionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };
    if let Some(buffers) = cli.buffers {
        config.set_buffers_per_acquisition(buffers)?;
    }

    if cli.hardware {
        #[cfg(feature = "alazar")]
        {
            let board = ats_daq::board::alazar::AlazarBoard::open(1, 1)
                .map_err(ats_daq::DaqError::Board)?;
            return run(board, config, &cli);
        }
        #[cfg(not(feature = "alazar"))]
        anyhow::bail!("this binary was built without the `alazar` feature");
    }

    // Mid-scale with a little ADC noise, same on both channels.
    let board = SimBoard::new(FillPattern::Noise {
        mid: 2048,
        amplitude: 64,
    });
    run(board, config, &cli)
}

fn run<B: AcquisitionBoard>(board: B, config: AcquisitionConfig, cli: &Cli) -> Result<()> {
    let mut acquisition = Acquisition::new(board, config);
    if let Some(path) = &cli.output {
        acquisition.set_raw_sink(RawDump::create(path)?);
    }

    acquisition.configure()?;
    let measurement = acquisition.measure()?;
    report(&measurement, &acquisition);

    if let Some(sink) = acquisition.take_raw_sink() {
        sink.finish()?;
    }
    Ok(())
}

fn report<B: AcquisitionBoard>(measurement: &Measurement, acquisition: &Acquisition<B>) {
    let stats = acquisition.stats();
    let mean = |waveform: &ndarray::Array1<f64>| waveform.mean().unwrap_or(0.0);
    info!(
        "channel A: {} samples, mean {:+.6} V",
        measurement.channel_a.len(),
        mean(&measurement.channel_a),
    );
    info!(
        "channel B: {} samples, mean {:+.6} V",
        measurement.channel_b.len(),
        mean(&measurement.channel_b),
    );
    info!(
        "{} buffers ({:.1} MB) in {:.2} s, {:.1} MB/s",
        measurement.buffers_completed,
        stats.total_bytes as f64 / (1024.0 * 1024.0),
        stats.elapsed().as_secs_f64(),
        stats.average_rate(),
    );
}
