//! Acquisition session: hardware configuration, the streaming capture loop,
//! and the reduction pipeline that turns raw buffers into averaged
//! waveforms.
//!
//! A measurement runs as two cooperating units of execution. The acquisition
//! thread owns the buffer ring: it waits on completions, hands each filled
//! buffer across a channel, and reposts drained buffers the reduction side
//! sends back. The reduction loop runs on the calling thread: convert to
//! volts, de-interleave and reduce, fold into the running averages, recycle
//! the buffer. The finite pool provides natural backpressure: when the
//! consumer lags by more than the pool size, the producer stalls on the
//! recycle channel instead of dropping data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};
use ndarray::Array1;

use crate::average::ChannelAccumulator;
use crate::board::{AcquisitionBoard, ApiReturn, Channel, Coupling, Impedance, InputRange};
use crate::codec;
use crate::config::AcquisitionConfig;
use crate::demux;
use crate::error::DaqError;
use crate::ring::{BufferRing, RawBuffer};
use crate::stats::Counter;
use crate::writer::RawDump;

/// Lifecycle of one acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    Configured,
    Capturing,
    Completed,
    Aborted,
    Failed,
}

/// Clonable handle for requesting a clean stop from outside the capture
/// loop. The request interrupts the wait-for-completion call within its
/// timeout bound; no further buffer is processed past it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a completed acquisition: the per-channel averaged waveforms,
/// plus the last raw buffer as a diagnostic artifact.
#[derive(Debug)]
pub struct Measurement {
    pub channel_a: Array1<f64>,
    pub channel_b: Array1<f64>,
    pub last_buffer: RawBuffer,
    pub buffers_completed: usize,
}

/// One digitizer session: a board, a parameter snapshot, and the state
/// machine Idle → Configured → Capturing → {Completed, Aborted, Failed}.
pub struct Acquisition<B: AcquisitionBoard> {
    board: B,
    config: AcquisitionConfig,
    state: AcqState,
    raw_sink: Option<RawDump>,
    counter: Counter,
}

impl<B: AcquisitionBoard> Acquisition<B> {
    pub fn new(board: B, config: AcquisitionConfig) -> Self {
        Self {
            board,
            config,
            state: AcqState::Idle,
            raw_sink: None,
            counter: Counter::new(),
        }
    }

    pub fn state(&self) -> AcqState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Throughput of the most recent capture.
    pub fn stats(&self) -> &Counter {
        &self.counter
    }

    /// Attach a sink that receives every raw buffer before it is recycled.
    pub fn set_raw_sink(&mut self, sink: RawDump) {
        self.raw_sink = Some(sink);
    }

    pub fn take_raw_sink(&mut self) -> Option<RawDump> {
        self.raw_sink.take()
    }

    /// Give the board back, consuming the session.
    pub fn into_board(self) -> B {
        self.board
    }

    /// Validate the parameter snapshot and push it to the hardware: capture
    /// clock, both input channels, the external trigger engine, and the
    /// record geometry. A declined setting surfaces as
    /// [`DaqError::ConfigurationRejected`] with the vendor context preserved.
    pub fn configure(&mut self) -> Result<(), DaqError> {
        self.config.validate()?;
        let rate = self.config.samplerate_code()?;

        self.board
            .configure_clock(
                self.config.clock_source,
                rate,
                self.config.clock_edge,
                self.config.clock_decimation(),
            )
            .map_err(|e| rejected_by_board("capture clock", e))?;
        for channel in [Channel::A, Channel::B] {
            self.board
                .configure_channel(channel, Coupling::Dc, InputRange::Pm400Mv, Impedance::Ohm50)
                .map_err(|e| rejected_by_board("channel input", e))?;
        }
        self.board
            .configure_trigger(
                self.config.trigger_slope,
                self.config.trigger_level_code(),
                self.config.trigger_range,
                self.config.trigger_delay_samples(),
            )
            .map_err(|e| rejected_by_board("trigger engine", e))?;
        self.board
            .set_record_size(0, self.config.samples_per_record() as u32)
            .map_err(|e| rejected_by_board("record size", e))?;

        self.state = AcqState::Configured;
        info!(
            "configured: {} S/record x {} records/buffer x {} buffers at {} MS/s",
            self.config.samples_per_record(),
            self.config.records_per_buffer,
            self.config.buffers_per_acquisition,
            self.config.samplerate_msps,
        );
        Ok(())
    }

    /// Run one full acquisition and return the averaged waveforms.
    pub fn measure(&mut self) -> Result<Measurement, DaqError> {
        self.measure_with_cancel(&CancelToken::new())
    }

    /// Like [`Self::measure`], but interruptible through `cancel`.
    ///
    /// # Panics
    ///
    /// Panics if called before [`Self::configure`] has succeeded; measuring
    /// an unconfigured board is a programming error.
    pub fn measure_with_cancel(&mut self, cancel: &CancelToken) -> Result<Measurement, DaqError> {
        assert!(
            self.state != AcqState::Idle,
            "measure() requires a successful configure() first"
        );
        let Self {
            ref mut board,
            ref config,
            ref mut state,
            ref mut raw_sink,
            ref mut counter,
        } = *self;

        *state = AcqState::Capturing;
        counter.reset();

        let total = config.buffers_per_acquisition;
        let records = config.records_per_buffer;
        let samples = config.samples_per_record();
        let bytes_per_buffer = config.bytes_per_buffer();

        let mut ring = BufferRing::new(config);
        let mut acc_a = ChannelAccumulator::new(samples);
        let mut acc_b = ChannelAccumulator::new(samples);
        let mut last_buffer: Option<RawBuffer> = None;

        let capture: Result<(), DaqError> = thread::scope(|scope| {
            let (buffer_tx, buffer_rx) = unbounded::<RawBuffer>();
            let (recycle_tx, recycle_rx) = unbounded::<RawBuffer>();

            let producer = scope.spawn(move || -> Result<(), DaqError> {
                let run = (|| -> Result<(), DaqError> {
                    ring.start(board, config)?;
                    for _ in 0..total {
                        if cancel.is_cancelled() {
                            return Err(DaqError::Cancelled);
                        }
                        let buffer = ring.next_completed(board)?;
                        if buffer_tx.send(buffer).is_err() {
                            // Reduction side went away; treat as a stop.
                            return Err(DaqError::Cancelled);
                        }
                        // Repost the next drained buffer the consumer hands
                        // back; blocking here is the pool's backpressure.
                        let drained = match recycle_rx.recv() {
                            Ok(buffer) => buffer,
                            Err(_) => return Err(DaqError::Cancelled),
                        };
                        ring.repost(board, drained)?;
                    }
                    Ok(())
                })();
                // Wind the engine down whatever happened; keep the first
                // error.
                let stopped = ring.stop(board);
                run.and(stopped)
            });

            for buffer in buffer_rx.iter() {
                let volts = codec::buffer_to_volts(buffer.as_slice());
                let (waveform_a, waveform_b) = demux::split_and_reduce(&volts, records, samples);
                acc_a.fold(&waveform_a);
                acc_b.fold(&waveform_b);
                counter.increment(bytes_per_buffer);

                if let Some(sink) = raw_sink.as_mut() {
                    sink.append(&buffer)?;
                }

                let done = acc_a.iterations();
                debug!(
                    "buffer {done}/{total} reduced ({:.1} MB/s)",
                    counter.rate()
                );
                if done == total {
                    last_buffer = Some(buffer.clone());
                }
                if recycle_tx.send(buffer).is_err() {
                    break;
                }
            }
            drop(recycle_tx);

            producer
                .join()
                .expect("acquisition thread panicked")
        });

        match capture {
            Ok(()) => {
                *state = AcqState::Completed;
                let last = last_buffer
                    .take()
                    .expect("a completed acquisition reduced its final buffer");
                info!(
                    "acquisition complete: {} buffers, {:.1} MB in {:.2} s ({:.1} MB/s)",
                    total,
                    counter.total_bytes as f64 / (1024.0 * 1024.0),
                    counter.elapsed().as_secs_f64(),
                    counter.average_rate(),
                );
                Ok(Measurement {
                    channel_a: acc_a.into_waveform(),
                    channel_b: acc_b.into_waveform(),
                    last_buffer: last,
                    buffers_completed: total,
                })
            }
            Err(DaqError::Cancelled) => {
                *state = AcqState::Aborted;
                warn!("acquisition aborted after {} buffers", acc_a.iterations());
                Err(DaqError::Cancelled)
            }
            Err(err) => {
                *state = AcqState::Failed;
                error!("acquisition failed: {err}");
                Err(err)
            }
        }
    }
}

fn rejected_by_board(what: &str, err: ApiReturn) -> DaqError {
    DaqError::ConfigurationRejected(format!("board declined {what}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FillPattern, SimBoard};

    fn quick_config() -> AcquisitionConfig {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_acquired_samples(256).unwrap();
        cfg.set_records_per_buffer(4).unwrap();
        cfg.set_nb_buffer_allocated(3).unwrap();
        cfg.set_buffers_per_acquisition(5).unwrap();
        cfg
    }

    #[test]
    fn configure_moves_the_state_machine() {
        let mut acq = Acquisition::new(SimBoard::new(FillPattern::Constant(0)), quick_config());
        assert_eq!(acq.state(), AcqState::Idle);
        acq.configure().unwrap();
        assert_eq!(acq.state(), AcqState::Configured);
    }

    #[test]
    fn rejected_settings_surface_and_leave_idle() {
        let mut acq = Acquisition::new(SimBoard::rejecting(), quick_config());
        match acq.configure() {
            Err(DaqError::ConfigurationRejected(msg)) => {
                assert!(msg.contains("capture clock"), "unexpected message: {msg}")
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(acq.state(), AcqState::Idle);
    }

    #[test]
    fn invalid_snapshot_is_rejected_before_hardware() {
        let mut cfg = quick_config();
        cfg.trigger_level = 7.5; // outside the ±5 V range, set by hand
        let mut acq = Acquisition::new(SimBoard::new(FillPattern::Constant(0)), cfg);
        assert!(matches!(
            acq.configure(),
            Err(DaqError::ConfigurationRejected(_))
        ));
    }

    #[test]
    #[should_panic(expected = "requires a successful configure()")]
    fn measuring_unconfigured_is_a_programming_error() {
        let mut acq = Acquisition::new(SimBoard::new(FillPattern::Constant(0)), quick_config());
        let _ = acq.measure();
    }

    #[test]
    fn cancelled_before_start_aborts_cleanly() {
        let mut acq = Acquisition::new(SimBoard::new(FillPattern::Constant(0)), quick_config());
        acq.configure().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        match acq.measure_with_cancel(&cancel) {
            Err(DaqError::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(acq.state(), AcqState::Aborted);
    }
}
