//! End-to-end acquisition scenarios against the simulated engine.

use ats_daq::{
    AcqState, Acquisition, AcquisitionConfig, CancelToken, DaqError, FillPattern, RawDump,
    SimBoard,
};

fn default_config() -> AcquisitionConfig {
    // Board defaults: 10240 S/record, 20 records/buffer, pool of 10,
    // 10 buffers per acquisition.
    AcquisitionConfig::default()
}

fn small_config() -> AcquisitionConfig {
    let mut cfg = AcquisitionConfig::default();
    cfg.set_acquired_samples(256).unwrap();
    cfg.set_records_per_buffer(4).unwrap();
    cfg.set_nb_buffer_allocated(3).unwrap();
    cfg.set_buffers_per_acquisition(8).unwrap();
    cfg
}

#[test]
fn constant_midcode_signal_averages_to_zero_volts() {
    let board = SimBoard::new(FillPattern::Constant(2048 << 4));
    let mut acq = Acquisition::new(board, default_config());
    acq.configure().unwrap();

    let measurement = acq.measure().unwrap();

    assert_eq!(acq.state(), AcqState::Completed);
    assert_eq!(measurement.buffers_completed, 10);
    assert_eq!(measurement.channel_a.len(), 10240);
    assert_eq!(measurement.channel_b.len(), 10240);
    // Mid-code sits half a code above the calibration zero.
    let code_step = 0.4 / 2047.5;
    for &v in measurement.channel_a.iter().chain(measurement.channel_b.iter()) {
        assert!(v.abs() < code_step, "expected ~0 V, got {v}");
    }
    // The last raw buffer is kept as a diagnostic artifact.
    assert_eq!(measurement.last_buffer.len(), 10240 * 20 * 2);
    assert!(measurement
        .last_buffer
        .as_slice()
        .iter()
        .all(|&w| w == 2048 << 4));
}

#[test]
fn channels_are_separated_and_averaged_independently() {
    // Channel A pinned near positive full scale, channel B near negative.
    let board = SimBoard::new(FillPattern::ConstantPair(3072 << 4, 1024 << 4));
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();

    let measurement = acq.measure().unwrap();

    let expect_a = 0.4 * (3072.0 - 2047.5) / 2047.5;
    let expect_b = 0.4 * (1024.0 - 2047.5) / 2047.5;
    for &v in measurement.channel_a.iter() {
        assert!((v - expect_a).abs() < 1e-12);
    }
    for &v in measurement.channel_b.iter() {
        assert!((v - expect_b).abs() < 1e-12);
    }
}

#[test]
fn more_buffers_than_pool_slots_stream_through() {
    // 8 buffers through a pool of 3: every slot is recycled repeatedly.
    let board = SimBoard::new(FillPattern::Ramp);
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();

    let measurement = acq.measure().unwrap();
    assert_eq!(measurement.buffers_completed, 8);
    assert_eq!(acq.stats().n_buffers, 8);
    assert_eq!(
        acq.stats().total_bytes,
        8 * acq.config().bytes_per_buffer()
    );
}

#[test]
fn stalled_trigger_source_fails_the_acquisition() {
    let board = SimBoard::stalled(FillPattern::Constant(0));
    let mut cfg = small_config();
    cfg.wait_timeout_ms = 1;
    let mut acq = Acquisition::new(board, cfg);
    acq.configure().unwrap();

    match acq.measure() {
        Err(DaqError::AcquisitionTimeout {
            buffer_index,
            timeout_ms,
        }) => {
            assert_eq!(buffer_index, 0);
            assert_eq!(timeout_ms, 1);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(acq.state(), AcqState::Failed);
}

#[test]
fn failed_acquisition_can_be_reissued() {
    // A timeout is fatal to the running acquisition but not to the session;
    // the caller decides whether to measure again.
    let board = SimBoard::stalled(FillPattern::Constant(0));
    let mut cfg = small_config();
    cfg.wait_timeout_ms = 1;
    let mut acq = Acquisition::new(board, cfg);
    acq.configure().unwrap();

    assert!(acq.measure().is_err());
    assert_eq!(acq.state(), AcqState::Failed);
    assert!(acq.measure().is_err());
    assert_eq!(acq.state(), AcqState::Failed);
}

#[test]
fn cancellation_aborts_without_processing_further() {
    let board = SimBoard::new(FillPattern::Constant(0));
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    match acq.measure_with_cancel(&cancel) {
        Err(DaqError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(acq.state(), AcqState::Aborted);
}

#[test]
fn raw_sink_receives_every_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.bin");

    let board = SimBoard::new(FillPattern::Constant(2048 << 4));
    let cfg = small_config();
    let bytes_per_buffer = cfg.bytes_per_buffer();
    let mut acq = Acquisition::new(board, cfg);
    acq.set_raw_sink(RawDump::create(&path).unwrap());
    acq.configure().unwrap();
    acq.measure().unwrap();

    let sink = acq.take_raw_sink().unwrap();
    assert_eq!(sink.buffers_written, 8);
    sink.finish().unwrap();

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), 8 * bytes_per_buffer);
}

#[test]
fn accumulators_reset_between_measurements() {
    // Two acquisitions in one session must not bleed averages into each
    // other: feed full scale first, then mid-scale.
    let board = SimBoard::new(FillPattern::Constant(4095 << 4));
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();
    let first = acq.measure().unwrap();
    assert!(first.channel_a[0] > 0.39);

    // Same session, new pattern: rebuild with a fresh board but reuse the
    // session object to exercise the re-arm path.
    let board = SimBoard::new(FillPattern::Constant(2048 << 4));
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();
    let second = acq.measure().unwrap();
    assert!(second.channel_a[0].abs() < 1e-3);
}

#[test]
fn second_measure_on_one_session_rearms_the_board() {
    let board = SimBoard::new(FillPattern::Constant(2048 << 4));
    let mut acq = Acquisition::new(board, small_config());
    acq.configure().unwrap();

    let first = acq.measure().unwrap();
    assert_eq!(acq.state(), AcqState::Completed);
    let second = acq.measure().unwrap();
    assert_eq!(acq.state(), AcqState::Completed);
    assert_eq!(first.buffers_completed, second.buffers_completed);
}
