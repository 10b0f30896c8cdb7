//! De-interleaving and per-buffer reduction.
//!
//! One DMA buffer carries both channels interleaved per sample pair in
//! record-major order: S0A, S0B, S1A, S1B, ... Splitting is a stride-2
//! extraction; each channel stream is then reshaped to a
//! [records_per_buffer × samples_per_record] matrix and averaged over the
//! records axis, leaving a single waveform per channel per buffer.

use ndarray::{s, Array1, ArrayView1, Axis};

/// Split an interleaved voltage buffer into the two channels and reduce each
/// to its mean waveform across the buffer's records.
///
/// # Panics
///
/// Panics if the input length is not
/// `2 * records_per_buffer * samples_per_record`: a malformed buffer reaching
/// this point is a programming error, not a recoverable condition.
pub fn split_and_reduce(
    volts: &[f64],
    records_per_buffer: usize,
    samples_per_record: usize,
) -> (Array1<f64>, Array1<f64>) {
    let expected = 2 * records_per_buffer * samples_per_record;
    assert_eq!(
        volts.len(),
        expected,
        "interleaved buffer holds {} samples, geometry says {} records x {} samples x 2 channels",
        volts.len(),
        records_per_buffer,
        samples_per_record,
    );

    let flat = ArrayView1::from(volts);
    let channel_a = reduce_channel(flat.slice(s![0..;2]), records_per_buffer, samples_per_record);
    let channel_b = reduce_channel(flat.slice(s![1..;2]), records_per_buffer, samples_per_record);
    (channel_a, channel_b)
}

fn reduce_channel(
    stream: ArrayView1<'_, f64>,
    records_per_buffer: usize,
    samples_per_record: usize,
) -> Array1<f64> {
    let matrix = stream
        .to_owned()
        .into_shape_with_order((records_per_buffer, samples_per_record))
        .expect("stride-split stream length matches the record geometry");
    matrix
        .mean_axis(Axis(0))
        .expect("records_per_buffer is nonzero")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an interleaved buffer from per-record closures for each channel.
    fn interleave(
        records: usize,
        samples: usize,
        a: impl Fn(usize, usize) -> f64,
        b: impl Fn(usize, usize) -> f64,
    ) -> Vec<f64> {
        let mut out = Vec::with_capacity(2 * records * samples);
        for r in 0..records {
            for k in 0..samples {
                out.push(a(r, k));
                out.push(b(r, k));
            }
        }
        out
    }

    #[test]
    fn constant_channels_come_back_exactly() {
        let volts = interleave(20, 64, |_, _| 0.125, |_, _| -0.25);
        let (cha, chb) = split_and_reduce(&volts, 20, 64);
        assert_eq!(cha.len(), 64);
        assert_eq!(chb.len(), 64);
        // Averaging a constant row is a no-op, bit for bit.
        assert!(cha.iter().all(|&v| v == 0.125));
        assert!(chb.iter().all(|&v| v == -0.25));
    }

    #[test]
    fn records_are_averaged_per_sample() {
        // Channel A alternates 0/1 across records; channel B ramps by sample.
        let volts = interleave(4, 8, |r, _| (r % 2) as f64, |_, k| k as f64);
        let (cha, chb) = split_and_reduce(&volts, 4, 8);
        assert!(cha.iter().all(|&v| (v - 0.5).abs() < 1e-12));
        for (k, &v) in chb.iter().enumerate() {
            assert!((v - k as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn single_record_buffer_passes_through() {
        let volts = interleave(1, 4, |_, k| k as f64 * 0.1, |_, k| -(k as f64));
        let (cha, chb) = split_and_reduce(&volts, 1, 4);
        assert_eq!(cha.to_vec(), vec![0.0, 0.1, 0.2, 0.30000000000000004]);
        assert_eq!(chb.to_vec(), vec![0.0, -1.0, -2.0, -3.0]);
    }

    #[test]
    #[should_panic(expected = "interleaved buffer holds")]
    fn malformed_length_aborts() {
        let volts = vec![0.0; 100];
        split_and_reduce(&volts, 20, 64);
    }
}
