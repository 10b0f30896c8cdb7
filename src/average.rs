//! Running average across buffers of one acquisition.

use ndarray::Array1;

/// Per-channel running mean over the buffers folded in so far.
///
/// The recurrence is the incremental mean
/// `acc += (new - acc) / (n + 1)`, which accumulates relative weights
/// instead of raw sums and stays stable over thousands of buffers.
#[derive(Debug, Clone)]
pub struct ChannelAccumulator {
    data: Array1<f64>,
    iterations: usize,
}

impl ChannelAccumulator {
    pub fn new(samples_per_record: usize) -> Self {
        Self {
            data: Array1::zeros(samples_per_record),
            iterations: 0,
        }
    }

    /// Fold one buffer's reduced waveform into the running mean.
    ///
    /// The first fold seeds the accumulator with the value itself: the mean
    /// of a single buffer is that buffer. (An earlier treatment of this step
    /// added the first waveform to itself, doubling it; that behavior was a
    /// defect and is intentionally not kept.)
    pub fn fold(&mut self, new_value: &Array1<f64>) {
        assert_eq!(
            new_value.len(),
            self.data.len(),
            "waveform length changed mid-acquisition",
        );
        if self.iterations == 0 {
            self.data.assign(new_value);
        } else {
            let weight = (self.iterations + 1) as f64;
            let correction = (new_value - &self.data) / weight;
            self.data += &correction;
        }
        self.iterations += 1;
    }

    /// Number of buffers folded in so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn waveform(&self) -> &Array1<f64> {
        &self.data
    }

    pub fn into_waveform(self) -> Array1<f64> {
        self.data
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.iterations = 0;
    }
}
