//! DMA buffer pool and the continuous-streaming loop around it.
//!
//! The board fills buffers in the background while the host drains completed
//! ones; a completed buffer must be handed back before the board runs out of
//! pool buffers and on-board memory, or the acquisition overflows and drops
//! data. That repost deadline is a hard real-time contract, not a tuning
//! knob.

use std::time::Duration;

use log::debug;

use crate::board::{
    AcquisitionBoard, ApiReturn, Channel, ADMA_EXTERNAL_STARTCAPTURE, ADMA_FIFO_ONLY_STREAMING,
    ADMA_NPT,
};
use crate::config::AcquisitionConfig;
use crate::error::DaqError;

/// One pool buffer of raw interleaved 16-bit sample words.
///
/// A buffer is owned by exactly one party at a time: the ring until it is
/// posted, the acquisition engine while in flight, and the processing
/// pipeline between completion and repost.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    id: usize,
    samples: Vec<u16>,
}

impl RawBuffer {
    pub fn new(id: usize, samples_per_buffer: usize) -> Self {
        Self {
            id,
            samples: vec![0; samples_per_buffer],
        }
    }

    /// Pool slot this buffer was allocated as.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size in bytes as posted to the engine.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<u16>()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.samples
    }
}

/// Fixed pool of DMA buffers cycling between the host and the acquisition
/// engine.
///
/// `start` posts the whole pool and starts the capture; from then on the
/// loop is `next_completed` → consume → `repost`, with completions arriving
/// strictly in post order. The pool never grows: at most
/// `nb_buffer_allocated` buffers are outstanding at any moment.
#[derive(Debug)]
pub struct BufferRing {
    pool_size: usize,
    samples_per_buffer: usize,
    timeout: Duration,
    outstanding: usize,
    completed: usize,
    started: bool,
}

impl BufferRing {
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            pool_size: config.nb_buffer_allocated,
            samples_per_buffer: config.samples_per_buffer(),
            timeout: Duration::from_millis(config.wait_timeout_ms),
            outstanding: 0,
            completed: 0,
            started: false,
        }
    }

    /// Arm the engine, allocate and post the whole pool, and start the
    /// capture.
    pub fn start(
        &mut self,
        board: &mut dyn AcquisitionBoard,
        config: &AcquisitionConfig,
    ) -> Result<(), DaqError> {
        board.begin_async_read(
            Channel::both_mask(),
            config.samples_per_record() as u32,
            config.records_per_buffer as u32,
            config.records_per_acquisition() as u32,
            ADMA_EXTERNAL_STARTCAPTURE | ADMA_NPT | ADMA_FIFO_ONLY_STREAMING,
        )?;
        for id in 0..self.pool_size {
            board.post_buffer(RawBuffer::new(id, self.samples_per_buffer))?;
            self.outstanding += 1;
        }
        board.start_capture()?;
        self.started = true;
        self.completed = 0;
        debug!(
            "streaming started: pool of {} buffers x {} samples",
            self.pool_size, self.samples_per_buffer
        );
        Ok(())
    }

    /// Block until the oldest outstanding buffer is filled and take it.
    ///
    /// A timeout means the trigger source is stalled or the board is gone;
    /// it is surfaced as [`DaqError::AcquisitionTimeout`] and never retried
    /// here, since a silent retry could mask a real fault.
    pub fn next_completed(
        &mut self,
        board: &mut dyn AcquisitionBoard,
    ) -> Result<RawBuffer, DaqError> {
        debug_assert!(self.started, "next_completed before start");
        match board.wait_buffer_complete(self.timeout) {
            Ok(buffer) => {
                self.outstanding -= 1;
                self.completed += 1;
                Ok(buffer)
            }
            Err(ApiReturn::WaitTimeout) => Err(DaqError::AcquisitionTimeout {
                buffer_index: self.completed,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(err) => Err(DaqError::Board(err)),
        }
    }

    /// Return a drained buffer to the engine. Must happen promptly after the
    /// buffer's data has been consumed.
    pub fn repost(
        &mut self,
        board: &mut dyn AcquisitionBoard,
        buffer: RawBuffer,
    ) -> Result<(), DaqError> {
        debug_assert_eq!(buffer.len(), self.samples_per_buffer);
        assert!(
            self.outstanding < self.pool_size,
            "repost would exceed the allocated pool of {} buffers",
            self.pool_size
        );
        board.post_buffer(buffer)?;
        self.outstanding += 1;
        Ok(())
    }

    /// Abort the asynchronous read and release every posted buffer. Safe
    /// after partial completion.
    pub fn stop(&mut self, board: &mut dyn AcquisitionBoard) -> Result<(), DaqError> {
        if self.started {
            board.abort_async_read()?;
            self.started = false;
            debug!("streaming stopped after {} completed buffers", self.completed);
        }
        self.outstanding = 0;
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Buffers currently held by the acquisition engine.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Buffers completed since `start`.
    pub fn completed(&self) -> usize {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionConfig;
    use crate::sim::{FillPattern, SimBoard};

    fn small_config(pool: usize, buffers: usize) -> AcquisitionConfig {
        let mut cfg = AcquisitionConfig::default();
        cfg.set_acquired_samples(256).unwrap();
        cfg.set_records_per_buffer(2).unwrap();
        cfg.set_nb_buffer_allocated(pool).unwrap();
        cfg.set_buffers_per_acquisition(buffers).unwrap();
        cfg
    }

    #[test]
    fn completions_are_fifo_and_bounded_by_the_pool() {
        let mut board = SimBoard::new(FillPattern::Constant(0));
        let cfg = small_config(3, 7);
        let mut ring = BufferRing::new(&cfg);
        ring.start(&mut board, &cfg).unwrap();
        assert_eq!(ring.outstanding(), 3);

        let mut seen = Vec::new();
        for _ in 0..7 {
            let buffer = ring.next_completed(&mut board).unwrap();
            assert_eq!(ring.outstanding(), 2);
            seen.push(buffer.id());
            ring.repost(&mut board, buffer).unwrap();
            assert_eq!(ring.outstanding(), 3);
        }
        // Strict post order, cyclic over the pool.
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.completed(), 7);

        ring.stop(&mut board).unwrap();
        assert_eq!(ring.outstanding(), 0);
    }

    #[test]
    fn stalled_engine_times_out_without_leaking_buffers() {
        let mut board = SimBoard::stalled(FillPattern::Constant(0));
        let mut cfg = small_config(2, 2);
        cfg.wait_timeout_ms = 1;
        let mut ring = BufferRing::new(&cfg);
        ring.start(&mut board, &cfg).unwrap();

        match ring.next_completed(&mut board) {
            Err(DaqError::AcquisitionTimeout {
                buffer_index,
                timeout_ms,
            }) => {
                assert_eq!(buffer_index, 0);
                assert_eq!(timeout_ms, 1);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }

        ring.stop(&mut board).unwrap();
        assert_eq!(ring.outstanding(), 0);
    }

    #[test]
    fn buffers_are_sized_from_the_configuration() {
        let cfg = small_config(2, 2);
        let buffer = RawBuffer::new(0, cfg.samples_per_buffer());
        assert_eq!(buffer.len(), 256 * 2 * 2);
        assert_eq!(buffer.byte_len(), cfg.bytes_per_buffer());
        assert!(!buffer.is_empty());
    }
}
