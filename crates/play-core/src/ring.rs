//! Fixed set of output buffers cycled between the loop and the device.
//!
//! Every buffer is created up front and reused for the whole session: filled, queued,
//! handed back by the device once played, refilled, and queued again. Dropping the ring
//! stops the output and releases each buffer exactly once, whichever way the session ends.

use std::time::Instant;

use crate::config::PollPolicy;
use crate::convert::ConvertedFrame;
use crate::error::{DeviceError, PlayError, Result};
use crate::output::{AudioOutput, BufferId, SourceState};

pub struct PlaybackBufferRing<'o, O: AudioOutput> {
    output: &'o mut O,
    buffers: Vec<BufferId>,
    /// Buffers handed to the device and not yet unqueued.
    queued: usize,
}

impl<'o, O: AudioOutput> PlaybackBufferRing<'o, O> {
    /// Allocate `count` buffers on `output`.
    ///
    /// On failure the buffers created so far are released before returning.
    pub fn new(output: &'o mut O, count: usize) -> Result<Self, DeviceError> {
        let mut ring = Self {
            output,
            buffers: Vec::with_capacity(count),
            queued: 0,
        };
        for _ in 0..count {
            let id = ring.output.create_buffer()?;
            ring.buffers.push(id);
        }
        tracing::debug!(buffers = count, "buffer ring allocated");
        Ok(ring)
    }

    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Write `frame` into `buffer` and queue it.
    pub fn fill_and_queue(
        &mut self,
        buffer: BufferId,
        frame: &ConvertedFrame,
    ) -> Result<(), DeviceError> {
        self.ensure_owned(buffer)?;
        self.output
            .buffer_data(buffer, frame.format(), frame.bytes(), frame.sample_rate())?;
        self.output.queue_buffer(buffer)?;
        self.queued += 1;
        Ok(())
    }

    /// Take back the oldest processed buffer.
    pub fn reclaim(&mut self) -> Result<BufferId, DeviceError> {
        let id = self.output.unqueue_buffer()?;
        self.ensure_owned(id)?;
        self.queued = self.queued.saturating_sub(1);
        Ok(id)
    }

    pub fn processed(&self) -> Result<usize, DeviceError> {
        self.output.buffers_processed()
    }

    /// Block until the device reports at least one processed buffer.
    pub fn wait_processed(&self, policy: &PollPolicy) -> Result<usize> {
        let started = Instant::now();
        loop {
            let n = self.output.buffers_processed()?;
            if n > 0 {
                return Ok(n);
            }
            if let Some(timeout) = policy.timeout {
                if started.elapsed() >= timeout {
                    return Err(PlayError::Stalled(timeout));
                }
            }
            policy.pause();
        }
    }

    pub fn play(&mut self) -> Result<(), DeviceError> {
        self.output.play()
    }

    pub fn state(&self) -> Result<SourceState, DeviceError> {
        self.output.state()
    }

    fn ensure_owned(&self, buffer: BufferId) -> Result<(), DeviceError> {
        if self.buffers.contains(&buffer) {
            Ok(())
        } else {
            Err(DeviceError::UnknownBuffer(buffer))
        }
    }
}

impl<O: AudioOutput> Drop for PlaybackBufferRing<'_, O> {
    fn drop(&mut self) {
        if let Err(err) = self.output.stop() {
            tracing::warn!(error = %err, "failed to stop output");
        }
        while self.queued > 0 {
            match self.output.unqueue_buffer() {
                Ok(_) => self.queued -= 1,
                Err(err) => {
                    tracing::warn!(error = %err, remaining = self.queued, "failed to unqueue buffer");
                    break;
                }
            }
        }
        for id in self.buffers.drain(..) {
            if let Err(err) = self.output.delete_buffer(id) {
                tracing::warn!(buffer = ?id, error = %err, "failed to delete buffer");
            }
        }
    }
}
