//! Queued-buffer output contract.
//!
//! The playback loop talks to the device only through [`AudioOutput`]: buffers are created
//! once, filled with PCM, queued, and handed back after the device reports them processed.
//! [`BufferQueue`] is the device-side state behind that contract; the CPAL adapter renders
//! from it inside the audio callback.

use std::collections::{HashMap, VecDeque};

use cpal::Sample;

use crate::error::DeviceError;
use crate::format::BufferFormat;

/// Opaque handle to an output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

/// Playback state of the output source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Buffer-queue capability of an output device.
pub trait AudioOutput {
    /// Rate every buffer payload must be written at.
    fn sample_rate(&self) -> u32;
    fn create_buffer(&mut self) -> Result<BufferId, DeviceError>;
    /// Fails while the buffer is queued or processed-but-not-unqueued.
    fn delete_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError>;
    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError>;
    fn queue_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError>;
    /// Hand back the oldest processed buffer.
    fn unqueue_buffer(&mut self) -> Result<BufferId, DeviceError>;
    /// Number of queued buffers the device has finished with.
    fn buffers_processed(&self) -> Result<usize, DeviceError>;
    fn play(&mut self) -> Result<(), DeviceError>;
    /// Stop playback; every queued buffer becomes processed.
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn state(&self) -> Result<SourceState, DeviceError>;
    fn set_gain(&mut self, gain: f32) -> Result<(), DeviceError>;
}

#[derive(Debug, Default)]
struct StoredBuffer {
    channels: usize,
    samples: Vec<i16>,
}

/// Device-side buffer queue.
///
/// Buffers hold 16-bit samples; 8-bit payloads are widened on write.
#[derive(Debug)]
pub struct BufferQueue {
    rate: u32,
    next_id: u32,
    buffers: HashMap<BufferId, StoredBuffer>,
    queued: VecDeque<BufferId>,
    processed: VecDeque<BufferId>,
    cursor: usize,
    state: SourceState,
    gain: f32,
    underruns: u64,
}

impl BufferQueue {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            next_id: 1,
            buffers: HashMap::new(),
            queued: VecDeque::new(),
            processed: VecDeque::new(),
            cursor: 0,
            state: SourceState::Initial,
            gain: 1.0,
            underruns: 0,
        }
    }

    /// Buffers still waiting to be played (including the one being played).
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    /// Buffers currently allocated.
    pub fn allocated(&self) -> usize {
        self.buffers.len()
    }

    /// Times the queue ran dry while playing.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    fn attached(&self, id: BufferId) -> bool {
        self.queued.contains(&id) || self.processed.contains(&id)
    }

    /// Fill `data` (interleaved, `out_channels` wide) from the queue.
    ///
    /// Outputs silence unless playing. Running out of queued audio while playing switches the
    /// state to [`SourceState::Stopped`].
    pub fn render<T>(&mut self, data: &mut [T], out_channels: usize)
    where
        T: Sample + cpal::FromSample<f32>,
    {
        let silence = <T as Sample>::from_sample::<f32>(0.0);
        let out_channels = out_channels.max(1);
        let frames = data.len() / out_channels;
        let gain = self.gain;

        for frame in 0..frames {
            if self.state != SourceState::Playing {
                data[frame * out_channels..(frame + 1) * out_channels].fill(silence);
                continue;
            }

            let Some(id) = self.current_buffer() else {
                self.state = SourceState::Stopped;
                self.underruns += 1;
                tracing::debug!("output queue ran dry");
                data[frame * out_channels..].fill(silence);
                return;
            };

            if let Some(buf) = self.buffers.get(&id) {
                let src_channels = buf.channels.max(1);
                let src = &buf.samples[self.cursor..self.cursor + src_channels];
                let out = &mut data[frame * out_channels..(frame + 1) * out_channels];
                for (ch, slot) in out.iter_mut().enumerate() {
                    let s = mapped_sample(src, src_channels, out_channels, ch) * gain;
                    *slot = <T as Sample>::from_sample::<f32>(s.clamp(-1.0, 1.0));
                }
            }
            self.advance();
        }
    }

    /// Buffer currently being played, retiring exhausted buffers on the way.
    fn current_buffer(&mut self) -> Option<BufferId> {
        loop {
            let id = *self.queued.front()?;
            let len = self.buffers.get(&id).map_or(0, |b| b.samples.len());
            if self.cursor < len {
                return Some(id);
            }
            self.retire_front();
        }
    }

    fn advance(&mut self) {
        let Some(id) = self.queued.front().copied() else {
            return;
        };
        let (len, channels) = self
            .buffers
            .get(&id)
            .map_or((0, 1), |b| (b.samples.len(), b.channels.max(1)));
        self.cursor += channels;
        if self.cursor >= len {
            self.retire_front();
        }
    }

    fn retire_front(&mut self) {
        if let Some(id) = self.queued.pop_front() {
            self.processed.push_back(id);
        }
        self.cursor = 0;
    }
}

impl AudioOutput for BufferQueue {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, StoredBuffer::default());
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        if self.attached(buffer) {
            return Err(DeviceError::BufferQueued(buffer));
        }
        self.buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(DeviceError::UnknownBuffer(buffer))
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        if sample_rate != self.rate {
            return Err(DeviceError::RateMismatch {
                buffer: sample_rate,
                output: self.rate,
            });
        }
        if data.len() % format.bytes_per_frame() != 0 {
            return Err(DeviceError::PartialFrame { len: data.len() });
        }
        if self.attached(buffer) {
            return Err(DeviceError::BufferQueued(buffer));
        }
        let stored = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;

        stored.channels = format.channels();
        stored.samples.clear();
        match format.bytes_per_sample() {
            1 => stored
                .samples
                .extend(data.iter().map(|&b| (i16::from(b) - 128) << 8)),
            _ => stored.samples.extend(
                data.chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            ),
        }
        Ok(())
    }

    fn queue_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::UnknownBuffer(buffer));
        }
        if self.attached(buffer) {
            return Err(DeviceError::BufferQueued(buffer));
        }
        self.queued.push_back(buffer);
        Ok(())
    }

    fn unqueue_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.processed.pop_front().ok_or(DeviceError::NothingProcessed)
    }

    fn buffers_processed(&self) -> Result<usize, DeviceError> {
        Ok(self.processed.len())
    }

    fn play(&mut self) -> Result<(), DeviceError> {
        self.state = SourceState::Playing;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.state = SourceState::Stopped;
        self.processed.extend(self.queued.drain(..));
        self.cursor = 0;
        Ok(())
    }

    fn state(&self) -> Result<SourceState, DeviceError> {
        Ok(self.state)
    }

    fn set_gain(&mut self, gain: f32) -> Result<(), DeviceError> {
        self.gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        Ok(())
    }
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
fn mapped_sample(frame: &[i16], src_channels: usize, dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| -> f32 { frame.get(ch).map_or(0.0, |s| s.to_sample::<f32>()) };

    match (src_channels, dst_channels) {
        (1, 1) => get(0),
        (2, 2) => get(dst_ch.min(1)),
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        _ => get(dst_ch.min(src_channels.saturating_sub(1))),
    }
}
