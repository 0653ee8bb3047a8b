//! Shared test fixtures: a recording [`AudioOutput`] and generated WAV files.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use crate::error::DeviceError;
use crate::format::BufferFormat;
use crate::output::{AudioOutput, BufferId, BufferQueue, SourceState};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    Create(BufferId),
    Delete(BufferId),
    Data { buffer: BufferId, bytes: usize },
    Queue(BufferId),
    Unqueue(BufferId),
    Poll(usize),
    Play,
    Stop,
    Gain(f32),
}

/// In-memory output that records every call.
///
/// Each `buffers_processed` query first plays `frames_per_poll` stereo frames, so the
/// device only makes progress while the loop is polling.
pub(crate) struct FakeOutput {
    queue: RefCell<BufferQueue>,
    calls: RefCell<Vec<Call>>,
    frames_per_poll: usize,
    pub(crate) fail_create_after: Option<usize>,
}

impl FakeOutput {
    pub(crate) fn new(rate: u32, frames_per_poll: usize) -> Self {
        Self {
            queue: RefCell::new(BufferQueue::new(rate)),
            calls: RefCell::new(Vec::new()),
            frames_per_poll,
            fail_create_after: None,
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn allocated(&self) -> usize {
        self.queue.borrow().allocated()
    }

    pub(crate) fn underruns(&self) -> u64 {
        self.queue.borrow().underruns()
    }

    /// Every created buffer was deleted, and none twice.
    pub(crate) fn each_buffer_deleted_once(&self) -> bool {
        let calls = self.calls.borrow();
        calls.iter().all(|c| match c {
            Call::Create(id) => calls.iter().filter(|d| **d == Call::Delete(*id)).count() == 1,
            _ => true,
        })
    }

    pub(crate) fn payload_sizes(&self) -> Vec<usize> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Data { bytes, .. } => Some(*bytes),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl AudioOutput for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.queue.borrow().sample_rate()
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let created = self.count(|c| matches!(c, Call::Create(_)));
        if self.fail_create_after.is_some_and(|limit| created >= limit) {
            return Err(DeviceError::NoSupportedConfig);
        }
        let id = self.queue.get_mut().create_buffer()?;
        self.record(Call::Create(id));
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        self.queue.get_mut().delete_buffer(buffer)?;
        self.record(Call::Delete(buffer));
        Ok(())
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        self.record(Call::Data {
            buffer,
            bytes: data.len(),
        });
        self.queue
            .get_mut()
            .buffer_data(buffer, format, data, sample_rate)
    }

    fn queue_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        self.record(Call::Queue(buffer));
        self.queue.get_mut().queue_buffer(buffer)
    }

    fn unqueue_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let id = self.queue.get_mut().unqueue_buffer()?;
        self.record(Call::Unqueue(id));
        Ok(id)
    }

    fn buffers_processed(&self) -> Result<usize, DeviceError> {
        let mut queue = self.queue.borrow_mut();
        if self.frames_per_poll > 0 {
            let mut sink = vec![0.0f32; self.frames_per_poll * 2];
            queue.render(&mut sink, 2);
        }
        let n = queue.buffers_processed()?;
        self.record(Call::Poll(n));
        Ok(n)
    }

    fn play(&mut self) -> Result<(), DeviceError> {
        self.record(Call::Play);
        self.queue.get_mut().play()
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.record(Call::Stop);
        self.queue.get_mut().stop()
    }

    fn state(&self) -> Result<SourceState, DeviceError> {
        self.queue.borrow().state()
    }

    fn set_gain(&mut self, gain: f32) -> Result<(), DeviceError> {
        self.record(Call::Gain(gain));
        self.queue.get_mut().set_gain(gain)
    }
}

/// Write an unsigned 8-bit PCM WAV with a quiet 440 Hz tone.
pub(crate) fn write_wav_u8(dir: &Path, name: &str, rate: u32, channels: u16, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (rate as f32 * secs) as usize;
    for i in 0..frames {
        let phase = i as f32 * 440.0 * std::f32::consts::TAU / rate as f32;
        let sample = (phase.sin() * 64.0) as i8;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_delete_is_not_recorded() {
        let mut out = FakeOutput::new(8_000, 0);
        let id = out.create_buffer().unwrap();
        out.buffer_data(id, BufferFormat::Stereo16, &[0; 4], 8_000).unwrap();
        out.queue_buffer(id).unwrap();

        assert!(matches!(out.delete_buffer(id), Err(DeviceError::BufferQueued(_))));
        assert_eq!(out.count(|c| matches!(c, Call::Delete(_))), 0);
        assert!(!out.each_buffer_deleted_once());
        assert_eq!(out.allocated(), 1);
    }
}
