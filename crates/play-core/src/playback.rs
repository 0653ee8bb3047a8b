//! CPAL-backed [`AudioOutput`].
//!
//! CPAL pulls audio through a callback; this adapter turns that into a buffer queue. The
//! callback renders from a shared [`BufferQueue`]:
//! - queued buffers are played in order and moved to the processed list when finished
//! - an empty queue while playing outputs silence and flips the state to stopped
//! - `i16` payloads are converted to the device sample format

use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::OutputOptions;
use crate::device;
use crate::error::DeviceError;
use crate::format::BufferFormat;
use crate::output::{AudioOutput, BufferId, BufferQueue, SourceState};

/// Output device, its running stream, and the queue the stream plays from.
///
/// Dropping it stops the stream and releases the device.
pub struct CpalOutput {
    queue: Arc<Mutex<BufferQueue>>,
    rate: u32,
    channels: u16,
    device_name: String,
    _stream: cpal::Stream,
}

impl CpalOutput {
    /// Open the selected device and start an (initially silent) output stream.
    pub fn open(options: &OutputOptions) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, options.device.as_deref())?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unnamed device>".to_string());

        let config = device::pick_output_config(&device, options.preferred_rate)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }
        let rate = stream_config.sample_rate;
        tracing::info!(
            device = %device_name,
            rate_hz = rate,
            channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        let queue = Arc::new(Mutex::new(BufferQueue::new(rate)));
        let stream =
            build_output_stream(&device, &stream_config, config.sample_format(), &queue)?;
        stream.play()?;

        Ok(Self {
            queue,
            rate,
            channels: stream_config.channels,
            device_name,
            _stream: stream,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Times the device ran out of queued audio.
    pub fn underruns(&self) -> u64 {
        self.lock().underruns()
    }

    fn lock(&self) -> MutexGuard<'_, BufferQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.lock().create_buffer()
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        self.lock().delete_buffer(buffer)
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        self.lock().buffer_data(buffer, format, data, sample_rate)
    }

    fn queue_buffer(&mut self, buffer: BufferId) -> Result<(), DeviceError> {
        self.lock().queue_buffer(buffer)
    }

    fn unqueue_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.lock().unqueue_buffer()
    }

    fn buffers_processed(&self) -> Result<usize, DeviceError> {
        self.lock().buffers_processed()
    }

    fn play(&mut self) -> Result<(), DeviceError> {
        self.lock().play()
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.lock().stop()
    }

    fn state(&self) -> Result<SourceState, DeviceError> {
        self.lock().state()
    }

    fn set_gain(&mut self, gain: f32) -> Result<(), DeviceError> {
        self.lock().set_gain(gain)
    }
}

/// Build a CPAL output stream that renders from `queue`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<Mutex<BufferQueue>>,
) -> Result<cpal::Stream, DeviceError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue),
        other => Err(DeviceError::UnsupportedSampleFormat(format!("{other:?}"))),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<Mutex<BufferQueue>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let queue_cb = queue.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| match queue_cb.lock() {
            Ok(mut q) => q.render(data, channels_out),
            Err(_) => data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0)),
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
