//! Conversion stage.
//!
//! Turns decoded frames into the fixed output format: signed 16-bit little-endian interleaved
//! stereo at the device rate. Channel layouts are folded to stereo with a fixed mix matrix and
//! sample rates are converted with Rubato's streaming sinc resampler. The converter is
//! configured once; frames that arrive in a different rate or channel count are rejected.

use audioadapter_buffers::direct::InterleavedSlice;
use cpal::Sample;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};
use symphonia::core::audio::{Channels, Layout};

use crate::config::PlaybackConfig;
use crate::decode::{DecodedFrame, SourceStream};
use crate::error::{PlayError, Result};
use crate::format::{BufferFormat, SampleFormat};

const OUT_CHANNELS: usize = 2;
const CENTER_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Input side of a converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConverterSpec {
    pub channels: usize,
    /// Channel positions; derived from `channels` when unset.
    pub layout: Option<Channels>,
    pub input_rate: u32,
    pub output_rate: u32,
}

impl ConverterSpec {
    pub fn for_stream(stream: &SourceStream, output_rate: u32) -> Self {
        Self {
            channels: stream.channels,
            layout: stream.layout,
            input_rate: stream.sample_rate,
            output_rate,
        }
    }
}

/// A frame in the output format, overwritten in place by every conversion.
#[derive(Debug)]
pub struct ConvertedFrame {
    format: BufferFormat,
    sample_rate: u32,
    frames: usize,
    data: Vec<u8>,
}

impl ConvertedFrame {
    fn with_capacity(format: BufferFormat, sample_rate: u32, capacity_frames: usize) -> Self {
        Self {
            format,
            sample_rate,
            frames: 0,
            data: Vec::with_capacity(format.payload_len(capacity_frames)),
        }
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames produced by the last conversion; may be zero while the resampler fills up.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Payload for the device, exactly `frames * bytes_per_frame` long.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.format.payload_len(self.frames)]
    }

    pub fn capacity_frames(&self) -> usize {
        self.data.capacity() / self.format.bytes_per_frame()
    }
}

/// Fixed-target converter: any decoded layout/rate to S16 stereo at the output rate.
pub struct SampleConverter {
    spec: ConverterSpec,
    mix: Vec<[f32; OUT_CHANNELS]>,
    stereo: Vec<f32>,
    resampler: Option<StreamResampler>,
    out: ConvertedFrame,
}

impl SampleConverter {
    pub fn new(spec: ConverterSpec, cfg: &PlaybackConfig) -> Result<Self> {
        if spec.channels == 0 {
            return Err(PlayError::IncompatibleFormat {
                format: SampleFormat::F32,
                channels: 0,
            });
        }
        let format = BufferFormat::negotiate(SampleFormat::S16, OUT_CHANNELS)?;
        let layout = spec.layout.unwrap_or_else(|| default_layout(spec.channels));
        let mix = stereo_mix(layout, spec.channels);

        let resampler = if spec.input_rate == spec.output_rate {
            tracing::info!(rate_hz = spec.output_rate, "resample skipped");
            None
        } else {
            tracing::info!(
                from_hz = spec.input_rate,
                to_hz = spec.output_rate,
                "resampling"
            );
            Some(StreamResampler::new(
                spec.input_rate,
                spec.output_rate,
                cfg.chunk_frames,
            )?)
        };

        Ok(Self {
            spec,
            mix,
            stereo: Vec::with_capacity(cfg.frame_capacity * OUT_CHANNELS),
            resampler,
            out: ConvertedFrame::with_capacity(format, spec.output_rate, cfg.frame_capacity),
        })
    }

    pub fn spec(&self) -> &ConverterSpec {
        &self.spec
    }

    /// Result of the last [`convert`](Self::convert).
    pub fn converted(&self) -> &ConvertedFrame {
        &self.out
    }

    /// Convert one decoded frame.
    ///
    /// The returned frame count can differ from the input count (and be zero) when resampling.
    pub fn convert(&mut self, frame: &DecodedFrame) -> Result<&ConvertedFrame> {
        if frame.sample_rate() != self.spec.input_rate || frame.channels() != self.spec.channels
        {
            return Err(PlayError::FormatChanged {
                expected_rate: self.spec.input_rate,
                expected_channels: self.spec.channels,
                rate: frame.sample_rate(),
                channels: frame.channels(),
            });
        }

        self.stereo.clear();
        for src in frame.samples().chunks_exact(frame.channels()) {
            let mut acc = [0.0f32; OUT_CHANNELS];
            for (sample, gains) in src.iter().zip(&self.mix) {
                acc[0] += sample * gains[0];
                acc[1] += sample * gains[1];
            }
            self.stereo.extend_from_slice(&acc);
        }

        let samples: &[f32] = match self.resampler.as_mut() {
            Some(r) => r.process(&self.stereo)?,
            None => &self.stereo,
        };
        quantize_into(&mut self.out, samples);
        Ok(&self.out)
    }

    /// Emit whatever the resampler still holds once the source has ended.
    ///
    /// Returns an empty frame when nothing is left, so calling it again is harmless.
    pub fn flush(&mut self) -> Result<&ConvertedFrame> {
        let samples: &[f32] = match self.resampler.as_mut() {
            Some(r) => r.flush()?,
            None => &[],
        };
        quantize_into(&mut self.out, samples);
        Ok(&self.out)
    }
}

fn quantize_into(out: &mut ConvertedFrame, samples: &[f32]) {
    out.data.clear();
    for s in samples {
        let q = s.clamp(-1.0, 1.0).to_sample::<i16>();
        out.data.extend_from_slice(&q.to_le_bytes());
    }
    out.frames = samples.len() / OUT_CHANNELS;
}

/// Streaming sinc resampler over interleaved stereo, fed in arbitrary-sized pieces.
///
/// Input is staged until a full chunk is available; leftovers carry to the next call.
struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    ratio: f64,
    chunk: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    produced: Vec<f32>,
    /// Real input frames fed so far.
    input_frames: u64,
    /// Output frames emitted so far, filter delay included.
    output_frames: u64,
}

impl StreamResampler {
    fn new(input_rate: u32, output_rate: u32, chunk_frames: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let chunk = chunk_frames.max(1);
        let ratio = output_rate as f64 / input_rate as f64;
        let inner = Async::<f32>::new_sinc(ratio, 1.1, &params, chunk, OUT_CHANNELS, FixedAsync::Input)
            .map_err(|e| PlayError::Resample(e.to_string()))?;

        Ok(Self {
            inner: Box::new(inner),
            ratio,
            chunk,
            pending: Vec::with_capacity(chunk * OUT_CHANNELS * 2),
            scratch: Vec::new(),
            produced: Vec::new(),
            input_frames: 0,
            output_frames: 0,
        })
    }

    fn process(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.pending.extend_from_slice(input);
        self.produced.clear();

        let mut consumed = 0;
        while self.pending.len() / OUT_CHANNELS - consumed >= self.chunk {
            self.run_chunk(consumed, self.chunk, None)?;
            self.input_frames += self.chunk as u64;
            consumed += self.chunk;
        }
        self.pending.drain(..consumed * OUT_CHANNELS);

        Ok(&self.produced)
    }

    /// Resample the staged tail, then push silence until the filter delay has drained.
    fn flush(&mut self) -> Result<&[f32]> {
        self.produced.clear();

        let tail_frames = self.pending.len() / OUT_CHANNELS;
        if tail_frames > 0 {
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: Some(tail_frames),
            };
            self.run_chunk(0, tail_frames, Some(&indexing))?;
            self.input_frames += tail_frames as u64;
        }

        let target = self.inner.output_delay() as u64
            + (self.input_frames as f64 * self.ratio).ceil() as u64;
        self.pending.clear();
        self.pending.resize(self.chunk * OUT_CHANNELS, 0.0);
        while self.output_frames < target {
            if self.run_chunk(0, self.chunk, None)? == 0 {
                break;
            }
        }
        self.pending.clear();

        let flushed = (self.produced.len() / OUT_CHANNELS) as u64;
        let excess = self.output_frames.saturating_sub(target).min(flushed);
        self.produced
            .truncate((flushed - excess) as usize * OUT_CHANNELS);
        self.output_frames -= excess;

        Ok(&self.produced)
    }

    /// Run `frames` staged frames starting at frame `offset` through the resampler,
    /// appending the result to `produced`.
    fn run_chunk(
        &mut self,
        offset: usize,
        frames: usize,
        indexing: Option<&Indexing>,
    ) -> Result<usize> {
        let out_frames = self.inner.output_frames_next();
        if self.scratch.len() < out_frames * OUT_CHANNELS {
            self.scratch.resize(out_frames * OUT_CHANNELS, 0.0);
        }

        let input = &self.pending[offset * OUT_CHANNELS..(offset + frames) * OUT_CHANNELS];
        let input_adapter = InterleavedSlice::new(input, OUT_CHANNELS, frames)
            .map_err(|e| PlayError::Resample(e.to_string()))?;
        let out_capacity_frames = self.scratch.len() / OUT_CHANNELS;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, OUT_CHANNELS, out_capacity_frames)
                .map_err(|e| PlayError::Resample(e.to_string()))?;

        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, indexing)
            .map_err(|e| PlayError::Resample(e.to_string()))?;

        self.produced
            .extend_from_slice(&self.scratch[..nbr_out * OUT_CHANNELS]);
        self.output_frames += nbr_out as u64;
        Ok(nbr_out)
    }
}

/// Default channel positions for a bare channel count.
pub fn default_layout(channels: usize) -> Channels {
    match channels {
        1 => Layout::Mono.into_channels(),
        2 => Layout::Stereo.into_channels(),
        3 => Layout::TwoPointOne.into_channels(),
        4 => {
            Channels::FRONT_LEFT
                | Channels::FRONT_RIGHT
                | Channels::REAR_LEFT
                | Channels::REAR_RIGHT
        }
        6 => Layout::FivePointOne.into_channels(),
        n => Channels::from_bits_truncate(((1u64 << n.min(32)) - 1) as u32),
    }
}

/// Per-input-channel `[left, right]` gains, scaled so neither output can exceed full scale.
fn stereo_mix(layout: Channels, channels: usize) -> Vec<[f32; OUT_CHANNELS]> {
    if channels == 1 {
        return vec![[1.0, 1.0]];
    }

    let mut positions: Vec<Channels> = layout.iter().take(channels).collect();
    while positions.len() < channels {
        positions.push(Channels::empty());
    }

    let mut mix: Vec<[f32; OUT_CHANNELS]> = positions
        .iter()
        .enumerate()
        .map(|(i, pos)| {
            let pos = *pos;
            if pos == Channels::FRONT_LEFT {
                [1.0, 0.0]
            } else if pos == Channels::FRONT_RIGHT {
                [0.0, 1.0]
            } else if pos == Channels::FRONT_CENTRE || pos == Channels::REAR_CENTRE {
                [CENTER_GAIN, CENTER_GAIN]
            } else if pos == Channels::REAR_LEFT || pos == Channels::SIDE_LEFT {
                [CENTER_GAIN, 0.0]
            } else if pos == Channels::REAR_RIGHT || pos == Channels::SIDE_RIGHT {
                [0.0, CENTER_GAIN]
            } else if pos == Channels::LFE1 {
                [0.0, 0.0]
            } else if i % 2 == 0 {
                [CENTER_GAIN, 0.0]
            } else {
                [0.0, CENTER_GAIN]
            }
        })
        .collect();

    let left: f32 = mix.iter().map(|g| g[0]).sum();
    let right: f32 = mix.iter().map(|g| g[1]).sum();
    let scale = left.max(right).max(1.0);
    for g in &mut mix {
        g[0] /= scale;
        g[1] /= scale;
    }
    mix
}
