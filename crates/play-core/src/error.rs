//! Error taxonomy for a playback session.
//!
//! End-of-stream is not represented here: decoders report it as `Ok(None)`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::format::SampleFormat;
use crate::output::BufferId;

/// Failures while opening a media source. Always fatal for the session.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid path to audio file {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to probe container: {0}")]
    Probe(#[source] symphonia::core::errors::Error),
    #[error("no decodable audio stream found")]
    NoAudioStream,
    #[error("failed to initialize codec: {0}")]
    Codec(#[source] symphonia::core::errors::Error),
}

/// Failures reported by the audio output.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default output device")]
    NoDefaultDevice,
    #[error("no output device matched: {0}")]
    NoMatchingDevice(String),
    #[error("no supported output configs")]
    NoSupportedConfig,
    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("failed to query output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported output sample format: {0}")]
    UnsupportedSampleFormat(String),
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("buffer {0:?} is queued and cannot be modified")]
    BufferQueued(BufferId),
    #[error("no processed buffer to unqueue")]
    NothingProcessed,
    #[error("buffer rate {buffer} Hz does not match output rate {output} Hz")]
    RateMismatch { buffer: u32, output: u32 },
    #[error("payload of {len} bytes is not a whole number of frames")]
    PartialFrame { len: usize },
}

/// Fatal session error surfaced to the caller.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to decode audio: {0}")]
    Decode(#[source] symphonia::core::errors::Error),
    #[error("incompatible format: {format} with {channels} channel(s)")]
    IncompatibleFormat { format: SampleFormat, channels: usize },
    #[error(
        "stream format changed from {expected_channels}ch @ {expected_rate} Hz to {channels}ch @ {rate} Hz"
    )]
    FormatChanged {
        expected_rate: u32,
        expected_channels: usize,
        rate: u32,
        channels: usize,
    },
    #[error("resampler error: {0}")]
    Resample(String),
    #[error("output stalled: no buffer processed within {0:?}")]
    Stalled(Duration),
}

pub type Result<T, E = PlayError> = std::result::Result<T, E>;
