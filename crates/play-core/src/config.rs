use std::time::Duration;

/// Playback tuning parameters shared by the convert/ring/loop stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Number of output buffers cycled by the ring.
    pub buffer_count: usize,
    /// Worst-case frames per converted payload; storage is reserved for this up front.
    pub frame_capacity: usize,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// How the loop waits for the device to finish a buffer.
    pub poll: PollPolicy,
    /// Wait for queued buffers to play out once the source is exhausted.
    pub drain_on_end: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            frame_capacity: 8192,
            chunk_frames: 1024,
            poll: PollPolicy::default(),
            drain_on_end: true,
        }
    }
}

/// Wait strategy between `buffers_processed` queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStrategy {
    /// Re-query immediately (`spin_loop` hint only).
    Spin,
    /// Yield the thread between queries.
    Yield,
    /// Sleep for a fixed interval between queries.
    Sleep(Duration),
}

/// Polling contract for device progress.
///
/// `timeout: None` waits forever, which hangs if the device never reports progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub strategy: PollStrategy,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            strategy: PollStrategy::Yield,
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl PollPolicy {
    /// Pause once between two polls.
    pub fn pause(&self) {
        match self.strategy {
            PollStrategy::Spin => std::hint::spin_loop(),
            PollStrategy::Yield => std::thread::yield_now(),
            PollStrategy::Sleep(interval) => std::thread::sleep(interval),
        }
    }
}

/// Output device selection.
#[derive(Clone, Debug, Default)]
pub struct OutputOptions {
    /// Case-insensitive substring of the device name; `None` uses the host default.
    pub device: Option<String>,
    /// Sample rate to prefer when picking the stream config (usually the source rate).
    pub preferred_rate: Option<u32>,
}
