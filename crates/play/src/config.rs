use std::path::PathBuf;
use std::time::Duration;

pub use play_core::config::{OutputOptions, PlaybackConfig, PollPolicy, PollStrategy};

use crate::cli::{Args, PollArg};

/// Everything needed to play one file.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    /// Empty when no path was given; opening it fails with the usual invalid-path error.
    pub path: PathBuf,
    pub volume: f32,
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

impl PlayConfig {
    pub fn from_args(args: &Args) -> Self {
        let strategy = match args.poll {
            PollArg::Spin => PollStrategy::Spin,
            PollArg::Yield => PollStrategy::Yield,
            PollArg::Sleep => PollStrategy::Sleep(Duration::from_millis(args.poll_interval_ms)),
        };
        let timeout = match args.stall_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Self {
            path: args.path.clone().unwrap_or_default(),
            volume: args.volume,
            device: normalize_device_name(args.device.clone()),
            playback: PlaybackConfig {
                buffer_count: usize::from(args.buffers),
                frame_capacity: args.frame_capacity,
                chunk_frames: args.chunk_frames,
                poll: PollPolicy { strategy, timeout },
                drain_on_end: !args.no_drain,
            },
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
