use std::path::PathBuf;

use clap::{Parser, ValueEnum};

pub const BANNER: &str = concat!(
    "Play (v",
    env!("CARGO_PKG_VERSION"),
    ") - Command Line Audio Player"
);

#[derive(Parser, Debug)]
#[command(name = "play", version, about = "Command line audio player")]
pub struct Args {
    /// Path to audio file
    pub path: Option<PathBuf>,

    /// Set playback volume (1.0 = unchanged)
    #[arg(short = 'v', long, default_value_t = 1.0, value_parser = parse_volume)]
    pub volume: f32,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Number of output buffers kept in flight
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub buffers: u16,

    /// Worst-case frames per converted buffer; storage is reserved up front
    #[arg(long, default_value_t = 8192, value_parser = parse_frames)]
    pub frame_capacity: usize,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024, value_parser = parse_frames)]
    pub chunk_frames: usize,

    /// How to wait for the device between buffer refills
    #[arg(long, value_enum, default_value_t = PollArg::Yield)]
    pub poll: PollArg,

    /// Sleep interval for `--poll sleep`
    #[arg(long, default_value_t = 1)]
    pub poll_interval_ms: u64,

    /// Give up when the device makes no progress for this long (0 waits forever)
    #[arg(long, default_value_t = 5000)]
    pub stall_timeout_ms: u64,

    /// Return as soon as the source is exhausted instead of letting queued audio finish
    #[arg(long)]
    pub no_drain: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollArg {
    Spin,
    Yield,
    Sleep,
}

fn parse_volume(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("volume must be a non-negative number, got {s}"));
    }
    Ok(v)
}

fn parse_frames(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("`{s}` is not a frame count")),
    }
}

/// One-line form of a usage error, without clap's `error:` prefix or trailing usage block.
pub fn usage_error_message(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    let first = rendered.lines().next().unwrap_or_default().trim();
    first
        .strip_prefix("error:")
        .unwrap_or(first)
        .trim()
        .trim_end_matches('.')
        .to_string()
}
