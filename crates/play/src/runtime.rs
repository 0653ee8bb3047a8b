//! Session wiring for the `play` command.
//!
//! Opens the source before touching the audio device, so a bad path never allocates device
//! resources. Everything acquired here is released in reverse order when `run_play` returns.

use anyhow::Result;

use play_core::convert::{ConverterSpec, SampleConverter};
use play_core::decode::{self, AudioDecoder};
use play_core::output::AudioOutput;
use play_core::playback::CpalOutput;
use play_core::status::SessionStats;
use play_core::{device, pipeline};

use crate::config::{OutputOptions, PlayConfig};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)?;
    Ok(())
}

/// Play one local file to completion.
pub fn run_play(config: &PlayConfig) -> Result<SessionStats> {
    decode::init_backends();

    let mut source = AudioDecoder::open(&config.path)?;
    println!("{}", source.stream());

    let mut output = CpalOutput::open(&OutputOptions {
        device: config.device.clone(),
        preferred_rate: Some(source.stream().sample_rate),
    })?;
    tracing::info!(
        device = %output.device_name(),
        rate_hz = output.sample_rate(),
        channels = output.channels(),
        "output device"
    );
    output.set_gain(config.volume)?;

    let spec = ConverterSpec::for_stream(source.stream(), output.sample_rate());
    let mut converter = SampleConverter::new(spec, &config.playback)?;

    let stats =
        pipeline::play_session(&mut source, &mut converter, &mut output, &config.playback)?;

    tracing::info!(
        written_ms = stats.written_ms(output.sample_rate()),
        device_underruns = output.underruns(),
        skipped_units = source.skipped_units(),
        "session summary: {stats}"
    );
    Ok(stats)
}
