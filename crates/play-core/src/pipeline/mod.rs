//! Playback loop: prime the buffer ring, start the output, then keep refilling buffers as the
//! device hands them back until the source runs out.

use crate::config::PlaybackConfig;
use crate::convert::{ConvertedFrame, SampleConverter};
use crate::decode::FrameSource;
use crate::error::Result;
use crate::output::{AudioOutput, SourceState};
use crate::ring::PlaybackBufferRing;
use crate::status::SessionStats;

/// Play `source` to completion through `output`.
///
/// Blocks until the source is exhausted (and, with `drain_on_end`, until everything queued
/// has played). Any decode, conversion or device error aborts the session; output buffers
/// are released on every path.
pub fn play_session<S, O>(
    source: &mut S,
    converter: &mut SampleConverter,
    output: &mut O,
    cfg: &PlaybackConfig,
) -> Result<SessionStats>
where
    S: FrameSource,
    O: AudioOutput,
{
    let mut stats = SessionStats::default();
    let mut ring = PlaybackBufferRing::new(output, cfg.buffer_count)?;

    let ids = ring.buffers().to_vec();
    for id in ids {
        let Some(frame) = next_payload(source, converter, &mut stats)? else {
            break;
        };
        ring.fill_and_queue(id, frame)?;
        stats.buffers_primed += 1;
    }
    tracing::info!(
        primed = stats.buffers_primed,
        buffers = cfg.buffer_count,
        "output primed"
    );

    if stats.buffers_primed == 0 {
        tracing::warn!("source produced no audio");
        stats.end_reason = source.end_reason().cloned();
        return Ok(stats);
    }
    ring.play()?;

    'refill: loop {
        let processed = ring.wait_processed(&cfg.poll)?;
        for _ in 0..processed {
            let id = ring.reclaim()?;
            let Some(frame) = next_payload(source, converter, &mut stats)? else {
                break 'refill;
            };
            ring.fill_and_queue(id, frame)?;
            stats.buffers_refilled += 1;
        }

        if ring.state()? != SourceState::Playing {
            tracing::warn!(queued = ring.queued(), "output ran dry; restarting");
            ring.play()?;
            stats.underrun_recoveries += 1;
        }
    }

    if cfg.drain_on_end {
        drain(&mut ring, cfg, &mut stats)?;
    }

    stats.end_reason = source.end_reason().cloned();
    tracing::info!(
        frames = stats.frames_converted,
        refills = stats.buffers_refilled,
        recoveries = stats.underrun_recoveries,
        "playback finished"
    );
    Ok(stats)
}

/// Pull frames until one converts to a non-empty payload.
fn next_payload<'c, S: FrameSource>(
    source: &mut S,
    converter: &'c mut SampleConverter,
    stats: &mut SessionStats,
) -> Result<Option<&'c ConvertedFrame>> {
    loop {
        let Some(frame) = source.next_frame()? else {
            let frames = converter.flush()?.frames();
            if frames == 0 {
                return Ok(None);
            }
            stats.frames_converted += frames as u64;
            return Ok(Some(converter.converted()));
        };
        stats.frames_decoded += frame.frames() as u64;

        let frames = converter.convert(frame)?.frames();
        if frames == 0 {
            continue;
        }
        stats.frames_converted += frames as u64;
        return Ok(Some(converter.converted()));
    }
}

/// Wait for every queued buffer to play out.
fn drain<O: AudioOutput>(
    ring: &mut PlaybackBufferRing<'_, O>,
    cfg: &PlaybackConfig,
    stats: &mut SessionStats,
) -> Result<()> {
    loop {
        for _ in 0..ring.processed()? {
            ring.reclaim()?;
        }
        if ring.queued() == 0 {
            return Ok(());
        }
        if ring.state()? != SourceState::Playing {
            ring.play()?;
            stats.underrun_recoveries += 1;
        }
        ring.wait_processed(&cfg.poll)?;
    }
}
