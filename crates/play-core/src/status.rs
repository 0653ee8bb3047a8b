use std::fmt;

use crate::decode::EndReason;

/// Counters collected over one playback session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames handed out by the decoder.
    pub frames_decoded: u64,
    /// Frames written to output buffers, at the output rate.
    pub frames_converted: u64,
    pub buffers_primed: usize,
    pub buffers_refilled: u64,
    /// Times the output had stopped after a refill and was restarted.
    pub underrun_recoveries: u64,
    /// Why the source stopped; `None` when the session aborted first.
    pub end_reason: Option<EndReason>,
}

impl SessionStats {
    /// Audio written to the device, in milliseconds at `output_rate`.
    pub fn written_ms(&self, output_rate: u32) -> u64 {
        if output_rate == 0 {
            return 0;
        }
        self.frames_converted.saturating_mul(1000) / output_rate as u64
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames decoded, {} frames played, {} buffers primed, {} refills, {} underrun recoveries",
            self.frames_decoded,
            self.frames_converted,
            self.buffers_primed,
            self.buffers_refilled,
            self.underrun_recoveries
        )?;
        match &self.end_reason {
            Some(EndReason::Exhausted) => write!(f, ", source exhausted"),
            Some(EndReason::ReadFailed(msg)) => write!(f, ", read failed: {msg}"),
            None => Ok(()),
        }
    }
}
