//! Core playback library for the `play` command.
//!
//! A session decodes one local file with Symphonia, converts each decoded frame to 16-bit
//! stereo at the device rate, and keeps a small ring of output buffers queued on a CPAL
//! device until the source runs out.

pub mod config;
pub mod convert;
pub mod decode;
pub mod device;
pub mod error;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod playback;
pub mod ring;
pub mod status;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{DeviceError, OpenError, PlayError};
