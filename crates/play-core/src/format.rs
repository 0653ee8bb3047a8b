//! Sample formats on both sides of the pipeline and the negotiation between them.

use std::fmt;

use symphonia::core::audio::AudioBufferRef;

use crate::error::{PlayError, Result};

/// Native sample format of a decoded stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    U16,
    U24,
    U32,
    S8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    /// Format of the buffer a decoder just produced.
    pub fn of_buffer(buf: &AudioBufferRef<'_>) -> Self {
        match buf {
            AudioBufferRef::U8(_) => Self::U8,
            AudioBufferRef::U16(_) => Self::U16,
            AudioBufferRef::U24(_) => Self::U24,
            AudioBufferRef::U32(_) => Self::U32,
            AudioBufferRef::S8(_) => Self::S8,
            AudioBufferRef::S16(_) => Self::S16,
            AudioBufferRef::S24(_) => Self::S24,
            AudioBufferRef::S32(_) => Self::S32,
            AudioBufferRef::F32(_) => Self::F32,
            AudioBufferRef::F64(_) => Self::F64,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U24 | Self::S24 => 3,
            Self::U32 | Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

impl From<symphonia::core::sample::SampleFormat> for SampleFormat {
    fn from(value: symphonia::core::sample::SampleFormat) -> Self {
        use symphonia::core::sample::SampleFormat as Sf;
        match value {
            Sf::U8 => Self::U8,
            Sf::U16 => Self::U16,
            Sf::U24 => Self::U24,
            Sf::U32 => Self::U32,
            Sf::S8 => Self::S8,
            Sf::S16 => Self::S16,
            Sf::S24 => Self::S24,
            Sf::S32 => Self::S32,
            Sf::F32 => Self::F32,
            Sf::F64 => Self::F64,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U24 => "u24",
            Self::U32 => "u32",
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S24 => "s24",
            Self::S32 => "s32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Layout of a payload written into an output buffer.
///
/// 8-bit payloads are unsigned, 16-bit payloads are signed little-endian, both interleaved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl BufferFormat {
    /// Map a sample layout to the buffer format an output accepts.
    ///
    /// Planar and interleaved layouts are not distinguished here: decoded frames are always
    /// interleaved before they reach an output buffer.
    pub fn negotiate(format: SampleFormat, channels: usize) -> Result<Self> {
        match (format, channels) {
            (SampleFormat::U8, 1) => Ok(Self::Mono8),
            (SampleFormat::U8, 2) => Ok(Self::Stereo8),
            (SampleFormat::S16, 1) => Ok(Self::Mono16),
            (SampleFormat::S16, 2) => Ok(Self::Stereo16),
            _ => Err(PlayError::IncompatibleFormat { format, channels }),
        }
    }

    pub fn channels(self) -> usize {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Mono8 | Self::Stereo8 => 1,
            Self::Mono16 | Self::Stereo16 => 2,
        }
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub fn bytes_per_frame(self) -> usize {
        self.bytes_per_sample() * self.channels()
    }

    /// Payload size for `frames` frames.
    pub fn payload_len(self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_maps_supported_layouts() {
        assert_eq!(BufferFormat::negotiate(SampleFormat::U8, 1).unwrap(), BufferFormat::Mono8);
        assert_eq!(BufferFormat::negotiate(SampleFormat::U8, 2).unwrap(), BufferFormat::Stereo8);
        assert_eq!(BufferFormat::negotiate(SampleFormat::S16, 1).unwrap(), BufferFormat::Mono16);
        assert_eq!(
            BufferFormat::negotiate(SampleFormat::S16, 2).unwrap(),
            BufferFormat::Stereo16
        );
    }

    #[test]
    fn negotiate_rejects_other_layouts() {
        let err = BufferFormat::negotiate(SampleFormat::F32, 2).unwrap_err();
        assert!(matches!(
            err,
            PlayError::IncompatibleFormat { format: SampleFormat::F32, channels: 2 }
        ));
        assert!(BufferFormat::negotiate(SampleFormat::S16, 6).is_err());
    }

    #[test]
    fn payload_len_uses_bytes_per_frame() {
        assert_eq!(BufferFormat::Stereo16.payload_len(1024), 4096);
        assert_eq!(BufferFormat::Mono8.payload_len(10), 10);
        assert_eq!(BufferFormat::Stereo8.bytes_per_frame(), 2);
    }

    #[test]
    fn symphonia_formats_convert() {
        use symphonia::core::sample::SampleFormat as Sf;
        assert_eq!(SampleFormat::from(Sf::S24), SampleFormat::S24);
        assert_eq!(SampleFormat::from(Sf::F64).bytes_per_sample(), 8);
    }
}
