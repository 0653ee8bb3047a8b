//! Decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container and pick the best audio stream
//! - read compressed packets, dropping the ones that belong to other streams
//! - decode packets into a reused interleaved `f32` [`DecodedFrame`]

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Once;

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{OpenError, PlayError, Result};
use crate::format::SampleFormat;

/// Register the format and codec backends.
///
/// Process-wide and idempotent; sessions call it before opening anything.
pub fn init_backends() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = symphonia::default::get_probe();
        let _ = symphonia::default::get_codecs();
        tracing::debug!("media backends registered");
    });
}

/// The audio stream selected from a container.
#[derive(Clone, Debug)]
pub struct SourceStream {
    /// Track id used to match packets to this stream.
    pub index: u32,
    /// Native sample format, when the container reports one.
    pub format: Option<SampleFormat>,
    pub channels: usize,
    /// Channel positions; `None` when the container does not say.
    pub layout: Option<Channels>,
    pub sample_rate: u32,
    pub duration_ms: Option<u64>,
    pub codec: String,
}

impl SourceStream {
    /// Describe a selected track.
    pub fn from_track(track: &Track) -> Option<Self> {
        let params = &track.codec_params;
        Some(Self {
            index: track.id,
            format: params.sample_format.map(SampleFormat::from),
            channels: params.channels?.count(),
            layout: params.channels,
            sample_rate: params.sample_rate?,
            duration_ms: duration_ms_from_codec_params(params),
            codec: codec_name_from_params(params),
        })
    }
}

impl fmt::Display for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Audio: {} ({}, {})", self.codec, self.channels, self.sample_rate)
    }
}

/// One decoded unit of PCM, overwritten in place by every decode.
///
/// Samples are interleaved `f32`. The backing storage keeps its capacity across decodes and
/// only grows; `frames()` is the logical extent of the current contents.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    format: Option<SampleFormat>,
    channels: usize,
    sample_rate: u32,
    frames: usize,
    samples: Vec<f32>,
}

impl DecodedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with `interleaved` samples.
    pub fn fill(
        &mut self,
        format: SampleFormat,
        channels: usize,
        sample_rate: u32,
        interleaved: &[f32],
    ) {
        self.format = Some(format);
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.frames = if channels == 0 { 0 } else { interleaved.len() / channels };
        self.samples.clear();
        self.samples.extend_from_slice(&interleaved[..self.frames * channels]);
    }

    /// Native format the decoder produced, if anything was decoded yet.
    pub fn format(&self) -> Option<SampleFormat> {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frames the storage can hold without reallocating.
    pub fn capacity_frames(&self) -> usize {
        if self.channels == 0 { 0 } else { self.samples.capacity() / self.channels }
    }
}

/// Why a decoder stopped producing frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The container ran out of packets.
    Exhausted,
    /// A read failed; the stream is treated as finished.
    ReadFailed(String),
}

impl EndReason {
    fn from_read_error(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Self::Exhausted
            }
            other => Self::ReadFailed(other.to_string()),
        }
    }
}

/// Demuxer side of the decode stage: yields compressed packets from every stream.
pub trait UnitReader {
    /// Next packet, or the error that ended reading (end-of-file is an `UnexpectedEof` I/O error).
    fn next_unit(&mut self) -> std::result::Result<Packet, SymphoniaError>;
}

/// Codec side of the decode stage.
pub trait UnitDecoder {
    /// Decode `unit` into `frame`. Returns `false` when the codec produced no samples yet.
    fn decode_into(&mut self, unit: &Packet, frame: &mut DecodedFrame) -> Result<bool>;
}

/// Anything that hands out decoded frames until the source is exhausted.
pub trait FrameSource {
    /// Next decoded frame, or `Ok(None)` once the source is finished.
    fn next_frame(&mut self) -> Result<Option<&DecodedFrame>>;

    /// Set once `next_frame` has returned `Ok(None)`.
    fn end_reason(&self) -> Option<&EndReason>;
}

/// Symphonia format reader.
pub struct SymphoniaReader {
    format: Box<dyn FormatReader>,
}

impl UnitReader for SymphoniaReader {
    fn next_unit(&mut self) -> std::result::Result<Packet, SymphoniaError> {
        self.format.next_packet()
    }
}

/// Symphonia codec with a reusable interleaving buffer.
pub struct SymphoniaCodec {
    decoder: Box<dyn Decoder>,
    scratch: Option<Scratch>,
}

struct Scratch {
    buf: SampleBuffer<f32>,
    frames: usize,
    channels: usize,
}

impl SymphoniaCodec {
    pub fn new(params: &CodecParameters) -> std::result::Result<Self, OpenError> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(OpenError::Codec)?;
        Ok(Self { decoder, scratch: None })
    }
}

impl UnitDecoder for SymphoniaCodec {
    fn decode_into(&mut self, unit: &Packet, frame: &mut DecodedFrame) -> Result<bool> {
        let decoded = self.decoder.decode(unit).map_err(PlayError::Decode)?;
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(false);
        }

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let format = SampleFormat::of_buffer(&decoded);

        let fits = self
            .scratch
            .as_ref()
            .is_some_and(|s| s.frames >= frames && s.channels == channels);
        if !fits {
            let grown = self.scratch.as_ref().map_or(frames, |s| s.frames.max(frames));
            self.scratch = Some(Scratch {
                buf: SampleBuffer::new(grown as u64, spec),
                frames: grown,
                channels,
            });
        }

        let Some(scratch) = self.scratch.as_mut() else {
            return Ok(false);
        };
        scratch.buf.copy_interleaved_ref(decoded);
        frame.fill(format, channels, spec.rate, scratch.buf.samples());
        Ok(true)
    }
}

/// Pulls packets for one audio stream and decodes them into a reused frame.
pub struct AudioDecoder<R = SymphoniaReader, C = SymphoniaCodec> {
    reader: R,
    codec: C,
    stream: SourceStream,
    frame: DecodedFrame,
    end: Option<EndReason>,
    skipped_units: u64,
}

impl AudioDecoder {
    /// Open a local file and select its best audio stream.
    pub fn open(path: &Path) -> std::result::Result<Self, OpenError> {
        if !path.is_file() {
            return Err(OpenError::InvalidPath(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| OpenError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_media_source(Box::new(file), hint)
    }

    /// Open an arbitrary Symphonia [`MediaSource`].
    pub fn from_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
    ) -> std::result::Result<Self, OpenError> {
        init_backends();
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(OpenError::Probe)?;
        let format = probed.format;

        let default_id = format.default_track().map(|t| t.id);
        let track = select_best_track(format.tracks(), default_id).ok_or(OpenError::NoAudioStream)?;
        let stream = SourceStream::from_track(track).ok_or(OpenError::NoAudioStream)?;
        let codec = SymphoniaCodec::new(&track.codec_params)?;

        tracing::info!(
            track = stream.index,
            codec = %stream.codec,
            channels = stream.channels,
            rate_hz = stream.sample_rate,
            duration_ms = ?stream.duration_ms,
            "audio stream selected"
        );

        Ok(Self::from_parts(SymphoniaReader { format }, codec, stream))
    }
}

impl<R: UnitReader, C: UnitDecoder> AudioDecoder<R, C> {
    pub fn from_parts(reader: R, codec: C, stream: SourceStream) -> Self {
        Self {
            reader,
            codec,
            stream,
            frame: DecodedFrame::new(),
            end: None,
            skipped_units: 0,
        }
    }

    pub fn stream(&self) -> &SourceStream {
        &self.stream
    }

    /// Packets dropped because they belonged to another stream.
    pub fn skipped_units(&self) -> u64 {
        self.skipped_units
    }
}

impl<R: UnitReader, C: UnitDecoder> FrameSource for AudioDecoder<R, C> {
    fn next_frame(&mut self) -> Result<Option<&DecodedFrame>> {
        if self.end.is_some() {
            return Ok(None);
        }

        loop {
            let unit = match self.reader.next_unit() {
                Ok(unit) => unit,
                Err(err) => {
                    let reason = EndReason::from_read_error(err);
                    if let EndReason::ReadFailed(msg) = &reason {
                        tracing::warn!(error = %msg, "read failed; ending stream");
                    }
                    self.end = Some(reason);
                    return Ok(None);
                }
            };

            if unit.track_id() != self.stream.index {
                self.skipped_units += 1;
                tracing::trace!(track = unit.track_id(), "skipping packet from other stream");
                continue;
            }

            if self.codec.decode_into(&unit, &mut self.frame)? {
                return Ok(Some(&self.frame));
            }
        }
    }

    fn end_reason(&self) -> Option<&EndReason> {
        self.end.as_ref()
    }
}

/// Pick the audio track to play.
///
/// The container's default track wins when it is decodable audio; otherwise the decodable
/// track with the most channels, then the highest sample rate, then the lowest id.
pub fn select_best_track(tracks: &[Track], default_id: Option<u32>) -> Option<&Track> {
    let decodable = |t: &&Track| {
        let p = &t.codec_params;
        p.codec != CODEC_TYPE_NULL && p.sample_rate.is_some() && p.channels.is_some()
    };

    if let Some(id) = default_id {
        if let Some(track) = tracks.iter().filter(decodable).find(|t| t.id == id) {
            return Some(track);
        }
    }

    tracks.iter().filter(decodable).min_by_key(|t| {
        let p = &t.codec_params;
        let channels = p.channels.map(|c| c.count()).unwrap_or(0);
        (
            std::cmp::Reverse(channels),
            std::cmp::Reverse(p.sample_rate.unwrap_or(0)),
            t.id,
        )
    })
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Long codec name from the registry, falling back to a short label.
fn codec_name_from_params(params: &CodecParameters) -> String {
    if let Some(desc) = symphonia::default::get_codecs().get_codec(params.codec) {
        return desc.long_name.to_string();
    }
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_U8 => "PCM_U8",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => "unknown",
    };
    name.to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_S16LE};

    /// Reader that replays `(track, payload)` units, then the given terminal error.
    pub(crate) struct ScriptedReader {
        units: VecDeque<(u32, Vec<u8>)>,
        end: Option<SymphoniaError>,
    }

    impl ScriptedReader {
        pub(crate) fn new(units: Vec<(u32, Vec<u8>)>) -> Self {
            Self {
                units: units.into(),
                end: None,
            }
        }

        pub(crate) fn failing_with(mut self, err: SymphoniaError) -> Self {
            self.end = Some(err);
            self
        }
    }

    impl UnitReader for ScriptedReader {
        fn next_unit(&mut self) -> std::result::Result<Packet, SymphoniaError> {
            match self.units.pop_front() {
                Some((track, data)) => Ok(Packet::new_from_slice(track, 0, 0, &data)),
                None => Err(self.end.take().unwrap_or_else(eof)),
            }
        }
    }

    fn eof() -> SymphoniaError {
        SymphoniaError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
    }

    /// Codec whose first payload byte is the number of mono frames to emit.
    /// A payload of `[0xff]` is treated as corrupt.
    pub(crate) struct CountingCodec {
        pub(crate) rate: u32,
        pub(crate) decoded_units: usize,
    }

    impl CountingCodec {
        pub(crate) fn new(rate: u32) -> Self {
            Self { rate, decoded_units: 0 }
        }
    }

    impl UnitDecoder for CountingCodec {
        fn decode_into(&mut self, unit: &Packet, frame: &mut DecodedFrame) -> Result<bool> {
            self.decoded_units += 1;
            let n = unit.buf().first().copied().unwrap_or(0);
            if n == 0xff {
                return Err(PlayError::Decode(SymphoniaError::DecodeError("corrupt unit")));
            }
            if n == 0 {
                return Ok(false);
            }
            let samples = vec![0.25f32; n as usize];
            frame.fill(SampleFormat::S16, 1, self.rate, &samples);
            Ok(true)
        }
    }

    pub(crate) fn mono_stream(index: u32, rate: u32) -> SourceStream {
        SourceStream {
            index,
            format: Some(SampleFormat::S16),
            channels: 1,
            layout: None,
            sample_rate: rate,
            duration_ms: None,
            codec: "test".to_string(),
        }
    }

    fn decoder(
        units: Vec<(u32, Vec<u8>)>,
    ) -> AudioDecoder<ScriptedReader, CountingCodec> {
        AudioDecoder::from_parts(
            ScriptedReader::new(units),
            CountingCodec::new(8_000),
            mono_stream(1, 8_000),
        )
    }

    #[test]
    fn units_from_other_streams_are_skipped() {
        let mut dec = decoder(vec![(2, vec![9]), (3, vec![9]), (1, vec![4])]);
        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(frame.frames(), 4);
        assert_eq!(dec.skipped_units(), 2);
        assert_eq!(dec.codec.decoded_units, 1);
    }

    #[test]
    fn zero_sample_decodes_keep_reading() {
        let mut dec = decoder(vec![(1, vec![0]), (1, vec![0]), (1, vec![3])]);
        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(frame.frames(), 3);
        assert_eq!(dec.codec.decoded_units, 3);
    }

    #[test]
    fn exhaustion_is_not_an_error_and_sticks() {
        let mut dec = decoder(vec![(1, vec![2]), (1, vec![0])]);
        assert!(dec.next_frame().unwrap().is_some());
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.end_reason(), Some(&EndReason::Exhausted));
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn read_failure_ends_stream_with_reason() {
        let reader = ScriptedReader::new(vec![(1, vec![2])])
            .failing_with(SymphoniaError::IoError(io::Error::other("disk gone")));
        let mut dec =
            AudioDecoder::from_parts(reader, CountingCodec::new(8_000), mono_stream(1, 8_000));
        assert!(dec.next_frame().unwrap().is_some());
        assert!(dec.next_frame().unwrap().is_none());
        assert!(matches!(dec.end_reason(), Some(EndReason::ReadFailed(_))));
    }

    #[test]
    fn decode_errors_are_fatal() {
        let mut dec = decoder(vec![(1, vec![0xff]), (1, vec![2])]);
        let err = dec.next_frame().unwrap_err();
        assert!(matches!(err, PlayError::Decode(_)));
    }

    #[test]
    fn decoded_frame_reuses_storage() {
        let mut frame = DecodedFrame::new();
        frame.fill(SampleFormat::F32, 2, 44_100, &[0.0; 2048]);
        let cap = frame.capacity_frames();
        frame.fill(SampleFormat::F32, 2, 44_100, &[0.0; 64]);
        assert_eq!(frame.frames(), 32);
        assert_eq!(frame.samples().len(), 64);
        assert!(frame.capacity_frames() >= cap);
    }

    #[test]
    fn open_rejects_missing_path() {
        let err = AudioDecoder::open(Path::new("/definitely/not/here.flac")).err().unwrap();
        assert!(matches!(err, OpenError::InvalidPath(_)));
        assert!(err.to_string().starts_with("invalid path to audio file"));
    }

    #[test]
    fn open_rejects_non_media_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        let err = AudioDecoder::open(&path).err().unwrap();
        assert!(matches!(err, OpenError::Probe(_)));
    }

    #[test]
    fn open_decodes_wav_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = crate::testutil::write_wav_u8(dir.path(), "tone.wav", 8_000, 1, 2.0);
        let mut dec = AudioDecoder::open(&path).unwrap();
        assert_eq!(dec.stream().channels, 1);
        assert_eq!(dec.stream().sample_rate, 8_000);
        assert_eq!(dec.stream().duration_ms, Some(2_000));

        let mut total = 0;
        while let Some(frame) = dec.next_frame().unwrap() {
            assert_eq!(frame.format(), Some(SampleFormat::U8));
            total += frame.frames();
        }
        assert_eq!(total, 16_000);
        assert_eq!(dec.end_reason(), Some(&EndReason::Exhausted));
    }

    fn track(id: u32, codec: symphonia::core::codecs::CodecType, channels: Channels, rate: u32) -> Track {
        let mut params = CodecParameters::new();
        params.for_codec(codec).with_sample_rate(rate).with_channels(channels);
        Track::new(id, params)
    }

    #[test]
    fn select_prefers_decodable_default_track() {
        let stereo = Channels::FRONT_LEFT | Channels::FRONT_RIGHT;
        let tracks = vec![
            track(0, CODEC_TYPE_FLAC, stereo, 96_000),
            track(1, CODEC_TYPE_PCM_S16LE, Channels::FRONT_LEFT, 8_000),
        ];
        assert_eq!(select_best_track(&tracks, Some(1)).unwrap().id, 1);
    }

    #[test]
    fn select_falls_back_to_richest_track() {
        let stereo = Channels::FRONT_LEFT | Channels::FRONT_RIGHT;
        let tracks = vec![
            track(0, CODEC_TYPE_NULL, stereo, 48_000),
            track(1, CODEC_TYPE_PCM_S16LE, Channels::FRONT_LEFT, 48_000),
            track(2, CODEC_TYPE_FLAC, stereo, 44_100),
            track(3, CODEC_TYPE_FLAC, stereo, 48_000),
        ];
        assert_eq!(select_best_track(&tracks, Some(0)).unwrap().id, 3);
        assert!(select_best_track(&tracks[..1], None).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(2000));
    }

    #[test]
    fn stream_display_matches_banner_format() {
        let stream = mono_stream(0, 8_000);
        assert_eq!(stream.to_string(), "Audio: test (1, 8000)");
    }
}
