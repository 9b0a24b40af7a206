//! The data model (§3): track metadata and packets. Trimmed from the base
//! crate's `media.rs` — `MediaTime`/`MediaDuration`/timebase conversion and
//! the H264/AAC codec-detail structs are dropped because per-codec bitstream
//! parsing is out of scope (§1); what survives is the track/packet shape the
//! packetizer, cluster builder and writer actually pass around, expressed
//! directly in milliseconds scaled by `TIMECODE_SCALE` per §3.

use crate::span::Span;

/// Nanoseconds per timecode tick. Fixed; always written as `Info/TimecodeScale`.
pub const TIMECODE_SCALE: u64 = 1_000_000;

/// The codec identifiers the writer understands, each carrying its Matroska
/// `CodecID` string (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    Mpeg4Asp,
    Aac,
    Mp3,
    Ac3,
    Dts,
    PcmInt,
    Vorbis,
    SubRip,
    WebVtt,
}

impl CodecId {
    pub fn matroska_id(&self) -> &'static str {
        match self {
            CodecId::H264 => "V_MPEG4/ISO/AVC",
            CodecId::Mpeg4Asp => "V_MPEG4/ISO/ASP",
            CodecId::Aac => "A_AAC",
            CodecId::Mp3 => "A_MPEG/L3",
            CodecId::Ac3 => "A_AC3",
            CodecId::Dts => "A_DTS",
            CodecId::PcmInt => "A_PCM/INT/LIT",
            CodecId::Vorbis => "A_VORBIS",
            CodecId::SubRip => "S_TEXT/UTF8",
            CodecId::WebVtt => "S_TEXT/WEBVTT",
        }
    }

    /// The reverse of [`CodecId::matroska_id`], used by the Matroska
    /// demultiplexer when re-reading a file this engine produced (§8
    /// testable property 7, round-trip).
    pub fn from_matroska_id(id: &str) -> Option<CodecId> {
        Some(match id {
            "V_MPEG4/ISO/AVC" => CodecId::H264,
            "V_MPEG4/ISO/ASP" => CodecId::Mpeg4Asp,
            "A_AAC" => CodecId::Aac,
            "A_MPEG/L3" => CodecId::Mp3,
            "A_AC3" => CodecId::Ac3,
            "A_DTS" => CodecId::Dts,
            "A_PCM/INT/LIT" => CodecId::PcmInt,
            "A_VORBIS" => CodecId::Vorbis,
            "S_TEXT/UTF8" => CodecId::SubRip,
            "S_TEXT/WEBVTT" => CodecId::WebVtt,
            _ => return None,
        })
    }
}

/// Which kind of track this is, mirroring Matroska's `TrackType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    pub fn track_type(&self) -> u64 {
        match self {
            TrackKind::Video => 1,
            TrackKind::Audio => 2,
            TrackKind::Subtitle => 17,
        }
    }
}

/// Video-specific track parameters (§4.3).
#[derive(Debug, Clone)]
pub struct VideoParams {
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

/// Audio-specific track parameters (§4.3).
#[derive(Debug, Clone)]
pub struct AudioParams {
    pub sample_rate: f64,
    pub channels: u64,
    pub bit_depth: Option<u64>,
}

/// Cue policy for a packetizer (§4.3): which packets get an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuePolicy {
    None,
    IFramesOnly,
    All,
}

/// A fully-assembled Matroska track entry, written once during the `Tracks`
/// phase (§4.6 phase 5).
#[derive(Debug, Clone)]
pub struct TrackEntry {
    pub number: u32,
    pub uid: u64,
    pub kind: TrackKind,
    pub codec_id: CodecId,
    pub codec_private: Vec<u8>,
    pub default_track: bool,
    pub language: String,
    pub name: Option<String>,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    pub cue_policy: CuePolicy,
}

/// A timecoded packet flowing from a packetizer's FIFO to the cluster
/// builder (§3). `timecode_ms` is the on-wire unit after `TIMECODE_SCALE`
/// (milliseconds, since the scale is fixed at one million nanoseconds/tick).
#[derive(Clone)]
pub struct Packet {
    pub track_number: u32,
    pub timecode_ms: i64,
    pub duration_ms: Option<u64>,
    pub payload: Span,
    pub is_keyframe: bool,
    /// Set only when the scheduler knows this is the last packet its
    /// packetizer will ever produce (§4.5).
    pub duration_mandatory: bool,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("track_number", &self.track_number)
            .field("timecode_ms", &self.timecode_ms)
            .field("duration_ms", &self.duration_ms)
            .field("is_keyframe", &self.is_keyframe)
            .field("payload", &format_args!("[{}]", self.payload.len()))
            .finish()
    }
}
