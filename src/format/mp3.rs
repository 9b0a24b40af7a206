//! MP3 elementary-stream demultiplexer (§1, §4.2). Full bitstream decoding
//! is out of scope; this implements just the MPEG-1 Layer III case (the
//! overwhelmingly common one) well enough to produce correctly-timed
//! packets, against the demultiplexer contract §4.2 defines.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const SAMPLES_PER_FRAME: u32 = 1152;

const BITRATES_KBPS: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 32_000];

struct FrameHeader {
    sample_rate: u32,
    channels: u32,
    frame_size: u32,
}

fn parse_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 4 {
        return None;
    }
    if bytes[0] != 0xFF || (bytes[1] & 0xE0) != 0xE0 {
        return None;
    }
    let version = (bytes[1] >> 3) & 0x3;
    let layer = (bytes[1] >> 1) & 0x3;
    if version != 0b11 || layer != 0b01 {
        // Only MPEG-1 Layer III is modeled; other variants are rejected by
        // the probe rather than mis-parsed.
        return None;
    }
    let bitrate_idx = (bytes[2] >> 4) as usize;
    let sample_rate_idx = ((bytes[2] >> 2) & 0x3) as usize;
    let padding = (bytes[2] >> 1) & 0x1;
    if bitrate_idx == 0 || bitrate_idx >= BITRATES_KBPS.len() || sample_rate_idx >= SAMPLE_RATES.len() {
        return None;
    }
    let channel_mode = (bytes[3] >> 6) & 0x3;
    let channels = if channel_mode == 0b11 { 1 } else { 2 };

    let bitrate = BITRATES_KBPS[bitrate_idx] * 1000;
    let sample_rate = SAMPLE_RATES[sample_rate_idx];
    let frame_size = (144 * bitrate / sample_rate) + padding as u32;

    Some(FrameHeader {
        sample_rate,
        channels,
        frame_size,
    })
}

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let bytes = peek(reader, 4)?;
    Ok(parse_header(&bytes).is_some())
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(0))?;
    let first = reader.read_to_vec(4)?;
    let header = parse_header(&first).ok_or_else(|| DemuxError::Init {
        format: "mp3",
        detail: "unrecognized frame header".into(),
    })?;
    reader.seek(SeekFrom::Start(0))?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        return Ok((Box::new(Mp3Demuxer { packetizer_index: None, offset_ms: 0 }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::Mp3,
        codec_private: Vec::new(),
        default_track: cfg.default_track,
        language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
        name: cfg.track_name.clone(),
        video: None,
        audio: Some(AudioParams {
            sample_rate: header.sample_rate as f64,
            channels: header.channels as u64,
            bit_depth: None,
        }),
        cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
    };
    let packetizer = Packetizer::new(entry, cfg.sync);

    Ok((
        Box::new(Mp3Demuxer {
            packetizer_index: Some(0),
            offset_ms: 0,
        }),
        vec![packetizer],
        None,
    ))
}

struct Mp3Demuxer {
    packetizer_index: Option<usize>,
    offset_ms: i64,
}

impl DemuxerImpl for Mp3Demuxer {
    fn format_name(&self) -> &'static str {
        "mp3"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        let header_bytes = reader.read_to_vec(4)?;
        if header_bytes.len() < 4 {
            return Ok(Status::EndOfStream);
        }
        let Some(header) = parse_header(&header_bytes) else {
            return Ok(Status::EndOfStream);
        };

        let remaining = (header.frame_size as usize).saturating_sub(4);
        let rest = reader.read_to_vec(remaining)?;
        let mut frame = header_bytes;
        frame.extend_from_slice(&rest);

        let duration_ms = (SAMPLES_PER_FRAME as u64 * 1000) / header.sample_rate as u64;
        let timecode_ms = self.offset_ms;
        self.offset_ms += duration_ms as i64;

        packetizers[idx].push_raw(Span::from(frame), timecode_ms, Some(duration_ms), true);

        Ok(Status::MoreData)
    }

    fn display_priority(&self) -> u8 {
        30
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_mpeg1_layer3_header() {
        // 128kbps, 44100Hz, joint stereo, no padding.
        let bytes = [0xFFu8, 0xFB, 0x90, 0x00];
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.frame_size, 144 * 128_000 / 44_100);
    }

    #[test]
    fn rejects_non_sync_bytes() {
        assert!(parse_header(&[0x00, 0x00, 0x00, 0x00]).is_none());
    }
}
