//! AC-3 (Dolby Digital) elementary-stream demultiplexer (§1, §4.2).
//! Byte-level frame parsing beyond sync detection and the minimal fields
//! needed for timing is out of scope per §1; only `fscod`/`frmsizecod` are
//! decoded, matching the "contract, not full parser" scope the other
//! elementary-stream formats share.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const SAMPLES_PER_FRAME: u32 = 1536;
const SAMPLE_RATES: [u32; 3] = [48_000, 44_100, 32_000];

// frame size in 16-bit words, indexed by [frmsizecod/2][fscod], for the
// common integral-word sizes (odd frmsizecod values add one extra byte for
// the 44.1kHz case, handled separately).
const FRAME_SIZE_WORDS: [[u32; 3]; 19] = [
    [64, 69, 96],
    [64, 70, 96],
    [80, 87, 120],
    [80, 88, 120],
    [96, 104, 144],
    [96, 105, 144],
    [112, 121, 168],
    [112, 122, 168],
    [128, 139, 192],
    [128, 140, 192],
    [160, 174, 240],
    [160, 175, 240],
    [192, 208, 288],
    [192, 209, 288],
    [224, 243, 336],
    [224, 244, 336],
    [256, 278, 384],
    [256, 279, 384],
    [320, 348, 480],
];

struct FrameHeader {
    sample_rate: u32,
    frame_size_bytes: u32,
}

fn parse_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 5 {
        return None;
    }
    if bytes[0] != 0x0B || bytes[1] != 0x77 {
        return None;
    }
    let fscod = (bytes[4] >> 6) & 0x3;
    let frmsizecod = (bytes[4] & 0x3F) as usize;
    if fscod == 0x3 || frmsizecod >= 38 {
        return None;
    }
    let sample_rate = SAMPLE_RATES[fscod as usize];
    let row = frmsizecod / 2;
    let words = FRAME_SIZE_WORDS[row][fscod as usize];
    let bytes_total = if fscod == 1 && frmsizecod % 2 == 1 {
        words * 2 + 1
    } else {
        words * 2
    };
    Some(FrameHeader {
        sample_rate,
        frame_size_bytes: bytes_total,
    })
}

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let bytes = peek(reader, 5)?;
    Ok(parse_header(&bytes).is_some())
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(0))?;
    let first = reader.read_to_vec(5)?;
    let header = parse_header(&first).ok_or_else(|| DemuxError::Init {
        format: "ac3",
        detail: "unrecognized sync frame".into(),
    })?;
    reader.seek(SeekFrom::Start(0))?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        return Ok((Box::new(Ac3Demuxer { packetizer_index: None, offset_ms: 0 }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::Ac3,
        codec_private: Vec::new(),
        default_track: cfg.default_track,
        language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
        name: cfg.track_name.clone(),
        video: None,
        audio: Some(AudioParams {
            sample_rate: header.sample_rate as f64,
            channels: 2,
            bit_depth: None,
        }),
        cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
    };
    let packetizer = Packetizer::new(entry, cfg.sync);

    Ok((
        Box::new(Ac3Demuxer {
            packetizer_index: Some(0),
            offset_ms: 0,
        }),
        vec![packetizer],
        None,
    ))
}

struct Ac3Demuxer {
    packetizer_index: Option<usize>,
    offset_ms: i64,
}

impl DemuxerImpl for Ac3Demuxer {
    fn format_name(&self) -> &'static str {
        "ac3"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        let header_bytes = reader.read_to_vec(5)?;
        if header_bytes.len() < 5 {
            return Ok(Status::EndOfStream);
        }
        let Some(header) = parse_header(&header_bytes) else {
            return Ok(Status::EndOfStream);
        };

        let remaining = (header.frame_size_bytes as usize).saturating_sub(5);
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
    fn parses_48khz_frame() {
        let bytes = [0x0B, 0x77, 0x00, 0x00, 0b0000_0000];
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.frame_size_bytes, 128);
    }

    #[test]
    fn rejects_bad_sync() {
        assert!(parse_header(&[0x00, 0x00, 0x00, 0x00, 0x00]).is_none());
    }
}
