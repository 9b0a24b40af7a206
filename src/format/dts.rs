//! DTS Coherent Acoustics elementary-stream demultiplexer (§1, §4.2). Only
//! the 14/16-bit big-endian sync word, sample-rate code, and frame-size
//! field are decoded — enough for correct packet timing, consistent with
//! §1's "contract, not full parser" scope for elementary-stream formats.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const SYNC: [u8; 4] = [0x7F, 0xFE, 0x80, 0x01];
const SAMPLES_PER_FRAME: u32 = 512;

const SAMPLE_RATE_TABLE: [u32; 16] = [
    0, 8_000, 16_000, 32_000, 0, 0, 11_025, 22_050, 44_100, 0, 12_000, 24_000, 48_000, 96_000,
    192_000, 0,
];

struct FrameHeader {
    sample_rate: u32,
    frame_size_bytes: u32,
}

fn parse_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 13 || bytes[0..4] != SYNC {
        return None;
    }
    // Byte layout per the DTS CSS frame header (big-endian bitstream):
    // byte5 bit0 = FTYPE/SHORT bits we skip; FSIZE is a 14-bit field
    // starting at byte 4 bit 4 through byte 6, SFREQ is 4 bits in byte 8.
    let frame_size = (((bytes[4] as u32 & 0x01) << 13)
        | ((bytes[5] as u32) << 5)
        | ((bytes[6] as u32 >> 3) & 0x1F))
        + 1;
    let sfreq = (bytes[8] >> 2) & 0x0F;
    let sample_rate = SAMPLE_RATE_TABLE[sfreq as usize];
    if sample_rate == 0 || frame_size < 13 {
        return None;
    }
    Some(FrameHeader {
        sample_rate,
        frame_size_bytes: frame_size,
    })
}

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let bytes = peek(reader, 13)?;
    Ok(parse_header(&bytes).is_some())
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(0))?;
    let first = reader.read_to_vec(13)?;
    let header = parse_header(&first).ok_or_else(|| DemuxError::Init {
        format: "dts",
        detail: "unrecognized sync frame".into(),
    })?;
    reader.seek(SeekFrom::Start(0))?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        return Ok((Box::new(DtsDemuxer { packetizer_index: None, offset_ms: 0 }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::Dts,
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
        Box::new(DtsDemuxer {
            packetizer_index: Some(0),
            offset_ms: 0,
        }),
        vec![packetizer],
        None,
    ))
}

struct DtsDemuxer {
    packetizer_index: Option<usize>,
    offset_ms: i64,
}

impl DemuxerImpl for DtsDemuxer {
    fn format_name(&self) -> &'static str {
        "dts"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        let header_bytes = reader.read_to_vec(13)?;
        if header_bytes.len() < 13 {
            return Ok(Status::EndOfStream);
        }
        let Some(header) = parse_header(&header_bytes) else {
            return Ok(Status::EndOfStream);
        };

        let remaining = (header.frame_size_bytes as usize).saturating_sub(13);
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
    fn rejects_bad_sync() {
        assert!(parse_header(&[0u8; 13]).is_none());
    }

    #[test]
    fn parses_48khz_header() {
        let mut bytes = vec![0x7F, 0xFE, 0x80, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0, 0, 0, 0];
        // sfreq=12 (48kHz) in bits [8] >> 2 & 0xF
        bytes[8] = 12 << 2;
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.sample_rate, 48_000);
    }
}
