//! ADTS AAC elementary-stream demultiplexer (§1, §4.2). Only the ADTS
//! header fields needed to find frame boundaries and establish timing are
//! decoded (sync, sampling frequency index, channel configuration, frame
//! length); raw AAC without an ADTS wrapper is out of scope, same as the
//! original program's `r_aac.cpp`.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

struct FrameHeader {
    sample_rate: u32,
    channels: u32,
    frame_length: u32,
    header_len: u32,
}

fn parse_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 7 {
        return None;
    }
    if bytes[0] != 0xFF || (bytes[1] & 0xF0) != 0xF0 {
        return None;
    }
    let protection_absent = bytes[1] & 0x01;
    let sampling_freq_index = (bytes[2] >> 2) & 0x0F;
    if sampling_freq_index as usize >= SAMPLE_RATES.len() {
        return None;
    }
    let channel_config = ((bytes[2] & 0x01) << 2) | ((bytes[3] >> 6) & 0x03);
    let frame_length = ((bytes[3] as u32 & 0x03) << 11)
        | ((bytes[4] as u32) << 3)
        | ((bytes[5] as u32 >> 5) & 0x07);
    if frame_length < 7 {
        return None;
    }
    let header_len = if protection_absent == 1 { 7 } else { 9 };

    Some(FrameHeader {
        sample_rate: SAMPLE_RATES[sampling_freq_index as usize],
        channels: channel_config.max(1) as u32,
        frame_length,
        header_len,
    })
}

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let bytes = peek(reader, 7)?;
    Ok(parse_header(&bytes).is_some())
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(0))?;
    let first = reader.read_to_vec(7)?;
    let header = parse_header(&first).ok_or_else(|| DemuxError::Init {
        format: "aac",
        detail: "unrecognized ADTS header".into(),
    })?;
    reader.seek(SeekFrom::Start(0))?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        return Ok((Box::new(AacDemuxer { packetizer_index: None, offset_ms: 0 }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::Aac,
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
        Box::new(AacDemuxer {
            packetizer_index: Some(0),
            offset_ms: 0,
        }),
        vec![packetizer],
        None,
    ))
}

struct AacDemuxer {
    packetizer_index: Option<usize>,
    offset_ms: i64,
}

impl DemuxerImpl for AacDemuxer {
    fn format_name(&self) -> &'static str {
        "aac"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        let header_bytes = reader.read_to_vec(7)?;
        if header_bytes.len() < 7 {
            return Ok(Status::EndOfStream);
        }
        let Some(header) = parse_header(&header_bytes) else {
            return Ok(Status::EndOfStream);
        };

        let already_read = 7u32;
        let skip_extra = header.header_len.saturating_sub(already_read);
        if skip_extra > 0 {
            // CRC bytes present but not retained; frame_length already accounts for them.
            reader.read_to_vec(skip_extra as usize)?;
        }
        let payload_len = header.frame_length.saturating_sub(header.header_len);
        let payload = reader.read_to_vec(payload_len as usize)?;

        let mut frame = header_bytes;
        frame.extend_from_slice(&payload);

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
    fn parses_44khz_stereo_header() {
        // sampling_freq_index=4 (44100), channel_config=2, frame_length=200
        let mut bytes = [0xFFu8, 0xF1, 0x00, 0x00, 0x00, 0x00, 0x00];
        bytes[2] = 4 << 2;
        bytes[3] = (2 << 6) | ((200u32 >> 11) & 0x03) as u8;
        bytes[4] = ((200u32 >> 3) & 0xFF) as u8;
        bytes[5] = (((200u32 & 0x07) << 5) as u8) | 0x1F;
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_length, 200);
    }

    #[test]
    fn rejects_bad_sync() {
        assert!(parse_header(&[0, 0, 0, 0, 0, 0, 0]).is_none());
    }
}
