//! WAV demultiplexer (§1, §4.2): RIFF/WAVE container holding one PCM audio
//! stream. Full byte-level chunk walking is out of scope; what's
//! implemented here is just enough of RIFF to find `fmt ` and `data` and
//! hand off fixed-size read windows to the packetizer.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const READ_CHUNK_BYTES: usize = 4096;

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let header = peek(reader, 12)?;
    Ok(header.len() == 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE")
}

struct WavFormat {
    channels: u16,
    sample_rate: u32,
    avg_bytes_per_sec: u32,
    bits_per_sample: u16,
}

fn read_chunk_header(reader: &mut Reader) -> Result<([u8; 4], u32), IoError> {
    let mut id = [0u8; 4];
    reader.read_exact(&mut id)?;
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    Ok((id, u32::from_le_bytes(len_bytes)))
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(12))?;

    let mut fmt: Option<WavFormat> = None;
    let mut data_start = None;
    let mut data_len = 0u64;

    loop {
        let (id, len) = match read_chunk_header(reader) {
            Ok(v) => v,
            Err(IoError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match &id {
            b"fmt " => {
                let body = reader.read_to_vec(len as usize)?;
                if body.len() < 16 {
                    return Err(DemuxError::Init {
                        format: "wav",
                        detail: "fmt chunk too short".into(),
                    });
                }
                fmt = Some(WavFormat {
                    channels: u16::from_le_bytes([body[2], body[3]]),
                    sample_rate: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                    avg_bytes_per_sec: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
                    bits_per_sample: u16::from_le_bytes([body[14], body[15]]),
                });
            }
            b"data" => {
                data_start = Some(reader.tell()?);
                data_len = len as u64;
                break;
            }
            _ => {
                reader.seek(SeekFrom::Current(len as i64 + (len as i64 & 1)))?;
            }
        }
    }

    let fmt = fmt.ok_or_else(|| DemuxError::Init {
        format: "wav",
        detail: "missing fmt chunk".into(),
    })?;
    let data_start = data_start.ok_or_else(|| DemuxError::Init {
        format: "wav",
        detail: "missing data chunk".into(),
    })?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        reader.seek(SeekFrom::Start(data_start + data_len))?;
        return Ok((
            Box::new(WavDemuxer {
                packetizer_index: None,
                start: data_start,
                cursor: data_start + data_len,
                end: data_start + data_len,
                avg_bytes_per_sec: fmt.avg_bytes_per_sec.max(1),
            }),
            Vec::new(),
            None,
        ));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::PcmInt,
        codec_private: Vec::new(),
        default_track: cfg.default_track,
        language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
        name: cfg.track_name.clone(),
        video: None,
        audio: Some(AudioParams {
            sample_rate: fmt.sample_rate as f64,
            channels: fmt.channels as u64,
            bit_depth: Some(fmt.bits_per_sample as u64),
        }),
        cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
    };

    let packetizer = Packetizer::new(entry, cfg.sync);
    let duration_ms = (data_len as f64 * 1000.0 / fmt.avg_bytes_per_sec.max(1) as f64) as u64;

    reader.seek(SeekFrom::Start(data_start))?;

    Ok((
        Box::new(WavDemuxer {
            packetizer_index: Some(0),
            start: data_start,
            cursor: data_start,
            end: data_start + data_len,
            avg_bytes_per_sec: fmt.avg_bytes_per_sec.max(1),
        }),
        vec![packetizer],
        Some(duration_ms),
    ))
}

struct WavDemuxer {
    packetizer_index: Option<usize>,
    start: u64,
    cursor: u64,
    end: u64,
    avg_bytes_per_sec: u32,
}

impl DemuxerImpl for WavDemuxer {
    fn format_name(&self) -> &'static str {
        "wav"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        if self.cursor >= self.end {
            return Ok(Status::EndOfStream);
        }

        let want = READ_CHUNK_BYTES.min((self.end - self.cursor) as usize);
        reader.seek(SeekFrom::Start(self.cursor))?;
        let bytes = reader.read_to_vec(want)?;
        if bytes.is_empty() {
            return Ok(Status::EndOfStream);
        }

        let offset_bytes = self.cursor - self.start;
        let timecode_ms = (offset_bytes as f64 * 1000.0 / self.avg_bytes_per_sec as f64) as i64;

        self.cursor += bytes.len() as u64;

        packetizers[idx].push_raw(Span::from(bytes), timecode_ms, None, true);

        Ok(Status::MoreData)
    }

    fn display_priority(&self) -> u8 {
        40
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{FileConfig, TrackSelection};
    use std::collections::HashSet;
    use std::io::Cursor;

    fn minimal_wav() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&2u16.to_le_bytes()); // channels
        bytes.extend_from_slice(&44_100u32.to_le_bytes()); // sample rate
        bytes.extend_from_slice(&176_400u32.to_le_bytes()); // avg bytes/sec
        bytes.extend_from_slice(&4u16.to_le_bytes()); // block align
        bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes
    }

    #[test]
    fn rejects_explicit_audio_selection_past_the_single_track() {
        let bytes = minimal_wav();
        let len = bytes.len() as u64;
        let mut reader = Reader::from_source(Box::new(Cursor::new(bytes)), len);
        let cfg = FileConfig {
            atracks: TrackSelection::Explicit(HashSet::from([2])),
            ..FileConfig::default()
        };
        let mut next = 1u32;
        let err = open(&mut reader, &cfg, &mut next).unwrap_err();
        assert!(matches!(
            err,
            DemuxError::TrackSelection(crate::error::TrackSelectionError::NotFound(2))
        ));
    }
}
