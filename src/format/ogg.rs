//! Ogg demultiplexer (§1, §4.2), scoped to a single Vorbis logical stream:
//! per-codec bitstream detail is out of scope, so only page headers are
//! parsed; Vorbis identification header fields (sample rate, channels) are
//! read straight out of the first packet rather than implementing a
//! general Vorbis codec parser.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

const OGG_SAMPLE_RATE_DEFAULT: u32 = 44_100;

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let bytes = peek(reader, 4)?;
    Ok(bytes == *b"OggS")
}

struct PageHeader {
    granule_position: i64,
    segment_table: Vec<u8>,
}

fn read_page_header(reader: &mut Reader) -> Result<Option<PageHeader>, IoError> {
    let mut capture = [0u8; 4];
    match reader.read_exact(&mut capture) {
        Ok(()) => {}
        Err(IoError::Eof) => return Ok(None),
        Err(e) => return Err(e),
    }
    if capture != *b"OggS" {
        return Ok(None);
    }

    let _version = reader.read_u8()?;
    let _header_type = reader.read_u8()?;
    let granule_bytes = reader.read_to_vec(8)?;
    let granule_position = i64::from_le_bytes(granule_bytes.try_into().unwrap());
    let _serial = reader.read_to_vec(4)?;
    let _seq = reader.read_to_vec(4)?;
    let _crc = reader.read_to_vec(4)?;
    let page_segments = reader.read_u8()?;
    let segment_table = reader.read_to_vec(page_segments as usize)?;

    Ok(Some(PageHeader {
        granule_position,
        segment_table,
    }))
}

fn parse_vorbis_ident(packet: &[u8]) -> Option<(u32, u32)> {
    if packet.len() < 16 || &packet[0..7] != b"\x01vorbis" {
        return None;
    }
    let channels = packet[11] as u32;
    let sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
    Some((sample_rate, channels))
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(0))?;
    let start = reader.tell()?;

    let Some(header) = read_page_header(reader)? else {
        return Err(DemuxError::Init {
            format: "ogg",
            detail: "missing OggS capture pattern".into(),
        });
    };
    let packet_len: usize = header.segment_table.iter().map(|&b| b as usize).sum();
    let first_packet = reader.read_to_vec(packet_len)?;
    let (sample_rate, channels) =
        parse_vorbis_ident(&first_packet).unwrap_or((OGG_SAMPLE_RATE_DEFAULT, 2));

    reader.seek(SeekFrom::Start(start))?;

    validate_selection(&cfg.atracks, &[1])?;

    if !cfg.atracks.wants(1) {
        return Ok((Box::new(OggDemuxer { packetizer_index: None, sample_rate }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Audio,
        codec_id: CodecId::Vorbis,
        codec_private: Vec::new(),
        default_track: cfg.default_track,
        language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
        name: cfg.track_name.clone(),
        video: None,
        audio: Some(AudioParams {
            sample_rate: sample_rate as f64,
            channels: channels as u64,
            bit_depth: None,
        }),
        cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
    };
    let packetizer = Packetizer::new(entry, cfg.sync);

    Ok((
        Box::new(OggDemuxer {
            packetizer_index: Some(0),
            sample_rate,
        }),
        vec![packetizer],
        None,
    ))
}

struct OggDemuxer {
    packetizer_index: Option<usize>,
    sample_rate: u32,
}

impl DemuxerImpl for OggDemuxer {
    fn format_name(&self) -> &'static str {
        "ogg"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };

        let Some(header) = read_page_header(reader)? else {
            return Ok(Status::EndOfStream);
        };

        let packet_len: usize = header.segment_table.iter().map(|&b| b as usize).sum();
        let payload = reader.read_to_vec(packet_len)?;
        if payload.len() < packet_len {
            return Ok(Status::EndOfStream);
        }

        let timecode_ms = if header.granule_position >= 0 {
            (header.granule_position as i128 * 1000 / self.sample_rate.max(1) as i128) as i64
        } else {
            0
        };

        packetizers[idx].push_raw(Span::from(payload), timecode_ms, None, true);

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
    fn recognizes_oggs_capture_pattern() {
        let bytes = b"OggS".to_vec();
        let mut r = Reader::from_source(Box::new(std::io::Cursor::new(bytes.clone())), bytes.len() as u64);
        assert!(probe(&mut r).unwrap());
    }

    #[test]
    fn parses_vorbis_identification_header() {
        let mut packet = vec![0x01];
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(&[0u8; 4]); // vorbis_version
        packet.push(2); // channels
        packet.extend_from_slice(&44_100u32.to_le_bytes());
        let (rate, channels) = parse_vorbis_ident(&packet).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(channels, 2);
    }
}
