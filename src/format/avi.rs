//! AVI demultiplexer (§1, §4.2): a RIFF container that can hold one video
//! stream and any number of audio streams, indexed by two-character stream
//! number in each `movi` chunk's four-character tag (`00dc`, `01wb`, ...).
//! Per §1, index-walking and full `strf` codec-specific parsing are out of
//! scope; only `strh`/`strf` fields needed for track setup and timing are
//! read, and `movi` is scanned linearly rather than via the `idx1` index.

use std::io::SeekFrom;

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{peek, track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{AudioParams, CodecId, CuePolicy, TrackEntry, TrackKind, VideoParams};
use crate::packetizer::Packetizer;
use crate::span::Span;

pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let header = peek(reader, 12)?;
    Ok(header.len() == 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"AVI ")
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

struct StreamHeader {
    kind: [u8; 4],
    scale: u32,
    rate: u32,
    sample_size: u32,
}

struct VideoStrf {
    width: u32,
    height: u32,
    fourcc: [u8; 4],
}

struct AudioStrf {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    format_tag: u16,
}

enum Stream {
    Video { strh: StreamHeader, strf: VideoStrf },
    Audio { strh: StreamHeader, strf: AudioStrf },
    Unknown,
}

fn read_chunk_header(reader: &mut Reader) -> Result<([u8; 4], u32), IoError> {
    let mut id = [0u8; 4];
    reader.read_exact(&mut id)?;
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    Ok((id, u32::from_le_bytes(len_bytes)))
}

/// Walks `hdrl`'s `strl` sub-lists, collecting one [`Stream`] per list in
/// the order they appear, matching stream-number assignment in the
/// `NNxx`-tagged `movi` chunks.
fn parse_hdrl(body: &[u8]) -> Vec<Stream> {
    let mut streams = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= body.len() {
        let tag = &body[pos..pos + 4];
        if tag == b"LIST" {
            let len = read_u32(body, pos + 4) as usize;
            let list_type = &body[pos + 8..pos + 12];
            if list_type == b"strl" {
                streams.push(parse_strl(&body[pos + 12..(pos + 8 + len).min(body.len())]));
            }
            pos += 8 + len + (len & 1);
        } else {
            pos += 4;
        }
    }
    streams
}

fn parse_strl(body: &[u8]) -> Stream {
    let mut pos = 0usize;
    let mut strh: Option<StreamHeader> = None;
    let mut strf_bytes: Option<&[u8]> = None;

    while pos + 8 <= body.len() {
        let id = &body[pos..pos + 4];
        let len = read_u32(body, pos + 4) as usize;
        let data_start = pos + 8;
        let data_end = (data_start + len).min(body.len());

        match id {
            b"strh" if len >= 36 => {
                let data = &body[data_start..data_end];
                strh = Some(StreamHeader {
                    kind: [data[0], data[1], data[2], data[3]],
                    scale: read_u32(data, 20),
                    rate: read_u32(data, 24),
                    sample_size: read_u32(data, 32),
                });
            }
            b"strf" => {
                strf_bytes = Some(&body[data_start..data_end]);
            }
            _ => {}
        }
        pos = data_end + (len & 1);
    }

    match (strh, strf_bytes) {
        (Some(strh), Some(data)) if &strh.kind == b"vids" && data.len() >= 24 => Stream::Video {
            strf: VideoStrf {
                width: read_u32(data, 4),
                height: read_u32(data, 8),
                fourcc: [data[16], data[17], data[18], data[19]],
            },
            strh,
        },
        (Some(strh), Some(data)) if &strh.kind == b"auds" && data.len() >= 16 => Stream::Audio {
            strf: AudioStrf {
                format_tag: read_u16(data, 0),
                channels: read_u16(data, 2),
                sample_rate: read_u32(data, 4),
                bits_per_sample: read_u16(data, 14),
            },
            strh,
        },
        _ => Stream::Unknown,
    }
}

struct TrackBinding {
    stream_index: u8,
    packetizer_index: usize,
    is_video: bool,
    rate_num: u64,
    rate_den: u64,
    frame_count: u64,
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(SeekFrom::Start(12))?;

    let mut hdrl_body = None;
    let mut movi_start = None;

    loop {
        let (id, len) = match read_chunk_header(reader) {
            Ok(v) => v,
            Err(IoError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if &id == b"LIST" {
            let mut list_type = [0u8; 4];
            reader.read_exact(&mut list_type)?;
            if &list_type == b"hdrl" {
                hdrl_body = Some(reader.read_to_vec(len as usize - 4)?);
            } else if &list_type == b"movi" {
                movi_start = Some(reader.tell()?);
                reader.seek(SeekFrom::Current(len as i64 - 4 + ((len as i64 - 4) & 1)))?;
            } else {
                reader.seek(SeekFrom::Current(len as i64 - 4 + ((len as i64 - 4) & 1)))?;
            }
        } else {
            reader.seek(SeekFrom::Current(len as i64 + (len as i64 & 1)))?;
        }
    }

    let hdrl_body = hdrl_body.ok_or_else(|| DemuxError::Init {
        format: "avi",
        detail: "missing hdrl list".into(),
    })?;
    let movi_start = movi_start.ok_or_else(|| DemuxError::Init {
        format: "avi",
        detail: "missing movi list".into(),
    })?;

    let streams = parse_hdrl(&hdrl_body);

    let video_ids: Vec<u32> = if streams.iter().any(|s| matches!(s, Stream::Video { .. })) {
        vec![1]
    } else {
        Vec::new()
    };
    let audio_count = streams.iter().filter(|s| matches!(s, Stream::Audio { .. })).count() as u32;
    let audio_ids: Vec<u32> = (1..=audio_count).collect();
    validate_selection(&cfg.vtracks, &video_ids)?;
    validate_selection(&cfg.atracks, &audio_ids)?;

    let mut packetizers = Vec::new();
    let mut bindings = Vec::new();
    let mut audio_index = 0u32;

    for (stream_index, stream) in streams.iter().enumerate() {
        match stream {
            Stream::Video { strh, strf } => {
                if !cfg.vtracks.wants(1) {
                    continue;
                }
                let number = crate::format::next_number(next_track_number);
                let fourcc = cfg.fourcc.unwrap_or(strf.fourcc);
                let codec_id = match &fourcc {
                    b"H264" | b"h264" | b"X264" | b"x264" | b"avc1" => CodecId::H264,
                    _ => CodecId::Mpeg4Asp,
                };
                let (disp_w, disp_h) = match cfg.aspect {
                    Some(crate::config::AspectSpec::Factor(f)) => {
                        (((strf.height as f64) * f) as u32, strf.height)
                    }
                    Some(crate::config::AspectSpec::Ratio(a, b)) => {
                        ((strf.width * a / b.max(1)), strf.height)
                    }
                    None => (strf.width, strf.height),
                };
                let entry = TrackEntry {
                    number,
                    uid: track_uid(number),
                    kind: TrackKind::Video,
                    codec_id,
                    codec_private: Vec::new(),
                    default_track: cfg.default_track,
                    language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
                    name: cfg.track_name.clone(),
                    video: Some(VideoParams {
                        pixel_width: strf.width,
                        pixel_height: strf.height,
                        display_width: disp_w,
                        display_height: disp_h,
                    }),
                    audio: None,
                    cue_policy: cfg.cues.unwrap_or(CuePolicy::IFramesOnly),
                };
                let idx = packetizers.len();
                packetizers.push(Packetizer::new(entry, cfg.sync));
                bindings.push(TrackBinding {
                    stream_index: stream_index as u8,
                    packetizer_index: idx,
                    is_video: true,
                    rate_num: strh.rate.max(1) as u64,
                    rate_den: strh.scale.max(1) as u64,
                    frame_count: 0,
                });
            }
            Stream::Audio { strh: _, strf } => {
                audio_index += 1;
                if !cfg.atracks.wants(audio_index) {
                    continue;
                }
                let number = crate::format::next_number(next_track_number);
                let codec_id = match strf.format_tag {
                    0x0001 => CodecId::PcmInt,
                    0x0055 => CodecId::Mp3,
                    0x2000 => CodecId::Ac3,
                    _ => CodecId::PcmInt,
                };
                let entry = TrackEntry {
                    number,
                    uid: track_uid(number),
                    kind: TrackKind::Audio,
                    codec_id,
                    codec_private: Vec::new(),
                    default_track: cfg.default_track,
                    language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
                    name: cfg.track_name.clone(),
                    video: None,
                    audio: Some(AudioParams {
                        sample_rate: strf.sample_rate as f64,
                        channels: strf.channels as u64,
                        bit_depth: Some(strf.bits_per_sample.max(16) as u64),
                    }),
                    cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
                };
                let idx = packetizers.len();
                packetizers.push(Packetizer::new(entry, cfg.sync));
                bindings.push(TrackBinding {
                    stream_index: stream_index as u8,
                    packetizer_index: idx,
                    is_video: false,
                    rate_num: 0,
                    rate_den: 1,
                    frame_count: 0,
                });
            }
            Stream::Unknown => {}
        }
    }

    reader.seek(SeekFrom::Start(movi_start))?;

    Ok((
        Box::new(AviDemuxer { bindings }),
        packetizers,
        None,
    ))
}

struct AviDemuxer {
    bindings: Vec<TrackBinding>,
}

impl AviDemuxer {
    fn binding_mut(&mut self, stream_index: u8) -> Option<&mut TrackBinding> {
        self.bindings.iter_mut().find(|b| b.stream_index == stream_index)
    }
}

impl DemuxerImpl for AviDemuxer {
    fn format_name(&self) -> &'static str {
        "avi"
    }

    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        loop {
            let (id, len) = match read_chunk_header(reader) {
                Ok(v) => v,
                Err(IoError::Eof) => return Ok(Status::EndOfStream),
                Err(e) => return Err(e.into()),
            };

            if &id == b"LIST" || &id == b"JUNK" || &id == b"idx1" {
                reader.seek(SeekFrom::Current(len as i64 + (len as i64 & 1)))?;
                continue;
            }

            let Ok(stream_index) = std::str::from_utf8(&id[0..2])
                .unwrap_or("")
                .parse::<u8>()
            else {
                reader.seek(SeekFrom::Current(len as i64 + (len as i64 & 1)))?;
                continue;
            };

            let payload = reader.read_to_vec(len as usize)?;
            if len & 1 == 1 {
                reader.seek(SeekFrom::Current(1))?;
            }

            let Some(binding) = self.binding_mut(stream_index) else {
                continue;
            };

            let timecode_ms = if binding.is_video {
                (binding.frame_count * binding.rate_den * 1000) / binding.rate_num
            } else {
                0
            };
            binding.frame_count += 1;
            let idx = binding.packetizer_index;
            // No `idx1` keyframe flags are consulted (§1 scope); every frame
            // is treated as a keyframe candidate, matching the "contract,
            // not full parser" scope the other container formats share.
            let keyframe = true;

            packetizers[idx].push_raw(Span::from(payload), timecode_ms as i64, None, keyframe);

            return Ok(Status::MoreData);
        }
    }

    fn display_priority(&self) -> u8 {
        50
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn recognizes_riff_avi_header() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"AVI ");
        let mut r = Reader::from_source(Box::new(Cursor::new(bytes.clone())), bytes.len() as u64);
        assert!(probe(&mut r).unwrap());
    }

    #[test]
    fn rejects_non_avi_riff() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"WAVE");
        let mut r = Reader::from_source(Box::new(Cursor::new(bytes.clone())), bytes.len() as u64);
        assert!(!probe(&mut r).unwrap());
    }
}
