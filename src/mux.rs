//! The container writer (§4.6): renders the EBML head, a reserved
//! meta-seek void, `Info`/`Tracks`, drives the scheduler and cluster
//! builder through the clusters, then back-patches the seek head, duration,
//! and segment size. Grounded in the base crate's `format/mkv/mux.rs`
//! (`MatroskaMuxer`, left as an empty `start`/`write`/`stop` stub there) and
//! the element id table in `format/mkv.rs`; the meta-seek reservation
//! heuristic and overflow/retry behavior are grounded in
//! `mkvtoolnix/mkvmerge.cpp` (`write_cues`/`meta_seek_size` handling).

use std::io::SeekFrom;

use tracing::{debug, warn};

use crate::cluster::{ClusterBuilder, CuePoint, MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_BYTES};
use crate::ebml::{self, Builder};
use crate::error::{Diagnostic, WriterError};
use crate::io::Writer;
use crate::media::{CuePolicy, TrackEntry, TIMECODE_SCALE};
use crate::scheduler::{self, Input};

pub const MUXING_APP: &str = "mkvknit";
pub const WRITING_APP: &str = "mkvknit";

/// §4.6 tuning knobs surfaced from `--cluster-length`/`--no-cues`/
/// `--no-meta-seek`/`--meta-seek-size`.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_cluster_ms: i64,
    pub max_blocks_per_cluster: u32,
    pub max_cluster_bytes: u64,
    pub write_cues: bool,
    pub write_meta_seek: bool,
    pub meta_seek_size: Option<u64>,
    pub title: Option<String>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            max_cluster_ms: crate::cluster::MAX_CLUSTER_MS,
            max_blocks_per_cluster: MAX_BLOCKS_PER_CLUSTER,
            max_cluster_bytes: MAX_CLUSTER_BYTES,
            write_cues: true,
            write_meta_seek: true,
            meta_seek_size: None,
            title: None,
        }
    }
}

/// Writes one `TrackEntry` master (§4.6 phase 5, §6).
pub fn write_track_entry(tracks: &mut Builder, entry: &TrackEntry) {
    let mut b = Builder::new();
    b.uint(ebml::TRACK_NUMBER, entry.number as u64);
    b.uint(ebml::TRACK_UID, entry.uid);
    b.uint(ebml::TRACK_TYPE, entry.kind.track_type());
    b.string(ebml::CODEC_ID, entry.codec_id.matroska_id());
    if !entry.codec_private.is_empty() {
        b.binary(ebml::CODEC_PRIVATE, &entry.codec_private);
    }
    b.uint(ebml::FLAG_DEFAULT, entry.default_track as u64);
    b.string(ebml::TRACK_LANGUAGE, &entry.language);
    if let Some(name) = &entry.name {
        b.string(ebml::TRACK_NAME, name);
    }

    if let Some(video) = &entry.video {
        let mut v = Builder::new();
        v.uint(ebml::PIXEL_WIDTH, video.pixel_width as u64);
        v.uint(ebml::PIXEL_HEIGHT, video.pixel_height as u64);
        v.uint(ebml::DISPLAY_WIDTH, video.display_width as u64);
        v.uint(ebml::DISPLAY_HEIGHT, video.display_height as u64);
        b.master(ebml::VIDEO, &v.into_bytes());
    }

    if let Some(audio) = &entry.audio {
        let mut a = Builder::new();
        a.float(ebml::SAMPLING_FREQUENCY, audio.sample_rate);
        a.uint(ebml::CHANNELS, audio.channels);
        if let Some(bit_depth) = audio.bit_depth {
            a.uint(ebml::BIT_DEPTH, bit_depth);
        }
        b.master(ebml::AUDIO, &a.into_bytes());
    }

    tracks.master(ebml::TRACK_ENTRY, &b.into_bytes());
}

/// Builds a fully-formed `Void` element of exactly `size` bytes on the wire,
/// used to reserve the meta-seek region before the seek head's real contents
/// are known (§4.6 phase 3).
fn build_void(size: u64) -> Vec<u8> {
    let mut id = Vec::new();
    ebml::write_id(&mut id, ebml::VOID);
    // Grow the size vint's length until id + size-vint + payload hits `size`
    // exactly; an 8-byte vint always has room, so this always terminates.
    for len in 1..=8u8 {
        let header_len = id.len() as u64 + len as u64;
        if size >= header_len {
            let payload_len = size - header_len;
            let mut buf = id.clone();
            ebml::write_vint_len(&mut buf, payload_len, len);
            buf.extend(std::iter::repeat(0u8).take(payload_len as usize));
            if buf.len() as u64 == size {
                return buf;
            }
        }
    }
    vec![0u8; size as usize]
}

fn encode_seek_head(entries: &[(u32, u64)]) -> Vec<u8> {
    let mut seek_head = Builder::new();
    for (id, position) in entries {
        let mut seek = Builder::new();
        // SeekID's payload is the raw encoded element id bytes, not a vint.
        let mut id_bytes = Vec::new();
        ebml::write_id(&mut id_bytes, *id);
        seek.binary(ebml::SEEK_ID, &id_bytes);
        seek.uint(ebml::SEEK_POSITION, *position);
        seek_head.master(ebml::SEEK, &seek.into_bytes());
    }
    let mut out = Vec::new();
    ebml::write_id(&mut out, ebml::SEEK_HEAD);
    ebml::write_vint(&mut out, seek_head.len() as u64);
    out.extend_from_slice(&seek_head.into_bytes());
    out
}

fn write_cues(writer: &mut Writer, cues: &[CuePoint]) -> Result<(), WriterError> {
    let mut body = Builder::new();
    for cue in cues {
        let mut point = Builder::new();
        point.uint(ebml::CUE_TIME, cue.timecode_ms as u64);

        let mut track_pos = Builder::new();
        track_pos.uint(ebml::CUE_TRACK, cue.track_number as u64);
        track_pos.uint(ebml::CUE_CLUSTER_POSITION, cue.cluster_offset);
        track_pos.uint(ebml::CUE_RELATIVE_POSITION, cue.relative_block_position as u64);
        point.master(ebml::CUE_TRACK_POSITIONS, &track_pos.into_bytes());

        body.master(ebml::CUE_POINT, &point.into_bytes());
    }

    let bytes = body.into_bytes();
    let mut elem = Vec::new();
    ebml::write_id(&mut elem, ebml::CUES);
    ebml::write_vint(&mut elem, bytes.len() as u64);
    elem.extend_from_slice(&bytes);
    writer.write_all(&elem)
}

/// Renders the full document: EBML head, segment, reserved seek-head void,
/// info, tracks, clusters (driving `inputs` to exhaustion), cues, then the
/// three back-patches (§4.6 phases 1-11).
pub fn run(
    writer: &mut Writer,
    cfg: &WriterConfig,
    total_input_bytes: u64,
    video_track_present: bool,
    mut inputs: Vec<Input>,
) -> Result<Vec<Diagnostic>, WriterError> {
    let mut diagnostics = Vec::new();

    // Phase 1: EBML head.
    {
        let mut head = Builder::new();
        head.uint(ebml::EBML_VERSION, 1);
        head.uint(ebml::EBML_READ_VERSION, 1);
        head.uint(ebml::EBML_DOC_MAX_ID_LENGTH, 4);
        head.uint(ebml::EBML_DOC_MAX_SIZE_LENGTH, 8);
        head.string(ebml::EBML_DOC_TYPE, "matroska");
        head.uint(ebml::EBML_DOC_TYPE_VERSION, 1);
        head.uint(ebml::EBML_DOC_TYPE_READ_VERSION, 1);
        let bytes = head.into_bytes();

        let mut elem = Vec::new();
        ebml::write_id(&mut elem, ebml::EBML_HEADER);
        ebml::write_vint(&mut elem, bytes.len() as u64);
        elem.extend_from_slice(&bytes);
        writer.write_all(&elem)?;
    }

    // Phase 2: Segment, unknown size.
    let mut segment_header = Vec::new();
    ebml::write_id(&mut segment_header, ebml::SEGMENT);
    ebml::write_unknown_size(&mut segment_header);
    writer.write_all(&segment_header)?;
    let segment_payload_start = writer.tell()?;

    // Phase 3: reserved seek-head void.
    let meta_seek_enabled = cfg.write_meta_seek;
    let mut void_offset = 0u64;
    let mut void_size = 0u64;
    if meta_seek_enabled {
        void_size = cfg.meta_seek_size.unwrap_or_else(|| {
            if video_track_present {
                ((total_input_bytes as f64) * 1.5 / 10_240.0).round() as u64
            } else {
                ((total_input_bytes as f64) * 3.0 / 4_096.0).round() as u64
            }
        });

        void_offset = writer.tell()?;
        writer.write_all(&build_void(void_size))?;
    }

    // Phase 4: Info, with a Duration placeholder to patch later.
    let date_utc = crate::config::unix_epoch_seconds_since_2001();
    let mut info = Builder::new();
    info.uint(ebml::TIMECODE_SCALE_ID, TIMECODE_SCALE);
    // Placeholder; its absolute offset is recomputed below from the bytes
    // already emitted for TimecodeScale, so the value here must be exactly
    // 8 bytes wide (`Builder::float` always writes f64).
    let duration_marker_index = info.len();
    info.float(ebml::DURATION, 0.0);
    info.string(ebml::MUXING_APP, MUXING_APP);
    info.string(ebml::WRITING_APP, WRITING_APP);
    info.uint(ebml::DATE_UTC, date_utc);
    if let Some(title) = &cfg.title {
        info.string(ebml::TITLE, title);
    }
    let info_bytes = info.into_bytes();

    let info_offset = writer.tell()?;
    let mut elem = Vec::new();
    ebml::write_id(&mut elem, ebml::INFO);
    ebml::write_vint(&mut elem, info_bytes.len() as u64);
    let info_header_len = elem.len() as u64;
    elem.extend_from_slice(&info_bytes);
    writer.write_all(&elem)?;

    // Duration's id+size header is 3 bytes (2-byte id 0x4489, 1-byte size
    // vint for payload length 8), so its payload starts 3 bytes after
    // `duration_marker_index` within `info`.
    let duration_value_offset = info_offset + info_header_len + duration_marker_index as u64 + 3;

    // Phase 5: Tracks.
    let mut tracks = Builder::new();
    for input in &inputs {
        for p in &input.packetizers {
            p.fill_headers(&mut tracks);
        }
    }
    let tracks_bytes = tracks.into_bytes();
    let tracks_offset = writer.tell()?;
    let mut elem = Vec::new();
    ebml::write_id(&mut elem, ebml::TRACKS);
    ebml::write_vint(&mut elem, tracks_bytes.len() as u64);
    elem.extend_from_slice(&tracks_bytes);
    writer.write_all(&elem)?;

    // Phase 6: clusters, driven by the scheduler.
    let mut cluster_builder = ClusterBuilder::new(
        cfg.max_cluster_ms,
        cfg.max_blocks_per_cluster,
        cfg.max_cluster_bytes,
    );

    loop {
        let selected = scheduler::step(&mut inputs).map_err(|e| {
            WriterError::InternalInvariant(format!("demultiplexer failed mid-mux: {e}"))
        })?;
        let Some(selected) = selected else { break };
        let cue_policy = if cfg.write_cues {
            selected.cue_policy
        } else {
            CuePolicy::None
        };
        cluster_builder.accept(writer, segment_payload_start, &selected.packet, cue_policy)?;
    }

    let max_timecode_ms = cluster_builder.max_timecode_ms();
    let cues = cluster_builder.finish(writer, segment_payload_start)?;

    // Phase 7: cues.
    let cue_writing_requested = cfg.write_cues && !cues.is_empty();
    let cues_offset = if cue_writing_requested {
        let offset = writer.tell()?;
        write_cues(writer, &cues)?;
        Some(offset)
    } else {
        None
    };

    // Phase 8: seek-head patch.
    if meta_seek_enabled {
        let mut entries = vec![(ebml::INFO, info_offset - segment_payload_start)];
        entries.push((ebml::TRACKS, tracks_offset - segment_payload_start));
        if let Some(offset) = cues_offset {
            entries.push((ebml::CUES, offset - segment_payload_start));
        }

        let full = encode_seek_head(&entries);
        if (full.len() as u64) <= void_size {
            pad_and_write(writer, void_offset, void_size, &full)?;
        } else {
            diagnostics.push(Diagnostic::meta_seek_overflow(void_size, full.len() as u64));
            warn!(
                reserved = void_size,
                needed = full.len(),
                "reserved seek-head void too small, retrying with cues-only entry"
            );

            let cues_only = cues_offset
                .map(|offset| vec![(ebml::CUES, offset - segment_payload_start)])
                .unwrap_or_default();
            let reduced = encode_seek_head(&cues_only);
            if !cues_only.is_empty() && (reduced.len() as u64) <= void_size {
                pad_and_write(writer, void_offset, void_size, &reduced)?;
            } else {
                debug!("seek head omitted entirely, even the cues-only form didn't fit");
                pad_and_write(writer, void_offset, void_size, &[])?;
            }
        }
    }

    // Phase 9: duration patch.
    let duration_value = (max_timecode_ms as f64) * 1_000_000.0 / (TIMECODE_SCALE as f64);
    writer.write_at(duration_value_offset, &duration_value.to_be_bytes())?;

    // Phase 10: segment size patch.
    let final_position = writer.tell()?;
    let payload_bytes = final_position - segment_payload_start;
    let mut size_bytes = Vec::new();
    ebml::write_vint_len(&mut size_bytes, payload_bytes, 8);
    let size_field_offset = segment_payload_start - 8;
    writer.write_at(size_field_offset, &size_bytes)?;

    // Phase 11: close.
    writer.flush().map_err(WriterError::from)?;

    Ok(diagnostics)
}

/// Overwrites the reserved void with `content` followed by a (possibly
/// empty) `Void` element padding out the remainder, preserving the void's
/// total reserved size exactly.
fn pad_and_write(
    writer: &mut Writer,
    void_offset: u64,
    void_size: u64,
    content: &[u8],
) -> Result<(), WriterError> {
    let mut region = content.to_vec();
    let consumed = region.len() as u64;
    let remaining = void_size.saturating_sub(consumed);

    if remaining > 0 {
        region.extend_from_slice(&build_void(remaining));
    }

    // The fixed-size `Void` placeholder was reserved as a fully-formed
    // element (id + size vint), so `region` must land on exactly that many
    // bytes as seen by a reader walking from `void_offset`.
    writer.write_at(void_offset, &region)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seek_head_entries_encode_without_panicking() {
        let entries = vec![(ebml::INFO, 10u64), (ebml::TRACKS, 200u64), (ebml::CUES, 5000u64)];
        let bytes = encode_seek_head(&entries);
        assert!(!bytes.is_empty());
        assert_eq!(bytes[0], 0x11); // first byte of the 4-byte SEEK_HEAD id
    }
}
