//! The cluster builder (§4.4): groups globally-ordered packets into
//! bounded Matroska clusters and records cue candidates. Grounded in the
//! base crate's `format/mkv.rs` `CLUSTER`/`SIMPLE_BLOCK`/`TIMESTAMP` element
//! id table; the block-bounds algorithm itself has no base-crate
//! counterpart (its `mux.rs` was an empty stub) and is built directly from
//! the cluster-bounding design in §4.4.

use crate::ebml::{self, Builder};
use crate::error::WriterError;
use crate::io::Writer;
use crate::media::{CuePolicy, Packet};

pub const MAX_BLOCKS_PER_CLUSTER: u32 = 65_535;
pub const MAX_CLUSTER_MS: i64 = 1_000;
pub const MAX_CLUSTER_BYTES: u64 = 1_500_000;

#[derive(Debug, Clone, Copy)]
pub struct CuePoint {
    pub track_number: u32,
    pub timecode_ms: i64,
    /// Byte offset of the cluster, relative to the segment's payload start.
    pub cluster_offset: u64,
    /// Index of this block among all blocks written into that cluster.
    pub relative_block_position: u32,
}

struct OpenCluster {
    base_timecode_ms: i64,
    body: Vec<u8>,
    block_count: u32,
    byte_count: u64,
    pending_cues: Vec<(u32, u32, i64)>,
}

pub struct ClusterBuilder {
    max_ms: i64,
    max_blocks: u32,
    max_bytes: u64,
    open: Option<OpenCluster>,
    cues: Vec<CuePoint>,
    max_timecode_ms: i64,
    cue_writing_requested: bool,
}

impl ClusterBuilder {
    pub fn new(max_ms: i64, max_blocks: u32, max_bytes: u64) -> ClusterBuilder {
        ClusterBuilder {
            max_ms,
            max_blocks,
            max_bytes,
            open: None,
            cues: Vec::new(),
            max_timecode_ms: 0,
            cue_writing_requested: false,
        }
    }

    pub fn cue_writing_requested(&self) -> bool {
        self.cue_writing_requested
    }

    pub fn max_timecode_ms(&self) -> i64 {
        self.max_timecode_ms
    }

    fn open_new(&mut self, base_timecode_ms: i64) {
        self.open = Some(OpenCluster {
            base_timecode_ms,
            body: Vec::new(),
            block_count: 0,
            byte_count: 0,
            pending_cues: Vec::new(),
        });
    }

    /// Accepts one globally-ordered packet (§4.4 steps 1-4).
    pub fn accept(
        &mut self,
        writer: &mut Writer,
        segment_payload_start: u64,
        packet: &Packet,
        cue_policy: CuePolicy,
    ) -> Result<(), WriterError> {
        if packet.timecode_ms > self.max_timecode_ms {
            self.max_timecode_ms = packet.timecode_ms;
        }

        if self.open.is_none() {
            self.open_new(packet.timecode_ms);
        }

        let mut offset = packet.timecode_ms - self.open.as_ref().unwrap().base_timecode_ms;
        if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
            self.flush(writer, segment_payload_start)?;
            self.open_new(packet.timecode_ms);
            offset = 0;
        }

        let open = self.open.as_mut().expect("cluster opened above");
        let block_index = open.block_count;

        let mut block = Vec::new();
        ebml::write_vint(&mut block, packet.track_number as u64);
        block.extend_from_slice(&(offset as i16).to_be_bytes());
        block.push(if packet.is_keyframe { 0x80 } else { 0x00 });
        block.extend_from_slice(packet.payload.as_slice());

        // A mandatory duration (the packetizer's last packet, §4.5) forces
        // a `BlockGroup` carrying an explicit `BlockDuration`; every other
        // packet elides it as a bare `SimpleBlock` (§4.4, §6).
        let elem = match (packet.duration_mandatory, packet.duration_ms) {
            (true, Some(duration_ms)) => {
                let mut block_elem = Vec::new();
                ebml::write_id(&mut block_elem, ebml::BLOCK);
                ebml::write_vint(&mut block_elem, block.len() as u64);
                block_elem.extend_from_slice(&block);

                let mut group = Builder::new();
                group.raw(&block_elem);
                group.uint(ebml::BLOCK_DURATION, duration_ms);

                let mut elem = Vec::new();
                ebml::write_id(&mut elem, ebml::BLOCK_GROUP);
                let group_bytes = group.into_bytes();
                ebml::write_vint(&mut elem, group_bytes.len() as u64);
                elem.extend_from_slice(&group_bytes);
                elem
            }
            _ => {
                let mut elem = Vec::new();
                ebml::write_id(&mut elem, ebml::SIMPLE_BLOCK);
                ebml::write_vint(&mut elem, block.len() as u64);
                elem.extend_from_slice(&block);
                elem
            }
        };

        let wants_cue = cue_policy == CuePolicy::All
            || (packet.is_keyframe && cue_policy == CuePolicy::IFramesOnly);
        if wants_cue {
            open.pending_cues
                .push((block_index, packet.track_number, packet.timecode_ms));
            self.cue_writing_requested = true;
        }

        open.byte_count += elem.len() as u64;
        open.block_count += 1;
        open.body.extend_from_slice(&elem);

        let over_blocks = open.block_count >= self.max_blocks;
        let over_ms = (packet.timecode_ms - open.base_timecode_ms) >= self.max_ms;
        let over_bytes = open.byte_count >= self.max_bytes;
        if over_blocks || over_ms || over_bytes {
            self.flush(writer, segment_payload_start)?;
        }

        Ok(())
    }

    /// Writes the currently-open cluster, if any, and records its cue
    /// candidates with their now-known absolute offset.
    pub fn flush(&mut self, writer: &mut Writer, segment_payload_start: u64) -> Result<(), WriterError> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };

        let cluster_start = writer.tell()?;
        let relative_offset = cluster_start - segment_payload_start;

        let mut body = Builder::new();
        body.uint(ebml::TIMECODE, open.base_timecode_ms as u64);
        body.raw(&open.body);
        let body_bytes = body.into_bytes();

        let mut elem = Vec::new();
        ebml::write_id(&mut elem, ebml::CLUSTER);
        ebml::write_vint(&mut elem, body_bytes.len() as u64);
        elem.extend_from_slice(&body_bytes);
        writer.write_all(&elem)?;

        for (block_index, track_number, timecode_ms) in open.pending_cues {
            self.cues.push(CuePoint {
                track_number,
                timecode_ms,
                cluster_offset: relative_offset,
                relative_block_position: block_index,
            });
        }

        Ok(())
    }

    /// Flushes any remaining open cluster and returns the final cue table.
    pub fn finish(mut self, writer: &mut Writer, segment_payload_start: u64) -> Result<Vec<CuePoint>, WriterError> {
        self.flush(writer, segment_payload_start)?;
        Ok(self.cues)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::Writer;
    use crate::span::Span;
    use std::io::Cursor;

    fn packet(track: u32, timecode_ms: i64, is_keyframe: bool) -> Packet {
        Packet {
            track_number: track,
            timecode_ms,
            duration_ms: None,
            payload: Span::from(vec![0xAB, 0xCD]),
            is_keyframe,
            duration_mandatory: false,
        }
    }

    fn mandatory_packet(track: u32, timecode_ms: i64, duration_ms: u64) -> Packet {
        Packet {
            track_number: track,
            timecode_ms,
            duration_ms: Some(duration_ms),
            payload: Span::from(vec![0xAB, 0xCD]),
            is_keyframe: true,
            duration_mandatory: true,
        }
    }

    fn writer() -> Writer {
        Writer::from_sink(Box::new(Cursor::new(Vec::<u8>::new())))
    }

    #[test]
    fn closes_cluster_on_ms_bound() {
        let mut w = writer();
        let mut cb = ClusterBuilder::new(500, MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_BYTES);

        cb.accept(&mut w, 0, &packet(1, 0, true), CuePolicy::IFramesOnly)
            .unwrap();
        cb.accept(&mut w, 0, &packet(1, 600, true), CuePolicy::IFramesOnly)
            .unwrap();

        // second packet's ms-delta from a still-open cluster base of 0
        // exceeds the 500ms bound, so the first cluster must already have
        // been flushed before this third packet arrives in the same window.
        cb.accept(&mut w, 0, &packet(1, 650, true), CuePolicy::IFramesOnly)
            .unwrap();

        let cues = cb.finish(&mut w, 0).unwrap();
        assert!(!cues.is_empty());
    }

    #[test]
    fn cue_recorded_only_for_keyframes_under_iframes_only_policy() {
        let mut w = writer();
        let mut cb = ClusterBuilder::new(MAX_CLUSTER_MS, MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_BYTES);

        cb.accept(&mut w, 0, &packet(1, 0, true), CuePolicy::IFramesOnly)
            .unwrap();
        cb.accept(&mut w, 0, &packet(1, 40, false), CuePolicy::IFramesOnly)
            .unwrap();

        let cues = cb.finish(&mut w, 0).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].timecode_ms, 0);
    }

    #[test]
    fn overflowing_offset_opens_new_cluster() {
        let mut w = writer();
        let mut cb = ClusterBuilder::new(1_000_000, MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_BYTES);

        cb.accept(&mut w, 0, &packet(1, 0, true), CuePolicy::All)
            .unwrap();
        // offset of 40000 exceeds i16::MAX (32767), forcing a new cluster.
        cb.accept(&mut w, 0, &packet(1, 40_000, true), CuePolicy::All)
            .unwrap();

        let cues = cb.finish(&mut w, 0).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].cluster_offset > cues[0].cluster_offset, true);
    }

    #[test]
    fn mandatory_duration_packet_emits_block_group_with_duration() {
        let mut w = writer();
        let mut cb = ClusterBuilder::new(MAX_CLUSTER_MS, MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_BYTES);

        cb.accept(&mut w, 0, &packet(1, 0, true), CuePolicy::None)
            .unwrap();
        cb.accept(&mut w, 0, &mandatory_packet(1, 40, 20), CuePolicy::None)
            .unwrap();

        // A BlockGroup (id 0xA0) must be present in the still-open
        // cluster's body, since the second (mandatory-duration) packet
        // can't be elided to a bare SimpleBlock.
        let body = &cb.open.as_ref().unwrap().body;
        assert!(body.windows(1).any(|w| w == [ebml::BLOCK_GROUP as u8]));

        cb.finish(&mut w, 0).unwrap();
    }
}
