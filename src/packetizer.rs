//! The packetizer (§4.3): one per output track. Owns a FIFO of timecoded
//! packets, applies audio sync, and reports cue policy to the cluster
//! builder. The base crate's `format/mux.rs` `Muxer` trait sketched a
//! similar per-track write contract but never a FIFO/lookahead model — this
//! is built fresh against the merge scheduler's needs.

use std::collections::VecDeque;

use crate::ebml::Builder;
use crate::media::{CuePolicy, Packet, TrackEntry};
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizerStatus {
    MoreData,
    EndOfStream,
    Failed,
}

/// Audio sync parameters from `-y d[,o[/p]]` (§4.7): `timecode' =
/// round(timecode * linear) + displacement_ms`.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub displacement_ms: i64,
    pub linear: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            displacement_ms: 0,
            linear: 1.0,
        }
    }
}

/// Per-output-track packet queue and sync state (§3 "Packetizer state").
pub struct Packetizer {
    entry: TrackEntry,
    queue: VecDeque<Packet>,
    head: Option<Packet>,
    status: PacketizerStatus,
    sync: SyncConfig,
    /// Present only for codecs that define a silence frame; used by the
    /// "pad instead of drop" sync branch (§4.3 SPEC_FULL supplement).
    silence_frame: Option<Span>,
    silence_inserted: bool,
}

impl Packetizer {
    pub fn new(entry: TrackEntry, sync: SyncConfig) -> Packetizer {
        Packetizer {
            entry,
            queue: VecDeque::new(),
            head: None,
            status: PacketizerStatus::MoreData,
            sync,
            silence_frame: None,
            silence_inserted: false,
        }
    }

    pub fn with_silence_frame(mut self, frame: Span) -> Packetizer {
        self.silence_frame = Some(frame);
        self
    }

    pub fn track_number(&self) -> u32 {
        self.entry.number
    }

    pub fn entry(&self) -> &TrackEntry {
        &self.entry
    }

    /// Writes this track's `TrackEntry` sub-elements (§4.6 phase 5).
    pub fn fill_headers(&self, tracks: &mut Builder) {
        crate::mux::write_track_entry(tracks, &self.entry);
    }

    pub fn cue_policy(&self) -> CuePolicy {
        self.entry.cue_policy
    }

    pub fn status(&self) -> PacketizerStatus {
        self.status
    }

    pub fn set_status(&mut self, status: PacketizerStatus) {
        self.status = status;
    }

    /// Applies sync adjustment and pushes onto the FIFO, or drops/pads per
    /// §4.3.
    pub fn push_raw(
        &mut self,
        payload: Span,
        timecode_ms: i64,
        duration_ms: Option<u64>,
        is_keyframe: bool,
    ) {
        let scaled = (timecode_ms as f64 * self.sync.linear).round() as i64;
        let adjusted = scaled + self.sync.displacement_ms;

        if adjusted < 0 {
            // Clamp: this sample falls before the track's effective start,
            // drop it (leading samples are lost).
            return;
        }

        if self.sync.displacement_ms > 0 && !self.silence_inserted {
            self.silence_inserted = true;
            if let Some(silence) = self.silence_frame.clone() {
                self.queue.push_back(Packet {
                    track_number: self.entry.number,
                    timecode_ms: 0,
                    duration_ms: Some(self.sync.displacement_ms as u64),
                    payload: silence,
                    is_keyframe: false,
                    duration_mandatory: true,
                });
            }
        }

        self.queue.push_back(Packet {
            track_number: self.entry.number,
            timecode_ms: adjusted,
            duration_ms,
            payload,
            is_keyframe,
            duration_mandatory: false,
        });
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_head(&self) -> bool {
        self.head.is_some()
    }

    /// Moves the next queued packet into `head` if `head` is empty.
    pub fn ensure_head(&mut self) {
        if self.head.is_none() {
            self.head = self.queue.pop_front();
        }
    }

    pub fn head_timecode(&self) -> Option<i64> {
        self.head.as_ref().map(|p| p.timecode_ms)
    }

    pub fn mark_head_mandatory(&mut self) {
        if let Some(head) = &mut self.head {
            head.duration_mandatory = true;
        }
    }

    pub fn take_head(&mut self) -> Option<Packet> {
        self.head.take()
    }

    /// True once this packetizer will never produce another packet (§3
    /// lifecycle: `EndOfStream` *and* empty FIFO).
    pub fn is_drained(&self) -> bool {
        self.head.is_none() && self.queue.is_empty() && self.status == PacketizerStatus::EndOfStream
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::media::{CodecId, TrackKind};

    fn entry(number: u32) -> TrackEntry {
        TrackEntry {
            number,
            uid: number as u64,
            kind: TrackKind::Audio,
            codec_id: CodecId::PcmInt,
            codec_private: Vec::new(),
            default_track: true,
            language: "und".to_string(),
            name: None,
            video: None,
            audio: None,
            cue_policy: CuePolicy::None,
        }
    }

    #[test]
    fn negative_sync_drops_leading_samples() {
        let sync = SyncConfig {
            displacement_ms: -200,
            linear: 1.0,
        };
        let mut p = Packetizer::new(entry(1), sync);

        p.push_raw(Span::from(vec![0u8]), 0, None, false);
        p.push_raw(Span::from(vec![0u8]), 150, None, false);
        p.push_raw(Span::from(vec![0u8]), 300, None, false);

        assert_eq!(p.queue_len(), 1);
        p.ensure_head();
        assert_eq!(p.head_timecode(), Some(100));
    }

    #[test]
    fn linear_scaling_applies_before_displacement() {
        let sync = SyncConfig {
            displacement_ms: 10,
            linear: 2.0,
        };
        let mut p = Packetizer::new(entry(1), sync);
        p.push_raw(Span::from(vec![0u8]), 100, None, false);

        p.ensure_head();
        assert_eq!(p.head_timecode(), Some(210));
    }

    #[test]
    fn drained_only_after_eos_and_empty_queue() {
        let mut p = Packetizer::new(entry(1), SyncConfig::default());
        assert!(!p.is_drained());

        p.set_status(PacketizerStatus::EndOfStream);
        assert!(p.is_drained());

        p.push_raw(Span::from(vec![0u8]), 0, None, false);
        assert!(!p.is_drained());
    }
}
