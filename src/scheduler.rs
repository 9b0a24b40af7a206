//! The merge scheduler (§4.5): drives every input's demultiplexer with a
//! bounded two-packet lookahead per packetizer and picks the
//! globally-minimum-timecode packet. No base-crate counterpart exists (its
//! muxing side was never implemented); built directly from §4.5's
//! pseudo-loop.

use crate::error::DemuxError;
use crate::format::{DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{CuePolicy, Packet};
use crate::packetizer::{Packetizer, PacketizerStatus};

/// One opened input: its reader, its demultiplexer, and the packetizers it
/// feeds.
pub struct Input {
    pub reader: Reader,
    pub demuxer: Box<dyn DemuxerImpl>,
    pub packetizers: Vec<Packetizer>,
}

/// The packet the scheduler selected this step, plus the cue policy of the
/// packetizer it came from (the cluster builder needs it but shouldn't
/// reach back into packetizer state itself).
pub struct Selected {
    pub packet: Packet,
    pub cue_policy: CuePolicy,
}

fn fill_lookahead(input: &mut Input, packetizer_index: usize) -> Result<(), DemuxError> {
    loop {
        let p = &input.packetizers[packetizer_index];
        if p.status() != PacketizerStatus::MoreData || p.has_head() || p.queue_len() >= 2 {
            break;
        }

        let result = input.demuxer.read(&mut input.reader, &mut input.packetizers);
        match result {
            Ok(Status::MoreData) => {}
            Ok(Status::EndOfStream) => {
                for p in &mut input.packetizers {
                    if p.status() == PacketizerStatus::MoreData {
                        p.set_status(PacketizerStatus::EndOfStream);
                    }
                }
                break;
            }
            Err(err) => {
                for p in &mut input.packetizers {
                    p.set_status(PacketizerStatus::Failed);
                }
                return Err(err);
            }
        }
    }

    let p = &mut input.packetizers[packetizer_index];
    p.ensure_head();
    if p.has_head() && p.queue_len() == 0 && p.status() == PacketizerStatus::EndOfStream {
        p.mark_head_mandatory();
    }

    Ok(())
}

/// Runs one iteration of the merge loop: refills lookahead for every
/// packetizer, then selects the minimum-timecode head (ties broken by
/// lowest track number, resolving the tie-break ambiguity in favor of
/// deterministic track order). Returns
/// `None` once every packetizer is drained.
pub fn step(inputs: &mut [Input]) -> Result<Option<Selected>, DemuxError> {
    for input in inputs.iter_mut() {
        for j in 0..input.packetizers.len() {
            fill_lookahead(input, j)?;
        }
    }

    let mut best: Option<(usize, usize, i64, u32)> = None;
    for (i, input) in inputs.iter().enumerate() {
        for (j, p) in input.packetizers.iter().enumerate() {
            if let Some(tc) = p.head_timecode() {
                let track_number = p.track_number();
                let replace = match best {
                    None => true,
                    Some((_, _, best_tc, best_track)) => {
                        tc < best_tc || (tc == best_tc && track_number < best_track)
                    }
                };
                if replace {
                    best = Some((i, j, tc, track_number));
                }
            }
        }
    }

    match best {
        None => Ok(None),
        Some((i, j, _, _)) => {
            let p = &mut inputs[i].packetizers[j];
            let packet = p.take_head().expect("head set by the selection pass above");
            let cue_policy = p.cue_policy();
            Ok(Some(Selected { packet, cue_policy }))
        }
    }
}

/// True once every input's every packetizer is fully drained (§3 lifecycle).
pub fn all_drained(inputs: &[Input]) -> bool {
    inputs
        .iter()
        .all(|input| input.packetizers.iter().all(|p| p.is_drained()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::media::{CodecId, CuePolicy as Cue, TrackEntry, TrackKind};
    use crate::packetizer::SyncConfig;
    use crate::span::Span;
    use std::io::Cursor;

    struct FixedDemuxer {
        frames: Vec<(usize, i64)>,
        next: usize,
    }

    impl DemuxerImpl for FixedDemuxer {
        fn format_name(&self) -> &'static str {
            "test"
        }

        fn read(
            &mut self,
            _reader: &mut Reader,
            packetizers: &mut [Packetizer],
        ) -> Result<Status, DemuxError> {
            if self.next >= self.frames.len() {
                return Ok(Status::EndOfStream);
            }
            let (track_idx, timecode) = self.frames[self.next];
            self.next += 1;
            packetizers[track_idx].push_raw(Span::from(vec![0u8]), timecode, None, true);
            Ok(Status::MoreData)
        }

        fn display_priority(&self) -> u8 {
            0
        }
    }

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
            cue_policy: Cue::None,
        }
    }

    fn reader() -> Reader {
        Reader::from_source(Box::new(Cursor::new(Vec::<u8>::new())), 0)
    }

    #[test]
    fn picks_global_minimum_timecode_across_tracks() {
        let demuxer = FixedDemuxer {
            frames: vec![(0, 100), (1, 50), (0, 200), (1, 150)],
            next: 0,
        };
        let mut input = Input {
            reader: reader(),
            demuxer: Box::new(demuxer),
            packetizers: vec![
                Packetizer::new(entry(1), SyncConfig::default()),
                Packetizer::new(entry(2), SyncConfig::default()),
            ],
        };

        let mut order = Vec::new();
        while let Some(selected) = step(std::slice::from_mut(&mut input)).unwrap() {
            order.push(selected.packet.timecode_ms);
        }

        assert_eq!(order, vec![50, 100, 150, 200]);
    }

    #[test]
    fn ties_break_on_lowest_track_number() {
        let demuxer = FixedDemuxer {
            frames: vec![(1, 100), (0, 100)],
            next: 0,
        };
        let mut input = Input {
            reader: reader(),
            demuxer: Box::new(demuxer),
            packetizers: vec![
                Packetizer::new(entry(1), SyncConfig::default()),
                Packetizer::new(entry(2), SyncConfig::default()),
            ],
        };

        let first = step(std::slice::from_mut(&mut input)).unwrap().unwrap();
        assert_eq!(first.packet.track_number, 1);
    }
}
