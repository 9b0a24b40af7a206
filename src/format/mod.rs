//! Demultiplexers (§4.2): one variant per input format, dispatched through
//! a closed set of variants through `{probe, open, read, display_priority,
//! display_progress}` — rather than the base crate's `Demuxer`/`Demuxer2`
//! trait-object-with-async-state-machine split (`format.rs`). Each
//! submodule owns its per-format parsing; this module only holds the
//! shared contract and the probe order (§6).

use std::io::SeekFrom;

use crate::config::{FileConfig, TrackSelection};
use crate::error::{DemuxError, TrackSelectionError};
use crate::io::Reader;
use crate::packetizer::Packetizer;

pub mod aac;
pub mod ac3;
pub mod avi;
pub mod dts;
pub mod mkv;
pub mod mp3;
pub mod mp4;
pub mod ogg;
pub mod srt;
pub mod wav;

/// What `read()` accomplished this call (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    MoreData,
    EndOfStream,
}

/// The per-format capability set every demultiplexer variant implements
/// (§4.2, §9).
pub trait DemuxerImpl: Send {
    fn format_name(&self) -> &'static str;

    /// Pulls at least one more packet into some packetizer's FIFO unless
    /// exhausted.
    fn read(
        &mut self,
        reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError>;

    /// Used by the progress selector (§4.2, §9's progress component) to
    /// pick the most informative input to report on; higher wins.
    fn display_priority(&self) -> u8;

    /// One-line percentage string, derived from the reader's own position
    /// and size unless a format has a better proxy (e.g. sample count).
    fn display_progress(&self, reader: &mut Reader) -> String {
        let pos = reader.tell().unwrap_or(0);
        let size = reader.size().max(1);
        format!("{}: {:3}%", self.format_name(), (pos * 100 / size).min(100))
    }
}

/// Reads `len` bytes from the current position and restores it, for
/// side-effect-free probing (§4.2: "probes must be side-effect-free").
pub fn peek(reader: &mut Reader, len: usize) -> Result<Vec<u8>, crate::error::IoError> {
    let start = reader.tell()?;
    let bytes = reader.read_to_vec(len)?;
    reader.seek(SeekFrom::Start(start))?;
    Ok(bytes)
}

/// Checks an explicit `-a`/`-A`/`-s` track list against the IDs a demuxer
/// actually found (SPEC_FULL §4.2): `All`/`None` never fail, since there's
/// nothing to be wrong about.
pub fn validate_selection(
    selection: &TrackSelection,
    available: &[u32],
) -> Result<(), TrackSelectionError> {
    if let TrackSelection::Explicit(ids) = selection {
        for &id in ids {
            if !available.contains(&id) {
                return Err(TrackSelectionError::NotFound(id));
            }
        }
    }
    Ok(())
}

/// Tries each format's `probe` in the declared order (§6, "first match
/// wins"), then opens the one that matches. MP4 is deliberately matched
/// but rejected rather than falling through to `ProbeFailed`: detecting
/// an MP4 input is treated as an immediate fatal error rather than a
/// silent skip (§9).
pub fn probe_and_open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    if avi::probe(reader)? {
        return avi::open(reader, cfg, next_track_number);
    }
    if mkv::probe(reader)? {
        return mkv::open(reader, cfg, next_track_number);
    }
    if wav::probe(reader)? {
        return wav::open(reader, cfg, next_track_number);
    }
    if mp4::probe(reader)? {
        return Err(DemuxError::UnsupportedFormat("mp4"));
    }
    if ogg::probe(reader)? {
        return ogg::open(reader, cfg, next_track_number);
    }
    if srt::probe(reader)? {
        return srt::open(reader, cfg, next_track_number);
    }
    if mp3::probe(reader)? {
        return mp3::open(reader, cfg, next_track_number);
    }
    if ac3::probe(reader)? {
        return ac3::open(reader, cfg, next_track_number);
    }
    if dts::probe(reader)? {
        return dts::open(reader, cfg, next_track_number);
    }
    if aac::probe(reader)? {
        return aac::open(reader, cfg, next_track_number);
    }
    Err(DemuxError::ProbeFailed)
}

/// Allocates the next contiguous track number, shared across every input
/// file in argument order (SPEC_FULL §4.3).
pub fn next_number(counter: &mut u32) -> u32 {
    let n = *counter;
    *counter += 1;
    n
}

/// A deterministic, nonzero `TrackUID` derived from the track number —
/// this engine has no need for the cross-file global uniqueness a random
/// UID would buy, only "nonzero and distinct within this file" (§4.3).
pub fn track_uid(track_number: u32) -> u64 {
    0x1000_0000_0000_0000u64 | track_number as u64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::TrackSelectionError;
    use std::collections::HashSet;

    #[test]
    fn all_and_none_never_fail_validation() {
        assert!(validate_selection(&TrackSelection::All, &[]).is_ok());
        assert!(validate_selection(&TrackSelection::None, &[]).is_ok());
    }

    #[test]
    fn explicit_id_outside_available_set_is_rejected() {
        let selection = TrackSelection::Explicit(HashSet::from([3]));
        let err = validate_selection(&selection, &[1, 2]).unwrap_err();
        assert!(matches!(err, TrackSelectionError::NotFound(3)));
    }

    #[test]
    fn explicit_id_within_available_set_is_accepted() {
        let selection = TrackSelection::Explicit(HashSet::from([2]));
        assert!(validate_selection(&selection, &[1, 2]).is_ok());
    }
}
