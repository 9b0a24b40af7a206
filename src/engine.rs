//! Top-level orchestration (§9 Design Notes: "config -> writer ->
//! segment/meta-seek placeholders -> demuxers -> packetizers -> cluster
//! builder -> scheduler"). `main.rs` is the only caller; this is what the
//! base crate's `main.rs` inlined directly since it never grew past a demo,
//! pulled out here because this engine's construction order is itself a
//! testable sequencing contract (§4.2/§4.6).

use tracing::{debug, info};

use crate::config::{Assembled, ClusterLength, GlobalConfig};
use crate::cluster::{MAX_BLOCKS_PER_CLUSTER, MAX_CLUSTER_MS};
use crate::error::{ConfigError, Diagnostic, EngineError};
use crate::format;
use crate::io::{Reader, Writer};
use crate::media::TrackKind;
use crate::mux::{self, WriterConfig};
use crate::scheduler::Input;

/// One probed-and-opened source, described for `--identify` and the
/// `--list-types`-adjacent diagnostics (§6).
#[derive(Debug, Clone)]
pub struct IdentifiedTrack {
    pub number: u32,
    pub kind: &'static str,
    pub codec_id: &'static str,
}

#[derive(Debug, Clone)]
pub struct Identification {
    pub path: String,
    pub format: &'static str,
    pub tracks: Vec<IdentifiedTrack>,
}

fn writer_config_from_global(global: &GlobalConfig) -> WriterConfig {
    let (max_cluster_ms, max_blocks_per_cluster) = match global.cluster_length {
        ClusterLength::Millis(ms) => (ms, MAX_BLOCKS_PER_CLUSTER),
        ClusterLength::Blocks(blocks) => (MAX_CLUSTER_MS, blocks),
    };

    WriterConfig {
        max_cluster_ms,
        max_blocks_per_cluster,
        max_cluster_bytes: crate::cluster::MAX_CLUSTER_BYTES,
        write_cues: global.write_cues,
        write_meta_seek: global.write_meta_seek,
        meta_seek_size: global.meta_seek_size,
        title: global.title.clone(),
    }
}

/// Opens every input in argument order, assigning contiguous track numbers
/// across all of them (SPEC_FULL §4.3), and returns the scheduler inputs
/// plus bookkeeping `mux::run` needs (total source bytes, whether any video
/// track survived track selection).
fn open_inputs(assembled: &Assembled) -> Result<(Vec<Input>, u64, bool), EngineError> {
    let mut inputs = Vec::new();
    let mut next_track_number = 1u32;
    let mut total_input_bytes = 0u64;
    let mut video_track_present = false;

    for (path, file_cfg) in &assembled.inputs {
        let mut reader = Reader::open(path)?;
        total_input_bytes += reader.size();

        debug!(path = %path.display(), "probing input");
        let (demuxer, packetizers, _duration_hint) =
            format::probe_and_open(&mut reader, file_cfg, &mut next_track_number)?;
        info!(path = %path.display(), format = demuxer.format_name(), tracks = packetizers.len(), "opened input");

        if packetizers
            .iter()
            .any(|p| p.entry().kind == TrackKind::Video)
        {
            video_track_present = true;
        }

        inputs.push(Input {
            reader,
            demuxer,
            packetizers,
        });
    }

    Ok((inputs, total_input_bytes, video_track_present))
}

/// Runs the full multiplex: assemble inputs, open the output, drive
/// `mux::run`. Returns non-fatal diagnostics (currently only meta-seek
/// overflow downgrades, §7).
pub fn run(assembled: &Assembled) -> Result<Vec<Diagnostic>, EngineError> {
    let (inputs, total_input_bytes, video_track_present) = open_inputs(assembled)?;

    if inputs.is_empty() {
        return Err(ConfigError::Usage("no input files given".into()).into());
    }

    let output = assembled
        .global
        .output
        .clone()
        .ok_or_else(|| ConfigError::Usage("no output file given (-o)".into()))?;

    let mut writer = Writer::create(&output)?;
    let writer_cfg = writer_config_from_global(&assembled.global);

    info!(output = %output.display(), inputs = inputs.len(), "starting mux");
    let diagnostics = mux::run(
        &mut writer,
        &writer_cfg,
        total_input_bytes,
        video_track_present,
        inputs,
    )?;

    Ok(diagnostics)
}

/// `--identify`: probe and open every input, but never construct an output
/// (§6). Track selection flags still apply, since `--identify` is meant to
/// show exactly what a real run with the same flags would mux.
pub fn identify(assembled: &Assembled) -> Result<Vec<Identification>, EngineError> {
    let mut out = Vec::new();
    let mut next_track_number = 1u32;

    for (path, file_cfg) in &assembled.inputs {
        let mut reader = Reader::open(path)?;
        let (demuxer, packetizers, _duration_hint) =
            format::probe_and_open(&mut reader, file_cfg, &mut next_track_number)?;

        let tracks = packetizers
            .iter()
            .map(|p| IdentifiedTrack {
                number: p.track_number(),
                kind: match p.entry().kind {
                    TrackKind::Video => "video",
                    TrackKind::Audio => "audio",
                    TrackKind::Subtitle => "subtitles",
                },
                codec_id: p.entry().codec_id.matroska_id(),
            })
            .collect();

        out.push(Identification {
            path: path.display().to_string(),
            format: demuxer.format_name(),
            tracks,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GlobalConfig;

    #[test]
    fn cluster_length_millis_overrides_only_the_ms_bound() {
        let mut global = GlobalConfig::default();
        global.cluster_length = ClusterLength::Millis(250);
        let cfg = writer_config_from_global(&global);
        assert_eq!(cfg.max_cluster_ms, 250);
        assert_eq!(cfg.max_blocks_per_cluster, MAX_BLOCKS_PER_CLUSTER);
    }

    #[test]
    fn cluster_length_blocks_overrides_only_the_block_bound() {
        let mut global = GlobalConfig::default();
        global.cluster_length = ClusterLength::Blocks(10);
        let cfg = writer_config_from_global(&global);
        assert_eq!(cfg.max_blocks_per_cluster, 10);
        assert_eq!(cfg.max_cluster_ms, MAX_CLUSTER_MS);
    }
}
