//! Option and argument assembly (§4.7, §6). Two passes over an *expanded*
//! argument vector — `@file` tokens substituted first, per-file options
//! accumulated into a pending struct and bound to the next positional
//! argument — matching the base crate's own `main.rs` use of `lexopt` to
//! walk argv, generalized here to the two-pass `@file`-then-options-then-
//! positional shape §4.7 requires.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ConfigError, TrackSelectionError};
use crate::media::CuePolicy;
use crate::packetizer::SyncConfig;

/// `-a/-A`, `-d/-D`, `-s/-S`: either every track of that kind (the default)
/// or an explicit allow-list of source track ids in `1..=255` (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSelection {
    All,
    Explicit(HashSet<u32>),
    None,
}

impl Default for TrackSelection {
    fn default() -> Self {
        TrackSelection::All
    }
}

impl TrackSelection {
    pub fn wants(&self, source_track_id: u32) -> bool {
        match self {
            TrackSelection::All => true,
            TrackSelection::None => false,
            TrackSelection::Explicit(set) => set.contains(&source_track_id),
        }
    }

    fn parse_list(list: &str) -> Result<TrackSelection, TrackSelectionError> {
        let mut ids = HashSet::new();
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id: u32 = part
                .parse()
                .map_err(|_| TrackSelectionError::OutOfRange(0))?;
            if id == 0 || id > 255 {
                return Err(TrackSelectionError::OutOfRange(id));
            }
            ids.insert(id);
        }
        Ok(TrackSelection::Explicit(ids))
    }
}

/// `--aspect-ratio f|a/b` (§6): either a single decimal factor or a ratio.
#[derive(Debug, Clone, Copy)]
pub enum AspectSpec {
    Factor(f64),
    Ratio(u32, u32),
}

/// `--cluster-length N[ms]`: a trailing `ms` suffix selects milliseconds,
/// otherwise the number is a block count.
#[derive(Debug, Clone, Copy)]
pub enum ClusterLength {
    Millis(i64),
    Blocks(u32),
}

/// Per-file knobs that accumulate in a "pending" struct until the next
/// positional argument binds them to an input path (§4.7).
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    pub atracks: TrackSelection,
    pub vtracks: TrackSelection,
    pub stracks: TrackSelection,
    pub sync: SyncConfig,
    pub fourcc: Option<[u8; 4]>,
    pub aspect: Option<AspectSpec>,
    pub sub_charset: Option<String>,
    pub language: Option<String>,
    pub default_track: bool,
    pub cues: Option<CuePolicy>,
    pub track_name: Option<String>,
}

/// Global engine configuration assembled from `-o`, `-v/-q`,
/// `--cluster-length`, `--no-cues`, `--no-meta-seek`, `--meta-seek-size`,
/// `--no-lacing`, `--title`, `--identify`, `--list-types`,
/// `--list-languages` (§6, SPEC_FULL §4.7/§6).
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub output: Option<PathBuf>,
    pub verbosity: i32,
    pub cluster_length: ClusterLength,
    pub write_cues: bool,
    pub write_meta_seek: bool,
    pub meta_seek_size: Option<u64>,
    pub no_lacing: bool,
    pub title: Option<String>,
    pub identify: bool,
    pub list_types: bool,
    pub list_languages: bool,
    pub show_version: bool,
    pub show_help: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            output: None,
            verbosity: 0,
            cluster_length: ClusterLength::Millis(crate::cluster::MAX_CLUSTER_MS),
            write_cues: true,
            write_meta_seek: true,
            meta_seek_size: None,
            no_lacing: false,
            title: None,
            identify: false,
            list_types: false,
            list_languages: false,
            show_version: false,
            show_help: false,
        }
    }
}

/// Fully assembled configuration: global knobs plus one `FileConfig` per
/// input path, in argument order (track numbering depends on this order,
/// SPEC_FULL §4.3).
#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub global: GlobalConfig,
    pub inputs: Vec<(PathBuf, FileConfig)>,
}

/// A curated subset of ISO 639-2 codes, the same ones `mkvmerge`'s
/// `iso639.c` table ships as its most common entries, trimmed for this
/// engine to those actually exercised by `--list-languages`/`--language`.
/// Open Question (SPEC_FULL §10): the full ~500-entry table isn't
/// reproduced; unrecognized codes outside this set are rejected even if
/// they are technically valid ISO 639-2, recorded as a deliberate scope
/// decision in DESIGN.md.
pub const ISO_639_2_CODES: &[(&str, &str)] = &[
    ("eng", "English"),
    ("ger", "German"),
    ("deu", "German"),
    ("fre", "French"),
    ("fra", "French"),
    ("spa", "Spanish"),
    ("ita", "Italian"),
    ("jpn", "Japanese"),
    ("chi", "Chinese"),
    ("zho", "Chinese"),
    ("rus", "Russian"),
    ("por", "Portuguese"),
    ("dut", "Dutch"),
    ("nld", "Dutch"),
    ("swe", "Swedish"),
    ("fin", "Finnish"),
    ("pol", "Polish"),
    ("kor", "Korean"),
    ("ara", "Arabic"),
    ("und", "Undetermined"),
];

pub fn validate_language(code: &str) -> Result<(), ConfigError> {
    if ISO_639_2_CODES.iter().any(|(c, _)| *c == code) {
        Ok(())
    } else {
        Err(ConfigError::LanguageInvalid(code.to_string()))
    }
}

/// Seconds since the Unix epoch, shifted to Matroska's `DateUTC` epoch
/// (2001-01-01T00:00:00 UTC), written as `Info/DateUTC` (§4.6 phase 4).
const MATROSKA_EPOCH_OFFSET_SECS: u64 = 978_307_200;

pub fn unix_epoch_seconds_since_2001() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.saturating_sub(MATROSKA_EPOCH_OFFSET_SECS)
}

/// Expands `@path` tokens into the lines of the named file: leading/trailing
/// whitespace stripped, `#`-prefixed and blank lines discarded (§4.7).
/// Idempotent (§8 property 8): re-expanding an already-expanded vector is a
/// no-op because none of its tokens start with `@`.
pub fn expand_args(args: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for arg in args {
        if let Some(path) = arg.strip_prefix('@') {
            let mut reader = crate::io::Reader::open(path)
                .map_err(|e| ConfigError::Usage(format!("cannot read options file {path}: {e}")))?;
            while let Some(line) = reader
                .read_line_stripped()
                .map_err(|e| ConfigError::Usage(format!("error reading {path}: {e}")))?
            {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                if let Some(rest) = trimmed.strip_prefix('-') {
                    if let Some(space) = rest.find(' ') {
                        out.push(format!("-{}", &rest[..space]));
                        let value = rest[space + 1..].trim();
                        if !value.is_empty() {
                            out.push(value.to_string());
                        }
                        continue;
                    }
                }
                out.push(trimmed.to_string());
            }
        } else {
            out.push(arg.clone());
        }
    }
    Ok(out)
}

fn parse_sync(spec: &str) -> Result<SyncConfig, ConfigError> {
    let invalid = |detail: &str| ConfigError::SyncInvalid(spec.to_string(), detail.to_string());

    let mut parts = spec.splitn(2, ',');
    let displacement_ms: i64 = parts
        .next()
        .unwrap()
        .trim()
        .parse()
        .map_err(|_| invalid("displacement must be an integer number of milliseconds"))?;

    let linear = match parts.next() {
        None => 1.0,
        Some(rest) => {
            let mut ratio = rest.splitn(2, '/');
            let o: f64 = ratio
                .next()
                .unwrap()
                .trim()
                .parse()
                .map_err(|_| invalid("linear numerator must be numeric"))?;
            let p: f64 = match ratio.next() {
                None => 1000.0,
                Some(p) => p
                    .trim()
                    .parse()
                    .map_err(|_| invalid("linear divisor must be numeric"))?,
            };
            if p == 0.0 {
                return Err(invalid("linear divisor must not be zero"));
            }
            o / p
        }
    };

    if !(linear > 0.0) {
        return Err(invalid("linear factor must be > 0"));
    }

    Ok(SyncConfig {
        displacement_ms,
        linear,
    })
}

fn parse_aspect(spec: &str) -> Result<AspectSpec, ConfigError> {
    let invalid = |detail: &str| ConfigError::AspectInvalid(spec.to_string(), detail.to_string());

    if let Some((a, b)) = spec.split_once('/') {
        let a: u32 = a
            .trim()
            .parse()
            .map_err(|_| invalid("numerator must be an integer"))?;
        let b: u32 = b
            .trim()
            .parse()
            .map_err(|_| invalid("divisor must be an integer"))?;
        if b == 0 {
            return Err(invalid("divisor must not be zero"));
        }
        Ok(AspectSpec::Ratio(a, b))
    } else {
        let f: f64 = spec.trim().parse().map_err(|_| invalid("not a number"))?;
        if !(f > 0.0) {
            return Err(invalid("factor must be > 0"));
        }
        Ok(AspectSpec::Factor(f))
    }
}

fn parse_fourcc(spec: &str) -> Result<[u8; 4], ConfigError> {
    let bytes = spec.as_bytes();
    if bytes.len() != 4 {
        return Err(ConfigError::FourCCInvalid(spec.to_string()));
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn parse_cluster_length(spec: &str) -> Result<ClusterLength, ConfigError> {
    let invalid = || ConfigError::Usage(format!("invalid --cluster-length value {spec:?}"));

    // A trailing `ms` suffix selects milliseconds, otherwise the number
    // is a block count.
    if let Some(digits) = spec.strip_suffix("ms") {
        let ms: i64 = digits.trim().parse().map_err(|_| invalid())?;
        if !(0..=65_535).contains(&ms) {
            return Err(invalid());
        }
        Ok(ClusterLength::Millis(ms))
    } else {
        let blocks: u32 = spec.trim().parse().map_err(|_| invalid())?;
        if blocks > 65_535 {
            return Err(invalid());
        }
        Ok(ClusterLength::Blocks(blocks))
    }
}

/// Tracks which of `-a/-A`, `-d/-D`, `-s/-S` touched the pending file's
/// config, so the conflicting pair (both flags of one kind) can be
/// rejected once the file's options are complete (§4.7). `TrackSelection`
/// alone can't tell "never set" from "set to `None`", hence this sidecar.
#[derive(Default)]
struct TouchedFlags {
    a: bool,
    cap_a: bool,
    d: bool,
    cap_d: bool,
    s: bool,
    cap_s: bool,
}

impl TouchedFlags {
    fn check(&self) -> Result<(), ConfigError> {
        if (self.a && self.cap_a) || (self.d && self.cap_d) || (self.s && self.cap_s) {
            return Err(TrackSelectionError::ConflictingFlags.into());
        }
        Ok(())
    }
}

/// Walks the already-`@file`-expanded argument vector left to right,
/// accumulating per-file options into a pending [`FileConfig`] that binds
/// to the next positional argument (an input path), then resets (§4.7).
pub fn assemble(expanded: &[String]) -> Result<Assembled, ConfigError> {
    let mut global = GlobalConfig::default();
    let mut inputs = Vec::new();

    let mut pending = FileConfig::default();
    let mut touched = TouchedFlags::default();

    let mut parser = lexopt::Parser::from_args(expanded.iter().cloned());

    use lexopt::Arg;

    while let Some(arg) = parser
        .next()
        .map_err(|e| ConfigError::Usage(e.to_string()))?
    {
        match arg {
            Arg::Short('o') | Arg::Long("output") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?;
                global.output = Some(PathBuf::from(v));
            }
            Arg::Short('v') => global.verbosity += 1,
            Arg::Short('q') => global.verbosity -= 1,
            Arg::Long("cluster-length") => {
                let v = parser
                    .value()
                    .map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string()
                    .map_err(|_| ConfigError::Usage("--cluster-length value is not UTF-8".into()))?;
                global.cluster_length = parse_cluster_length(&v)?;
            }
            Arg::Long("no-cues") => global.write_cues = false,
            Arg::Long("no-meta-seek") => global.write_meta_seek = false,
            Arg::Long("no-lacing") => global.no_lacing = true,
            Arg::Long("meta-seek-size") => {
                let v = parser
                    .value()
                    .map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string()
                    .map_err(|_| ConfigError::Usage("--meta-seek-size value is not UTF-8".into()))?;
                let size: u64 = v
                    .parse()
                    .map_err(|_| ConfigError::Usage(format!("invalid --meta-seek-size {v:?}")))?;
                global.meta_seek_size = Some(size);
            }
            Arg::Long("title") => {
                let v = parser
                    .value()
                    .map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string()
                    .map_err(|_| ConfigError::Usage("--title value is not UTF-8".into()))?;
                global.title = Some(v);
            }
            Arg::Long("track-name") => {
                let v = parser
                    .value()
                    .map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string()
                    .map_err(|_| ConfigError::Usage("--track-name value is not UTF-8".into()))?;
                pending.track_name = Some(v);
            }
            Arg::Long("identify") => global.identify = true,
            Arg::Short('l') | Arg::Long("list-types") => global.list_types = true,
            Arg::Long("list-languages") => global.list_languages = true,
            Arg::Short('V') => global.show_version = true,
            Arg::Short('h') | Arg::Long("help") => global.show_help = true,

            Arg::Short('a') => {
                touched.a = true;
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("-a value is not UTF-8".into()))?;
                pending.atracks = TrackSelection::parse_list(&v)?;
            }
            Arg::Short('A') => {
                touched.cap_a = true;
                pending.atracks = TrackSelection::None;
            }
            Arg::Short('d') => {
                touched.d = true;
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("-d value is not UTF-8".into()))?;
                pending.vtracks = TrackSelection::parse_list(&v)?;
            }
            Arg::Short('D') => {
                touched.cap_d = true;
                pending.vtracks = TrackSelection::None;
            }
            Arg::Short('s') => {
                touched.s = true;
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("-s value is not UTF-8".into()))?;
                pending.stracks = TrackSelection::parse_list(&v)?;
            }
            Arg::Short('S') => {
                touched.cap_s = true;
                pending.stracks = TrackSelection::None;
            }
            Arg::Long("noaudio") => pending.atracks = TrackSelection::None,
            Arg::Long("novideo") => pending.vtracks = TrackSelection::None,
            Arg::Long("nosubs") => pending.stracks = TrackSelection::None,

            Arg::Short('y') | Arg::Long("sync") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("-y value is not UTF-8".into()))?;
                pending.sync = parse_sync(&v)?;
            }
            Arg::Short('f') => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("-f value is not UTF-8".into()))?;
                pending.fourcc = Some(parse_fourcc(&v)?);
            }
            Arg::Long("aspect-ratio") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("--aspect-ratio value is not UTF-8".into()))?;
                pending.aspect = Some(parse_aspect(&v)?);
            }
            Arg::Long("cues") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("--cues value is not UTF-8".into()))?;
                pending.cues = Some(match v.as_str() {
                    "none" => CuePolicy::None,
                    "iframes" => CuePolicy::IFramesOnly,
                    "all" => CuePolicy::All,
                    other => {
                        return Err(ConfigError::Usage(format!("invalid --cues value {other:?}")))
                    }
                });
            }
            Arg::Long("default-track") => pending.default_track = true,
            Arg::Long("language") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("--language value is not UTF-8".into()))?;
                validate_language(&v)?;
                pending.language = Some(v);
            }
            Arg::Long("sub-charset") => {
                let v = parser.value().map_err(|e| ConfigError::Usage(e.to_string()))?
                    .into_string().map_err(|_| ConfigError::Usage("--sub-charset value is not UTF-8".into()))?;
                pending.sub_charset = Some(v);
            }

            Arg::Value(path) => {
                touched.check()?;
                inputs.push((PathBuf::from(path), pending.clone()));
                pending = FileConfig::default();
                touched = TouchedFlags::default();
            }
            other => return Err(ConfigError::Usage(format!("unrecognized option: {other:?}"))),
        }
    }

    Ok(Assembled { global, inputs })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expand_args_strips_comments_blanks_and_splits_value() {
        let dir = std::env::temp_dir().join(format!("mkvknit-optfile-{}", std::process::id()));
        std::fs::write(&dir, "# comment\n\n-o out.mkv\n-a 1,2\ninput.wav\n").unwrap();

        let args = vec![format!("@{}", dir.display())];
        let expanded = expand_args(&args).unwrap();

        std::fs::remove_file(&dir).ok();

        assert_eq!(
            expanded,
            vec!["-o", "out.mkv", "-a", "1,2", "input.wav"]
        );
    }

    #[test]
    fn sync_parses_displacement_and_linear_ratio() {
        let sync = parse_sync("-200,1001/1000").unwrap();
        assert_eq!(sync.displacement_ms, -200);
        assert!((sync.linear - 1.001).abs() < 1e-9);
    }

    #[test]
    fn sync_rejects_zero_divisor() {
        assert!(parse_sync("0,1/0").is_err());
    }

    #[test]
    fn cluster_length_suffix_selects_milliseconds() {
        assert!(matches!(parse_cluster_length("500ms").unwrap(), ClusterLength::Millis(500)));
        assert!(matches!(parse_cluster_length("500").unwrap(), ClusterLength::Blocks(500)));
    }

    #[test]
    fn conflicting_track_flags_on_same_kind_are_rejected() {
        let expanded = vec![
            "-a".to_string(),
            "1".to_string(),
            "-A".to_string(),
            "in.avi".to_string(),
        ];
        assert!(assemble(&expanded).is_err());
    }

    #[test]
    fn track_selection_defaults_to_all() {
        let expanded = vec!["in.wav".to_string()];
        let assembled = assemble(&expanded).unwrap();
        assert_eq!(assembled.inputs.len(), 1);
        assert_eq!(assembled.inputs[0].1.atracks, TrackSelection::All);
    }

    #[test]
    fn language_validation_rejects_unknown_code() {
        assert!(validate_language("xyz").is_err());
        assert!(validate_language("eng").is_ok());
    }
}
