//! CLI entry point (§4.7, §6; argument parsing stays out of the library
//! core per §1, so this is a thin shell over [`mkvknit::config`] and
//! [`mkvknit::engine`]).
//! Grounded in the base crate's own `main.rs` use of `lexopt::Parser::from_env`
//! for argv handling, generalized to this engine's two-pass
//! expand-then-assemble shape (`config::expand_args`/`config::assemble`).

use std::env;
use std::process::ExitCode;

use mkvknit::config::{self, ISO_639_2_CODES};
use mkvknit::engine;

const USAGE: &str = "\
mkvknit: mux AVI/WAV/MP3/AC3/DTS/AAC/SRT/OGG/Matroska inputs into one Matroska file

USAGE:
    mkvknit -o OUTPUT [OPTIONS] INPUT [OPTIONS] [INPUT ...]

OPTIONS:
    -o, --output PATH        output file (required, exactly one)
    -v / -q                  raise / lower verbosity
    --cluster-length N[ms]   cluster bound: N blocks, or N milliseconds if suffixed 'ms'
    --no-cues                do not write a Cues element
    --no-meta-seek           do not reserve or write a SeekHead
    --meta-seek-size N       reserve exactly N bytes for the seek head
    --no-lacing              (accepted; this engine never laces)
    --title TEXT             segment title
    --identify                probe inputs and print their tracks; write nothing
    -l, --list-types          list supported input formats and exit
    --list-languages          list recognized ISO 639-2 language codes and exit
    -V                         print version and exit
    -h, --help                 print this help and exit
    @PATH                      expand PATH's lines into this position in argv

PER-FILE OPTIONS (bind to the next input path):
    -a/-A LIST                 select / exclude audio tracks by source id
    -d/-D LIST                 select / exclude video tracks by source id
    -s/-S LIST                 select / exclude subtitle tracks by source id
    -y, --sync d[,o[/p]]       audio timecode displacement (ms) and linear factor o/p
    -f, --fourcc FOURCC        override a video track's FourCC (exactly 4 chars)
    --aspect-ratio f|a/b       video display aspect ratio
    --cues none|iframes|all    cue policy override for this input's tracks
    --default-track            mark this input's tracks as default
    --language CODE             ISO 639-2 language for this input's tracks
    --sub-charset NAME          subtitle charset (SRT only)
    --track-name NAME            track name for this input's tracks
";

const SUPPORTED_FORMATS: &[&str] = &[
    "AVI", "Matroska", "WAV", "OGG", "SRT", "MP3", "AC3", "DTS", "AAC",
];

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &[String]) -> Result<ExitCode, mkvknit::EngineError> {
    let expanded = config::expand_args(args)?;
    let assembled = config::assemble(&expanded)?;
    let global = &assembled.global;

    if global.show_help {
        print!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    if global.show_version {
        println!("mkvknit {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    if global.list_types {
        println!("supported input formats:");
        for name in SUPPORTED_FORMATS {
            println!("  {name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if global.list_languages {
        println!("recognized ISO 639-2 language codes:");
        for (code, name) in ISO_639_2_CODES {
            println!("  {code}  {name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    init_logging(global.verbosity);

    if global.identify {
        let identifications = engine::identify(&assembled)?;
        for ident in identifications {
            println!("{}: format {}", ident.path, ident.format);
            for track in ident.tracks {
                println!("  track {}: {} ({})", track.number, track.kind, track.codec_id);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let diagnostics = engine::run(&assembled)?;
    for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic.message);
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbosity: i32) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbosity {
        i32::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
