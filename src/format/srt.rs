//! SubRip (`.srt`) demultiplexer (§1, §4.2): a plain-text subtitle format,
//! parsed eagerly into a cue list since a subtitle track's total size is
//! always small next to the audio/video it accompanies — the same
//! simplification `r_srt.cpp` makes in the original.

use crate::config::FileConfig;
use crate::error::{DemuxError, IoError};
use crate::format::{track_uid, validate_selection, DemuxerImpl, Status};
use crate::io::Reader;
use crate::media::{CodecId, CuePolicy, TrackEntry, TrackKind};
use crate::packetizer::Packetizer;
use crate::span::Span;

/// Looks for an index line followed by a SubRip timestamp arrow line,
/// without consuming the reader (§4.2 probe contract).
pub fn probe(reader: &mut Reader) -> Result<bool, IoError> {
    let start = reader.tell()?;
    let sample = reader.read_to_vec(4096)?;
    reader.seek(std::io::SeekFrom::Start(start))?;

    let text = String::from_utf8_lossy(&sample);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(first) = lines.next() else {
        return Ok(false);
    };
    if first.parse::<u32>().is_err() {
        return Ok(false);
    }
    let Some(second) = lines.next() else {
        return Ok(false);
    };
    Ok(parse_timing_line(second).is_some())
}

struct Cue {
    start_ms: i64,
    end_ms: i64,
    text: String,
}

fn parse_timestamp(s: &str) -> Option<i64> {
    // HH:MM:SS,mmm
    let (hms, ms) = s.trim().split_once(',')?;
    let mut parts = hms.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    let ms: i64 = ms.parse().ok()?;
    Some(((h * 60 + m) * 60 + s) * 1000 + ms)
}

fn parse_timing_line(line: &str) -> Option<(i64, i64)> {
    let (a, b) = line.split_once("-->")?;
    Some((parse_timestamp(a)?, parse_timestamp(b)?))
}

fn parse_cues(text: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut lines = text.lines().peekable();

    while lines.peek().is_some() {
        // skip blank lines between cues
        while matches!(lines.peek(), Some(l) if l.trim().is_empty()) {
            lines.next();
        }
        let Some(index_line) = lines.next() else {
            break;
        };
        if index_line.trim().parse::<u32>().is_err() {
            continue;
        }
        let Some(timing_line) = lines.next() else {
            break;
        };
        let Some((start_ms, end_ms)) = parse_timing_line(timing_line) else {
            continue;
        };

        let mut body = Vec::new();
        while matches!(lines.peek(), Some(l) if !l.trim().is_empty()) {
            body.push(lines.next().unwrap());
        }

        cues.push(Cue {
            start_ms,
            end_ms,
            text: body.join("\n"),
        });
    }

    cues
}

pub fn open(
    reader: &mut Reader,
    cfg: &FileConfig,
    next_track_number: &mut u32,
) -> Result<(Box<dyn DemuxerImpl>, Vec<Packetizer>, Option<u64>), DemuxError> {
    reader.seek(std::io::SeekFrom::Start(0))?;
    let bytes = reader.read_to_vec(reader.size() as usize)?;
    let text = match &cfg.sub_charset {
        Some(charset) if charset.eq_ignore_ascii_case("UTF-8") => {
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Some(_) | None => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let cues = parse_cues(&text);

    validate_selection(&cfg.stracks, &[1])?;

    if !cfg.stracks.wants(1) || cues.is_empty() {
        return Ok((Box::new(SrtDemuxer { cues, next: 0, packetizer_index: None }), Vec::new(), None));
    }

    let number = crate::format::next_number(next_track_number);
    let entry = TrackEntry {
        number,
        uid: track_uid(number),
        kind: TrackKind::Subtitle,
        codec_id: CodecId::SubRip,
        codec_private: Vec::new(),
        default_track: cfg.default_track,
        language: cfg.language.clone().unwrap_or_else(|| "und".to_string()),
        name: cfg.track_name.clone(),
        video: None,
        audio: None,
        cue_policy: cfg.cues.unwrap_or(CuePolicy::None),
    };
    let packetizer = Packetizer::new(entry, cfg.sync);

    let duration_ms = cues.last().map(|c| c.end_ms as u64);

    Ok((
        Box::new(SrtDemuxer {
            cues,
            next: 0,
            packetizer_index: Some(0),
        }),
        vec![packetizer],
        duration_ms,
    ))
}

struct SrtDemuxer {
    cues: Vec<Cue>,
    next: usize,
    packetizer_index: Option<usize>,
}

impl DemuxerImpl for SrtDemuxer {
    fn format_name(&self) -> &'static str {
        "srt"
    }

    fn read(
        &mut self,
        _reader: &mut Reader,
        packetizers: &mut [Packetizer],
    ) -> Result<Status, DemuxError> {
        let Some(idx) = self.packetizer_index else {
            return Ok(Status::EndOfStream);
        };
        if self.next >= self.cues.len() {
            return Ok(Status::EndOfStream);
        }

        let cue = &self.cues[self.next];
        self.next += 1;

        packetizers[idx].push_raw(
            Span::from(cue.text.clone().into_bytes()),
            cue.start_ms,
            Some((cue.end_ms - cue.start_ms).max(0) as u64),
            true,
        );

        Ok(Status::MoreData)
    }

    fn display_priority(&self) -> u8 {
        10
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_two_cues_with_crlf_and_blank_separator() {
        let text = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nWorld\r\n";
        let cues = parse_cues(text);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].end_ms, 2500);
        assert_eq!(cues[1].text.trim(), "World");
    }
}
