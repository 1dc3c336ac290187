use crate::error::SubtitleError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LRC_LAST_LINE_HOLD: Duration = Duration::from_secs(5);

/// A caption shown for the closed interval `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleSpan {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl SubtitleSpan {
    /// An `end` earlier than `start` is pulled up to `start`.
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end: end.max(start),
            text: text.into(),
        }
    }

    pub fn is_active_at(&self, position: Duration) -> bool {
        self.start <= position && position <= self.end
    }
}

/// Captions for one audio file, kept in the order the parser produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    source: PathBuf,
    spans: Vec<SubtitleSpan>,
}

impl SubtitleTrack {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            spans: Vec::new(),
        }
    }

    pub fn push(&mut self, span: SubtitleSpan) {
        self.spans.push(span);
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn spans(&self) -> &[SubtitleSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Index of the first stored span covering `position`.
    ///
    /// Overlaps resolve to the earliest inserted span, not the tightest or
    /// the one with the earliest start.
    pub fn active_index_at(&self, position: Duration) -> Option<usize> {
        self.spans.iter().position(|span| span.is_active_at(position))
    }

    pub fn active_span_at(&self, position: Duration) -> Option<&SubtitleSpan> {
        self.active_index_at(position).map(|idx| &self.spans[idx])
    }
}

pub trait SubtitleParser: Send + Sync {
    /// Sidecar extension handled by this parser, without the dot.
    fn extension(&self) -> &'static str;

    fn parse(&self, path: &Path) -> Result<SubtitleTrack, SubtitleError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SrtSubtitleParser;

impl SubtitleParser for SrtSubtitleParser {
    fn extension(&self) -> &'static str {
        "srt"
    }

    fn parse(&self, path: &Path) -> Result<SubtitleTrack, SubtitleError> {
        let raw = read_caption_file(path)?;
        let track = parse_srt(path, &raw);
        reject_if_nothing_parsed(path, &raw, track)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LrcSubtitleParser;

impl SubtitleParser for LrcSubtitleParser {
    fn extension(&self) -> &'static str {
        "lrc"
    }

    fn parse(&self, path: &Path) -> Result<SubtitleTrack, SubtitleError> {
        let raw = read_caption_file(path)?;
        let track = parse_lrc(path, &raw);
        reject_if_nothing_parsed(path, &raw, track)
    }
}

/// Parsers tried, in order, when looking for a caption file next to a track.
pub fn default_parsers() -> Vec<Box<dyn SubtitleParser>> {
    vec![Box::new(SrtSubtitleParser), Box::new(LrcSubtitleParser)]
}

/// Parses the first like-named caption file found next to `track_path`.
///
/// Returns `None` when no sidecar exists at all.
pub fn load_sidecar(
    track_path: &Path,
    parsers: &[Box<dyn SubtitleParser>],
) -> Option<Result<SubtitleTrack, SubtitleError>> {
    parsers.iter().find_map(|parser| {
        let candidate = track_path.with_extension(parser.extension());
        candidate
            .is_file()
            .then(|| parser.parse(&candidate))
    })
}

pub fn parse_srt(source: &Path, input: &str) -> SubtitleTrack {
    let mut track = SubtitleTrack::new(source);
    let input = input.trim_start_matches('\u{feff}');

    let mut block: Vec<&str> = Vec::new();
    for raw_line in input.lines().chain(std::iter::once("")) {
        let line = raw_line.trim_end_matches('\r');
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if let Some(span) = srt_block_to_span(&block) {
            track.push(span);
        }
        block.clear();
    }

    track
}

fn srt_block_to_span(block: &[&str]) -> Option<SubtitleSpan> {
    // The counter line is optional; the timing line is either first or second.
    let timing_idx = block
        .iter()
        .take(2)
        .position(|line| line.contains("-->"))?;
    let (start, end) = parse_srt_timing(block[timing_idx])?;
    if end < start {
        return None;
    }
    let text = block[timing_idx + 1..].join("\n");
    Some(SubtitleSpan::new(start, end, text))
}

fn parse_srt_timing(line: &str) -> Option<(Duration, Duration)> {
    let (start_raw, end_raw) = line.split_once("-->")?;
    let start = parse_srt_timestamp(start_raw.trim())?;
    // Some files carry positioning hints after the end timestamp.
    let end = parse_srt_timestamp(end_raw.split_whitespace().next()?)?;
    Some((start, end))
}

fn parse_srt_timestamp(token: &str) -> Option<Duration> {
    let (clock, millis_raw) = token.split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<u64>().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    if millis_raw.is_empty() || millis_raw.len() > 3 {
        return None;
    }
    let millis = millis_raw.parse::<u64>().ok()? * 10_u64.pow(3 - millis_raw.len() as u32);

    // Absurd hour counts make the block unparseable rather than wrapping.
    let total = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1000 + millis)?;
    Some(Duration::from_millis(total))
}

pub fn parse_lrc(source: &Path, input: &str) -> SubtitleTrack {
    let mut timed: Vec<(u32, String)> = Vec::new();

    for raw_line in input.trim_start_matches('\u{feff}').lines() {
        let line = raw_line.trim_end();
        if line.is_empty() || is_metadata_lrc_line(line) {
            continue;
        }

        let (timestamps, text_with_word_tags) = parse_line_timestamps(line);
        let text = strip_word_timestamps(text_with_word_tags);
        for timestamp_ms in timestamps {
            timed.push((timestamp_ms, text.clone()));
        }
    }

    timed.sort_by_key(|(timestamp_ms, _)| *timestamp_ms);

    let mut track = SubtitleTrack::new(source);
    for (idx, (timestamp_ms, text)) in timed.iter().enumerate() {
        let start = Duration::from_millis(u64::from(*timestamp_ms));
        let end = match timed.get(idx + 1) {
            Some((next_ms, _)) => {
                Duration::from_millis(u64::from(*next_ms)).saturating_sub(Duration::from_millis(1))
            }
            None => start + LRC_LAST_LINE_HOLD,
        };
        track.push(SubtitleSpan::new(start, end, text.clone()));
    }
    track
}

fn read_caption_file(path: &Path) -> Result<String, SubtitleError> {
    fs::read_to_string(path).map_err(|source| SubtitleError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn reject_if_nothing_parsed(
    path: &Path,
    raw: &str,
    track: SubtitleTrack,
) -> Result<SubtitleTrack, SubtitleError> {
    if !track.is_empty() {
        return Ok(track);
    }
    let first_content = raw
        .trim_start_matches('\u{feff}')
        .lines()
        .position(|line| !line.trim().is_empty());
    match first_content {
        Some(line_idx) => Err(SubtitleError::Malformed {
            path: path.to_path_buf(),
            line: line_idx + 1,
            reason: String::from("no timed captions found"),
        }),
        None => Ok(track),
    }
}

fn is_metadata_lrc_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    ["[ar:", "[ti:", "[al:", "[by:", "[offset:", "[length:", "[re:", "[ve:"]
        .iter()
        .any(|tag| lower.starts_with(tag))
}

fn parse_line_timestamps(input: &str) -> (Vec<u32>, &str) {
    let mut remaining = input;
    let mut out = Vec::new();

    while remaining.starts_with('[') {
        let Some(closing_idx) = remaining.find(']') else {
            break;
        };
        let Some(ms) = parse_single_lrc_timestamp(&remaining[..=closing_idx]) else {
            break;
        };
        out.push(ms);
        remaining = &remaining[closing_idx + 1..];
    }

    (out, remaining.trim_start())
}

fn parse_single_lrc_timestamp(token: &str) -> Option<u32> {
    let content = token.strip_prefix('[')?.strip_suffix(']')?;
    let (minutes_raw, seconds_part) = content.split_once(':')?;
    let minutes = minutes_raw.parse::<u32>().ok()?;

    let (seconds_raw, fraction_raw) = seconds_part.split_once('.').unwrap_or((seconds_part, ""));
    let seconds = seconds_raw.parse::<u32>().ok()?;
    let hundredths = match fraction_raw.len() {
        0 => 0,
        1 => fraction_raw.parse::<u32>().ok()?.saturating_mul(10),
        _ => fraction_raw.get(..2)?.parse::<u32>().ok()?,
    };

    Some(
        minutes
            .saturating_mul(60_000)
            .saturating_add(seconds.saturating_mul(1000))
            .saturating_add(hundredths.saturating_mul(10)),
    )
}

fn strip_word_timestamps(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(open_idx) = remaining.find('<') {
        out.push_str(&remaining[..open_idx]);
        let tail = &remaining[open_idx..];
        let Some(close_idx) = tail.find('>') else {
            out.push_str(tail);
            remaining = "";
            break;
        };
        let token = &tail[..=close_idx];
        let as_line_tag = format!("[{}]", &token[1..token.len() - 1]);
        if parse_single_lrc_timestamp(&as_line_tag).is_none() {
            out.push_str(token);
        }
        remaining = &tail[close_idx + 1..];
    }
    out.push_str(remaining);

    out.trim().to_string()
}
