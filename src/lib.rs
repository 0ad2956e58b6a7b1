//! scoresync: turns a MusicXML score into a frame-accurate stream of
//! character animation states (mouth shape, head tilt, eyes, lyric
//! highlight, tab-highway scroll) that an external renderer composites and
//! muxes with the song's audio.
//!
//! Supports both uncompressed MusicXML (.musicxml) and compressed MXL (.mxl) files.
//!
//! # Example
//! ```no_run
//! use scoresync::{parse_file, render_score, CancelToken, CollectSink, SyncConfig};
//!
//! let score = parse_file("path/to/song.musicxml").unwrap();
//! let mut sink = CollectSink::new();
//! let report = render_score(&score, &SyncConfig::default(), &mut sink, &CancelToken::new()).unwrap();
//! println!("{} frames", report.frames_written);
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod phoneme;
pub mod pipeline;
pub mod sampler;
pub mod sink;
pub mod timeline;
pub mod timemap;
pub mod visual;

use std::path::Path;

use log::info;

pub use config::SyncConfig;
pub use error::{RecoverableNoteError, SyncError, UnmappedPhonemeWarning};
pub use model::*;
pub use mxl::parse_mxl;
pub use parser::parse_musicxml;
pub use phoneme::{MouthShape, PhonemeTable, Vowel};
pub use pipeline::{stream_frames, CancelToken, StreamOptions, StreamReport};
pub use sampler::{Frame, FrameSampler};
pub use sink::{AssetKey, AssetMap, CollectSink, FrameSink, JsonLinesSink, StreamInfo};
pub use timeline::{
    build_timeline, tablature_part, timeline_to_json, BarLine, EventKind, EventPayload,
    MusicalEvent, PartFilter, Timeline, TimelineOptions,
};
pub use timemap::TempoMap;
pub use visual::{FlyingGlyph, FlyingLyricConfig, MapperConfig, VisualState, VisualStateMapper};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, SyncError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, the format is sniffed: ZIP magic means MXL.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Score, SyncError> {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => parse_musicxml(utf8(data)?),
        _ if data.starts_with(b"PK\x03\x04") => parse_mxl(data),
        _ => parse_musicxml(utf8(data)?),
    }
}

fn utf8(data: &[u8]) -> Result<&str, SyncError> {
    let xml = std::str::from_utf8(data)
        .map_err(|e| SyncError::Parse(format!("Invalid UTF-8 in MusicXML file: {e}")))?;
    // A byte order mark would make the XML declaration unparsable
    Ok(xml.strip_prefix('\u{feff}').unwrap_or(xml))
}

/// Convert a parsed score to a JSON string.
pub fn score_to_json(score: &Score) -> Result<String, SyncError> {
    serde_json::to_string_pretty(score)
        .map_err(|e| SyncError::Config(format!("JSON serialization error: {e}")))
}

/// Build the timeline for `score` and stream every frame into `sink`.
///
/// Everything that can fail before the first frame (timeline consistency,
/// frame rate) fails here, before the sink is touched.
pub fn render_score<S: FrameSink + ?Sized>(
    score: &Score,
    config: &SyncConfig,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<StreamReport, SyncError> {
    config.validate()?;
    let timeline = build_timeline(score, &config.timeline)?;
    render_timeline(&timeline, config, sink, cancel)
}

/// Map and sample an already built timeline into `sink`.
pub fn render_timeline<S: FrameSink + ?Sized>(
    timeline: &Timeline,
    config: &SyncConfig,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<StreamReport, SyncError> {
    config.validate()?;
    let mapper = VisualStateMapper::new(timeline, &config.mapper);
    let sampler = FrameSampler::new(&mapper, config.fps)?;
    info!(
        "rendering {} frames ({:.3}s at {} fps, {} unmapped syllables)",
        sampler.frame_count(),
        sampler.duration(),
        sampler.fps(),
        mapper.warnings().len()
    );

    let info = StreamInfo::for_sampler(&sampler).with_audio_offset(timeline.start_offset_seconds());
    stream_frames(&sampler, &info, sink, &config.stream, cancel)
}
