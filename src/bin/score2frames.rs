//! `score2frames` - samples a MusicXML score into one JSON visual state per
//! video frame, for an external compositor and encoder.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use log::{info, warn};
use structopt::StructOpt;

use scoresync::timeline::MeasureRange;
use scoresync::{
    build_timeline, parse_file, render_timeline, timeline_to_json, CancelToken, JsonLinesSink,
    SyncConfig, SyncError,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "score2frames", about = "Sampling MusicXML into animation frames")]
struct Opt {
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// The score (.musicxml, .xml or .mxl).
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Output file, one JSON object per line: stream info, then one frame per line.
    #[structopt(short, long, parse(from_os_str))]
    output: PathBuf,

    /// JSON configuration file. Command line flags override its values.
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Frames per second.
    #[structopt(long)]
    fps: Option<f64>,

    /// Worker threads (0 = one per core).
    #[structopt(long)]
    workers: Option<usize>,

    /// First measure to render (1-based).
    #[structopt(long)]
    start_measure: Option<usize>,

    /// Last measure to render (inclusive).
    #[structopt(long)]
    end_measure: Option<usize>,

    /// Also write the event timeline as JSON.
    #[structopt(long, parse(from_os_str))]
    dump_timeline: Option<PathBuf>,
}

fn main() -> Result<(), SyncError> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    if let Err(e) = simple_logger::init_with_level(level) {
        eprintln!("logging disabled: {e}");
    }

    let mut config = match &opt.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(fps) = opt.fps {
        config.fps = fps;
    }
    if let Some(workers) = opt.workers {
        config.stream.workers = workers;
    }
    if opt.start_measure.is_some() || opt.end_measure.is_some() {
        config.timeline.measure_range = Some(MeasureRange {
            start: opt.start_measure.unwrap_or(1),
            end: opt.end_measure,
        });
    }

    let score = parse_file(&opt.input)?;
    info!(
        "{}: {} part(s), {} measure(s), {} note(s)",
        score.title.as_deref().unwrap_or("untitled"),
        score.parts.len(),
        score.measure_count(),
        score.note_count()
    );
    if !score.warnings.is_empty() {
        warn!("{} note(s) skipped while parsing", score.warnings.len());
    }

    // Nothing is written until the timeline is known to be playable
    config.validate()?;
    let timeline = build_timeline(&score, &config.timeline)?;
    if let Some(path) = &opt.dump_timeline {
        let json = timeline_to_json(&timeline)?;
        std::fs::write(path, json).map_err(|source| SyncError::Io {
            path: path.clone(),
            source,
        })?;
    }

    let file = File::create(&opt.output).map_err(|source| SyncError::Io {
        path: opt.output.clone(),
        source,
    })?;
    let mut sink = JsonLinesSink::new(BufWriter::new(file));
    let report = render_timeline(&timeline, &config, &mut sink, &CancelToken::new())?;
    info!(
        "wrote {} of {} frames to {}",
        report.frames_written,
        report.frames_total,
        opt.output.display()
    );
    Ok(())
}
