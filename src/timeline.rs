//! Timeline builder: walks the score and produces the absolute-time event
//! sequence that every visual stage consumes.
//!
//! Each part is walked measure by measure with a running tick position.
//! Tied notes are merged into one event, multi-syllable lyric words into one
//! Lyric event, and performance markers become Marker events. The result is
//! sorted by onset, ties broken by score order.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{Lyric, Marker, MarkerSpan, Part, Score, Syllabic, TabPosition, TieState};
use crate::timemap::{lcm, TempoBreakpoint, TempoMap, DEFAULT_TEMPO};

// ═══════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════

/// Options controlling which parts and measures end up on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    /// Tempo used until the score's first tempo directive.
    pub default_bpm: f64,
    /// Parts that contribute events. Tempo directives are read from all parts.
    pub parts: PartFilter,
    /// Restrict the timeline to a range of measures; onsets are re-based to
    /// the head of the first measure in the range.
    pub measure_range: Option<MeasureRange>,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            default_bpm: DEFAULT_TEMPO,
            parts: PartFilter::All,
            measure_range: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartFilter {
    #[default]
    All,
    /// Only the parts with these ids.
    Only(Vec<String>),
    /// The single part that carries the tablature, see [`tablature_part`].
    Tablature,
}

impl PartFilter {
    /// Whether each part of `score`, by index, contributes events.
    pub fn select(&self, score: &Score) -> Vec<bool> {
        match self {
            PartFilter::All => vec![true; score.parts.len()],
            PartFilter::Only(ids) => score
                .parts
                .iter()
                .map(|p| ids.iter().any(|id| *id == p.id))
                .collect(),
            PartFilter::Tablature => {
                let chosen = tablature_part(score);
                (0..score.parts.len()).map(|i| Some(i) == chosen).collect()
            }
        }
    }
}

/// Index of the tablature part: the first part named like one ("TAB",
/// "Guitar Tab"), otherwise the part with the most string/fret notes.
pub fn tablature_part(score: &Score) -> Option<usize> {
    if let Some(i) = score
        .parts
        .iter()
        .position(|p| p.name.to_lowercase().contains("tab"))
    {
        return Some(i);
    }
    score
        .parts
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let tabs = p
                .measures
                .iter()
                .flat_map(|m| &m.notes)
                .filter(|n| n.tab.is_some())
                .count();
            (tabs, i)
        })
        .filter(|&(tabs, _)| tabs > 0)
        // Earliest part wins a tie
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, i)| i)
}

/// Measures by position in the first part, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureRange {
    pub start: usize,
    pub end: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════

/// Position of the note an event came from. Used to order simultaneous events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventOrder {
    pub part: usize,
    pub measure: usize,
    pub note: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Note,
    Lyric,
    TabPosition,
    Marker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Note { midi: i32, voice: u32, staff: u32 },
    Lyric(LyricWord),
    TabPosition { position: TabPosition, midi: i32 },
    /// `timed` is false when the marker had no explicit duration; its
    /// event duration is then zero.
    Marker { marker: Marker, timed: bool },
}

/// A whole lyric word, merged from its syllables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricWord {
    pub text: String,
    pub voice: u32,
    pub syllables: Vec<SyllableSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyllableSpan {
    pub text: String,
    pub onset_seconds: f64,
    pub duration_seconds: f64,
    /// Pitch the syllable is sung on
    pub midi: i32,
    /// Position inside its measure, in quarter notes
    pub beat_in_measure: f64,
}

impl SyllableSpan {
    pub fn end_seconds(&self) -> f64 {
        self.onset_seconds + self.duration_seconds
    }
}

/// One time-stamped musical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalEvent {
    pub onset_seconds: f64,
    pub duration_seconds: f64,
    pub order: EventOrder,
    pub payload: EventPayload,
}

impl MusicalEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Note { .. } => EventKind::Note,
            EventPayload::Lyric(_) => EventKind::Lyric,
            EventPayload::TabPosition { .. } => EventKind::TabPosition,
            EventPayload::Marker { .. } => EventKind::Marker,
        }
    }

    pub fn end_seconds(&self) -> f64 {
        self.onset_seconds + self.duration_seconds
    }
}

/// A measure start on the timeline, with the times of its later beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarLine {
    /// Measure number as written in the score
    pub measure: String,
    pub onset_seconds: f64,
    /// Beats after the downbeat, in the time signature's beat unit
    pub beat_seconds: Vec<f64>,
}

/// The ordered event sequence of a score, plus the tempo map it was timed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<MusicalEvent>,
    tempo_map: TempoMap,
    start_offset_seconds: f64,
    score_end_seconds: f64,
    #[serde(default)]
    bars: Vec<BarLine>,
}

impl Timeline {
    /// Wrap already-timed events, e.g. from another source than musicxml.
    /// Events are put into timeline order; the tempo map is a constant
    /// default tempo.
    pub fn from_events(mut events: Vec<MusicalEvent>) -> Self {
        sort_events(&mut events);
        let score_end_seconds = events
            .iter()
            .map(MusicalEvent::end_seconds)
            .fold(0.0, f64::max);
        Self {
            events,
            tempo_map: TempoMap::constant(1, DEFAULT_TEMPO),
            start_offset_seconds: 0.0,
            score_end_seconds,
            bars: Vec::new(),
        }
    }

    pub fn events(&self) -> &[MusicalEvent] {
        &self.events
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    /// End of the last event; the span the frame sampler covers.
    pub fn duration(&self) -> f64 {
        self.events
            .iter()
            .map(MusicalEvent::end_seconds)
            .fold(0.0, f64::max)
    }

    /// End of the last measure (including trailing rests), relative to the
    /// timeline origin.
    pub fn score_end_seconds(&self) -> f64 {
        self.score_end_seconds
    }

    /// Seconds from the start of the score to the timeline origin. Non-zero
    /// when a measure range was selected; used to trim the audio track.
    pub fn start_offset_seconds(&self) -> f64 {
        self.start_offset_seconds
    }

    /// Bar and beat grid of the first part, for drawing a highway.
    pub fn bars(&self) -> &[BarLine] {
        &self.bars
    }

    /// Tempo in quarter-note BPM at `t` seconds on this timeline.
    pub fn bpm_at(&self, t: f64) -> f64 {
        self.tempo_map.bpm_at_seconds(t + self.start_offset_seconds)
    }

    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &MusicalEvent> + '_ {
        self.events.iter().filter(move |e| e.kind() == kind)
    }

    pub fn has_kind(&self, kind: EventKind) -> bool {
        self.events_of(kind).next().is_some()
    }

    /// All lyric words concatenated in timeline order.
    pub fn lyrics_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Lyric(word) => Some(word.text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Serialize a timeline to JSON.
pub fn timeline_to_json(timeline: &Timeline) -> Result<String, SyncError> {
    serde_json::to_string_pretty(timeline)
        .map_err(|e| SyncError::Config(format!("JSON serialization error: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════

/// Convert a parsed score into its ordered event timeline.
pub fn build_timeline(score: &Score, options: &TimelineOptions) -> Result<Timeline, SyncError> {
    if !(options.default_bpm.is_finite() && options.default_bpm > 0.0) {
        return Err(SyncError::Config(format!(
            "default_bpm must be positive, got {}",
            options.default_bpm
        )));
    }

    let tpq = ticks_per_quarter(score)?;
    let layouts = score
        .parts
        .iter()
        .map(|p| measure_starts(p, tpq))
        .collect::<Result<Vec<_>, _>>()?;
    let tempo_map = build_tempo_map(score, &layouts, tpq, options.default_bpm)?;
    let window = clip_window(&layouts, options.measure_range)?;
    let origin = tempo_map.seconds_at(window.start);

    let mut emitter = Emitter {
        tempo: &tempo_map,
        window,
        origin,
        events: Vec::new(),
    };
    let selected = options.parts.select(score);
    for (pi, part) in score.parts.iter().enumerate() {
        if !selected[pi] {
            continue;
        }
        walk_part(pi, part, &layouts[pi], tpq, &mut emitter)?;
    }
    let bars = match (score.parts.first(), layouts.first()) {
        (Some(part), Some(starts)) => bar_lines(part, starts, tpq, &emitter),
        _ => Vec::new(),
    };

    let mut events = emitter.events;
    sort_events(&mut events);

    let score_end_tick = layouts
        .iter()
        .filter_map(|l| l.last().copied())
        .max()
        .unwrap_or(0)
        .min(window.end);
    let score_end_seconds = (tempo_map.seconds_at(score_end_tick) - origin).max(0.0);

    let timeline = Timeline {
        events,
        tempo_map,
        start_offset_seconds: origin,
        score_end_seconds,
        bars,
    };
    info!(
        "timeline: {} events, {:.3}s (score end {:.3}s)",
        timeline.events.len(),
        timeline.duration(),
        timeline.score_end_seconds
    );
    Ok(timeline)
}

fn sort_events(events: &mut [MusicalEvent]) {
    events.sort_by(|a, b| {
        a.onset_seconds
            .total_cmp(&b.onset_seconds)
            .then_with(|| a.order.cmp(&b.order))
            .then_with(|| a.kind().cmp(&b.kind()))
    });
}

/// Score-wide tick resolution: every divisions value and every time
/// signature denominator divides it, so all positions are whole ticks.
fn ticks_per_quarter(score: &Score) -> Result<u64, SyncError> {
    let mut tpq = 1;
    for part in &score.parts {
        for (mi, m) in part.measures.iter().enumerate() {
            tpq = lcm(tpq, m.divisions as u64)
                .and_then(|t| lcm(t, m.time.beat_type as u64))
                .ok_or_else(|| {
                    inconsistency(
                        mi,
                        format!(
                            "part {}: divisions {} leave no common tick grid",
                            part.id, m.divisions
                        ),
                    )
                })?;
        }
    }
    Ok(tpq)
}

/// Start tick of every measure of a part; the last entry is the part's end.
fn measure_starts(part: &Part, tpq: u64) -> Result<Vec<u64>, SyncError> {
    let mut starts = Vec::with_capacity(part.measures.len() + 1);
    let mut tick: u64 = 0;
    for (mi, measure) in part.measures.iter().enumerate() {
        starts.push(tick);
        let scale = tpq / measure.divisions.max(1) as u64;
        let content = (measure.extent as u64).checked_mul(scale);
        let nominal = (measure.time.beats as u64)
            .checked_mul(4)
            .and_then(|q| q.checked_mul(tpq))
            .map(|t| t / measure.time.beat_type.max(1) as u64);
        // Pickup measures only last as long as their content
        let length = match (content, nominal) {
            (Some(content), _) if measure.implicit => Some(content),
            (Some(content), Some(nominal)) => Some(content.max(nominal)),
            _ => None,
        };
        tick = length
            .and_then(|len| tick.checked_add(len))
            .ok_or_else(|| {
                inconsistency(
                    mi,
                    format!("part {}: measure {} overflows the tick range", part.id, measure.number),
                )
            })?;
    }
    starts.push(tick);
    Ok(starts)
}

/// Bar lines of the measures inside the window, with their beats.
fn bar_lines(part: &Part, starts: &[u64], tpq: u64, out: &Emitter) -> Vec<BarLine> {
    part.measures
        .iter()
        .zip(starts.windows(2))
        .filter(|(_, span)| out.window.contains(span[0]))
        .map(|(measure, span)| {
            let beat = (tpq.saturating_mul(4) / measure.time.beat_type.max(1) as u64).max(1);
            let beat_seconds = (1..measure.time.beats as u64)
                .map(|i| span[0].saturating_add(i.saturating_mul(beat)))
                .take_while(|&tick| tick < span[1])
                .map(|tick| out.seconds(tick))
                .collect();
            BarLine {
                measure: measure.number.clone(),
                onset_seconds: out.seconds(span[0]),
                beat_seconds,
            }
        })
        .collect()
}

fn build_tempo_map(
    score: &Score,
    layouts: &[Vec<u64>],
    tpq: u64,
    default_bpm: f64,
) -> Result<TempoMap, SyncError> {
    let mut directives: BTreeMap<u64, f64> = BTreeMap::new();
    for (pi, part) in score.parts.iter().enumerate() {
        for (mi, measure) in part.measures.iter().enumerate() {
            let Some(bpm) = measure.tempo_bpm else {
                continue;
            };
            let tick = layouts[pi][mi];
            let existing = *directives.entry(tick).or_insert(bpm);
            if (existing - bpm).abs() > 1e-9 {
                warn!(
                    "part {} measure {}: tempo {bpm} conflicts with {existing} from an earlier part",
                    part.id, measure.number
                );
            }
        }
    }
    directives.entry(0).or_insert(default_bpm);

    let mut breakpoints: Vec<TempoBreakpoint> = Vec::with_capacity(directives.len());
    for (tick, bpm) in directives {
        // Repeated directives of the same tempo add nothing
        if breakpoints.last().map_or(false, |bp| (bp.bpm() - bpm).abs() < 1e-9) {
            continue;
        }
        breakpoints.push(TempoBreakpoint::from_bpm(tick, bpm));
    }
    TempoMap::new(tpq, breakpoints)
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: u64,
    end: u64,
}

impl Window {
    fn contains(&self, tick: u64) -> bool {
        tick >= self.start && tick < self.end
    }
}

fn clip_window(layouts: &[Vec<u64>], range: Option<MeasureRange>) -> Result<Window, SyncError> {
    let Some(range) = range else {
        return Ok(Window {
            start: 0,
            end: u64::MAX,
        });
    };
    let starts = layouts.first().map(Vec::as_slice).unwrap_or(&[]);
    let measure_count = starts.len().saturating_sub(1);
    let first = range.start.max(1);
    if first > measure_count {
        return Err(SyncError::Config(format!(
            "measure range starts at {first} but the score has {measure_count} measures"
        )));
    }
    let end = match range.end {
        Some(last) if last < first => {
            return Err(SyncError::Config(format!(
                "measure range end {last} is before its start {first}"
            )))
        }
        Some(last) => starts[last.min(measure_count)],
        None => u64::MAX,
    };
    Ok(Window {
        start: starts[first - 1],
        end,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Part walk
// ═══════════════════════════════════════════════════════════════════════

/// Collects events, converting ticks to seconds relative to the origin and
/// dropping anything outside the window.
struct Emitter<'a> {
    tempo: &'a TempoMap,
    window: Window,
    origin: f64,
    events: Vec<MusicalEvent>,
}

impl Emitter<'_> {
    fn seconds(&self, tick: u64) -> f64 {
        self.tempo.seconds_at(tick) - self.origin
    }

    fn push(&mut self, onset: u64, end: u64, order: EventOrder, payload: EventPayload) {
        let onset_seconds = self.seconds(onset);
        self.events.push(MusicalEvent {
            onset_seconds,
            duration_seconds: self.seconds(end) - onset_seconds,
            order,
            payload,
        });
    }

    fn marker(&mut self, marker: Marker, tick: u64, order: EventOrder) {
        if !self.window.contains(tick) {
            return;
        }
        let onset_seconds = self.seconds(tick);
        let duration_seconds = match marker.span() {
            None => 0.0,
            Some(MarkerSpan::Seconds(s)) => s,
            Some(MarkerSpan::Beats(b)) => {
                let to = self.tempo.advance_quarters(tick, b);
                self.tempo.seconds_at_fractional(to) - self.tempo.seconds_at(tick)
            }
        };
        self.events.push(MusicalEvent {
            onset_seconds,
            duration_seconds,
            order,
            payload: EventPayload::Marker {
                marker,
                timed: marker.span().is_some(),
            },
        });
    }
}

/// A sounding note, possibly made of several tied note records.
struct TieChain {
    onset: u64,
    end: u64,
    order: EventOrder,
    midi: i32,
    voice: u32,
    staff: u32,
    tab: Option<TabPosition>,
    /// Onset tick, beat inside the measure, syllable, origin
    lyrics: Vec<(u64, f64, Lyric, EventOrder)>,
}

struct SyllableTicks {
    text: String,
    onset: u64,
    end: u64,
    order: EventOrder,
    midi: i32,
    beat: f64,
}

/// Groups syllables into words per (voice, lyric line).
#[derive(Default)]
struct WordAssembler {
    open: BTreeMap<(u32, u32), Vec<SyllableTicks>>,
}

impl WordAssembler {
    fn feed(&mut self, voice: u32, lyric: Lyric, syl: SyllableTicks, out: &mut Emitter) {
        let key = (voice, lyric.number);
        match lyric.syllabic {
            Syllabic::Single => {
                if let Some(word) = self.open.remove(&key) {
                    debug!("word ending in '{}' was never closed", last_text(&word));
                    emit_word(voice, word, out);
                }
                emit_word(voice, vec![syl], out);
            }
            Syllabic::Begin => {
                if let Some(word) = self.open.insert(key, vec![syl]) {
                    debug!("word ending in '{}' was never closed", last_text(&word));
                    emit_word(voice, word, out);
                }
            }
            Syllabic::Middle => match self.open.get_mut(&key) {
                Some(word) => word.push(syl),
                None => {
                    debug!("syllable '{}' continues no word; starting one", syl.text);
                    self.open.insert(key, vec![syl]);
                }
            },
            Syllabic::End => {
                let mut word = self.open.remove(&key).unwrap_or_else(|| {
                    debug!("syllable '{}' ends no word", syl.text);
                    Vec::new()
                });
                word.push(syl);
                emit_word(voice, word, out);
            }
        }
    }

    fn flush(&mut self, out: &mut Emitter) {
        for ((voice, _), word) in std::mem::take(&mut self.open) {
            emit_word(voice, word, out);
        }
    }
}

fn last_text(word: &[SyllableTicks]) -> &str {
    word.last().map_or("", |s| s.text.as_str())
}

fn emit_word(voice: u32, syllables: Vec<SyllableTicks>, out: &mut Emitter) {
    let kept: Vec<SyllableTicks> = syllables
        .into_iter()
        .filter(|s| out.window.contains(s.onset))
        .collect();
    let (Some(first), Some(last_end)) = (kept.first(), kept.iter().map(|s| s.end).max()) else {
        return;
    };
    let (onset, order) = (first.onset, first.order);
    let spans: Vec<SyllableSpan> = kept
        .iter()
        .map(|s| {
            let onset_seconds = out.seconds(s.onset);
            SyllableSpan {
                text: s.text.clone(),
                onset_seconds,
                duration_seconds: out.seconds(s.end) - onset_seconds,
                midi: s.midi,
                beat_in_measure: s.beat,
            }
        })
        .collect();
    let text = kept.iter().map(|s| s.text.as_str()).collect();
    out.push(
        onset,
        last_end,
        order,
        EventPayload::Lyric(LyricWord {
            text,
            voice,
            syllables: spans,
        }),
    );
}

fn emit_chain(chain: TieChain, words: &mut WordAssembler, out: &mut Emitter) {
    if out.window.contains(chain.onset) {
        out.push(
            chain.onset,
            chain.end,
            chain.order,
            EventPayload::Note {
                midi: chain.midi,
                voice: chain.voice,
                staff: chain.staff,
            },
        );
        if let Some(position) = chain.tab {
            out.push(
                chain.onset,
                chain.end,
                chain.order,
                EventPayload::TabPosition {
                    position,
                    midi: chain.midi,
                },
            );
        }
    }
    for (tick, beat, lyric, order) in chain.lyrics {
        let syl = SyllableTicks {
            text: lyric.text.clone(),
            onset: tick,
            end: chain.end,
            order,
            midi: chain.midi,
            beat,
        };
        words.feed(chain.voice, lyric, syl, out);
    }
}

fn inconsistency(measure_index: usize, message: String) -> SyncError {
    SyncError::TimelineInconsistency {
        measure: measure_index + 1,
        message,
    }
}

fn walk_part(
    pi: usize,
    part: &Part,
    starts: &[u64],
    tpq: u64,
    out: &mut Emitter,
) -> Result<(), SyncError> {
    // Open tie chains keyed by (voice, staff, MIDI pitch)
    let mut chains: BTreeMap<(u32, u32, i32), TieChain> = BTreeMap::new();
    let mut words = WordAssembler::default();

    for (mi, measure) in part.measures.iter().enumerate() {
        let start = starts[mi];
        let scale = tpq / measure.divisions.max(1) as u64;

        for (ni, note) in measure.notes.iter().enumerate() {
            let tick = start.saturating_add((note.offset as u64).saturating_mul(scale));
            let end = tick.saturating_add((note.duration as u64).saturating_mul(scale));
            let order = EventOrder {
                part: pi,
                measure: mi,
                note: ni,
            };

            for marker in &note.markers {
                out.marker(*marker, tick, order);
            }

            // Rests only advance time, which the offsets already account for
            let Some(midi) = note.pitch.as_ref().and_then(|p| p.to_midi()) else {
                continue;
            };
            let key = (note.voice, note.staff, midi);
            let beat = (tick - start) as f64 / tpq as f64;
            let lyric = note.lyric.clone().map(|l| (tick, beat, l, order));

            match note.tie {
                TieState::None | TieState::Start => {
                    if chains.contains_key(&key) {
                        return Err(inconsistency(
                            mi,
                            format!(
                                "part {}: note {midi} in voice {} starts while a tie on it is still open",
                                part.id, note.voice
                            ),
                        ));
                    }
                    let chain = TieChain {
                        onset: tick,
                        end,
                        order,
                        midi,
                        voice: note.voice,
                        staff: note.staff,
                        tab: note.tab,
                        lyrics: lyric.into_iter().collect(),
                    };
                    if note.tie == TieState::Start {
                        chains.insert(key, chain);
                    } else {
                        emit_chain(chain, &mut words, out);
                    }
                }
                TieState::Continue | TieState::Stop => {
                    let Some(mut chain) = chains.remove(&key) else {
                        return Err(inconsistency(
                            mi,
                            format!(
                                "part {}: tie {} on note {midi} in voice {} without a matching start",
                                part.id,
                                if note.tie == TieState::Stop { "stop" } else { "continue" },
                                note.voice
                            ),
                        ));
                    };
                    chain.end += end - tick;
                    chain.lyrics.extend(lyric);
                    if note.tie == TieState::Continue {
                        chains.insert(key, chain);
                    } else {
                        emit_chain(chain, &mut words, out);
                    }
                }
            }
        }

        for (k, placed) in measure.markers.iter().enumerate() {
            let order = EventOrder {
                part: pi,
                measure: mi,
                note: measure.notes.len() + k,
            };
            let tick = start.saturating_add((placed.offset as u64).saturating_mul(scale));
            out.marker(placed.marker, tick, order);
        }
    }

    if let Some(chain) = chains.into_values().next() {
        return Err(inconsistency(
            chain.order.measure,
            format!(
                "part {}: tie on note {} in voice {} is never stopped",
                part.id, chain.midi, chain.voice
            ),
        ));
    }
    words.flush(out);
    Ok(())
}
