//! MusicXML parser: converts MusicXML XML into the Score data model.
//!
//! Structural problems (wrong root, no part list, no measures) are fatal.
//! Problems confined to a single note or directive are recorded as
//! [`RecoverableNoteError`]s and parsing continues with the next element.

use log::{debug, warn};
use roxmltree::{Document, Node};

use crate::error::{RecoverableNoteError, SyncError};
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score, SyncError> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| SyncError::Parse(format!("XML parse error: {e}")))?;
    let root = doc.root_element();

    // Verify this is a score-partwise document
    if root.tag_name().name() != "score-partwise" {
        return Err(SyncError::Parse(format!(
            "Unsupported root element: '{}'. Only 'score-partwise' is supported.",
            root.tag_name().name()
        )));
    }

    let mut score = Score::new();
    score.version = root.attribute("version").map(String::from);
    let mut has_part_list = false;

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut score),
            "movement-title" => {
                if score.title.is_none() {
                    score.title = text_of(&child);
                }
            }
            "identification" => parse_identification(&child, &mut score),
            "credit" => parse_credit(&child, &mut score),
            "part-list" => {
                has_part_list = true;
                parse_part_list(&child, &mut score);
            }
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    if !has_part_list {
        return Err(SyncError::Parse("missing <part-list>".to_string()));
    }
    let measures: usize = score.parts.iter().map(|p| p.measures.len()).sum();
    if measures == 0 {
        return Err(SyncError::Parse("score contains no measures".to_string()));
    }

    for w in &score.warnings {
        warn!("skipped: {w}");
    }
    debug!(
        "parsed {} part(s), {} measure(s), {} note(s)",
        score.parts.len(),
        score.measure_count(),
        score.note_count()
    );

    Ok(score)
}

// ─── Work / identification / credits ────────────────────────────────

fn parse_work(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" && score.title.is_none() {
            score.title = text_of(&child);
        }
    }
}

fn parse_identification(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "creator"
            && child.attribute("type") == Some("composer")
            && score.composer.is_none()
        {
            score.composer = text_of(&child);
        }
    }
}

fn parse_credit(node: &Node, score: &mut Score) {
    let mut credit_type = String::new();
    let mut credit_text = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "credit-type" => {
                credit_type = child.text().unwrap_or("").trim().to_string();
            }
            "credit-words" => {
                let text = child.text().unwrap_or("").trim();
                if !text.is_empty() {
                    if !credit_text.is_empty() {
                        credit_text.push('\n');
                    }
                    credit_text.push_str(text);
                }
            }
            _ => {}
        }
    }

    // <credit> values take priority over <work-title> and <creator>.
    if credit_text.is_empty() {
        return;
    }
    match credit_type.as_str() {
        "title" => score.title = Some(credit_text),
        "composer" => score.composer = Some(credit_text),
        _ => {}
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "score-part" {
            let id = child.attribute("id").unwrap_or("").to_string();
            let name = child
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "part-name")
                .and_then(|n| text_of(&n))
                .unwrap_or_default();
            score.parts.push(Part {
                id,
                name,
                measures: Vec::new(),
            });
        }
    }
}

// ─── Part (measures) ─────────────────────────────────────────────────

/// Attributes carried from one measure to the next within a part.
struct PartState {
    divisions: u32,
    time: TimeSignature,
    /// Ties opened by notes that were skipped as malformed
    broken_ties: Vec<BrokenTie>,
}

/// Where a skipped note left a tie open. `midi` is `None` when the pitch
/// itself was unreadable, which then matches any pitch in the voice.
struct BrokenTie {
    voice: u32,
    staff: u32,
    midi: Option<i32>,
}

impl PartState {
    /// Demote a tie stop or continue whose start was skipped, so the chain
    /// restarts at this note instead of pointing at nothing.
    fn repair_tie(&mut self, note: &mut Note, issues: &mut Issues) {
        if !matches!(note.tie, TieState::Stop | TieState::Continue) {
            return;
        }
        let midi = note.pitch.as_ref().and_then(|p| p.to_midi());
        let Some(i) = self.broken_ties.iter().position(|b| {
            b.voice == note.voice && b.staff == note.staff && (b.midi.is_none() || b.midi == midi)
        }) else {
            return;
        };
        self.broken_ties.remove(i);
        let (was, now) = match note.tie {
            TieState::Continue => ("continue", TieState::Start),
            _ => ("stop", TieState::None),
        };
        note.tie = now;
        issues.push(format!(
            "tie {was} in voice {} follows a skipped note, treated as a new note",
            note.voice
        ));
    }
}

/// Collects recoverable problems for the measure being parsed.
struct Issues<'a> {
    part: &'a str,
    measure: String,
    list: Vec<RecoverableNoteError>,
}

impl Issues<'_> {
    fn push(&mut self, reason: impl Into<String>) {
        self.list.push(RecoverableNoteError {
            part: self.part.to_string(),
            measure: self.measure.clone(),
            reason: reason.into(),
        });
    }
}

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("").to_string();

    let Some(part_idx) = score.parts.iter().position(|p| p.id == part_id) else {
        score.warnings.push(RecoverableNoteError {
            part: part_id,
            measure: String::new(),
            reason: "part is not declared in <part-list>".to_string(),
        });
        return;
    };

    let mut state = PartState {
        divisions: 1,
        time: TimeSignature::default(),
        broken_ties: Vec::new(),
    };
    let mut measures = Vec::new();
    for (i, child) in node
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "measure")
        .enumerate()
    {
        let number = child
            .attribute("number")
            .map(String::from)
            .unwrap_or_else(|| (i + 1).to_string());
        let mut issues = Issues {
            part: &part_id,
            measure: number.clone(),
            list: Vec::new(),
        };
        measures.push(parse_measure(&child, number, &mut state, &mut issues));
        score.warnings.append(&mut issues.list);
    }
    score.parts[part_idx].measures.extend(measures);
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(
    node: &Node,
    number: String,
    state: &mut PartState,
    issues: &mut Issues,
) -> Measure {
    let implicit = node.attribute("implicit") == Some("yes");

    let mut notes = Vec::new();
    let mut markers = Vec::new();
    let mut pending: Vec<(u32, Marker)> = Vec::new();
    let mut sound_tempo = None;
    let mut metronome_tempo = None;

    // Position cursor in divisions; <backup> moves it back for the next voice.
    let mut cursor: u32 = 0;
    let mut extent: u32 = 0;
    let mut last_onset: u32 = 0;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => parse_attributes(&child, state, issues),
            "note" => match parse_note(&child) {
                Ok(Some(mut note)) => {
                    state.repair_tie(&mut note, issues);
                    if note.chord {
                        note.offset = last_onset;
                    } else {
                        note.offset = cursor;
                        last_onset = cursor;
                        cursor = cursor.saturating_add(note.duration);
                        note.markers = pending.drain(..).map(|(_, m)| m).collect();
                    }
                    extent = extent.max(note.offset.saturating_add(note.duration));
                    notes.push(note);
                }
                Ok(None) => debug!("measure {}: grace note ignored", issues.measure),
                Err(defect) => {
                    issues.push(defect.reason);
                    if matches!(defect.tie, TieState::Start | TieState::Continue) {
                        state.broken_ties.push(BrokenTie {
                            voice: defect.voice,
                            staff: defect.staff,
                            midi: defect.midi,
                        });
                    }
                    if let (Some(d), false) = (defect.duration, defect.chord) {
                        last_onset = cursor;
                        cursor = cursor.saturating_add(d);
                        extent = extent.max(cursor);
                    }
                }
            },
            "backup" => match duration_of(&child) {
                Some(d) => cursor = cursor.saturating_sub(d),
                None => issues.push("<backup> without a valid <duration>"),
            },
            "forward" => match duration_of(&child) {
                Some(d) => {
                    cursor = cursor.saturating_add(d);
                    extent = extent.max(cursor);
                }
                None => issues.push("<forward> without a valid <duration>"),
            },
            "direction" => {
                let dir = parse_direction(&child);
                if dir.sound_tempo.is_some() {
                    sound_tempo = dir.sound_tempo;
                }
                if dir.metronome_tempo.is_some() {
                    metronome_tempo = dir.metronome_tempo;
                }
                for m in dir.markers {
                    match m {
                        Ok(marker) => pending.push((cursor, marker)),
                        Err(reason) => issues.push(reason),
                    }
                }
                for reason in dir.problems {
                    issues.push(reason);
                }
            }
            "sound" => {
                // <sound> can appear directly in <measure> (not inside <direction>)
                match parse_tempo_attr(&child) {
                    Ok(Some(t)) => sound_tempo = Some(t),
                    Ok(None) => {}
                    Err(reason) => issues.push(reason),
                }
            }
            _ => {}
        }
    }

    markers.extend(
        pending
            .into_iter()
            .map(|(offset, marker)| PlacedMarker { offset, marker }),
    );

    Measure {
        number,
        implicit,
        divisions: state.divisions,
        time: state.time,
        tempo_bpm: sound_tempo.or(metronome_tempo),
        notes,
        markers,
        extent,
    }
}

// ─── Attributes ──────────────────────────────────────────────────────

/// Largest accepted `<divisions>`; notation programs stay far below it.
const MAX_DIVISIONS: u32 = 100_000;

fn parse_attributes(node: &Node, state: &mut PartState, issues: &mut Issues) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => match parse_u32(&child) {
                Some(d) if d > 0 && d <= MAX_DIVISIONS => state.divisions = d,
                _ => issues.push(format!(
                    "invalid <divisions> {:?}, keeping {}",
                    child.text().unwrap_or(""),
                    state.divisions
                )),
            },
            "time" => match parse_time(&child) {
                Some(ts) => state.time = ts,
                None => {
                    // <senza-misura/> and friends carry no beats
                    if child
                        .children()
                        .any(|n| n.is_element() && n.tag_name().name() == "beats")
                    {
                        issues.push("invalid <time> signature");
                    }
                }
            },
            _ => {}
        }
    }
}

fn parse_time(node: &Node) -> Option<TimeSignature> {
    let mut beats = None;
    let mut beat_type = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            // Compound numerators such as "3+2" are summed
            "beats" => {
                beats = child.text().and_then(|t| {
                    t.split('+')
                        .map(|p| p.trim().parse::<u32>().ok())
                        .sum::<Option<u32>>()
                })
            }
            "beat-type" => beat_type = parse_u32(&child),
            _ => {}
        }
    }
    match (beats, beat_type) {
        (Some(b), Some(bt)) if b > 0 && bt > 0 => Some(TimeSignature {
            beats: b,
            beat_type: bt,
        }),
        _ => None,
    }
}

// ─── Note ────────────────────────────────────────────────────────────

/// A note that could not be parsed. `duration` is kept when it was
/// readable so the measure cursor still advances.
struct NoteDefect {
    reason: String,
    duration: Option<u32>,
    chord: bool,
    voice: u32,
    staff: u32,
    tie: TieState,
    midi: Option<i32>,
}

/// Voice, staff and tie flags of a `<note>`, read ahead of the rest so a
/// skipped note still reports them.
struct NoteIdentity {
    voice: u32,
    staff: u32,
    tie: TieState,
    midi: Option<i32>,
}

impl NoteIdentity {
    fn read(node: &Node) -> Self {
        let mut id = NoteIdentity {
            voice: 1,
            staff: 1,
            tie: TieState::None,
            midi: None,
        };
        let mut tie_start = false;
        let mut tie_stop = false;
        let mut mark = |kind: Option<&str>| match kind {
            Some("start") => tie_start = true,
            Some("stop") => tie_stop = true,
            Some("continue") => {
                tie_start = true;
                tie_stop = true;
            }
            _ => {}
        };
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "voice" => id.voice = parse_u32(&child).unwrap_or(1),
                "staff" => id.staff = parse_u32(&child).unwrap_or(1),
                "pitch" => {
                    id.midi = parse_pitch(&child, "step", "octave")
                        .ok()
                        .and_then(|p| p.to_midi())
                }
                "tie" => mark(child.attribute("type")),
                "notations" => child
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "tied")
                    .for_each(|t| mark(t.attribute("type"))),
                _ => {}
            }
        }
        id.tie = TieState::from_flags(tie_start, tie_stop);
        id
    }

    fn defect(&self, reason: String, duration: Option<u32>, chord: bool) -> NoteDefect {
        NoteDefect {
            reason,
            duration,
            chord,
            voice: self.voice,
            staff: self.staff,
            tie: self.tie,
            midi: self.midi,
        }
    }
}

/// Parse a `<note>`. Grace notes take no time and yield `Ok(None)`.
fn parse_note(node: &Node) -> Result<Option<Note>, NoteDefect> {
    let has = |name: &str| {
        node.children()
            .any(|n| n.is_element() && n.tag_name().name() == name)
    };
    if has("grace") {
        return Ok(None);
    }
    let chord = has("chord");
    let id = NoteIdentity::read(node);

    let duration = match node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "duration")
    {
        Some(d) => parse_u32(&d).ok_or_else(|| {
            id.defect(
                format!("invalid <duration> {:?}", d.text().unwrap_or("")),
                None,
                chord,
            )
        })?,
        None => return Err(id.defect("<note> without <duration>".to_string(), None, chord)),
    };
    let defect = |reason: String| id.defect(reason, Some(duration), chord);

    let mut note = Note {
        pitch: None,
        duration,
        offset: 0,
        voice: id.voice,
        staff: id.staff,
        chord,
        tie: id.tie,
        lyric: None,
        tab: None,
        markers: Vec::new(),
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => note.pitch = Some(parse_pitch(&child, "step", "octave").map_err(defect)?),
            "unpitched" => {
                note.pitch = Some(
                    parse_pitch(&child, "display-step", "display-octave").map_err(defect)?,
                )
            }
            "notations" => {
                for nc in child
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "technical")
                {
                    note.tab = parse_technical(&nc).map_err(defect)?;
                }
            }
            "lyric" => {
                // Only the first lyric line carrying text is kept
                if note.lyric.is_none() {
                    note.lyric = parse_lyric(&child);
                }
            }
            _ => {}
        }
    }

    Ok(Some(note))
}

fn parse_pitch(node: &Node, step_tag: &str, octave_tag: &str) -> Result<Pitch, String> {
    let mut step = None;
    let mut octave = None;
    let mut alter = None;
    for child in node.children().filter(|n| n.is_element()) {
        let name = child.tag_name().name();
        if name == step_tag {
            step = child.text().map(|t| t.trim().to_string());
        } else if name == octave_tag {
            octave = Some(
                child
                    .text()
                    .and_then(|t| t.trim().parse::<i32>().ok())
                    .ok_or_else(|| format!("invalid <{octave_tag}> {:?}", child.text().unwrap_or("")))?,
            );
        } else if name == "alter" {
            alter = Some(
                parse_f64(&child)
                    .ok_or_else(|| format!("invalid <alter> {:?}", child.text().unwrap_or("")))?,
            );
        }
    }
    let step = step.ok_or_else(|| format!("pitch without <{step_tag}>"))?;
    let pitch = Pitch {
        step,
        octave: octave.ok_or_else(|| format!("pitch without <{octave_tag}>"))?,
        alter,
    };
    if pitch.to_midi().is_none() {
        return Err(format!("unknown pitch step '{}'", pitch.step));
    }
    Ok(pitch)
}

fn parse_technical(node: &Node) -> Result<Option<TabPosition>, String> {
    let mut string = None;
    let mut fret = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "string" => {
                string = Some(
                    child
                        .text()
                        .and_then(|t| t.trim().parse::<u8>().ok())
                        .ok_or_else(|| format!("invalid <string> {:?}", child.text().unwrap_or("")))?,
                )
            }
            "fret" => {
                fret = Some(
                    child
                        .text()
                        .and_then(|t| t.trim().parse::<u8>().ok())
                        .ok_or_else(|| format!("invalid <fret> {:?}", child.text().unwrap_or("")))?,
                )
            }
            _ => {}
        }
    }
    Ok(match (string, fret) {
        (Some(string), Some(fret)) => Some(TabPosition { string, fret }),
        _ => None,
    })
}

fn parse_lyric(node: &Node) -> Option<Lyric> {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);
    let mut text = String::new();
    let mut syllabic = Syllabic::Single;
    for lc in node.children().filter(|n| n.is_element()) {
        match lc.tag_name().name() {
            // Several <text> elements occur with <elision>; join them
            "text" => text.push_str(lc.text().unwrap_or("").trim()),
            "syllabic" => {
                syllabic = lc
                    .text()
                    .and_then(|t| Syllabic::parse(t.trim()))
                    .unwrap_or(Syllabic::Single);
            }
            _ => {}
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(Lyric {
            number,
            text,
            syllabic,
        })
    }
}

// ─── Direction ───────────────────────────────────────────────────────

#[derive(Default)]
struct DirectionInfo {
    sound_tempo: Option<f64>,
    metronome_tempo: Option<f64>,
    markers: Vec<Result<Marker, String>>,
    problems: Vec<String>,
}

fn parse_direction(node: &Node) -> DirectionInfo {
    let mut info = DirectionInfo::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt_child in child.children().filter(|n| n.is_element()) {
                    match dt_child.tag_name().name() {
                        "metronome" => match parse_metronome(&dt_child) {
                            Ok(bpm) => info.metronome_tempo = bpm,
                            Err(reason) => info.problems.push(reason),
                        },
                        "words" => {
                            if let Some(m) = dt_child.text().and_then(parse_marker_words) {
                                info.markers.push(m);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "sound" => match parse_tempo_attr(&child) {
                Ok(Some(t)) => info.sound_tempo = Some(t),
                Ok(None) => {}
                Err(reason) => info.problems.push(reason),
            },
            _ => {}
        }
    }

    info
}

fn parse_tempo_attr(node: &Node) -> Result<Option<f64>, String> {
    match node.attribute("tempo") {
        None => Ok(None),
        Some(t) => match t.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
            _ => Err(format!("invalid <sound tempo> {t:?}")),
        },
    }
}

/// Metronome mark converted to quarter-note BPM. `Ok(None)` when the mark
/// carries no per-minute value (e.g. a metric modulation).
fn parse_metronome(node: &Node) -> Result<Option<f64>, String> {
    let mut beat_unit = "quarter".to_string();
    let mut dotted = false;
    let mut per_minute = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                beat_unit = child.text().unwrap_or("quarter").trim().to_string();
            }
            "beat-unit-dot" => dotted = true,
            "per-minute" => {
                per_minute = Some(
                    parse_f64(&child)
                        .filter(|v| v.is_finite() && *v > 0.0)
                        .ok_or_else(|| {
                            format!("invalid <per-minute> {:?}", child.text().unwrap_or(""))
                        })?,
                );
            }
            _ => {}
        }
    }

    let Some(per_minute) = per_minute else {
        return Ok(None);
    };
    let quarters = match beat_unit.as_str() {
        "whole" => 4.0,
        "half" => 2.0,
        "quarter" => 1.0,
        "eighth" => 0.5,
        "16th" => 0.25,
        "32nd" => 0.125,
        other => return Err(format!("unsupported metronome beat unit '{other}'")),
    };
    let quarters = if dotted { quarters * 1.5 } else { quarters };
    Ok(Some(per_minute * quarters))
}

/// Parse `CTRL:NAME[:value[b]]` direction words into a marker.
///
/// Returns `None` for words that are not control markers at all, and
/// `Some(Err(..))` for a control marker that cannot be understood.
pub(crate) fn parse_marker_words(words: &str) -> Option<Result<Marker, String>> {
    let words = words.trim();
    let (prefix, rest) = words.split_once(':')?;
    if !prefix.trim().eq_ignore_ascii_case("CTRL") {
        return None;
    }
    Some(parse_marker_body(rest))
}

fn parse_marker_body(body: &str) -> Result<Marker, String> {
    let (name, value) = match body.split_once(':') {
        Some((n, v)) => (n.trim(), Some(v.trim())),
        None => (body.trim(), None),
    };
    let span = match value {
        None => None,
        Some(v) => Some(parse_span(v).ok_or_else(|| format!("invalid marker value '{v}'"))?),
    };

    let marker = match name.to_ascii_uppercase().as_str() {
        "TILT_L" => Marker::Tilt {
            direction: TiltDirection::Left,
            span,
        },
        "TILT_R" => Marker::Tilt {
            direction: TiltDirection::Right,
            span,
        },
        "TILT_0" | "TILT_C" => Marker::Tilt {
            direction: TiltDirection::Center,
            span,
        },
        "WINK" => Marker::Wink { side: None, span },
        "WINK_L" => Marker::Wink {
            side: Some(WinkSide::Left),
            span,
        },
        "WINK_R" => Marker::Wink {
            side: Some(WinkSide::Right),
            span,
        },
        "CLOSE_EYES" => Marker::CloseEyes { span },
        "OPEN_EYES" => Marker::OpenEyes { span },
        "EYE_AUTO" => Marker::EyeAuto { span },
        "SPEED_FAST" => Marker::Speed {
            speed: TiltSpeed::Fast,
        },
        "SPEED_SLOW" => Marker::Speed {
            speed: TiltSpeed::Slow,
        },
        other => return Err(format!("unknown marker 'CTRL:{other}'")),
    };
    Ok(marker)
}

fn parse_span(value: &str) -> Option<MarkerSpan> {
    let (number, beats) = match value.strip_suffix(['b', 'B']) {
        Some(n) => (n.trim(), true),
        None => (value, false),
    };
    let v = number.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)?;
    Some(if beats {
        MarkerSpan::Beats(v)
    } else {
        MarkerSpan::Seconds(v)
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn text_of(node: &Node) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn duration_of(node: &Node) -> Option<u32> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == "duration")
        .and_then(|d| parse_u32(&d))
}

fn parse_u32(node: &Node) -> Option<u32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wrap(measures: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Voice</part-name></score-part></part-list>
  <part id="P1">{measures}</part>
</score-partwise>"#
        )
    }

    #[test]
    fn marker_words() {
        assert_eq!(parse_marker_words("Allegro"), None);
        assert_eq!(parse_marker_words("rit.: slow"), None);
        assert_eq!(
            parse_marker_words("CTRL:TILT_L:0.5b"),
            Some(Ok(Marker::Tilt {
                direction: TiltDirection::Left,
                span: Some(MarkerSpan::Beats(0.5)),
            }))
        );
        assert_eq!(
            parse_marker_words(" ctrl: wink_r : 0.2 "),
            Some(Ok(Marker::Wink {
                side: Some(WinkSide::Right),
                span: Some(MarkerSpan::Seconds(0.2)),
            }))
        );
        assert_eq!(
            parse_marker_words("CTRL:OPEN_EYES"),
            Some(Ok(Marker::OpenEyes { span: None }))
        );
        assert_eq!(
            parse_marker_words("CTRL:OPEN_EYES:2"),
            Some(Ok(Marker::OpenEyes {
                span: Some(MarkerSpan::Seconds(2.0))
            }))
        );
        assert!(matches!(parse_marker_words("CTRL:JUMP"), Some(Err(_))));
        assert!(matches!(parse_marker_words("CTRL:WINK:abc"), Some(Err(_))));
    }

    #[test]
    fn backup_and_chord_offsets() {
        let xml = wrap(
            r#"<measure number="1">
  <attributes><divisions>2</divisions></attributes>
  <note><pitch><step>C</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice></note>
  <note><chord/><pitch><step>E</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice></note>
  <note><pitch><step>D</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice></note>
  <backup><duration>6</duration></backup>
  <note><pitch><step>C</step><octave>3</octave></pitch><duration>6</duration><voice>2</voice></note>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        let m = &score.parts[0].measures[0];
        let offsets: Vec<u32> = m.notes.iter().map(|n| n.offset).collect();
        assert_eq!(offsets, vec![0, 0, 2, 0]);
        assert_eq!(m.extent, 6);
        assert_eq!(m.divisions, 2);
    }

    #[test]
    fn metronome_beat_unit_is_converted_to_quarters() {
        let xml = wrap(
            r#"<measure number="1">
  <direction><direction-type><metronome><beat-unit>half</beat-unit><per-minute>40</per-minute></metronome></direction-type></direction>
  <note><rest/><duration>4</duration></note>
</measure>
<measure number="2">
  <direction><direction-type><metronome><beat-unit>quarter</beat-unit><beat-unit-dot/><per-minute>60</per-minute></metronome></direction-type><sound tempo="72"/></direction>
  <note><rest/><duration>4</duration></note>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        let part = &score.parts[0];
        assert_eq!(part.measures[0].tempo_bpm, Some(80.0));
        // <sound tempo> wins over the printed metronome mark
        assert_eq!(part.measures[1].tempo_bpm, Some(72.0));
    }

    #[test]
    fn tied_element_continue_marks_chain_middle() {
        let xml = wrap(
            r#"<measure number="1">
  <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration>
    <notations><tied type="continue"/></notations></note>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        assert_eq!(score.parts[0].measures[0].notes[0].tie, TieState::Continue);
    }

    #[test]
    fn direction_markers_attach_to_next_note() {
        let xml = wrap(
            r#"<measure number="1">
  <direction><direction-type><words>CTRL:CLOSE_EYES</words></direction-type></direction>
  <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration></note>
  <direction><direction-type><words>CTRL:OPEN_EYES</words></direction-type></direction>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        let m = &score.parts[0].measures[0];
        assert_eq!(m.notes[0].markers, vec![Marker::CloseEyes { span: None }]);
        assert_eq!(
            m.markers,
            vec![PlacedMarker {
                offset: 4,
                marker: Marker::OpenEyes { span: None }
            }]
        );
    }

    #[test]
    fn compound_time_signature() {
        let xml = wrap(
            r#"<measure number="1">
  <attributes><time><beats>3+2</beats><beat-type>8</beat-type></time></attributes>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        assert_eq!(
            score.parts[0].measures[0].time,
            TimeSignature {
                beats: 5,
                beat_type: 8
            }
        );
    }

    #[test]
    fn oversized_divisions_are_skipped() {
        let xml = wrap(
            r#"<measure number="1">
  <attributes><divisions>4</divisions></attributes>
  <note><rest/><duration>4</duration></note>
</measure>
<measure number="2">
  <attributes><divisions>4294967291</divisions></attributes>
  <note><rest/><duration>4</duration></note>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        assert_eq!(score.parts[0].measures[1].divisions, 4);
        assert_eq!(score.warnings.len(), 1);
        assert_eq!(score.warnings[0].measure, "2");
    }

    #[test]
    fn tie_after_skipped_note_starts_fresh() {
        let xml = wrap(
            r#"<measure number="1">
  <attributes><divisions>1</divisions></attributes>
  <note><pitch><step>C</step><alter>sharp</alter><octave>4</octave></pitch><duration>1</duration>
    <tie type="start"/><voice>1</voice></note>
  <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration>
    <tie type="stop"/><voice>1</voice><notations><tied type="continue"/></notations></note>
  <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration>
    <tie type="stop"/><voice>1</voice></note>
</measure>"#,
        );
        let score = parse_musicxml(&xml).unwrap();
        let ties: Vec<TieState> = score.parts[0].measures[0].notes.iter().map(|n| n.tie).collect();
        // The continue now opens the chain, the final stop still closes it
        assert_eq!(ties, vec![TieState::Start, TieState::Stop]);
        assert_eq!(score.warnings.len(), 2);
        assert!(score.warnings[1].reason.contains("skipped note"));
    }
}
