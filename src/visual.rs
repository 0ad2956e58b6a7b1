//! Visual state mapper: folds a timeline into a function from time to the
//! character's visual state.
//!
//! All event processing happens once, in [`VisualStateMapper::new`], which
//! turns the marker and lyric events into sorted key tables. `state_at` is
//! then a handful of binary searches over immutable data, so it can be called
//! from any thread, in any order, any number of times.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::UnmappedPhonemeWarning;
use crate::model::{Marker, TabPosition, TiltDirection, TiltSpeed, WinkSide};
use crate::phoneme::{MouthShape, PhonemeTable};
use crate::timeline::{EventKind, EventPayload, Timeline};

// ═══════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Angle reached by `TILT_L` (negative) and `TILT_R` (positive)
    pub tilt_max_deg: f64,
    pub wink_default_sec: f64,
    /// Eye used by a `WINK` marker that names no side
    pub default_wink_side: WinkSide,
    pub move_sec_fast: f64,
    pub move_sec_slow: f64,
    /// Tilt transition time before any `SPEED_*` marker; 0 snaps instantly
    pub tilt_move_sec: f64,
    /// Tilt beyond which the eyes count as closed when tilted
    pub eye_auto_threshold_deg: f64,
    /// Close the eyes whenever the head is tilted past the threshold and no
    /// eye marker says otherwise
    pub close_eyes_when_tilted: bool,
    /// Start every tilt this many beats early, reaching the target on the
    /// marked note. `SPEED_*` markers are ignored while set.
    pub tilt_lead_beats: Option<f64>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            tilt_max_deg: 12.0,
            wink_default_sec: 0.15,
            default_wink_side: WinkSide::Right,
            move_sec_fast: 0.20,
            move_sec_slow: 0.55,
            tilt_move_sec: 0.0,
            eye_auto_threshold_deg: 0.2,
            close_eyes_when_tilted: true,
            tilt_lead_beats: None,
        }
    }
}

/// Tab highway geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub px_per_second: f64,
    /// x coordinate of the "now" line
    pub playhead_x: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        // 1280px frame, playhead at a quarter, 2.5s look-ahead
        Self {
            px_per_second: 384.0,
            playhead_x: 320.0,
        }
    }
}

/// Lyrics launched from the singer on each syllable and falling under
/// gravity. Coordinates are fractions of the frame, y measured upwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyingLyricConfig {
    pub enabled: bool,
    pub start_x: f64,
    pub start_y: f64,
    /// Horizontal speed per quarter of distance between the syllable's beat
    /// in its measure and `start_x`
    pub velocity_x: f64,
    /// Vertical speed at the top of the 88-key range
    pub velocity_y: f64,
    /// Fraction of 9.8 applied as downward acceleration
    pub gravity_scale: f64,
    /// Glyphs still airborne after this long are dropped
    pub max_flight_sec: f64,
}

impl Default for FlyingLyricConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_x: 0.5,
            start_y: 0.1,
            velocity_x: 0.5,
            velocity_y: 2.5,
            gravity_scale: 0.2,
            max_flight_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub phonemes: PhonemeTable,
    pub markers: MarkerConfig,
    pub scroll: ScrollConfig,
    pub flying_lyrics: FlyingLyricConfig,
    /// Close the mouth once a syllable has stopped sounding instead of
    /// holding it until the next syllable.
    pub close_mouth_after_lyric: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Output
// ═══════════════════════════════════════════════════════════════════════

/// Everything a compositor needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualState {
    pub timestamp_seconds: f64,
    pub mouth_shape: MouthShape,
    /// Negative tilts left, positive right
    pub head_tilt_deg: f64,
    pub eyes_closed: bool,
    pub wink_side: Option<WinkSide>,
    pub scroll_offset_px: f64,
    pub active_lyric: Option<LyricGlyph>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flying_lyrics: Vec<FlyingGlyph>,
}

/// A syllable in flight, in frame fractions with y measured upwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlyingGlyph {
    pub text: String,
    pub x: f64,
    pub y: f64,
}

/// The lyric word on screen and how far through it the singer is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricGlyph {
    pub text: String,
    /// Index of the current syllable within the word
    pub syllable: usize,
    /// 0.0 at the word's onset, 1.0 once it has finished sounding
    pub progress: f64,
}

/// A tab note placed on the highway for a given instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabGlyph {
    pub position: TabPosition,
    pub midi: i32,
    pub x_start: f64,
    pub x_end: f64,
    /// Whether the note is sounding (its bar crosses the playhead)
    pub active: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Key tables
// ═══════════════════════════════════════════════════════════════════════

/// Last entry whose time is at or before `t`, for entries sorted by time.
fn last_at<T>(keys: &[T], t: f64, at: impl Fn(&T) -> f64) -> Option<&T> {
    let i = keys.partition_point(|k| at(k) <= t);
    i.checked_sub(1).map(|i| &keys[i])
}

#[derive(Debug, Clone)]
struct MouthKey {
    at: f64,
    end: f64,
    shape: MouthShape,
}

#[derive(Debug, Clone)]
struct WordKey {
    at: f64,
    end: f64,
    text: String,
    syllable_onsets: Vec<f64>,
}

/// A tilt transition towards `to`, starting at `at` from `from`.
#[derive(Debug, Clone, Copy)]
struct TiltKey {
    at: f64,
    from: f64,
    to: f64,
    move_sec: f64,
}

fn smoothstep(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

fn tilt_value(keys: &[TiltKey], t: f64) -> f64 {
    let Some(key) = last_at(keys, t, |k| k.at) else {
        return 0.0;
    };
    let elapsed = t - key.at;
    if key.move_sec <= 0.0 || elapsed >= key.move_sec {
        return key.to;
    }
    key.from + (key.to - key.from) * smoothstep(elapsed / key.move_sec)
}

#[derive(Debug, Clone, Copy)]
struct Span<T> {
    start: f64,
    end: f64,
    value: T,
}

/// Disjoint half-open intervals, built in start order.
#[derive(Debug, Clone)]
struct SpanList<T> {
    spans: Vec<Span<T>>,
}

impl<T: Copy + PartialEq> SpanList<T> {
    fn new() -> Self {
        Self { spans: Vec::new() }
    }

    /// Open `[start, end)`. Extends the running span when it has the same
    /// value, otherwise cuts it short at `start`.
    fn open(&mut self, start: f64, end: f64, value: T) {
        if let Some(last) = self.spans.last_mut() {
            if last.end > start {
                if last.value == value {
                    last.end = last.end.max(end);
                    return;
                }
                last.end = start;
            }
        }
        self.spans.push(Span { start, end, value });
    }

    /// End the running span at `at`, if one is open.
    fn cut(&mut self, at: f64) {
        if let Some(last) = self.spans.last_mut() {
            if last.end > at {
                last.end = at.max(last.start);
            }
        }
    }

    fn at(&self, t: f64) -> Option<T> {
        last_at(&self.spans, t, |s| s.start)
            .filter(|s| t < s.end)
            .map(|s| s.value)
    }
}

/// Launch of one flying syllable.
#[derive(Debug, Clone)]
struct FlyKey {
    at: f64,
    text: String,
    vx: f64,
    vy: f64,
}

/// Piano key number of a MIDI pitch, 1 for A0
fn piano_key(midi: i32) -> f64 {
    f64::from(midi - 20)
}

const GRAVITY: f64 = 9.8;

#[derive(Debug, Clone)]
struct TabNote {
    onset: f64,
    end: f64,
    position: TabPosition,
    midi: i32,
}

// ═══════════════════════════════════════════════════════════════════════
// Mapper
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct VisualStateMapper {
    duration: f64,
    closed_shape: MouthShape,
    close_mouth_after_lyric: bool,
    mouth: Vec<MouthKey>,
    words: Vec<WordKey>,
    tilt: Vec<TiltKey>,
    winks: SpanList<WinkSide>,
    eyes_closed: SpanList<()>,
    eyes_open: SpanList<()>,
    eye_auto: SpanList<()>,
    eye_auto_threshold_deg: f64,
    close_eyes_when_tilted: bool,
    flights: Vec<FlyKey>,
    flying: FlyingLyricConfig,
    tab_notes: Vec<TabNote>,
    scroll: ScrollConfig,
    warnings: Vec<UnmappedPhonemeWarning>,
}

impl VisualStateMapper {
    pub fn new(timeline: &Timeline, config: &MapperConfig) -> Self {
        let mut mapper = Self {
            duration: timeline.duration(),
            closed_shape: config.phonemes.closed.clone(),
            close_mouth_after_lyric: config.close_mouth_after_lyric,
            mouth: Vec::new(),
            words: Vec::new(),
            tilt: Vec::new(),
            winks: SpanList::new(),
            eyes_closed: SpanList::new(),
            eyes_open: SpanList::new(),
            eye_auto: SpanList::new(),
            eye_auto_threshold_deg: config.markers.eye_auto_threshold_deg,
            close_eyes_when_tilted: config.markers.close_eyes_when_tilted,
            flights: Vec::new(),
            flying: config.flying_lyrics.clone(),
            tab_notes: Vec::new(),
            scroll: config.scroll.clone(),
            warnings: Vec::new(),
        };
        mapper.build_lyrics(timeline, &config.phonemes);
        if config.flying_lyrics.enabled {
            mapper.build_flights(timeline);
        }
        mapper.build_markers(timeline, &config.markers);
        mapper.tab_notes = timeline
            .events_of(EventKind::TabPosition)
            .filter_map(|e| match e.payload {
                EventPayload::TabPosition { position, midi } => Some(TabNote {
                    onset: e.onset_seconds,
                    end: e.end_seconds(),
                    position,
                    midi,
                }),
                _ => None,
            })
            .collect();

        debug!(
            "mapper: {} mouth keys, {} tilt keys, {} winks, {} tab notes, duration {:.3}s",
            mapper.mouth.len(),
            mapper.tilt.len(),
            mapper.winks.spans.len(),
            mapper.tab_notes.len(),
            mapper.duration
        );
        mapper
    }

    fn build_lyrics(&mut self, timeline: &Timeline, phonemes: &PhonemeTable) {
        for event in timeline.events_of(EventKind::Lyric) {
            let EventPayload::Lyric(word) = &event.payload else {
                continue;
            };
            for syllable in &word.syllables {
                let lookup = phonemes.lookup(&syllable.text);
                if !lookup.recognized {
                    let warning = UnmappedPhonemeWarning {
                        text: syllable.text.clone(),
                        onset_seconds: syllable.onset_seconds,
                    };
                    warn!("{warning}");
                    self.warnings.push(warning);
                }
                self.mouth.push(MouthKey {
                    at: syllable.onset_seconds,
                    end: syllable.end_seconds(),
                    shape: lookup.shape.clone(),
                });
            }
            self.words.push(WordKey {
                at: event.onset_seconds,
                end: event.end_seconds(),
                text: word.text.clone(),
                syllable_onsets: word.syllables.iter().map(|s| s.onset_seconds).collect(),
            });
        }
        // Words from several voices may interleave
        self.mouth.sort_by(|a, b| a.at.total_cmp(&b.at));
    }

    fn build_flights(&mut self, timeline: &Timeline) {
        let cfg = &self.flying;
        for event in timeline.events_of(EventKind::Lyric) {
            let EventPayload::Lyric(word) = &event.payload else {
                continue;
            };
            for syllable in &word.syllables {
                self.flights.push(FlyKey {
                    at: syllable.onset_seconds,
                    text: syllable.text.clone(),
                    vx: cfg.velocity_x * (syllable.beat_in_measure / 4.0 - cfg.start_x),
                    vy: cfg.velocity_y * piano_key(syllable.midi) / 88.0,
                });
            }
        }
        self.flights.sort_by(|a, b| a.at.total_cmp(&b.at));
    }

    fn build_markers(&mut self, timeline: &Timeline, config: &MarkerConfig) {
        // A fixed lead, timed at the opening tempo
        let lead = config
            .tilt_lead_beats
            .map(|beats| beats * 60.0 / timeline.bpm_at(0.0));
        let mut move_sec = match lead {
            Some(lead) => lead.max(1e-3),
            None => config.tilt_move_sec,
        };
        let early = |t: f64| (t - lead.unwrap_or(0.0)).max(0.0);
        let mut pending_revert: Option<(f64, f64)> = None;

        for event in timeline.events_of(EventKind::Marker) {
            let EventPayload::Marker { marker, timed } = event.payload else {
                continue;
            };
            let t = event.onset_seconds;
            let until = |default: f64| if timed { t + event.duration_seconds } else { t + default };

            match marker {
                Marker::Tilt { direction, .. } => {
                    let at = early(t);
                    if let Some((revert, mv)) = pending_revert {
                        if revert <= at {
                            self.push_tilt(revert, 0.0, mv);
                            pending_revert = None;
                        }
                    }
                    let target = match direction {
                        TiltDirection::Left => -config.tilt_max_deg,
                        TiltDirection::Right => config.tilt_max_deg,
                        TiltDirection::Center => 0.0,
                    };
                    self.push_tilt(at, target, move_sec);
                    pending_revert = timed.then(|| (early(t + event.duration_seconds), move_sec));
                }
                Marker::Speed { speed } if lead.is_none() => {
                    move_sec = match speed {
                        TiltSpeed::Fast => config.move_sec_fast,
                        TiltSpeed::Slow => config.move_sec_slow,
                    };
                }
                Marker::Speed { .. } => debug!("speed marker at {t:.3}s ignored under tilt lead"),
                Marker::Wink { side, .. } => {
                    let side = side.unwrap_or(config.default_wink_side);
                    self.winks.open(t, until(config.wink_default_sec), side);
                }
                Marker::CloseEyes { .. } => self.eyes_closed.open(t, until(f64::INFINITY), ()),
                Marker::OpenEyes { .. } => {
                    self.eyes_closed.cut(t);
                    self.eyes_open.open(t, until(f64::INFINITY), ());
                }
                Marker::EyeAuto { .. } => self.eye_auto.open(t, until(f64::INFINITY), ()),
            }
        }

        if let Some((at, mv)) = pending_revert {
            self.push_tilt(at, 0.0, mv);
        }
    }

    fn push_tilt(&mut self, at: f64, to: f64, move_sec: f64) {
        let from = tilt_value(&self.tilt, at);
        self.tilt.push(TiltKey {
            at,
            from,
            to,
            move_sec,
        });
    }

    /// Span covered by the timeline: the end of its last event.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Syllables that fell back to the closed mouth.
    pub fn warnings(&self) -> &[UnmappedPhonemeWarning] {
        &self.warnings
    }

    fn mouth_at(&self, t: f64) -> MouthShape {
        match last_at(&self.mouth, t, |k| k.at) {
            Some(key) if !(self.close_mouth_after_lyric && t >= key.end) => key.shape.clone(),
            _ => self.closed_shape.clone(),
        }
    }

    fn lyric_at(&self, t: f64) -> Option<LyricGlyph> {
        let word = last_at(&self.words, t, |w| w.at)?;
        let syllable = word
            .syllable_onsets
            .partition_point(|&onset| onset <= t)
            .saturating_sub(1);
        let length = word.end - word.at;
        let progress = if length > 0.0 {
            ((t - word.at) / length).clamp(0.0, 1.0)
        } else {
            1.0
        };
        Some(LyricGlyph {
            text: word.text.clone(),
            syllable,
            progress,
        })
    }

    /// Eye state by precedence: a wink, then an `EYE_AUTO` window, then
    /// closed eyes, then an open window, then the tilt default.
    fn eyes_closed_at(&self, t: f64, tilt: f64, winking: bool) -> bool {
        let tilted = tilt.abs() > self.eye_auto_threshold_deg;
        if winking {
            false
        } else if self.eye_auto.at(t).is_some() {
            tilted
        } else if self.eyes_closed.at(t).is_some() {
            true
        } else if self.eyes_open.at(t).is_some() {
            false
        } else {
            self.close_eyes_when_tilted && tilted
        }
    }

    fn flights_at(&self, t: f64) -> Vec<FlyingGlyph> {
        let launched = self.flights.partition_point(|k| k.at <= t);
        let oldest = self
            .flights
            .partition_point(|k| t - k.at >= self.flying.max_flight_sec);
        let gravity = GRAVITY * self.flying.gravity_scale;
        self.flights[oldest.min(launched)..launched]
            .iter()
            .filter_map(|k| {
                let tau = t - k.at;
                let y = self.flying.start_y + k.vy * tau - 0.5 * gravity * tau * tau;
                (y > 0.0).then(|| FlyingGlyph {
                    text: k.text.clone(),
                    x: self.flying.start_x + k.vx * tau,
                    y,
                })
            })
            .collect()
    }

    /// Visual state at `t` seconds. Pure; callable in any order.
    pub fn state_at(&self, t: f64) -> VisualState {
        let head_tilt_deg = tilt_value(&self.tilt, t);
        let wink_side = self.winks.at(t);
        VisualState {
            timestamp_seconds: t,
            mouth_shape: self.mouth_at(t),
            head_tilt_deg,
            eyes_closed: self.eyes_closed_at(t, head_tilt_deg, wink_side.is_some()),
            wink_side,
            scroll_offset_px: if self.tab_notes.is_empty() {
                0.0
            } else {
                t * self.scroll.px_per_second
            },
            active_lyric: self.lyric_at(t),
            flying_lyrics: self.flights_at(t),
        }
    }

    /// Horizontal position at time `now` of something scheduled at `onset`.
    /// Equals the playhead exactly when `now == onset`.
    pub fn x_for_onset(&self, onset: f64, now: f64) -> f64 {
        self.scroll.playhead_x + (onset - now) * self.scroll.px_per_second
    }

    /// Tab notes overlapping `[0, viewport_width]` at time `now`.
    pub fn visible_tab_notes(&self, now: f64, viewport_width: f64) -> Vec<TabGlyph> {
        self.tab_notes
            .iter()
            .filter_map(|note| {
                let x_start = self.x_for_onset(note.onset, now);
                let x_end = self.x_for_onset(note.end, now);
                (x_end >= 0.0 && x_start <= viewport_width).then(|| TabGlyph {
                    position: note.position,
                    midi: note.midi,
                    x_start,
                    x_end,
                    active: note.onset <= now && now < note.end,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarkerSpan;
    use crate::timeline::{EventOrder, LyricWord, MusicalEvent, SyllableSpan};
    use pretty_assertions::assert_eq;

    fn order(note: usize) -> EventOrder {
        EventOrder {
            part: 0,
            measure: 0,
            note,
        }
    }

    fn marker(at: f64, duration: Option<f64>, marker: Marker, n: usize) -> MusicalEvent {
        MusicalEvent {
            onset_seconds: at,
            duration_seconds: duration.unwrap_or(0.0),
            order: order(n),
            payload: EventPayload::Marker {
                marker,
                timed: duration.is_some(),
            },
        }
    }

    fn word(at: f64, syllables: &[(&str, f64)], n: usize) -> MusicalEvent {
        let spans: Vec<SyllableSpan> = syllables
            .iter()
            .enumerate()
            .map(|(i, (text, len))| SyllableSpan {
                text: text.to_string(),
                onset_seconds: at + syllables[..i].iter().map(|s| s.1).sum::<f64>(),
                duration_seconds: *len,
                midi: 69,
                beat_in_measure: 0.0,
            })
            .collect();
        let total: f64 = syllables.iter().map(|s| s.1).sum();
        MusicalEvent {
            onset_seconds: at,
            duration_seconds: total,
            order: order(n),
            payload: EventPayload::Lyric(LyricWord {
                text: syllables.iter().map(|s| s.0).collect(),
                voice: 1,
                syllables: spans,
            }),
        }
    }

    fn tilt(direction: TiltDirection) -> Marker {
        Marker::Tilt {
            direction,
            span: None,
        }
    }

    #[test]
    fn mouth_holds_until_next_syllable() {
        let timeline = Timeline::from_events(vec![
            word(0.0, &[("ka", 0.5)], 0),
            word(2.0, &[("ko", 0.5)], 1),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.state_at(0.0).mouth_shape.as_str(), "A");
        assert_eq!(mapper.state_at(1.9).mouth_shape.as_str(), "A");
        assert_eq!(mapper.state_at(2.0).mouth_shape.as_str(), "O");

        let config = MapperConfig {
            close_mouth_after_lyric: true,
            ..MapperConfig::default()
        };
        let mapper = VisualStateMapper::new(&timeline, &config);
        assert_eq!(mapper.state_at(1.0).mouth_shape.as_str(), "N");
    }

    #[test]
    fn word_glyph_tracks_syllables() {
        let timeline = Timeline::from_events(vec![word(1.0, &[("sa", 0.5), ("ku", 0.5), ("ra", 1.0)], 0)]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.state_at(0.5).active_lyric, None);
        assert_eq!(
            mapper.state_at(1.5).active_lyric,
            Some(LyricGlyph {
                text: "sakura".to_string(),
                syllable: 1,
                progress: 0.25,
            })
        );
        assert_eq!(mapper.state_at(1.5).mouth_shape.as_str(), "U");
    }

    #[test]
    fn unmapped_syllable_is_closed_and_reported() {
        let timeline = Timeline::from_events(vec![word(0.0, &[("♪", 1.0)], 0)]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.state_at(0.5).mouth_shape.as_str(), "N");
        assert_eq!(mapper.warnings().len(), 1);
        assert_eq!(mapper.warnings()[0].text, "♪");
    }

    #[test]
    fn timed_tilt_reverts_untimed_tilt_holds() {
        let timeline = Timeline::from_events(vec![
            marker(1.0, Some(0.5), tilt(TiltDirection::Left), 0),
            marker(3.0, None, tilt(TiltDirection::Right), 1),
            word(5.0, &[("a", 1.0)], 2),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.state_at(0.9).head_tilt_deg, 0.0);
        assert_eq!(mapper.state_at(1.0).head_tilt_deg, -12.0);
        assert_eq!(mapper.state_at(1.6).head_tilt_deg, 0.0);
        assert_eq!(mapper.state_at(5.5).head_tilt_deg, 12.0);
    }

    #[test]
    fn speed_marker_eases_tilt() {
        let timeline = Timeline::from_events(vec![
            marker(0.0, None, Marker::Speed { speed: TiltSpeed::Fast }, 0),
            marker(1.0, None, tilt(TiltDirection::Right), 1),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.state_at(0.5).head_tilt_deg, 0.0);
        assert!((mapper.state_at(1.1).head_tilt_deg - 6.0).abs() < 1e-6);
        assert!((mapper.state_at(1.25).head_tilt_deg - 12.0).abs() < 1e-9);
    }

    #[test]
    fn eyes_close_as_level_and_wink_is_a_point() {
        let timeline = Timeline::from_events(vec![
            marker(1.0, None, Marker::CloseEyes { span: None }, 0),
            marker(2.0, None, Marker::OpenEyes { span: None }, 1),
            marker(
                3.0,
                None,
                Marker::Wink {
                    side: Some(WinkSide::Left),
                    span: None,
                },
                2,
            ),
            word(4.0, &[("a", 1.0)], 3),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert!(!mapper.state_at(0.5).eyes_closed);
        assert!(mapper.state_at(1.5).eyes_closed);
        assert!(!mapper.state_at(2.0).eyes_closed);
        assert_eq!(mapper.state_at(3.1).wink_side, Some(WinkSide::Left));
        assert_eq!(mapper.state_at(3.2).wink_side, None);
    }

    #[test]
    fn eye_auto_follows_tilt() {
        let timeline = Timeline::from_events(vec![
            marker(0.0, None, Marker::EyeAuto { span: None }, 0),
            marker(
                1.0,
                Some(1.0),
                Marker::Tilt {
                    direction: TiltDirection::Left,
                    span: Some(MarkerSpan::Seconds(1.0)),
                },
                1,
            ),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert!(!mapper.state_at(0.5).eyes_closed);
        assert!(mapper.state_at(1.5).eyes_closed);
        assert!(!mapper.state_at(2.0).eyes_closed);
    }

    #[test]
    fn state_at_is_random_access() {
        let timeline = Timeline::from_events(vec![
            marker(0.0, None, Marker::Speed { speed: TiltSpeed::Slow }, 0),
            marker(0.5, Some(1.0), tilt(TiltDirection::Right), 1),
            word(0.0, &[("ha", 0.5), ("ru", 0.5)], 2),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        let forward: Vec<VisualState> = (0..20).map(|i| mapper.state_at(i as f64 * 0.1)).collect();
        let mut backward: Vec<VisualState> =
            (0..20).rev().map(|i| mapper.state_at(i as f64 * 0.1)).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn tab_note_reaches_playhead_at_onset() {
        let note = MusicalEvent {
            onset_seconds: 2.0,
            duration_seconds: 0.5,
            order: order(0),
            payload: EventPayload::TabPosition {
                position: TabPosition { string: 3, fret: 5 },
                midi: 60,
            },
        };
        let timeline = Timeline::from_events(vec![note]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert_eq!(mapper.x_for_onset(2.0, 2.0), 320.0);
        assert_eq!(mapper.state_at(1.0).scroll_offset_px, 384.0);

        let visible = mapper.visible_tab_notes(2.1, 1280.0);
        assert_eq!(visible.len(), 1);
        assert!(visible[0].active);
        assert!(mapper.visible_tab_notes(-2.0, 1280.0).is_empty());
    }

    #[test]
    fn eye_markers_take_precedence_over_tilt() {
        let timeline = Timeline::from_events(vec![
            marker(
                0.0,
                Some(3.0),
                Marker::OpenEyes {
                    span: Some(MarkerSpan::Seconds(3.0)),
                },
                0,
            ),
            marker(0.5, None, tilt(TiltDirection::Right), 1),
            marker(
                1.0,
                Some(0.5),
                Marker::CloseEyes {
                    span: Some(MarkerSpan::Seconds(0.5)),
                },
                2,
            ),
            word(5.0, &[("a", 1.0)], 3),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert!(!mapper.state_at(0.8).eyes_closed);
        assert!(mapper.state_at(1.2).eyes_closed);
        assert!(!mapper.state_at(1.6).eyes_closed);
        // Open window over, still tilted
        assert!(mapper.state_at(3.5).eyes_closed);

        let mut config = MapperConfig::default();
        config.markers.close_eyes_when_tilted = false;
        let mapper = VisualStateMapper::new(&timeline, &config);
        assert!(!mapper.state_at(3.5).eyes_closed);
    }

    #[test]
    fn wink_overrides_closed_eyes() {
        let timeline = Timeline::from_events(vec![
            marker(0.0, None, Marker::CloseEyes { span: None }, 0),
            marker(1.0, None, Marker::Wink { side: None, span: None }, 1),
            word(2.0, &[("a", 1.0)], 2),
        ]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        let s = mapper.state_at(1.05);
        assert!(!s.eyes_closed);
        assert_eq!(s.wink_side, Some(WinkSide::Right));
        assert!(mapper.state_at(1.5).eyes_closed);
    }

    #[test]
    fn tilt_lead_reaches_target_on_the_marked_note() {
        let timeline = Timeline::from_events(vec![
            marker(0.0, None, Marker::Speed { speed: TiltSpeed::Slow }, 0),
            marker(0.2, None, tilt(TiltDirection::Left), 1),
            marker(2.0, None, tilt(TiltDirection::Right), 2),
            word(4.0, &[("a", 1.0)], 3),
        ]);
        let mut config = MapperConfig::default();
        config.markers.tilt_lead_beats = Some(1.0);
        let mapper = VisualStateMapper::new(&timeline, &config);
        // One beat at 120 BPM; the early tilt is clamped to the start
        assert!((mapper.state_at(0.25).head_tilt_deg + 6.0).abs() < 1e-9);
        assert_eq!(mapper.state_at(0.5).head_tilt_deg, -12.0);
        assert_eq!(mapper.state_at(1.5).head_tilt_deg, -12.0);
        assert!(mapper.state_at(1.75).head_tilt_deg.abs() < 1e-9);
        assert_eq!(mapper.state_at(2.0).head_tilt_deg, 12.0);
    }

    #[test]
    fn flying_syllables_follow_a_ballistic_arc() {
        let timeline = Timeline::from_events(vec![word(1.0, &[("la", 1.0)], 0)]);
        let mapper = VisualStateMapper::new(&timeline, &MapperConfig::default());
        assert!(mapper.state_at(2.0).flying_lyrics.is_empty());

        let mut config = MapperConfig::default();
        config.flying_lyrics.enabled = true;
        let mapper = VisualStateMapper::new(&timeline, &config);
        assert!(mapper.state_at(0.5).flying_lyrics.is_empty());

        let flying = mapper.state_at(2.0).flying_lyrics;
        assert_eq!(flying.len(), 1);
        assert_eq!(flying[0].text, "la");
        // A4 is key 49; beat 0 pulls left of the launch point
        assert!((flying[0].x - 0.25).abs() < 1e-9);
        let vy = 2.5 * 49.0 / 88.0;
        assert!((flying[0].y - (0.1 + vy - 0.5 * 1.96)).abs() < 1e-9);
        // Fallen below the frame
        assert!(mapper.state_at(3.0).flying_lyrics.is_empty());
    }
}
