//! The boundary to the render/mux collaborator.
//!
//! The core hands sampled visual states to a [`FrameSink`] strictly in frame
//! order. What a sink does with them (composite images, pipe them to an
//! encoder, mux the audio) is outside this crate; [`AssetMap`] is the
//! explicit mapping from visual-state values to the sink's own asset handles.

use std::collections::HashMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::WinkSide;
use crate::phoneme::{MouthShape, PhonemeTable};
use crate::sampler::{Frame, FrameSampler};
use crate::visual::VisualState;

/// Stream parameters announced to the sink before the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub duration_seconds: f64,
    /// Where the audio track must start so it lines up with frame 0.
    /// Non-zero when only a range of measures is rendered.
    pub audio_offset_seconds: f64,
}

impl StreamInfo {
    pub fn for_sampler(sampler: &FrameSampler<'_>) -> Self {
        Self {
            fps: sampler.fps(),
            frame_count: sampler.frame_count(),
            duration_seconds: sampler.duration(),
            audio_offset_seconds: 0.0,
        }
    }

    pub fn with_audio_offset(mut self, seconds: f64) -> Self {
        self.audio_offset_seconds = seconds;
        self
    }
}

/// Consumer of ordered frames.
///
/// `write_frame` is called with indices `0, 1, 2, ...` without gaps.
/// `finish` is called once after the last frame, also when the stream was
/// cancelled, so the sink can flush what it has.
pub trait FrameSink {
    fn begin(&mut self, _info: &StreamInfo) -> Result<(), SyncError> {
        Ok(())
    }

    fn write_frame(&mut self, index: u64, state: &VisualState) -> Result<(), SyncError>;

    fn finish(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn begin(&mut self, info: &StreamInfo) -> Result<(), SyncError> {
        (**self).begin(info)
    }

    fn write_frame(&mut self, index: u64, state: &VisualState) -> Result<(), SyncError> {
        (**self).write_frame(index, state)
    }

    fn finish(&mut self) -> Result<(), SyncError> {
        (**self).finish()
    }
}

/// Keeps every frame in memory. Useful for previews and tests.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub info: Option<StreamInfo>,
    pub frames: Vec<Frame>,
    pub finished: bool,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for CollectSink {
    fn begin(&mut self, info: &StreamInfo) -> Result<(), SyncError> {
        self.info = Some(info.clone());
        Ok(())
    }

    fn write_frame(&mut self, index: u64, state: &VisualState) -> Result<(), SyncError> {
        self.frames.push(Frame {
            index,
            state: state.clone(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SyncError> {
        self.finished = true;
        Ok(())
    }
}

/// Writes the stream info followed by one JSON object per frame, one per
/// line, for an external compositor.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), SyncError> {
        serde_json::to_writer(&mut self.writer, value).map_err(SyncError::sink)?;
        self.writer.write_all(b"\n").map_err(SyncError::sink)
    }
}

impl<W: Write> FrameSink for JsonLinesSink<W> {
    fn begin(&mut self, info: &StreamInfo) -> Result<(), SyncError> {
        self.write_line(info)
    }

    fn write_frame(&mut self, index: u64, state: &VisualState) -> Result<(), SyncError> {
        #[derive(Serialize)]
        struct Line<'a> {
            index: u64,
            #[serde(flatten)]
            state: &'a VisualState,
        }
        self.write_line(&Line { index, state })
    }

    fn finish(&mut self) -> Result<(), SyncError> {
        self.writer.flush().map_err(SyncError::sink)
    }
}

/// A visual-state value that needs an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "layer", content = "value", rename_all = "snake_case")]
pub enum AssetKey {
    Mouth(MouthShape),
    EyesClosed,
    Wink(WinkSide),
}

/// Assets for one frame. `eyes` is the overlay for closed or winking eyes,
/// `None` when the eyes are open.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAssets<'a, H> {
    pub mouth: &'a H,
    pub eyes: Option<&'a H>,
}

/// Mapping from visual-state values to sink-owned asset handles (file paths,
/// decoded images, texture ids, ...).
#[derive(Debug, Clone)]
pub struct AssetMap<H> {
    entries: HashMap<AssetKey, H>,
}

impl<H> Default for AssetMap<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> AssetMap<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: AssetKey, handle: H) -> Option<H> {
        self.entries.insert(key, handle)
    }

    pub fn with(mut self, key: AssetKey, handle: H) -> Self {
        self.entries.insert(key, handle);
        self
    }

    pub fn get(&self, key: &AssetKey) -> Option<&H> {
        self.entries.get(key)
    }

    fn require(&self, key: &AssetKey) -> Result<&H, SyncError> {
        self.entries
            .get(key)
            .ok_or_else(|| SyncError::Config(format!("no asset registered for {key:?}")))
    }

    /// Check that every mouth shape the table can produce has an asset, so a
    /// missing image fails the run before the first frame.
    pub fn check_phonemes(&self, table: &PhonemeTable) -> Result<(), SyncError> {
        for shape in table.shapes() {
            self.require(&AssetKey::Mouth(shape.clone()))?;
        }
        Ok(())
    }

    /// Pick the assets for a state. A wink is drawn instead of closed eyes.
    pub fn resolve(&self, state: &VisualState) -> Result<FrameAssets<'_, H>, SyncError> {
        let mouth = self.require(&AssetKey::Mouth(state.mouth_shape.clone()))?;
        let eyes = match (state.wink_side, state.eyes_closed) {
            (Some(side), _) => Some(self.require(&AssetKey::Wink(side))?),
            (None, true) => Some(self.require(&AssetKey::EyesClosed)?),
            (None, false) => None,
        };
        Ok(FrameAssets { mouth, eyes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mouth: &str, eyes_closed: bool, wink_side: Option<WinkSide>) -> VisualState {
        VisualState {
            timestamp_seconds: 0.0,
            mouth_shape: MouthShape::new(mouth),
            head_tilt_deg: 0.0,
            eyes_closed,
            wink_side,
            scroll_offset_px: 0.0,
            active_lyric: None,
            flying_lyrics: Vec::new(),
        }
    }

    fn assets() -> AssetMap<&'static str> {
        AssetMap::new()
            .with(AssetKey::Mouth(MouthShape::new("A")), "mouth_a.png")
            .with(AssetKey::Mouth(MouthShape::new("N")), "mouth_n.png")
            .with(AssetKey::EyesClosed, "eyes_closed.png")
            .with(AssetKey::Wink(WinkSide::Right), "wink_r.png")
    }

    #[test]
    fn wink_wins_over_closed_eyes() {
        let map = assets();
        let resolved = map.resolve(&state("A", true, Some(WinkSide::Right))).unwrap();
        assert_eq!(resolved.mouth, &"mouth_a.png");
        assert_eq!(resolved.eyes, Some(&"wink_r.png"));

        let resolved = map.resolve(&state("N", true, None)).unwrap();
        assert_eq!(resolved.eyes, Some(&"eyes_closed.png"));
        assert_eq!(map.resolve(&state("N", false, None)).unwrap().eyes, None);
    }

    #[test]
    fn missing_asset_is_reported() {
        let map = assets();
        assert!(map.resolve(&state("O", false, None)).is_err());
        assert!(map.resolve(&state("A", false, Some(WinkSide::Left))).is_err());
        assert!(map.check_phonemes(&PhonemeTable::five_vowel()).is_err());
    }

    #[test]
    fn json_lines_sink_writes_header_and_frames() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let info = StreamInfo {
            fps: 30.0,
            frame_count: 1,
            duration_seconds: 0.01,
            audio_offset_seconds: 0.0,
        };
        sink.begin(&info).unwrap();
        sink.write_frame(0, &state("A", false, None)).unwrap();
        sink.finish().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let header: StreamInfo = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header, info);
        let frame: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(frame["index"], 0);
        assert_eq!(frame["mouth_shape"], "A");
        assert_eq!(frame["wink_side"], serde_json::Value::Null);
    }
}
