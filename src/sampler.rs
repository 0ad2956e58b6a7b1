//! Fixed-rate sampling of the visual state mapper.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::visual::{VisualState, VisualStateMapper};

/// Default output frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

/// One sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub index: u64,
    pub state: VisualState,
}

/// Samples a mapper at `i / fps` for `i` in `0..ceil(duration * fps)`.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler<'a> {
    mapper: &'a VisualStateMapper,
    fps: f64,
    frame_count: u64,
}

impl<'a> FrameSampler<'a> {
    pub fn new(mapper: &'a VisualStateMapper, fps: f64) -> Result<Self, SyncError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(SyncError::Config(format!(
                "frame rate must be a positive number, got {fps}"
            )));
        }
        let duration = mapper.duration();
        let frame_count = if duration > 0.0 {
            (duration * fps).ceil() as u64
        } else {
            0
        };
        Ok(Self {
            mapper,
            fps,
            frame_count,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn duration(&self) -> f64 {
        self.mapper.duration()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Timestamp of frame `index`.
    pub fn timestamp(&self, index: u64) -> f64 {
        index as f64 / self.fps
    }

    /// State for frame `index`. The mapper is queried at most at the
    /// duration; the reported timestamp stays `index / fps`.
    pub fn sample(&self, index: u64) -> VisualState {
        let t = self.timestamp(index);
        let mut state = self.mapper.state_at(t.min(self.mapper.duration()));
        state.timestamp_seconds = t;
        state
    }

    pub fn frame(&self, index: u64) -> Frame {
        Frame {
            index,
            state: self.sample(index),
        }
    }

    /// All frames in order.
    pub fn frames(&self) -> Frames<'a> {
        Frames {
            sampler: *self,
            next: 0,
        }
    }
}

pub struct Frames<'a> {
    sampler: FrameSampler<'a>,
    next: u64,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next >= self.sampler.frame_count {
            return None;
        }
        let frame = self.sampler.frame(self.next);
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.sampler.frame_count - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Frames<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{EventOrder, EventPayload, MusicalEvent, Timeline};
    use crate::visual::MapperConfig;

    fn mapper(duration: f64) -> VisualStateMapper {
        let note = MusicalEvent {
            onset_seconds: 0.0,
            duration_seconds: duration,
            order: EventOrder {
                part: 0,
                measure: 0,
                note: 0,
            },
            payload: EventPayload::Note {
                midi: 60,
                voice: 1,
                staff: 1,
            },
        };
        VisualStateMapper::new(&Timeline::from_events(vec![note]), &MapperConfig::default())
    }

    #[test]
    fn frame_count_rounds_up() {
        let m = mapper(1.01);
        let sampler = FrameSampler::new(&m, 30.0).unwrap();
        assert_eq!(sampler.frame_count(), 31);
        assert_eq!(sampler.frames().len(), 31);

        let m = mapper(2.0);
        assert_eq!(FrameSampler::new(&m, 24.0).unwrap().frame_count(), 48);
    }

    #[test]
    fn last_frame_is_within_one_period() {
        let m = mapper(1.01);
        let sampler = FrameSampler::new(&m, 30.0).unwrap();
        let last = sampler.frames().last().unwrap();
        assert_eq!(last.index, 30);
        assert_eq!(last.state.timestamp_seconds, 1.0);
        assert!(last.state.timestamp_seconds - m.duration() < 1.0 / 30.0);
    }

    #[test]
    fn rejects_bad_frame_rate() {
        let m = mapper(1.0);
        assert!(matches!(FrameSampler::new(&m, 0.0), Err(SyncError::Config(_))));
        assert!(matches!(FrameSampler::new(&m, f64::NAN), Err(SyncError::Config(_))));
    }

    #[test]
    fn empty_timeline_has_no_frames() {
        let m = VisualStateMapper::new(&Timeline::from_events(Vec::new()), &MapperConfig::default());
        assert_eq!(FrameSampler::new(&m, 30.0).unwrap().frames().count(), 0);
    }
}
