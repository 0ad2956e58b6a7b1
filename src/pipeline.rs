//! Streams sampled frames into a sink.
//!
//! Frames are independent of each other, so they are computed on a pool of
//! scoped worker threads fed through a bounded job channel. The calling
//! thread keeps at most `queue_depth` indices queued ahead of the sink,
//! reorders finished frames and is the only one that touches the sink.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{self as channel, Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::sampler::{Frame, FrameSampler};
use crate::sink::{FrameSink, StreamInfo};
use crate::visual::VisualState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Worker threads; 0 uses the available parallelism, 1 computes frames
    /// on the calling thread.
    pub workers: usize,
    /// Maximum number of frames computed ahead of the sink.
    pub queue_depth: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 32,
        }
    }
}

impl StreamOptions {
    fn worker_count(&self) -> usize {
        match self.workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}

/// Cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReport {
    pub frames_written: u64,
    pub frames_total: u64,
    pub cancelled: bool,
}

/// Send every frame of `sampler` to `sink` in index order.
///
/// The sink sees `begin`, then `write_frame` for `0..n`, then `finish`. On
/// cancellation production stops, the sink is still finished and the report
/// says how far it got. A sink error stops the workers and is returned.
pub fn stream_frames<S: FrameSink + ?Sized>(
    sampler: &FrameSampler<'_>,
    info: &StreamInfo,
    sink: &mut S,
    options: &StreamOptions,
    cancel: &CancelToken,
) -> Result<StreamReport, SyncError> {
    let total = sampler.frame_count();
    let workers = options.worker_count();
    let depth = options.queue_depth.max(1);

    sink.begin(info)?;
    let written = if workers <= 1 || total < 2 {
        debug!("streaming {total} frames on the calling thread");
        stream_sequential(sampler, sink, cancel)?
    } else {
        debug!("streaming {total} frames with {workers} workers, window {depth}");
        stream_parallel(sampler, sink, workers, depth, cancel)?
    };
    sink.finish()?;

    let cancelled = written < total;
    if cancelled {
        warn!("stream cancelled after {written} of {total} frames");
    } else {
        info!("streamed {written} frames at {} fps", sampler.fps());
    }
    Ok(StreamReport {
        frames_written: written,
        frames_total: total,
        cancelled,
    })
}

fn stream_sequential<S: FrameSink + ?Sized>(
    sampler: &FrameSampler<'_>,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<u64, SyncError> {
    for index in 0..sampler.frame_count() {
        if cancel.is_cancelled() {
            return Ok(index);
        }
        sink.write_frame(index, &sampler.sample(index))?;
    }
    Ok(sampler.frame_count())
}

fn stream_parallel<S: FrameSink + ?Sized>(
    sampler: &FrameSampler<'_>,
    sink: &mut S,
    workers: usize,
    depth: usize,
    cancel: &CancelToken,
) -> Result<u64, SyncError> {
    // At most `depth` frames are outstanding, so neither channel ever blocks
    // a sender.
    let (job_tx, job_rx) = channel::bounded::<u64>(depth);
    let (frame_tx, frame_rx) = channel::bounded::<Frame>(depth);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let frame_tx = frame_tx.clone();
            scope.spawn(move || {
                for index in job_rx.iter() {
                    if cancel.is_cancelled() || frame_tx.send(sampler.frame(index)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(frame_tx);

        // Dropping the job sender on return lets the workers drain and exit
        deliver_in_order(sampler.frame_count(), depth as u64, job_tx, &frame_rx, sink, cancel)
    })
}

/// Keeps up to `depth` frames queued ahead of the sink and writes finished
/// frames strictly by index. Returns the number of frames written.
fn deliver_in_order<S: FrameSink + ?Sized>(
    total: u64,
    depth: u64,
    jobs: Sender<u64>,
    frames: &Receiver<Frame>,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<u64, SyncError> {
    let mut pending: BTreeMap<u64, VisualState> = BTreeMap::new();
    let mut issued = 0;
    let mut next = 0;
    while next < total {
        if cancel.is_cancelled() {
            return Ok(next);
        }
        while issued < total && issued < next + depth && jobs.send(issued).is_ok() {
            issued += 1;
        }
        let Ok(frame) = frames.recv() else {
            // Workers only quit early once cancelled
            if cancel.is_cancelled() {
                return Ok(next);
            }
            return Err(SyncError::sink(format!(
                "frame workers stopped before frame {next}"
            )));
        };
        pending.insert(frame.index, frame.state);
        while let Some(state) = pending.remove(&next) {
            if cancel.is_cancelled() {
                return Ok(next);
            }
            sink.write_frame(next, &state)?;
            next += 1;
        }
    }
    Ok(next)
}
