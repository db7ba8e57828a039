//! Face / age estimation boundary and the periodic detection worker.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, info};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::viewport::VideoSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub age: f64,
    pub gender: String,
}

pub trait FaceEstimator: Send {
    /// `None` means no face in the current frame.
    fn estimate(&mut self, video: &VideoSource) -> Option<Detection>;
}

/// Latest face reading pushed by the external estimator, with its arrival time.
#[derive(Debug, Clone, Default)]
pub struct FaceFeed {
    latest: Arc<Mutex<Option<(Instant, Option<Detection>)>>>,
}

impl FaceFeed {
    pub fn push(&self, reading: Option<Detection>) {
        let mut g = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some((Instant::now(), reading));
    }

    fn fresh(&self, max_age: Duration) -> Option<Detection> {
        let g = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        match g.as_ref() {
            Some((at, reading)) if at.elapsed() <= max_age => reading.clone(),
            _ => None,
        }
    }
}

/// Reports the feed's latest reading while it is younger than `stale`.
pub struct FeedEstimator {
    feed: FaceFeed,
    stale: Duration,
}

impl FeedEstimator {
    pub fn new(feed: FaceFeed, stale: Duration) -> Self {
        Self { feed, stale }
    }
}

impl FaceEstimator for FeedEstimator {
    fn estimate(&mut self, _video: &VideoSource) -> Option<Detection> {
        self.feed.fresh(self.stale)
    }
}

/// Cancellable periodic detection task. Dropping the handle stops it too.
pub struct DetectionLoop {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DetectionLoop {
    pub fn spawn<F>(
        mut estimator: Box<dyn FaceEstimator>,
        video: VideoSource,
        interval: Duration,
        mut on_result: F,
    ) -> Self
    where
        F: FnMut(Option<Detection>) -> bool + Send + 'static,
    {
        let (stop, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);
        let thread = thread::spawn(move || {
            info!("detection loop started");
            loop {
                let result = estimator.estimate(&video);
                if !on_result(result) {
                    debug!("detection consumer gone");
                    break;
                }
                // A stop message or a dropped handle both end the loop.
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            info!("detection loop stopped");
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
