//! Grid calibration: one marker at a time, N confirming clicks per target.

use log::info;
use serde::Serialize;

use crate::gaze::{GazeEngine, SampleKind};
use crate::viewport::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    ShowingTarget { index: usize },
    AwaitingClicks { index: usize, samples: u32 },
    Complete,
}

/// Alternating marker colour, flipped on every recorded click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cue {
    Red,
    Orange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Marker {
    pub left: f64,
    pub top: f64,
    pub size: f64,
    pub cue: Cue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// No session running.
    Ignored,
    Recorded { index: usize, samples: u32 },
    Advanced { index: usize },
    Complete,
}

/// Fractional targets `(i/(n-1), j/(n-1))`, `i` outer, `j` inner.
pub fn grid_points(n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    let step = (n - 1) as f64;
    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            points.push((i as f64 / step, j as f64 / step));
        }
    }
    points
}

#[derive(Debug)]
struct Session {
    points: Vec<(f64, f64)>,
    index: usize,
    samples: u32,
}

#[derive(Debug)]
pub struct Calibration {
    grid: usize,
    samples_per_point: u32,
    marker_size: f64,
    session: Option<Session>,
    completed: bool,
}

impl Calibration {
    pub fn new(grid: usize, samples_per_point: u32, marker_size: f64) -> Self {
        Self {
            grid,
            samples_per_point,
            marker_size,
            session: None,
            completed: false,
        }
    }

    /// Takes effect for the next session.
    pub fn configure(&mut self, grid: usize, samples_per_point: u32, marker_size: f64) {
        self.grid = grid;
        self.samples_per_point = samples_per_point;
        self.marker_size = marker_size;
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn state(&self) -> CalibrationState {
        match &self.session {
            None if self.completed => CalibrationState::Complete,
            None => CalibrationState::Idle,
            Some(s) if s.samples == 0 => CalibrationState::ShowingTarget { index: s.index },
            Some(s) => CalibrationState::AwaitingClicks {
                index: s.index,
                samples: s.samples,
            },
        }
    }

    /// Starts (or restarts) a session at the first target.
    pub fn start(&mut self, engine: &mut dyn GazeEngine) {
        engine.show_calibration_aids(true);
        let points = grid_points(self.grid);
        info!("calibration started ({} targets)", points.len());
        self.session = Some(Session {
            points,
            index: 0,
            samples: 0,
        });
        self.completed = false;
    }

    /// Marker placement for the current target, centred on it.
    pub fn marker(&self, vp: &Viewport) -> Option<Marker> {
        let s = self.session.as_ref()?;
        let (fx, fy) = s.points[s.index];
        let half = self.marker_size / 2.0;
        Some(Marker {
            left: fx * vp.width - half,
            top: fy * vp.height - half,
            size: self.marker_size,
            cue: if s.samples % 2 == 0 { Cue::Red } else { Cue::Orange },
        })
    }

    /// A click on the marker: feeds the target's absolute position to the engine.
    pub fn click(&mut self, vp: &Viewport, engine: &mut dyn GazeEngine) -> ClickOutcome {
        let Some(s) = self.session.as_mut() else {
            return ClickOutcome::Ignored;
        };
        let (fx, fy) = s.points[s.index];
        engine.record_screen_position(fx * vp.width, fy * vp.height, SampleKind::Click);

        s.samples += 1;
        if s.samples < self.samples_per_point {
            return ClickOutcome::Recorded {
                index: s.index,
                samples: s.samples,
            };
        }

        s.index += 1;
        s.samples = 0;
        if s.index < s.points.len() {
            info!("calibration target {}/{}", s.index + 1, s.points.len());
            return ClickOutcome::Advanced { index: s.index };
        }

        self.session = None;
        self.completed = true;
        engine.show_calibration_aids(false);
        info!("calibration complete");
        ClickOutcome::Complete
    }
}
