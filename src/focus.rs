//! Gaze hit-testing and single-element enlargement.
//!
//! The manager never owns elements; it walks whatever candidate slice the
//! caller hands it and remembers the focused one by id. At most one element
//! carries an enlarged visual state after any call.

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Edges are inclusive.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
    }

    /// Offset of (x, y) inside the box in percent; degenerate axes give 50.
    pub fn offset_percent(&self, x: f64, y: f64) -> (f64, f64) {
        let px = if self.width > 0.0 {
            (x - self.left) / self.width * 100.0
        } else {
            50.0
        };
        let py = if self.height > 0.0 {
            (y - self.top) / self.height * 100.0
        } else {
            50.0
        };
        (px, py)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOrigin {
    Center,
    Percent { x: f64, y: f64 },
}

impl TransformOrigin {
    pub fn css(&self) -> String {
        match self {
            Self::Center => "center center".to_string(),
            Self::Percent { x, y } => format!("{x}% {y}%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualState {
    pub scale: f64,
    pub origin: TransformOrigin,
    pub z_index: Option<i32>,
    /// 0 = never styled.
    pub transition_ms: u32,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            origin: TransformOrigin::Center,
            z_index: None,
            transition_ms: 0,
        }
    }
}

impl VisualState {
    pub fn resting(transition_ms: u32) -> Self {
        Self {
            transition_ms,
            ..Self::default()
        }
    }

    pub fn is_enlarged(&self) -> bool {
        self.scale != 1.0 || self.z_index.is_some()
    }

    /// Style declarations for the page, in application order.
    pub fn css(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(4);
        if self.transition_ms > 0 {
            out.push(("transition", format!("transform {}ms ease", self.transition_ms)));
        }
        out.push(("transform-origin", self.origin.css()));
        out.push(("transform", format!("scale({})", self.scale)));
        out.push((
            "z-index",
            self.z_index.map(|z| z.to_string()).unwrap_or_default(),
        ));
        out
    }
}

/// Anything the gaze can land on.
pub trait FocusTarget {
    fn id(&self) -> &str;
    fn bounding_box(&self) -> Rect;
    /// Page stacking order; only consulted by [`OverlapPolicy::Topmost`].
    fn stacking(&self) -> i32 {
        0
    }
    fn apply_visual_state(&mut self, state: &VisualState);
}

/// How overlapping candidates under the gaze point are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Last candidate in iteration order wins.
    #[default]
    Last,
    /// Highest stacking order wins; ties fall back to iteration order.
    Topmost,
}

#[derive(Debug)]
pub struct FocusManager {
    current: Option<String>,
    transition_ms: u32,
    z_index: i32,
    overlap: OverlapPolicy,
}

impl FocusManager {
    pub fn new(transition_ms: u32, z_index: i32, overlap: OverlapPolicy) -> Self {
        Self {
            current: None,
            transition_ms,
            z_index,
            overlap,
        }
    }

    pub fn configure(&mut self, transition_ms: u32, z_index: i32, overlap: OverlapPolicy) {
        self.transition_ms = transition_ms;
        self.z_index = z_index;
        self.overlap = overlap;
    }

    pub fn focused(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// One hit-test pass over `elements` for the gaze point (x, y).
    pub fn apply<T: FocusTarget>(&mut self, elements: &mut [T], x: f64, y: f64, scale: f64) {
        match self.overlap {
            OverlapPolicy::Last => {
                for i in 0..elements.len() {
                    if elements[i].bounding_box().contains(x, y) {
                        self.focus(elements, i, x, y, scale);
                    } else if self.is_current(&elements[i]) {
                        self.reset(&mut elements[i]);
                    }
                }
            }
            OverlapPolicy::Topmost => {
                let winner = elements
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.bounding_box().contains(x, y))
                    .max_by_key(|(_, e)| e.stacking())
                    .map(|(i, _)| i);
                for i in 0..elements.len() {
                    if Some(i) == winner {
                        self.focus(elements, i, x, y, scale);
                    } else if self.is_current(&elements[i]) {
                        self.reset(&mut elements[i]);
                    }
                }
            }
        }
    }

    /// Restores the focused element, if any is still among `elements`.
    pub fn reset_current<T: FocusTarget>(&mut self, elements: &mut [T]) {
        let Some(id) = self.current.clone() else {
            return;
        };
        match elements.iter_mut().find(|e| e.id() == id) {
            Some(el) => self.reset(el),
            None => self.current = None,
        }
    }

    /// Drops the focus record when the focused element is no longer among
    /// `elements`. Elements are not touched.
    pub fn retain<T: FocusTarget>(&mut self, elements: &[T]) {
        if let Some(id) = self.current.as_deref() {
            if !elements.iter().any(|e| e.id() == id) {
                debug!("focus: {id} left the layout");
                self.current = None;
            }
        }
    }

    fn is_current<T: FocusTarget>(&self, el: &T) -> bool {
        self.current.as_deref() == Some(el.id())
    }

    fn focus<T: FocusTarget>(&mut self, elements: &mut [T], idx: usize, x: f64, y: f64, scale: f64) {
        let id = elements[idx].id().to_string();
        if let Some(prev) = self.current.take() {
            if prev != id {
                if let Some(old) = elements.iter_mut().find(|e| e.id() == prev) {
                    old.apply_visual_state(&VisualState::resting(self.transition_ms));
                }
                debug!("focus: {prev} -> {id}");
            }
        } else {
            debug!("focus: none -> {id}");
        }

        let (ox, oy) = elements[idx].bounding_box().offset_percent(x, y);
        elements[idx].apply_visual_state(&VisualState {
            scale,
            origin: TransformOrigin::Percent { x: ox, y: oy },
            z_index: Some(self.z_index),
            transition_ms: self.transition_ms,
        });
        self.current = Some(id);
    }

    fn reset<T: FocusTarget>(&mut self, el: &mut T) {
        el.apply_visual_state(&VisualState::resting(self.transition_ms));
        if self.is_current(el) {
            debug!("focus: {} -> none", el.id());
            self.current = None;
        }
    }
}
