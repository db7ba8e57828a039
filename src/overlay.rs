//! Text of the two diagnostic overlays.

use serde::Serialize;

use crate::detection::Detection;
use crate::viewport::Viewport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Overlays {
    pub screen: String,
    pub age: String,
}

impl Overlays {
    pub fn refresh_screen(&mut self, vp: &Viewport, distance_cm: Option<f64>) {
        self.screen = screen_text(vp, distance_cm);
    }

    pub fn refresh_age(&mut self, detection: Option<&Detection>) {
        self.age = age_text(detection);
    }
}

pub fn screen_text(vp: &Viewport, distance_cm: Option<f64>) -> String {
    let base = format!("{} x {}", vp.width.round(), vp.height.round());
    match distance_cm {
        Some(d) => format!("{base} | {d:.1} cm"),
        None => base,
    }
}

pub fn age_text(detection: Option<&Detection>) -> String {
    match detection {
        Some(d) => format!("age ~{} | gender: {}", d.age.round(), d.gender),
        None => "no face".to_string(),
    }
}
