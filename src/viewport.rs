use serde::{Deserialize, Serialize};

/// The camera feed shown on the page, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoSource {
    #[serde(default)]
    pub mirrored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub video: Option<VideoSource>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            video: None,
        }
    }
}

impl Viewport {
    /// Undo the horizontal flip of a mirrored camera preview.
    pub fn corrected_x(&self, x: f64) -> f64 {
        match self.video {
            Some(v) if v.mirrored => self.width - x,
            _ => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_correction() {
        let mut vp = Viewport {
            width: 1000.0,
            height: 600.0,
            video: None,
        };
        assert_eq!(vp.corrected_x(300.0), 300.0);
        vp.video = Some(VideoSource { mirrored: false });
        assert_eq!(vp.corrected_x(300.0), 300.0);
        vp.video = Some(VideoSource { mirrored: true });
        assert_eq!(vp.corrected_x(300.0), 700.0);
    }
}
