//! Viewer distance -> magnification.

pub const NEAR_CM: f64 = 20.0;
pub const FAR_CM: f64 = 80.0;

/// Clamps to [20, 80] cm and maps linearly onto [1.6, 1.0]; nearer viewers
/// get the larger scale. Non-finite input maps to 1.0.
pub fn scale_for(distance_cm: f64) -> f64 {
    if !distance_cm.is_finite() {
        return 1.0;
    }
    let d = distance_cm.clamp(NEAR_CM, FAR_CM);
    1.0 + (FAR_CM - d) / 100.0
}
