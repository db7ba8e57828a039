//! Exponential smoothing of raw gaze samples.

#[derive(Debug, Clone)]
pub struct GazeFilter {
    alpha: f64,
    last: Option<(f64, f64)>,
}

impl GazeFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, last: None }
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    /// First sample seeds the estimate and is returned as-is; later samples
    /// move the estimate `alpha` of the way toward the input on each axis.
    pub fn smooth(&mut self, x: f64, y: f64) -> (f64, f64) {
        let next = match self.last {
            None => (x, y),
            Some((lx, ly)) => (lx + self.alpha * (x - lx), ly + self.alpha * (y - ly)),
        };
        self.last = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn first_sample_passes_through() {
        let mut f = GazeFilter::new(0.2);
        assert_eq!(f.smooth(312.5, 48.0), (312.5, 48.0));
    }

    #[test]
    fn constant_input_does_not_drift() {
        let mut f = GazeFilter::new(0.2);
        for _ in 0..3 {
            assert_eq!(f.smooth(100.0, 100.0), (100.0, 100.0));
        }
    }

    #[test]
    fn second_sample_moves_a_fifth_of_the_way() {
        let mut f = GazeFilter::new(0.2);
        f.smooth(0.0, 0.0);
        let (x, y) = f.smooth(100.0, 0.0);
        assert!(close(x, 20.0));
        assert!(close(y, 0.0));
    }

    #[test]
    fn converges_monotonically_toward_target() {
        let mut f = GazeFilter::new(0.2);
        f.smooth(0.0, 500.0);
        let mut prev = (0.0, 500.0);
        for _ in 0..40 {
            let out = f.smooth(200.0, 100.0);
            assert!(out.0 >= prev.0 && out.0 <= 200.0);
            assert!(out.1 <= prev.1 && out.1 >= 100.0);
            prev = out;
        }
        assert!((prev.0 - 200.0).abs() < 1.0);
        assert!((prev.1 - 100.0).abs() < 1.0);
    }

    #[test]
    fn output_lies_between_previous_output_and_input() {
        let mut f = GazeFilter::new(0.2);
        let samples = [
            (10.0, 900.0),
            (640.0, 12.0),
            (-30.0, 400.0),
            (1280.0, 720.0),
            (5.0, 5.0),
        ];
        let mut prev = f.smooth(samples[0].0, samples[0].1);
        for &(x, y) in &samples[1..] {
            let out = f.smooth(x, y);
            assert!(out.0 >= prev.0.min(x) && out.0 <= prev.0.max(x));
            assert!(out.1 >= prev.1.min(y) && out.1 <= prev.1.max(y));
            prev = out;
        }
    }
}
