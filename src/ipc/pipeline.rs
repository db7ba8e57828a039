//! The single consumer of daemon events. Owns every piece of UI state; the
//! only value it shares is the distance reading written by the distance client.

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use super::dispatch::{Command, dispatch_command};
use crate::calibration::{Calibration, ClickOutcome};
use crate::config::{Profile, ScaleMode};
use crate::detection::Detection;
use crate::distance::DistanceState;
use crate::focus::FocusManager;
use crate::gaze::{GazeEngine, GazeSample};
use crate::overlay::Overlays;
use crate::scale::scale_for;
use crate::scene::{ElementSpec, Scene};
use crate::smoothing::GazeFilter;
use crate::viewport::{VideoSource, Viewport};

pub enum Event {
    Gaze(GazeSample),
    Command(Command),
    /// Click on the calibration marker.
    MarkerClick,
    Layout(Vec<ElementSpec>),
    Viewport(Viewport),
    /// The distance client stored a new reading.
    Distance,
    Detection(Option<Detection>),
    Profile(Box<Profile>),
    Status(Sender<serde_json::Value>),
    Shutdown,
}

/// Background workers the pipeline switches on and off.
pub trait Services {
    /// Starts the distance client unless it already runs.
    fn start_distance(&mut self);
    /// Starts the detection loop unless it already runs.
    fn start_detection(&mut self, video: VideoSource);
    fn stop_detection(&mut self);
    fn configure(&mut self, profile: &Profile);
}

const COMPLETION_NOTICE: &str = "calibration complete: gaze tracking should now be more accurate";

pub struct Pipeline<S: Services> {
    profile: Profile,
    enabled: bool,
    filter: GazeFilter,
    focus: FocusManager,
    scene: Scene,
    calibration: Calibration,
    viewport: Viewport,
    distance: DistanceState,
    overlays: Overlays,
    engine: Box<dyn GazeEngine>,
    services: S,
    notice: Option<String>,
}

impl<S: Services> Pipeline<S> {
    pub fn new(
        profile: Profile,
        distance: DistanceState,
        engine: Box<dyn GazeEngine>,
        services: S,
    ) -> Self {
        let f = &profile.focus;
        let c = &profile.calibration;
        let viewport = Viewport::default();
        let mut overlays = Overlays::default();
        overlays.refresh_screen(&viewport, None);
        Self {
            filter: GazeFilter::new(profile.smoothing.alpha),
            focus: FocusManager::new(f.transition_ms, f.z_index, f.overlap),
            calibration: Calibration::new(c.grid, c.samples_per_point, c.marker_size),
            scene: Scene::default(),
            enabled: false,
            viewport,
            distance,
            overlays,
            engine,
            services,
            notice: None,
            profile,
        }
    }

    /// Returns false once the pipeline should stop.
    pub fn handle(&mut self, ev: Event) -> bool {
        match ev {
            Event::Gaze(s) => self.on_gaze(s),
            Event::Command(cmd) => dispatch_command(cmd, self),
            Event::MarkerClick => self.on_marker_click(),
            Event::Layout(specs) => {
                let kept = self.scene.replace(specs, &self.profile.focus.tags);
                self.focus.retain(self.scene.elements());
                debug!("layout: {kept} candidate elements");
            }
            Event::Viewport(vp) => self.on_viewport(vp),
            Event::Distance => self.refresh_screen_overlay(),
            Event::Detection(d) => self.overlays.refresh_age(d.as_ref()),
            Event::Profile(p) => self.apply_profile(*p),
            Event::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Event::Shutdown => {
                info!("pipeline shutting down");
                return false;
            }
        }
        true
    }

    pub(super) fn enable(&mut self) {
        if !self.enabled {
            info!("gaze tracking enabled");
        }
        self.enabled = true;
        self.services.start_distance();
        match self.viewport.video {
            Some(video) => self.services.start_detection(video),
            None => debug!("no video source; detection not started"),
        }
    }

    pub(super) fn disable(&mut self) {
        if self.enabled {
            info!("gaze tracking disabled");
        }
        self.enabled = false;
        self.focus.reset_current(self.scene.elements_mut());
        if self.profile.detection.stop_on_disable {
            self.services.stop_detection();
        }
    }

    pub(super) fn calibrate(&mut self) {
        self.calibration.start(self.engine.as_mut());
        if self.profile.focus.suppress_during_calibration {
            self.focus.reset_current(self.scene.elements_mut());
        }
    }

    fn on_gaze(&mut self, s: GazeSample) {
        if !self.enabled {
            return;
        }
        if !s.x.is_finite() || !s.y.is_finite() {
            debug!("dropping non-finite gaze sample");
            return;
        }
        let (x, y) = self.filter.smooth(s.x, s.y);
        if self.profile.focus.suppress_during_calibration && self.calibration.is_running() {
            return;
        }
        let x = self.viewport.corrected_x(x);
        let scale = self.current_scale();
        self.focus.apply(self.scene.elements_mut(), x, y, scale);
    }

    fn on_marker_click(&mut self) {
        match self.calibration.click(&self.viewport, self.engine.as_mut()) {
            ClickOutcome::Ignored => debug!("marker click outside calibration"),
            ClickOutcome::Complete => self.notice = Some(COMPLETION_NOTICE.to_string()),
            ClickOutcome::Recorded { index, samples } => {
                debug!("calibration target {index}: {samples} samples")
            }
            ClickOutcome::Advanced { index } => debug!("calibration moved to target {index}"),
        }
    }

    fn on_viewport(&mut self, vp: Viewport) {
        let video_changed = vp.video != self.viewport.video;
        self.viewport = vp;
        self.refresh_screen_overlay();
        if !(self.enabled && video_changed) {
            return;
        }
        match vp.video {
            Some(video) => {
                self.services.stop_detection();
                self.services.start_detection(video);
            }
            None => self.services.stop_detection(),
        }
    }

    fn apply_profile(&mut self, p: Profile) {
        let f = &p.focus;
        let c = &p.calibration;
        self.filter.set_alpha(p.smoothing.alpha);
        self.focus.configure(f.transition_ms, f.z_index, f.overlap);
        self.calibration.configure(c.grid, c.samples_per_point, c.marker_size);
        self.services.configure(&p);
        if p.distance.endpoint != self.profile.distance.endpoint {
            warn!("distance endpoint change takes effect after restart");
        }
        self.profile = p;
        info!(
            "profile '{}' applied",
            self.profile.meta.name.as_deref().unwrap_or("unnamed")
        );
    }

    fn refresh_screen_overlay(&mut self) {
        let d = self.distance.has_reading().then(|| self.distance.get());
        self.overlays.refresh_screen(&self.viewport, d);
    }

    fn current_scale(&self) -> f64 {
        match self.profile.focus.scale_mode {
            ScaleMode::Fixed => self.profile.focus.scale,
            ScaleMode::Distance => scale_for(self.distance.get()),
        }
    }

    fn status(&mut self) -> serde_json::Value {
        let status = serde_json::json!({
            "enabled": self.enabled,
            "focused": self.focus.focused(),
            "scale": self.current_scale(),
            "distance_cm": self.distance.get(),
            "viewport": self.viewport,
            "elements": self.scene.styles(),
            "calibration": {
                "state": self.calibration.state(),
                "marker": self.calibration.marker(&self.viewport),
            },
            "overlays": self.overlays,
            "notice": self.notice.take(),
        });
        self.scene.clear_released();
        status
    }
}

/// Consumes events in arrival order until shutdown or until every sender is gone.
pub fn run<S: Services>(mut pipeline: Pipeline<S>, rx: Receiver<Event>) {
    for ev in rx.iter() {
        if !pipeline.handle(ev) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::Rect;
    use crate::gaze::SampleKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        distance_starts: usize,
        detection_running: Option<VideoSource>,
        detection_starts: usize,
        detection_stops: usize,
    }

    impl Services for Recorder {
        fn start_distance(&mut self) {
            self.distance_starts += 1;
        }
        fn start_detection(&mut self, video: VideoSource) {
            if self.detection_running.is_none() {
                self.detection_starts += 1;
                self.detection_running = Some(video);
            }
        }
        fn stop_detection(&mut self) {
            if self.detection_running.take().is_some() {
                self.detection_stops += 1;
            }
        }
        fn configure(&mut self, _profile: &Profile) {}
    }

    #[derive(Clone, Default)]
    struct Engine(Rc<RefCell<Vec<(f64, f64)>>>);

    impl GazeEngine for Engine {
        fn record_screen_position(&mut self, x: f64, y: f64, _kind: SampleKind) {
            self.0.borrow_mut().push((x, y));
        }
        fn show_calibration_aids(&mut self, _on: bool) {}
    }

    fn pipeline_with(profile: Profile) -> (Pipeline<Recorder>, Engine, DistanceState) {
        let engine = Engine::default();
        let distance = DistanceState::new(profile.distance.default_cm);
        let p = Pipeline::new(
            profile,
            distance.clone(),
            Box::new(engine.clone()),
            Recorder::default(),
        );
        (p, engine, distance)
    }

    fn spec(id: &str, tag: &str, left: f64, top: f64, w: f64, h: f64) -> ElementSpec {
        ElementSpec {
            id: id.into(),
            tag: tag.into(),
            rect: Rect::new(left, top, w, h),
            stacking: 0,
        }
    }

    fn layout() -> Event {
        Event::Layout(vec![
            spec("title", "h1", 0.0, 0.0, 400.0, 100.0),
            spec("nav", "div", 0.0, 0.0, 1280.0, 720.0),
            spec("photo", "img", 500.0, 0.0, 300.0, 300.0),
        ])
    }

    fn gaze(x: f64, y: f64) -> Event {
        Event::Gaze(GazeSample { x, y })
    }

    fn status(p: &mut Pipeline<Recorder>) -> serde_json::Value {
        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(p.handle(Event::Status(tx)));
        rx.recv().expect("status")
    }

    fn enlarged(p: &Pipeline<Recorder>) -> Vec<String> {
        p.scene
            .elements()
            .iter()
            .filter(|e| e.state.is_enlarged())
            .map(|e| e.id.clone())
            .collect()
    }

    #[test]
    fn gaze_is_ignored_until_enabled() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(layout());
        p.handle(gaze(100.0, 50.0));
        assert!(enlarged(&p).is_empty());

        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(100.0, 50.0));
        assert_eq!(enlarged(&p), vec!["title".to_string()]);
        assert_eq!(p.focus.focused(), Some("title"));
    }

    #[test]
    fn smoothing_lags_raw_gaze() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(100.0, 50.0));
        // Raw point is on the photo; the smoothed point (240, 50) is still on the title.
        p.handle(gaze(800.0, 50.0));
        assert_eq!(enlarged(&p), vec!["title".to_string()]);
        match p.scene.elements()[0].state.origin {
            crate::focus::TransformOrigin::Percent { x, y } => {
                assert!((x - 60.0).abs() < 1e-9);
                assert!((y - 50.0).abs() < 1e-9);
            }
            other => panic!("unexpected origin {other:?}"),
        }
    }

    #[test]
    fn disable_resets_focus_and_stops_detection() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(Event::Viewport(Viewport {
            width: 1280.0,
            height: 720.0,
            video: Some(VideoSource { mirrored: false }),
        }));
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        assert_eq!(p.services.detection_starts, 1);
        p.handle(gaze(600.0, 100.0));
        assert_eq!(enlarged(&p), vec!["photo".to_string()]);

        p.handle(Event::Command(Command::DisableGaze));
        assert!(enlarged(&p).is_empty());
        assert_eq!(p.services.detection_stops, 1);
        p.handle(gaze(600.0, 100.0));
        assert!(enlarged(&p).is_empty());
    }

    #[test]
    fn enable_twice_starts_workers_once() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(Event::Viewport(Viewport {
            width: 800.0,
            height: 600.0,
            video: Some(VideoSource::default()),
        }));
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(Event::Command(Command::EnableGaze));
        assert_eq!(p.services.detection_starts, 1);
        // The real service makes repeated starts a no-op; the pipeline asks each time.
        assert_eq!(p.services.distance_starts, 2);
    }

    #[test]
    fn no_video_means_no_detection_and_no_mirroring() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        assert_eq!(p.services.detection_starts, 0);
        p.handle(gaze(50.0, 50.0));
        assert_eq!(p.focus.focused(), Some("title"));
    }

    #[test]
    fn mirrored_video_flips_x() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(Event::Viewport(Viewport {
            width: 1280.0,
            height: 720.0,
            video: Some(VideoSource { mirrored: true }),
        }));
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        // 1280 - 1200 = 80 lands on the title.
        p.handle(gaze(1200.0, 50.0));
        assert_eq!(p.focus.focused(), Some("title"));
    }

    #[test]
    fn distance_mode_scales_by_reading() {
        let mut profile = Profile::default();
        profile.focus.scale_mode = ScaleMode::Distance;
        profile.distance.default_cm = 30.0;
        let (mut p, _, _) = pipeline_with(profile);
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(10.0, 10.0));
        let title = &p.scene.elements()[0];
        assert!((title.state.scale - 1.5).abs() < 1e-9);
    }

    #[test]
    fn full_calibration_through_events() {
        let (mut p, engine, _) = pipeline_with(Profile::default());
        p.handle(Event::Viewport(Viewport {
            width: 1000.0,
            height: 500.0,
            video: None,
        }));
        p.handle(Event::Command(Command::Calibrate));
        let st = status(&mut p);
        assert_eq!(st["calibration"]["state"]["state"], "showing_target");
        assert_eq!(st["calibration"]["marker"]["left"], -20.0);

        for _ in 0..45 {
            p.handle(Event::MarkerClick);
        }
        let st = status(&mut p);
        assert_eq!(st["calibration"]["state"]["state"], "complete");
        assert!(st["calibration"]["marker"].is_null());
        assert_eq!(st["notice"], COMPLETION_NOTICE);
        // The notice is shown once.
        assert!(status(&mut p)["notice"].is_null());

        p.handle(Event::MarkerClick);
        let pts = engine.0.borrow();
        assert_eq!(pts.len(), 45);
        assert_eq!(pts[0], (0.0, 0.0));
        assert_eq!(pts[44], (1000.0, 500.0));
    }

    #[test]
    fn enlargement_continues_during_calibration_by_default() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(Event::Command(Command::Calibrate));
        p.handle(gaze(10.0, 10.0));
        assert_eq!(p.focus.focused(), Some("title"));
    }

    #[test]
    fn enlargement_can_be_suppressed_during_calibration() {
        let mut profile = Profile::default();
        profile.focus.suppress_during_calibration = true;
        let (mut p, _, _) = pipeline_with(profile);
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(10.0, 10.0));
        assert_eq!(p.focus.focused(), Some("title"));

        p.handle(Event::Command(Command::Calibrate));
        assert!(enlarged(&p).is_empty());
        p.handle(gaze(10.0, 10.0));
        assert!(enlarged(&p).is_empty());
    }

    #[test]
    fn overlays_follow_viewport_and_detection() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        assert_eq!(p.overlays.screen, "1280 x 720");
        p.handle(Event::Viewport(Viewport {
            width: 1920.0,
            height: 1080.0,
            video: None,
        }));
        assert_eq!(p.overlays.screen, "1920 x 1080");

        p.handle(Event::Detection(None));
        assert_eq!(p.overlays.age, "no face");
        p.handle(Event::Detection(Some(Detection {
            age: 24.2,
            gender: "male".into(),
        })));
        assert_eq!(p.overlays.age, "age ~24 | gender: male");
    }

    #[test]
    fn distance_update_refreshes_overlay_and_scale() {
        let mut profile = Profile::default();
        profile.focus.scale_mode = ScaleMode::Distance;
        let (mut p, _, distance) = pipeline_with(profile);
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        // No reading yet: plain size, scale from the 50 cm default.
        assert_eq!(p.overlays.screen, "1280 x 720");
        assert!((status(&mut p)["scale"].as_f64().expect("scale") - 1.3).abs() < 1e-9);

        distance.set(35.04);
        p.handle(Event::Distance);
        assert_eq!(p.overlays.screen, "1280 x 720 | 35.0 cm");
        let st = status(&mut p);
        assert!((st["scale"].as_f64().expect("scale") - 1.4496).abs() < 1e-9);
        assert_eq!(st["distance_cm"], 35.04);

        p.handle(gaze(10.0, 10.0));
        assert!((p.scene.elements()[0].state.scale - 1.4496).abs() < 1e-9);
    }

    #[test]
    fn new_layout_drops_focus_of_departed_element() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        p.handle(layout());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(10.0, 10.0));
        p.handle(Event::Layout(vec![spec("p1", "p", 900.0, 600.0, 10.0, 10.0)]));
        assert_eq!(p.focus.focused(), None);
        assert_eq!(p.scene.elements().len(), 1);

        // The page still learns that the title is back at rest, once.
        let st = status(&mut p);
        let elements = st["elements"].as_array().expect("array");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0]["id"], "title");
        assert_eq!(elements[0]["enlarged"], false);
        assert!(status(&mut p)["elements"].as_array().expect("array").is_empty());
    }

    #[test]
    fn relayout_keeps_a_single_enlarged_element() {
        let (mut p, _, _) = pipeline_with(Profile::default());
        let page = || {
            Event::Layout(vec![
                spec("title", "h1", 0.0, 0.0, 400.0, 100.0),
                spec("photo", "img", 400.5, 0.0, 300.0, 100.0),
            ])
        };
        p.handle(page());
        p.handle(Event::Command(Command::EnableGaze));
        p.handle(gaze(390.0, 10.0));
        assert_eq!(p.focus.focused(), Some("title"));

        // Same layout again, as after a scroll.
        p.handle(page());
        assert_eq!(p.focus.focused(), Some("title"));
        let st = status(&mut p);
        assert_eq!(st["elements"][0]["id"], "title");
        assert_eq!(st["elements"][0]["enlarged"], true);

        // Smoothed to (512, 10): on the photo.
        p.handle(gaze(1000.0, 10.0));
        assert_eq!(enlarged(&p), vec!["photo".to_string()]);
        let st = status(&mut p);
        let title = st["elements"]
            .as_array()
            .expect("array")
            .iter()
            .find(|e| e["id"] == "title")
            .cloned()
            .expect("title reset reported");
        assert_eq!(title["enlarged"], false);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let (p, _, _) = pipeline_with(Profile::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Event::Command(Command::EnableGaze)).expect("send");
        tx.send(Event::Shutdown).expect("send");
        tx.send(Event::Command(Command::Calibrate)).expect("send");
        run(p, rx.clone());
        // The event after shutdown is left unconsumed.
        assert_eq!(rx.len(), 1);
    }
}
