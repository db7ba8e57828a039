use anyhow::{Result, anyhow};
use crossbeam_channel::{Sender, TrySendError, bounded, unbounded};
use log::{debug, error, info, warn};
use notify::{RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::SocketAddr,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use super::dispatch::Command;
use super::pipeline::{self, Event, Pipeline, Services};
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};
use crate::detection::{DetectionLoop, FaceFeed, FeedEstimator};
use crate::distance::{DistanceClient, DistanceState, DistanceWorker, TcpConnector};
use crate::gaze::{self, GazeSample, UdpGazeEngine};
use crate::scene::ElementSpec;
use crate::viewport::{VideoSource, Viewport};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // config
    let mut cfg = DaemonConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);
    let profile = cfg.profile.clone();

    // channels
    let (tx_evt, rx_evt) = bounded::<Event>(profile.gaze.queue);
    let (tx_req, rx_req) = unbounded::<IpcMsg>();

    // pipeline thread
    let distance = DistanceState::new(profile.distance.default_cm);
    let faces = FaceFeed::default();
    let engine = UdpGazeEngine::new(profile.gaze_engine_addr()?)?;
    let services = ThreadServices::new(&profile, tx_evt.clone(), distance.clone(), faces.clone());
    let pipeline_thread = {
        let profile = profile.clone();
        thread::spawn(move || {
            let p = Pipeline::new(profile, distance, Box::new(engine), services);
            pipeline::run(p, rx_evt);
        })
    };

    // gaze listener
    let (stop_listener, stop_rx) = bounded::<()>(1);
    let listener_thread = {
        let tx = tx_evt.clone();
        gaze::spawn_listener(profile.gaze_listen_addr()?, faces, stop_rx, move |s| {
            push_gaze(&tx, s)
        })?
    };

    // signals
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    {
        let tx = tx_evt.clone();
        thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("daemon: signal {sig}, shutting down");
                let _ = tx.send(Event::Shutdown);
            }
        });
    }

    // profile watcher
    let (tx_fs, rx_fs) = unbounded::<PathBuf>();
    let _watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
                for p in ev.paths {
                    let _ = tx_fs.send(p);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("profile watcher: {e}"),
        }
    }) {
        Ok(mut w) => match w.watch(&cfg.profiles_dir, RecursiveMode::NonRecursive) {
            Ok(()) => Some(w),
            Err(e) => {
                warn!("cannot watch {}: {e}", cfg.profiles_dir.display());
                None
            }
        },
        Err(e) => {
            warn!("profile watcher unavailable: {e}");
            None
        }
    };

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx_evt = tx_evt.clone();
                let tx_req = tx_req.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, &tx_evt, &tx_req) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        while let Ok(msg) = rx_req.try_recv() {
            handle_request(msg, &mut cfg, &tx_evt, &sock);
        }

        let active = cfg.profile_path(&cfg.active_name);
        let mut touched = false;
        while let Ok(path) = rx_fs.try_recv() {
            touched |= path == active;
        }
        if touched {
            match reload(&mut cfg, &tx_evt) {
                Ok(()) => info!("profile '{}' reloaded after edit", cfg.active_name),
                Err(e) => error!("reload failed, keeping last good profile: {e}"),
            }
        }

        if pipeline_thread.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    signals_handle.close();
    let _ = stop_listener.send(());
    let _ = listener_thread.join();
    let _ = pipeline_thread.join();
    let _ = std::fs::remove_file(&sock);
    info!("daemon: stopped");
    Ok(())
}

fn push_gaze(tx: &Sender<Event>, s: GazeSample) {
    if let Err(TrySendError::Full(_)) = tx.try_send(Event::Gaze(s)) {
        debug!("event queue full; gaze sample dropped");
    }
}

fn reload(cfg: &mut DaemonConfigState, tx_evt: &Sender<Event>) -> Result<()> {
    cfg.reload()?;
    post(tx_evt, Event::Profile(Box::new(cfg.profile.clone())))
}

fn handle_request(msg: IpcMsg, cfg: &mut DaemonConfigState, tx_evt: &Sender<Event>, sock: &Path) {
    match msg {
        IpcMsg::Reload(reply) => {
            let r = reload(cfg, tx_evt).map(|_| {
                info!("profile reloaded");
                serde_json::json!({"active_profile": cfg.active_name})
            });
            let _ = reply.send(r);
        }
        IpcMsg::UseProfile(name, reply) => {
            let r = cfg
                .set_active(&name)
                .and_then(|_| post(tx_evt, Event::Profile(Box::new(cfg.profile.clone()))))
                .map(|_| {
                    info!("switched active profile to {}", cfg.active_name);
                    serde_json::json!({"active_profile": cfg.active_name})
                });
            let _ = reply.send(r);
        }
        IpcMsg::List(reply) => {
            let list = cfg.list_profiles();
            let _ = reply.send(Ok(
                serde_json::json!({"profiles": list, "active": cfg.active_name}),
            ));
        }
        IpcMsg::Doctor(reply) => {
            let _ = reply.send(Ok(cfg.doctor_report(sock)));
        }
    }
}

fn handle_client(
    mut stream: UnixStream,
    tx_evt: &Sender<Event>,
    tx_req: &Sender<IpcMsg>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match respond(op, &req, tx_evt, tx_req) {
        Ok(data) => serde_json::json!({"ok": true, "data": data}),
        Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
    };
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn respond(
    op: &str,
    req: &serde_json::Value,
    tx_evt: &Sender<Event>,
    tx_req: &Sender<IpcMsg>,
) -> Result<serde_json::Value> {
    match op {
        "status" => {
            let (reply, rx) = bounded(1);
            post(tx_evt, Event::Status(reply))?;
            rx.recv_timeout(REPLY_TIMEOUT)
                .map_err(|_| anyhow!("pipeline did not answer"))
        }
        "command" => {
            let t = req
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("command needs a type"))?;
            let cmd = Command::from_type(t)?;
            post(tx_evt, Event::Command(cmd))?;
            Ok(serde_json::json!({"command": t}))
        }
        "click" => {
            post(tx_evt, Event::MarkerClick)?;
            Ok(serde_json::json!("clicked"))
        }
        "layout" => {
            let raw = req.get("elements").cloned().unwrap_or_default();
            let elements: Vec<ElementSpec> = serde_json::from_value(raw)
                .map_err(|e| anyhow!("layout needs an elements array: {e}"))?;
            let n = elements.len();
            post(tx_evt, Event::Layout(elements))?;
            Ok(serde_json::json!({"received": n}))
        }
        "viewport" => {
            let vp: Viewport = serde_json::from_value(req.clone())?;
            post(tx_evt, Event::Viewport(vp))?;
            Ok(serde_json::json!(vp))
        }
        "gaze" => {
            let s: GazeSample = serde_json::from_value(req.clone())?;
            post(tx_evt, Event::Gaze(s))?;
            Ok(serde_json::json!("queued"))
        }
        "reload" => ask_server(tx_req, IpcMsg::Reload),
        "use" => {
            let name = req
                .get("profile")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("use needs a profile name"))?
                .to_string();
            ask_server(tx_req, |reply| IpcMsg::UseProfile(name, reply))
        }
        "list" => ask_server(tx_req, IpcMsg::List),
        "doctor" => ask_server(tx_req, IpcMsg::Doctor),
        "shutdown" => {
            post(tx_evt, Event::Shutdown)?;
            Ok(serde_json::json!("shutting down"))
        }
        _ => Err(anyhow!("unknown op: {op}")),
    }
}

fn post(tx: &Sender<Event>, ev: Event) -> Result<()> {
    tx.send(ev).map_err(|_| anyhow!("daemon is shutting down"))
}

fn ask_server<F>(tx_req: &Sender<IpcMsg>, make: F) -> Result<serde_json::Value>
where
    F: FnOnce(Sender<Result<serde_json::Value>>) -> IpcMsg,
{
    let (reply, rx) = bounded(1);
    tx_req
        .send(make(reply))
        .map_err(|_| anyhow!("daemon is shutting down"))?;
    rx.recv_timeout(REPLY_TIMEOUT)
        .map_err(|_| anyhow!("daemon did not answer"))?
}

type Reply = Sender<Result<serde_json::Value>>;

enum IpcMsg {
    Reload(Reply),
    UseProfile(String, Reply),
    List(Reply),
    Doctor(Reply),
}

/// Worker threads owned by the pipeline: the distance client and the
/// detection loop. Both report back through the event queue without blocking.
struct ThreadServices {
    events: Sender<Event>,
    distance: DistanceState,
    faces: FaceFeed,
    endpoint: String,
    retry: Duration,
    interval: Duration,
    stale: Duration,
    distance_worker: Option<DistanceWorker>,
    detection: Option<DetectionLoop>,
}

impl ThreadServices {
    fn new(profile: &Profile, events: Sender<Event>, distance: DistanceState, faces: FaceFeed) -> Self {
        let mut s = Self {
            events,
            distance,
            faces,
            endpoint: String::new(),
            retry: Duration::ZERO,
            interval: Duration::ZERO,
            stale: Duration::ZERO,
            distance_worker: None,
            detection: None,
        };
        s.configure(profile);
        s
    }
}

impl Services for ThreadServices {
    fn start_distance(&mut self) {
        if self.distance_worker.is_some() {
            return;
        }
        let addr: SocketAddr = match self.endpoint.parse() {
            Ok(a) => a,
            Err(e) => {
                error!("distance endpoint '{}' is invalid: {e}", self.endpoint);
                return;
            }
        };
        let client = DistanceClient::new(TcpConnector::new(addr), self.distance.clone(), self.retry);
        let tx = self.events.clone();
        self.distance_worker = Some(DistanceWorker::spawn(client, move |_cm| {
            if let Err(TrySendError::Full(_)) = tx.try_send(Event::Distance) {
                debug!("event queue full; overlay refresh skipped");
            }
        }));
        info!("distance client started for {addr}");
    }

    fn start_detection(&mut self, video: VideoSource) {
        if self.detection.is_some() {
            return;
        }
        let estimator = Box::new(FeedEstimator::new(self.faces.clone(), self.stale));
        let tx = self.events.clone();
        self.detection = Some(DetectionLoop::spawn(
            estimator,
            video,
            self.interval,
            move |r| !matches!(tx.try_send(Event::Detection(r)), Err(TrySendError::Disconnected(_))),
        ));
    }

    fn stop_detection(&mut self) {
        if let Some(lp) = self.detection.take() {
            lp.stop();
        }
    }

    fn configure(&mut self, profile: &Profile) {
        self.endpoint = profile.distance.endpoint.clone();
        self.retry = Duration::from_millis(profile.distance.retry_ms);
        self.interval = Duration::from_millis(profile.detection.interval_ms);
        self.stale = Duration::from_millis(profile.detection.stale_ms);
    }
}
