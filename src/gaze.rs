//! Gaze engine boundary: inbound samples and face readings over UDP, and the
//! calibration feed back to the engine.

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    net::{SocketAddr, UdpSocket},
    thread,
    time::Duration,
};

use crate::detection::{Detection, FaceFeed};
use crate::error::MessageError;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Gaze(GazeSample),
    Face(Option<Detection>),
}

/// Accepts `{"x":..,"y":..}`, `{"age":..,"gender":".."}`, `{"face":null}`
/// or whitespace separated `x=.. y=..` tokens.
pub fn parse_message(msg: &str) -> Result<Inbound, MessageError> {
    let msg = msg.trim();
    if msg.is_empty() {
        return Err(MessageError::Empty);
    }

    if msg.starts_with('{') {
        let v: serde_json::Value = serde_json::from_str(msg)?;
        if let (Some(x), Some(y)) = (v.get("x").and_then(|v| v.as_f64()), v.get("y").and_then(|v| v.as_f64())) {
            return Ok(Inbound::Gaze(GazeSample { x, y }));
        }
        if let Some(age) = v.get("age").and_then(|v| v.as_f64()) {
            let gender = v
                .get("gender")
                .and_then(|g| g.as_str())
                .unwrap_or("unknown")
                .to_string();
            return Ok(Inbound::Face(Some(Detection { age, gender })));
        }
        if v.get("face").is_some_and(|f| f.is_null()) {
            return Ok(Inbound::Face(None));
        }
        return Err(MessageError::Unrecognized(msg.to_string()));
    }

    let mut x: Option<f64> = None;
    let mut y: Option<f64> = None;
    for tok in msg.split_whitespace() {
        let Some((k, v)) = tok.split_once('=') else {
            return Err(MessageError::Unrecognized(msg.to_string()));
        };
        match k {
            "x" => x = v.parse().ok(),
            "y" => y = v.parse().ok(),
            _ => {}
        }
    }
    match (x, y) {
        (Some(x), Some(y)) => Ok(Inbound::Gaze(GazeSample { x, y })),
        _ => Err(MessageError::Unrecognized(msg.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Click,
}

/// The external gaze estimator, as seen from calibration.
pub trait GazeEngine {
    fn record_screen_position(&mut self, x: f64, y: f64, kind: SampleKind);
    /// Camera preview, face overlay and prediction points during calibration.
    fn show_calibration_aids(&mut self, on: bool);
}

/// Sends calibration data to the engine as JSON datagrams.
pub struct UdpGazeEngine {
    sock: UdpSocket,
    target: SocketAddr,
}

impl UdpGazeEngine {
    pub fn new(target: SocketAddr) -> Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let sock = UdpSocket::bind(bind)?;
        Ok(Self { sock, target })
    }

    fn send(&self, v: serde_json::Value) {
        let line = v.to_string();
        if let Err(e) = self.sock.send_to(line.as_bytes(), self.target) {
            warn!("gaze engine feed to {} failed: {e}", self.target);
        }
    }
}

impl GazeEngine for UdpGazeEngine {
    fn record_screen_position(&mut self, x: f64, y: f64, kind: SampleKind) {
        self.send(serde_json::json!({"x": x, "y": y, "type": kind}));
    }

    fn show_calibration_aids(&mut self, on: bool) {
        self.send(serde_json::json!({"aids": on}));
    }
}

/// Receives datagrams on `bind` until `stop` fires or is dropped. Gaze samples
/// go to `on_gaze`; face readings land in `faces`.
pub fn spawn_listener<F>(
    bind: SocketAddr,
    faces: FaceFeed,
    stop: Receiver<()>,
    mut on_gaze: F,
) -> Result<thread::JoinHandle<()>>
where
    F: FnMut(GazeSample) + Send + 'static,
{
    let sock = UdpSocket::bind(bind)?;
    sock.set_read_timeout(Some(Duration::from_millis(200)))?;
    info!("gaze listener bound on {bind}");

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        loop {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }
            let len = match sock.recv_from(&mut buf) {
                Ok((len, _src)) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("gaze recv error: {e}");
                    continue;
                }
            };
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                debug!("gaze datagram is not utf-8");
                continue;
            };
            match parse_message(text) {
                Ok(Inbound::Gaze(s)) => on_gaze(s),
                Ok(Inbound::Face(reading)) => faces.push(reading),
                Err(e) => warn!("skipping gaze message: {e}"),
            }
        }
        info!("gaze listener stopped");
    });
    Ok(handle)
}
