//! Streaming client for the external distance estimator.
//!
//! One worker thread owns the connection. It reads newline-delimited
//! `{"distance": <cm>}` messages, and after any disconnect (or a failed
//! connect) waits a fixed delay before the next attempt, forever. Because the
//! wait happens inline in that single loop, at most one reconnect is ever
//! pending.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    io::{self, BufRead, BufReader},
    net::{SocketAddr, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crate::error::MessageError;

#[derive(Debug, Clone, Copy)]
struct Reading {
    cm: f64,
    received: bool,
}

/// Latest viewer distance in cm; shared between the client and the pipeline.
#[derive(Debug, Clone)]
pub struct DistanceState {
    inner: Arc<Mutex<Reading>>,
}

impl DistanceState {
    pub fn new(default_cm: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Reading {
                cm: default_cm,
                received: false,
            })),
        }
    }

    pub fn get(&self) -> f64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).cm
    }

    /// Whether any update has arrived since startup.
    pub fn has_reading(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).received
    }

    pub(crate) fn set(&self, cm: f64) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.cm = cm;
        g.received = true;
    }
}

#[derive(Debug, Deserialize)]
struct DistanceMsg {
    distance: f64,
}

/// Range is not checked; the scale mapper clamps.
pub fn parse_distance(line: &str) -> Result<f64, MessageError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(MessageError::Empty);
    }
    let msg: DistanceMsg = serde_json::from_str(line)?;
    Ok(msg.distance)
}

pub trait Connector: Send + 'static {
    type Stream: BufRead;
    fn connect(&self) -> io::Result<Self::Stream>;
    fn endpoint(&self) -> String;
}

pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Stream = BufReader<TcpStream>;

    fn connect(&self) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect_timeout(&self.addr, Duration::from_secs(2))?;
        // Lets the reader notice a stop request between messages.
        stream.set_read_timeout(Some(Duration::from_millis(250)))?;
        Ok(BufReader::new(stream))
    }

    fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

pub struct DistanceClient<C: Connector> {
    connector: C,
    state: DistanceState,
    retry: Duration,
}

enum Pump {
    Closed,
    Stopped,
}

impl<C: Connector> DistanceClient<C> {
    pub fn new(connector: C, state: DistanceState, retry: Duration) -> Self {
        Self {
            connector,
            state,
            retry,
        }
    }

    /// Connect, read, reconnect; returns only once `stop` fires or is dropped.
    pub fn run<F: FnMut(f64)>(&self, stop: &Receiver<()>, mut on_update: F) {
        let endpoint = self.connector.endpoint();
        loop {
            match self.connector.connect() {
                Ok(stream) => {
                    info!("distance channel connected to {endpoint}");
                    if let Pump::Stopped = self.pump(stream, stop, &mut on_update) {
                        return;
                    }
                    info!("distance channel to {endpoint} closed");
                }
                Err(e) => debug!("distance channel connect to {endpoint} failed: {e}"),
            }

            debug!("distance channel retry in {}ms", self.retry.as_millis());
            match stop.recv_timeout(self.retry) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }

    fn pump<F: FnMut(f64)>(&self, mut stream: C::Stream, stop: &Receiver<()>, on_update: &mut F) -> Pump {
        let mut line = Vec::new();
        loop {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return Pump::Stopped,
            }
            match stream.read_until(b'\n', &mut line) {
                Ok(0) => return Pump::Closed,
                Ok(_) if line.last() != Some(&b'\n') => return Pump::Closed,
                Ok(_) => {
                    let parsed = std::str::from_utf8(&line)
                        .map_err(MessageError::from)
                        .and_then(parse_distance);
                    match parsed {
                        Ok(cm) => {
                            self.state.set(cm);
                            on_update(cm);
                        }
                        Err(MessageError::Empty) => {}
                        Err(e) => warn!("skipping distance message: {e}"),
                    }
                    line.clear();
                }
                // Partial bytes stay in `line` until the rest arrives.
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    warn!("distance channel read error: {e}");
                    return Pump::Closed;
                }
            }
        }
    }
}

/// Handle to the running client thread. Dropping it stops the client.
pub struct DistanceWorker {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DistanceWorker {
    pub fn spawn<C, F>(client: DistanceClient<C>, on_update: F) -> Self
    where
        C: Connector,
        F: FnMut(f64) + Send + 'static,
    {
        let (stop, stop_rx) = bounded(1);
        let thread = thread::spawn(move || {
            client.run(&stop_rx, on_update);
            info!("distance client stopped");
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

impl Drop for DistanceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
