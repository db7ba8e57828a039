use anyhow::{Result, anyhow};

use super::pipeline::{Pipeline, Services};

/// Commands from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnableGaze,
    DisableGaze,
    Calibrate,
}

impl Command {
    pub fn from_type(t: &str) -> Result<Self> {
        match t {
            "ENABLE_GAZE" => Ok(Self::EnableGaze),
            "DISABLE_GAZE" => Ok(Self::DisableGaze),
            "CALIBRATE" => Ok(Self::Calibrate),
            other => Err(anyhow!("unknown command type: {other}")),
        }
    }
}

pub fn dispatch_command<S: Services>(cmd: Command, p: &mut Pipeline<S>) {
    match cmd {
        Command::EnableGaze => p.enable(),
        Command::DisableGaze => p.disable(),
        Command::Calibrate => p.calibrate(),
    }
}
