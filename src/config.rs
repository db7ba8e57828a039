use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    fs,
    net::{SocketAddr, TcpStream},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::focus::OverlapPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    pub alpha: f64,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self { alpha: 0.2 }
    }
}

/// Where the enlargement factor comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    #[default]
    Fixed,
    Distance,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Focus {
    pub scale: f64,
    pub transition_ms: u32,
    pub z_index: i32,
    pub scale_mode: ScaleMode,
    pub overlap: OverlapPolicy,
    pub suppress_during_calibration: bool,
    pub tags: Vec<String>,
}

impl Default for Focus {
    fn default() -> Self {
        Self {
            scale: 1.5,
            transition_ms: 200,
            z_index: 999,
            scale_mode: ScaleMode::Fixed,
            overlap: OverlapPolicy::Last,
            suppress_during_calibration: false,
            tags: ["img", "p", "span", "h1", "h2", "h3", "h4", "h5", "h6"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub grid: usize,
    pub samples_per_point: u32,
    pub marker_size: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            grid: 3,
            samples_per_point: 5,
            marker_size: 40.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Distance {
    pub endpoint: String,
    pub retry_ms: u64,
    pub default_cm: f64,
}

impl Default for Distance {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8765".into(),
            retry_ms: 2000,
            default_cm: 50.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Gaze {
    pub listen: String,
    pub engine: String,
    pub queue: usize,
}

impl Default for Gaze {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9330".into(),
            engine: "127.0.0.1:9331".into(),
            queue: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Detection {
    pub interval_ms: u64,
    pub stale_ms: u64,
    pub stop_on_disable: bool,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            stale_ms: 500,
            stop_on_disable: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub smoothing: Smoothing,
    #[serde(default)]
    pub focus: Focus,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub distance: Distance,
    #[serde(default)]
    pub gaze: Gaze,
    #[serde(default)]
    pub detection: Detection,
}

impl Profile {
    pub fn distance_addr(&self) -> Result<SocketAddr> {
        parse_addr("distance.endpoint", &self.distance.endpoint)
    }

    pub fn gaze_listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("gaze.listen", &self.gaze.listen)
    }

    pub fn gaze_engine_addr(&self) -> Result<SocketAddr> {
        parse_addr("gaze.engine", &self.gaze.engine)
    }
}

fn parse_addr(key: &str, raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|e| anyhow!("{key} '{raw}' is not a socket address: {e}"))
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .ok_or_else(|| anyhow!("cannot determine home directory"))?
        .home_dir()
        .to_path_buf();
    Ok(home.join(".config").join("gazectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_or_install_in(config_dir()?)
    }

    pub fn load_or_install_in(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// On error the previous profile stays in place.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profile_path(name);
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{name}.toml"))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self, socket: &Path) -> serde_json::Value {
        let distance_reachable = self
            .profile
            .distance_addr()
            .map(|a| TcpStream::connect_timeout(&a, Duration::from_millis(300)).is_ok())
            .unwrap_or(false);
        serde_json::json!({
            "socket": socket,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "gaze_listen": self.profile.gaze.listen,
            "gaze_engine": self.profile.gaze.engine,
            "distance_endpoint": self.profile.distance.endpoint,
            "distance_reachable": distance_reachable,
        })
    }
}

fn load_profile(dir: &Path, name: &str) -> Result<Profile> {
    let path = dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let profile: Profile =
        toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
    validate_profile(&profile)?;
    Ok(profile)
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    if !(p.smoothing.alpha > 0.0 && p.smoothing.alpha <= 1.0) {
        return Err(anyhow!("smoothing.alpha must be in (0,1]"));
    }
    if !(p.focus.scale >= 1.0) {
        return Err(anyhow!("focus.scale must be at least 1.0"));
    }
    if p.focus.transition_ms == 0 {
        return Err(anyhow!("focus.transition_ms must be positive"));
    }
    if p.focus.tags.iter().all(|t| t.trim().is_empty()) {
        return Err(anyhow!("focus.tags must name at least one tag"));
    }
    if p.calibration.grid < 2 {
        return Err(anyhow!("calibration.grid must be at least 2"));
    }
    if p.calibration.samples_per_point == 0 {
        return Err(anyhow!("calibration.samples_per_point must be positive"));
    }
    if !(p.calibration.marker_size > 0.0) {
        return Err(anyhow!("calibration.marker_size must be positive"));
    }
    if p.distance.retry_ms == 0 || p.detection.interval_ms == 0 {
        return Err(anyhow!("retry_ms and interval_ms must be positive durations"));
    }
    if p.gaze.queue == 0 {
        return Err(anyhow!("gaze.queue must be positive"));
    }
    p.distance_addr()?;
    p.gaze_listen_addr()?;
    p.gaze_engine_addr()?;
    Ok(())
}
