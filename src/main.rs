mod calibration;
mod cli;
mod config;
mod detection;
mod distance;
mod error;
mod focus;
mod gaze;
mod ipc;
mod logging;
mod overlay;
mod scale;
mod scene;
mod smoothing;
mod viewport;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
