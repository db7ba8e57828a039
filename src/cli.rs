use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, fs, process::Command};

use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // Flags of `viewport`; pulled out before the positional values.
    let mirrored = pargs.contains("--mirrored");
    let no_video = pargs.contains("--no-video");

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("gazectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op":"shutdown"})),
        Some("status") => request(serde_json::json!({"op":"status"})),
        Some("enable") => request(serde_json::json!({"op":"command","type":"ENABLE_GAZE"})),
        Some("disable") => request(serde_json::json!({"op":"command","type":"DISABLE_GAZE"})),
        Some("calibrate") => request(serde_json::json!({"op":"command","type":"CALIBRATE"})),
        Some("click") => request(serde_json::json!({"op":"click"})),

        Some("gaze") => {
            let x: f64 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gazectl gaze <x> <y>"))?;
            let y: f64 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gazectl gaze <x> <y>"))?;
            request(serde_json::json!({"op":"gaze","x":x,"y":y}))
        }

        Some("layout") => {
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gazectl layout <file.json>"))?;
            let txt = fs::read_to_string(&path).map_err(|e| anyhow!("failed to read {path}: {e}"))?;
            let v: serde_json::Value = serde_json::from_str(&txt)?;
            // Either a bare array or {"elements": [...]}
            let elements = match v {
                serde_json::Value::Array(_) => v,
                mut other => other
                    .get_mut("elements")
                    .map(serde_json::Value::take)
                    .ok_or_else(|| anyhow!("{path}: expected an array or an 'elements' field"))?,
            };
            request(serde_json::json!({"op":"layout","elements":elements}))
        }

        Some("viewport") => {
            let usage = "usage: gazectl viewport <width> <height> [--mirrored] [--no-video]";
            let width: f64 = pargs.free_from_str().map_err(|_| anyhow!(usage))?;
            let height: f64 = pargs.free_from_str().map_err(|_| anyhow!(usage))?;
            let video = if no_video {
                serde_json::Value::Null
            } else {
                serde_json::json!({"mirrored": mirrored})
            };
            request(serde_json::json!({"op":"viewport","width":width,"height":height,"video":video}))
        }

        Some("reload") => request(serde_json::json!({"op":"reload"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gazectl use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("list") => request(serde_json::json!({"op":"list"})),
        Some("doctor") => request(serde_json::json!({"op":"doctor"})),

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"gazectl — gaze-driven element magnifier daemon

USAGE:
  gazectl help [command]                  Show general or command-specific help
  gazectl start                           Start the daemon
  gazectl stop                            Stop the daemon
  gazectl status                          Show tracking, focus, calibration and overlays
  gazectl enable                          Turn gaze tracking on
  gazectl disable                         Turn gaze tracking off
  gazectl calibrate                       Begin the calibration sequence
  gazectl click                           Confirm the current calibration marker
  gazectl gaze <x> <y>                    Inject one raw gaze sample
  gazectl layout <file.json>              Publish candidate element boxes
  gazectl viewport <w> <h> [--mirrored] [--no-video]
                                          Publish viewport size and video source
  gazectl reload                          Reload active profile
  gazectl use <name>                      Switch active profile
  gazectl list                            List profiles
  gazectl doctor                          Diagnose endpoints and configuration

TIPS:
  - Profiles: ~/.config/gazectl/profiles
  - Active profile pointer: ~/.config/gazectl/active
  - Log filter: GAZECTL_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: gazectl start\nStarts the background daemon."),
        "stop" => println!("usage: gazectl stop\nStops the running daemon."),
        "status" => println!(
            "usage: gazectl status\nShows enabled flag, focused element, element styles, calibration marker, overlays."
        ),
        "enable" => println!(
            "usage: gazectl enable\nEnables gaze tracking and starts the distance client and face detection."
        ),
        "disable" => println!(
            "usage: gazectl disable\nDisables gaze tracking and restores the enlarged element."
        ),
        "calibrate" => println!("usage: gazectl calibrate\nStarts a new calibration session."),
        "click" => println!("usage: gazectl click\nRecords one confirmation on the current marker."),
        "gaze" => println!("usage: gazectl gaze <x> <y>\nFeeds one raw sample in viewport pixels."),
        "layout" => println!(
            "usage: gazectl layout <file.json>\nFile holds [{{\"id\",\"tag\",\"rect\":{{left,top,width,height}},\"stacking\"}}]."
        ),
        "viewport" => println!(
            "usage: gazectl viewport <w> <h> [--mirrored] [--no-video]\nSets viewport size and whether a (mirrored) camera preview is shown."
        ),
        "reload" => println!(
            "usage: gazectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: gazectl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: gazectl list\nLists available profiles."),
        "doctor" => println!(
            "usage: gazectl doctor\nShows socket, profile directory, and whether the distance endpoint is reachable."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
