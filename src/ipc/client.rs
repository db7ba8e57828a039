use anyhow::{Result, anyhow};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::Path,
    time::Duration,
};

use super::runtime::socket_path;

/// Longer than the daemon's own wait on the pipeline.
const READ_TIMEOUT: Duration = Duration::from_secs(8);

pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    request_at(&socket_path()?, &req)
}

fn request_at(sock: &Path, req: &serde_json::Value) -> Result<serde_json::Value> {
    if !sock.exists() {
        return Err(anyhow!(
            "gazectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)
        .map_err(|e| anyhow!("cannot reach daemon at {}: {e}", sock.display()))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    writeln!(stream, "{req}")?;

    let mut resp = String::new();
    BufReader::new(stream).read_line(&mut resp)?;
    if resp.trim().is_empty() {
        return Err(anyhow!("daemon closed the connection without a reply"));
    }
    Ok(serde_json::from_str(&resp)?)
}
