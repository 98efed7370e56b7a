//! Stream transport: the dial/request/headers/body task spawned per active
//! slot. Runs on its own Tokio task so a slow or wedged peer only stalls
//! this one fetch, never the scheduler's command loop — it reports back
//! over a channel instead of touching slot state directly.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http;

const READ_CHUNK: usize = 8 * 1024;

pub enum StreamOutcome {
    Completed { bytes_written: u64 },
    Failed { reason: String, bytes_written: u64 },
}

/// Dials `addr`, sends a minimal HTTP/1.0 GET for `request_path`, and
/// streams the response body into `scratch_path`. Any failure along the
/// way — connect refused, non-200, missing `Content-Length`, a dropped
/// connection mid-body — is reported as `Failed` so the scheduler can fall
/// back to the datagram transport; `Failed` carries the byte count already
/// written to `scratch_path`, so the caller can resume the datagram
/// transport from that offset instead of corrupting the file by reading
/// `bytes_written` off a slot that was never updated.
pub async fn fetch(
    addr: std::net::SocketAddrV4,
    request_path: &str,
    scratch_path: PathBuf,
    idle_timeout: Duration,
) -> StreamOutcome {
    match timeout(idle_timeout, run(addr, request_path, &scratch_path)).await {
        Ok(Ok(written)) => StreamOutcome::Completed { bytes_written: written },
        Ok(Err((reason, bytes_written))) => StreamOutcome::Failed { reason, bytes_written },
        Err(_) => {
            // The running future was cancelled mid-read; its own `written`
            // tally went with it, so ask the filesystem what actually
            // landed instead of guessing.
            let bytes_written = tokio::fs::metadata(&scratch_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            StreamOutcome::Failed { reason: "idle timeout".to_string(), bytes_written }
        }
    }
}

async fn run(addr: std::net::SocketAddrV4, request_path: &str, scratch_path: &PathBuf) -> Result<u64, (String, u64)> {
    let mut socket = TcpStream::connect(addr).await.map_err(|e| (e.to_string(), 0))?;

    let request = format!("GET {request_path} HTTP/1.0\r\n\r\n");
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|e| (e.to_string(), 0))?;

    let mut buf = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK];
    let header_end;
    let parsed_len;
    let content_length;
    loop {
        let n = socket.read(&mut read_buf).await.map_err(|e| (e.to_string(), 0))?;
        if n == 0 {
            return Err(("connection closed before headers completed".to_string(), 0));
        }
        buf.extend_from_slice(&read_buf[..n]);
        match http::parse_response(&buf) {
            Ok(parsed) => {
                if parsed.status != 200 {
                    return Err((format!("non-200 status {}", parsed.status), 0));
                }
                let Some(len) = parsed.content_length else {
                    return Err(("missing Content-Length".to_string(), 0));
                };
                header_end = parsed.body_offset;
                parsed_len = buf.len();
                content_length = len;
                break;
            }
            Err(http::ParseError::Incomplete) => continue,
            Err(e) => return Err((e.to_string(), 0)),
        }
    }

    if let Some(parent) = scratch_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| (e.to_string(), 0))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(scratch_path)
        .await
        .map_err(|e| (e.to_string(), 0))?;

    let mut written: u64 = 0;
    let already_read = &buf[header_end..parsed_len];
    if !already_read.is_empty() {
        file.write_all(already_read).await.map_err(|e| (e.to_string(), written))?;
        written += already_read.len() as u64;
    }

    while written < content_length {
        let n = socket.read(&mut read_buf).await.map_err(|e| (e.to_string(), written))?;
        if n == 0 {
            return Err((
                format!("connection closed after {written} of {content_length} bytes"),
                written,
            ));
        }
        file.write_all(&read_buf[..n]).await.map_err(|e| (e.to_string(), written))?;
        written += n as u64;
    }

    Ok(written)
}
