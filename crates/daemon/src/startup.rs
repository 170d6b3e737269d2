//! Startup checks for DynamiX
//!
//! Preflight checks run before the daemon starts serving:
//! - the state directory exists (or can be created) and is writable
//! - the media server URL is an http(s) URL and a token is configured
//! - the HTTP bind address parses

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

/// Probe file written into the state directory.
const WRITE_PROBE: &str = ".dynamix-write-test";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("state directory {path} is not writable: {source}")]
    StateDirNotWritable {
        path: String,
        source: std::io::Error,
    },

    #[error("media server token is not configured (set media_server.token or PLEX_TOKEN)")]
    MissingToken,

    #[error("invalid media server URL '{0}': expected http:// or https://")]
    InvalidMediaUrl(String),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

/// Socket address the HTTP surface listens on.
pub fn listen_addr(cfg: &Config) -> Result<SocketAddr, StartupError> {
    let ip: IpAddr = cfg
        .server
        .bind
        .trim()
        .parse()
        .map_err(|_| StartupError::InvalidBindAddress(cfg.server.bind.clone()))?;
    Ok(SocketAddr::new(ip, cfg.server.port))
}

/// Create the state directory if needed and prove it accepts writes.
pub fn check_state_dir_writable(dir: &Path) -> Result<(), StartupError> {
    let not_writable = |source| StartupError::StateDirNotWritable {
        path: dir.display().to_string(),
        source,
    };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE);
    fs::write(&probe, b"ok").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    debug!(dir = %dir.display(), "state directory is writable");
    Ok(())
}

pub fn check_media_server(cfg: &Config) -> Result<(), StartupError> {
    let url = cfg.media_server.url.trim();
    let lower = url.to_ascii_lowercase();
    let host = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"));
    if host.map_or(true, |h| h.trim_matches('/').is_empty()) {
        return Err(StartupError::InvalidMediaUrl(url.to_string()));
    }
    if cfg.media_server.token.trim().is_empty() {
        return Err(StartupError::MissingToken);
    }
    Ok(())
}

/// Run every startup check in order: bind address, media server, state directory.
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    listen_addr(cfg)?;
    check_media_server(cfg)?;
    check_state_dir_writable(&cfg.state.dir)?;
    info!("startup checks passed");
    Ok(())
}
