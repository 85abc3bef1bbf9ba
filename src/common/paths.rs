//! Cross-platform socket and configuration paths
//!
//! Unix/macOS: the BTP socket is a Unix domain socket the IUT connects to,
//! the oracle bridge lives under $XDG_RUNTIME_DIR or /tmp.
//! Windows: both use named pipes.

use std::io;
use std::path::PathBuf;

/// Name used for the project directories and the oracle bridge pipe
const APP_NAME: &str = "autopts";

/// Well-known BTP socket the IUT tester application connects to
#[cfg(unix)]
const BTP_SOCKET: &str = "/tmp/bt-stack-tester";

/// Get the default BTP socket path
#[cfg(unix)]
pub fn btp_socket_path() -> PathBuf {
    PathBuf::from(BTP_SOCKET)
}

#[cfg(windows)]
pub fn btp_socket_path() -> PathBuf {
    PathBuf::from("bt-stack-tester")
}

/// Get the oracle bridge socket path
///
/// Platform-specific:
/// - Unix: `$XDG_RUNTIME_DIR/autopts/bridge.sock` or `/tmp/autopts-<uid>/bridge.sock`
/// - Windows: Named pipe name (handled by interprocess crate)
#[cfg(unix)]
pub fn bridge_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME).join("bridge.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid)).join("bridge.sock")
}

#[cfg(windows)]
pub fn bridge_socket_path() -> PathBuf {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    PathBuf::from(format!("{}-bridge-{}", APP_NAME, username))
}

/// Remove a stale socket file before binding a listener
#[cfg(unix)]
pub fn remove_socket(path: &std::path::Path) -> io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_path: &std::path::Path) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/autopts/`
/// - macOS: `~/Library/Application Support/autopts/`
/// - Windows: `%APPDATA%\autopts\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_socket_path_is_valid() {
        let path = bridge_socket_path();
        assert!(!path.as_os_str().is_empty());
    }

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
        }
    }
}
