use std::path::PathBuf;

/// XDG app name used for config and state directories.
pub const APP_NAME: &str = "factharbor-runner";

/// `~/.config/factharbor-runner/config.toml` (platform equivalent).
pub fn config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// State directory for the job store and logs.
///
/// Prefers the XDG state dir, falling back to the local data dir on
/// platforms without one (e.g. macOS), then to the temp dir.
pub fn state_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .to_path_buf()
        })
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

/// Default job store file.
pub fn default_store_file() -> PathBuf {
    state_dir().join("jobs.json")
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}
