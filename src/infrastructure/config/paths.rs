//! File locations.
//!
//! Everything lives under the platform directories from `directories`.
//! Without a home directory the temp directory stands in.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "imgtier.log";

/// Platform directories for this application.
#[must_use]
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "linuxmobile", crate::NAME)
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(crate::NAME)
}

/// Config file to use: `explicit` if given, otherwise `config.toml` in the
/// platform config directory.
#[must_use]
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            project_dirs()
                .map_or_else(temp_root, |dirs| dirs.config_dir().to_path_buf())
                .join(CONFIG_FILE)
        },
        Path::to_path_buf,
    )
}

/// Default log file.
#[must_use]
pub fn log_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join(LOG_FILE))
}

/// Disk cache directory under the platform cache directory.
#[must_use]
pub fn cache_dir(dir_name: &str) -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().join(dir_name))
}

/// Disk cache directory used when the platform one is unusable.
#[must_use]
pub fn constrained_cache_dir(dir_name: &str) -> PathBuf {
    temp_root().join(dir_name)
}
