//! Environment constants and path utilities for sessionkeeper.
//!
//! This module centralizes the file and directory names used for the session
//! file and for configuration discovery.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".sessionkeeper";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name when placed directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "sessionkeeper.toml";

/// Session-file related names
pub mod session {
    /// Default session file name
    pub const SESSION_FILE_NAME: &str = "session.json";

    /// Suffix appended to temporary files written before the final rename
    pub const TEMP_FILE_SUFFIX: &str = "tmp";

    /// Default time the panic hook waits for a fault dump, in milliseconds
    pub const DEFAULT_FAULT_DUMP_TIMEOUT_MS: u64 = 5_000;
}

/// Default session file path, relative to the current directory
pub fn default_session_file_path() -> PathBuf {
    PathBuf::from(session::SESSION_FILE_NAME)
}

/// Build the application directory path from a base directory
pub fn app_dir_path(base: &Path) -> PathBuf {
    base.join(APP_DIR_NAME)
}

/// Build the sibling temp file used while writing `target`
///
/// The name is unique per write so that concurrent processes pointed at the
/// same path never share a temp file.
pub fn temp_file_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| session::SESSION_FILE_NAME.to_string());

    target.with_file_name(format!(
        ".{}.{}.{}",
        file_name,
        uuid::Uuid::new_v4().simple(),
        session::TEMP_FILE_SUFFIX
    ))
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}
