use std::env;
use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: Option<&str> = option_env!("GIT_HASH");
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const APPLICATION_NAME: &str = "tern";

/// Version string sent in CTCP VERSION replies unless the config overrides it.
pub fn formatted_version() -> String {
    let hash = GIT_HASH.map(|hash| format!(" ({hash})")).unwrap_or_default();

    format!("{APPLICATION_NAME} {VERSION}{hash}")
}

pub fn config_dir() -> PathBuf {
    portable_dir().unwrap_or_else(|| platform_dir(dirs_next::config_dir()))
}

pub fn data_dir() -> PathBuf {
    portable_dir().unwrap_or_else(|| platform_dir(dirs_next::data_dir()))
}

/// Checks if a config file exists in the same directory as the executable.
/// If so, it'll use that directory for both config & data dirs.
fn portable_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let dir = exe.parent()?;

    dir.join(CONFIG_FILE_NAME)
        .is_file()
        .then(|| dir.to_path_buf())
}

// Platforms without a home directory fall back to the working directory
fn platform_dir(base: Option<PathBuf>) -> PathBuf {
    base.map_or_else(|| PathBuf::from("."), |dir| dir.join(APPLICATION_NAME))
}
