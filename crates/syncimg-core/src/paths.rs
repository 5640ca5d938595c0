use dirs::home_dir;
use std::path::PathBuf;

/// Returns the syncimg home directory (`$SYNCIMG_HOME`, else `~/.syncimg`),
/// or None if the user's home cannot be resolved.
pub fn try_syncimg_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("SYNCIMG_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".syncimg"))
}

/// Configuration used when `--config` is not given: ~/.syncimg/config.yaml
pub fn default_config_path() -> Option<PathBuf> {
    try_syncimg_home().map(|h| h.join("config.yaml"))
}
