use std::path::PathBuf;
use std::time::Duration;

use crate::cli::GlobalArgs;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Parent directory that holds one subdirectory per mirrored thread.
    pub output_root: PathBuf,
    pub progress_file: PathBuf,
    /// Directory holding `cookies_<domain>.json` files.
    pub cookies_dir: PathBuf,
    pub timeout: Duration,
    pub user_agent: String,
}

impl MirrorConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            progress_file: PathBuf::from("progress.json"),
            cookies_dir: PathBuf::from("."),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    pub fn from_args(global: &GlobalArgs, output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            progress_file: PathBuf::from(&global.progress_file),
            cookies_dir: PathBuf::from(&global.cookies_dir),
            timeout: Duration::from_secs(global.timeout_secs.max(1)),
            user_agent: global
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
        }
    }
}
