use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::{ThreadInfo, VERSION_RAW, local_timestamp};

pub const THREAD_INFO_FILE: &str = "thread_info.json";
const LEGACY_URL_FILE: &str = "thread_url.txt";

pub fn read(thread_dir: &Path) -> Option<ThreadInfo> {
    let path = thread_dir.join(THREAD_INFO_FILE);
    match crate::json_file::read_json(&path) {
        Ok(info) => info,
        Err(err) => {
            tracing::debug!(path = %path.display(), ?err, "unreadable thread info");
            None
        }
    }
}

/// Creates or merge-updates the identity record of a thread directory.
pub fn write(
    thread_dir: &Path,
    url: &str,
    friendly_name: &str,
    version: u32,
    total_pages: u32,
) -> anyhow::Result<ThreadInfo> {
    let mut info = read(thread_dir).unwrap_or_else(|| empty_info(thread_dir));
    info.url = url.to_owned();
    info.friendly_name = friendly_name.to_owned();
    info.version = version;
    info.total_pages = total_pages;
    info.last_updated = local_timestamp();

    let path = thread_dir.join(THREAD_INFO_FILE);
    crate::json_file::write_json_atomic(&path, &info)
        .with_context(|| format!("write thread info: {}", path.display()))?;
    Ok(info)
}

/// Sets the format version, creating the record if it is missing. A missing record takes
/// its URL from a legacy `thread_url.txt` when one exists. An existing record that cannot
/// be parsed is left untouched and `None` is returned.
pub fn set_version(thread_dir: &Path, version: u32) -> anyhow::Result<Option<ThreadInfo>> {
    let path = thread_dir.join(THREAD_INFO_FILE);
    let mut info = match crate::json_file::read_json::<ThreadInfo>(&path) {
        Ok(Some(info)) => info,
        Ok(None) => {
            let mut info = empty_info(thread_dir);
            info.url = legacy_url(thread_dir).unwrap_or_default();
            if info.url.is_empty() {
                tracing::warn!(
                    dir = %thread_dir.display(),
                    "thread_info.json was missing and no thread_url.txt was found; url left blank"
                );
            }
            info
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                err = %format!("{err:#}"),
                "thread_info.json is unreadable; leaving it as is"
            );
            return Ok(None);
        }
    };
    info.version = version;

    crate::json_file::write_json_atomic(&path, &info)
        .with_context(|| format!("write thread info: {}", path.display()))?;
    Ok(Some(info))
}

pub fn backup_version(thread_dir: &Path) -> u32 {
    read(thread_dir).map(|info| info.version).unwrap_or(VERSION_RAW)
}

/// Scans the immediate subdirectories of `output_root` for a record whose URL matches.
pub fn find_existing_backup(output_root: &Path, thread_url: &str) -> Option<(PathBuf, ThreadInfo)> {
    let entries = std::fs::read_dir(output_root).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    candidates.into_iter().find_map(|dir| {
        let info = read(&dir)?;
        (info.url == thread_url).then_some((dir, info))
    })
}

fn empty_info(thread_dir: &Path) -> ThreadInfo {
    ThreadInfo {
        url: String::new(),
        friendly_name: thread_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        version: VERSION_RAW,
        total_pages: 0,
        last_updated: String::new(),
        extra: serde_json::Map::new(),
    }
}

fn legacy_url(thread_dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(thread_dir.join(LEGACY_URL_FILE)).ok()?;
    let url = raw.trim();
    (!url.is_empty()).then(|| url.to_owned())
}
