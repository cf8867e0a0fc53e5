use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const VERSION_RAW: u32 = 1;
pub const VERSION_RECONCILED: u32 = 2;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    New,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadProgress {
    pub url: String,
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub completed_pages: BTreeSet<u32>,
    /// Asset URL -> page number that referenced it.
    #[serde(default)]
    pub failed_assets: BTreeMap<String, u32>,
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default)]
    pub last_run: Option<String>,
}

impl ThreadProgress {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            out_dir: None,
            total_pages: 0,
            completed_pages: BTreeSet::new(),
            failed_assets: BTreeMap::new(),
            status: ProgressStatus::New,
            last_run: None,
        }
    }

    pub fn covers_all_pages(&self, total_pages: u32) -> bool {
        (1..=total_pages).all(|page| self.completed_pages.contains(&page))
    }

    pub fn pages_with_failures(&self) -> Vec<u32> {
        let pages: BTreeSet<u32> = self.failed_assets.values().copied().collect();
        pages.into_iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub last_updated: String,
    /// Keys written by other tools are carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> u32 {
    VERSION_RAW
}

pub fn local_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}
