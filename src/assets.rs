use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use url::Url;

use crate::css::{CssRewriter, RefBase};
use crate::fetch::HttpSession;
use crate::progress::ProgressStore;

pub const ASSETS_DIR: &str = "assets";

/// 1x1 dark gray PNG substituted for assets that could not be fetched.
pub const PLACEHOLDER_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

pub const PLACEHOLDER_PREFIX: &str = "data:image/png;base64,iVBOR";

const DEFAULT_ASSET_NAME: &str = "asset.bin";
const DEFAULT_STYLESHEET_NAME: &str = "style.css";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRef {
    Local(String),
    Placeholder,
}

impl LocalRef {
    pub fn as_str(&self) -> &str {
        match self {
            LocalRef::Local(path) => path,
            LocalRef::Placeholder => PLACEHOLDER_DATA_URI,
        }
    }
}

impl std::fmt::Display for LocalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait FailureRecorder {
    fn record(&mut self, asset_url: &str);
}

#[derive(Debug, Default)]
pub struct NoFailureRecording;

impl FailureRecorder for NoFailureRecording {
    fn record(&mut self, _asset_url: &str) {}
}

pub struct PageFailures<'a> {
    pub store: &'a mut ProgressStore,
    pub thread_url: &'a str,
    pub page: u32,
}

impl FailureRecorder for PageFailures<'_> {
    fn record(&mut self, asset_url: &str) {
        self.store
            .record_asset_failure(self.thread_url, asset_url, self.page);
    }
}

enum Download {
    Saved(u64),
    Forbidden,
}

#[derive(Debug)]
pub struct AssetResolver {
    session: HttpSession,
    assets_dir: PathBuf,
    url_to_local: HashMap<String, LocalRef>,
    reserved: HashSet<String>,
    downloads: usize,
}

impl AssetResolver {
    pub fn new(session: HttpSession, thread_dir: &Path) -> anyhow::Result<Self> {
        let assets_dir = thread_dir.join(ASSETS_DIR);
        std::fs::create_dir_all(&assets_dir)
            .with_context(|| format!("create assets dir: {}", assets_dir.display()))?;
        Ok(Self {
            session,
            assets_dir,
            url_to_local: HashMap::new(),
            reserved: HashSet::new(),
            downloads: 0,
        })
    }

    pub fn downloads(&self) -> usize {
        self.downloads
    }

    pub fn resolve(&mut self, url: &Url, failures: &mut dyn FailureRecorder) -> LocalRef {
        if let Some(existing) = self.url_to_local.get(url.as_str()) {
            return existing.clone();
        }

        let name = self.reserve_name(&asset_name(url));
        let path = self.assets_dir.join(&name);

        let local = match self.download_to(url, &path) {
            Ok(Download::Saved(bytes)) => {
                self.downloads += 1;
                tracing::info!(url = %url, file = %name, bytes, "downloaded asset");
                LocalRef::Local(format!("{ASSETS_DIR}/{name}"))
            }
            Ok(Download::Forbidden) => {
                tracing::warn!(url = %url, "403 forbidden; using placeholder");
                self.release_name(&name, &path);
                failures.record(url.as_str());
                LocalRef::Placeholder
            }
            Err(err) => {
                tracing::warn!(url = %url, err = %format!("{err:#}"), "asset failed; using placeholder");
                self.release_name(&name, &path);
                failures.record(url.as_str());
                LocalRef::Placeholder
            }
        };

        self.url_to_local.insert(url.to_string(), local.clone());
        local
    }

    /// Returns `None` when the stylesheet cannot be fetched or written; callers then keep
    /// the remote URL. The local path is registered before the sheet is rewritten, so an
    /// import cycle resolves to the path already assigned instead of recursing.
    pub fn resolve_stylesheet(
        &mut self,
        url: &Url,
        rewriter: &dyn CssRewriter,
        failures: &mut dyn FailureRecorder,
    ) -> Option<String> {
        if let Some(existing) = self.url_to_local.get(url.as_str()) {
            return match existing {
                LocalRef::Local(path) => Some(path.clone()),
                LocalRef::Placeholder => None,
            };
        }

        let text = match self.fetch_text(url) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(url = %url, err = %format!("{err:#}"), "stylesheet failed; keeping remote url");
                failures.record(url.as_str());
                return None;
            }
        };

        let name = self.reserve_name(&stylesheet_name(url));
        let path = self.assets_dir.join(&name);
        let local = format!("{ASSETS_DIR}/{name}");
        self.url_to_local
            .insert(url.to_string(), LocalRef::Local(local.clone()));

        let processed = rewriter.rewrite(&text, url, self, failures, RefBase::AssetsDir);

        match std::fs::write(&path, processed) {
            Ok(()) => {
                self.downloads += 1;
                tracing::info!(url = %url, file = %name, "saved stylesheet");
                Some(local)
            }
            Err(err) => {
                tracing::warn!(url = %url, path = %path.display(), ?err, "could not write stylesheet");
                self.url_to_local.remove(url.as_str());
                self.release_name(&name, &path);
                None
            }
        }
    }

    fn download_to(&self, url: &Url, path: &Path) -> anyhow::Result<Download> {
        let response = self
            .session
            .get(url)
            .with_context(|| format!("GET {url}"))?;
        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Ok(Download::Forbidden);
        }
        let mut response = response
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        let mut file =
            File::create(path).with_context(|| format!("create asset: {}", path.display()))?;
        let bytes = response
            .copy_to(&mut file)
            .with_context(|| format!("stream asset body: {url}"))?;
        Ok(Download::Saved(bytes))
    }

    fn fetch_text(&self, url: &Url) -> anyhow::Result<String> {
        let response = self
            .session
            .get(url)
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        response.text().context("read stylesheet body")
    }

    fn reserve_name(&mut self, candidate: &str) -> String {
        let (stem, ext) = split_extension(candidate);
        let mut name = candidate.to_owned();
        let mut counter = 1;
        while self.reserved.contains(&name) || self.assets_dir.join(&name).exists() {
            name = format!("{stem}_{counter}{ext}");
            counter += 1;
        }
        self.reserved.insert(name.clone());
        name
    }

    fn release_name(&mut self, name: &str, path: &Path) {
        self.reserved.remove(name);
        if path.exists()
            && let Err(err) = std::fs::remove_file(path)
        {
            tracing::debug!(path = %path.display(), ?err, "could not remove partial asset");
        }
    }
}

pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn last_path_segment(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
}

fn asset_name(url: &Url) -> String {
    let segment = last_path_segment(url);
    if segment.is_empty() {
        DEFAULT_ASSET_NAME.to_owned()
    } else {
        sanitize_file_name(segment)
    }
}

fn stylesheet_name(url: &Url) -> String {
    let segment = last_path_segment(url);
    let mut name = if segment.is_empty() {
        DEFAULT_STYLESHEET_NAME.to_owned()
    } else {
        sanitize_file_name(segment)
    };
    if !name.to_ascii_lowercase().ends_with(".css") {
        name.push_str(".css");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_come_from_the_url_path() -> anyhow::Result<()> {
        let url = Url::parse("https://cdn.example/data/attachments/12/my%20photo(1).jpg?hash=ab")?;
        assert_eq!(asset_name(&url), "my_20photo_1_.jpg");
        assert_eq!(asset_name(&Url::parse("https://cdn.example/")?), "asset.bin");

        let css = Url::parse("https://forum.example/css.php?css=public:core.less")?;
        assert_eq!(stylesheet_name(&css), "css.php.css");
        assert_eq!(stylesheet_name(&Url::parse("https://forum.example/")?), "style.css");
        Ok(())
    }

    #[test]
    fn split_extension_keeps_dotfiles_whole() {
        assert_eq!(split_extension("index.php"), ("index", ".php"));
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".htaccess"), (".htaccess", ""));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }

    #[test]
    fn placeholder_is_recognised_by_prefix() {
        assert!(LocalRef::Placeholder.as_str().starts_with(PLACEHOLDER_PREFIX));
        assert_eq!(LocalRef::Local("assets/a.png".to_owned()).to_string(), "assets/a.png");
    }
}
