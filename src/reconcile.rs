use std::collections::{BTreeMap, BTreeSet};
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use regex::Regex;

use crate::assets::{ASSETS_DIR, PLACEHOLDER_PREFIX, split_extension};
use crate::dom::Document;
use crate::formats::VERSION_RECONCILED;
use crate::thread_info;

const SNIFF_LEN: usize = 16;

const IMAGE_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\xff\xd8\xff", ".jpg"),
    (b"\x89PNG\r\n\x1a\n", ".png"),
    (b"GIF87a", ".gif"),
    (b"GIF89a", ".gif"),
    (b"RIFF", ".webp"),
    (b"\x00\x00\x00\x0cjP  ", ".jp2"),
    (b"BM", ".bmp"),
    (b"\x00\x00\x01\x00", ".ico"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub renamed: BTreeMap<String, String>,
    pub documents: BTreeSet<String>,
    pub updated_files: Vec<PathBuf>,
    pub gallery_links_fixed: usize,
    pub version_updated: bool,
    pub dry_run: bool,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.renamed.is_empty() && self.updated_files.is_empty()
    }
}

pub fn sniff_image_extension(header: &[u8]) -> Option<&'static str> {
    IMAGE_SIGNATURES.iter().find_map(|(signature, ext)| {
        if !header.starts_with(signature) {
            return None;
        }
        // RIFF is a container; only WEBP counts
        if *ext == ".webp" && header.get(8..12) != Some(b"WEBP".as_slice()) {
            return None;
        }
        Some(*ext)
    })
}

pub fn reconcile(thread_dir: &Path, options: ReconcileOptions) -> anyhow::Result<ReconcileReport> {
    if !thread_dir.is_dir() {
        anyhow::bail!("thread directory not found: {}", thread_dir.display());
    }
    let assets_dir = thread_dir.join(ASSETS_DIR);
    let mut report = ReconcileReport {
        dry_run: options.dry_run,
        ..ReconcileReport::default()
    };
    if !assets_dir.is_dir() {
        tracing::info!(dir = %thread_dir.display(), "no assets directory; nothing to convert");
        return Ok(report);
    }

    classify_assets(&assets_dir, &mut report)?;
    if !options.dry_run {
        rename_assets(&assets_dir, &mut report.renamed);
    }

    let rewriter = RenameRewriter::new(&report.renamed)?;
    for page in list_files_with_extension(thread_dir, "html")? {
        let original = read_lossy(&page)?;
        let mut content = rewriter.apply(&original, true);

        let fixed = fix_gallery_links(&content, &report.documents);
        if let Some((html, count)) = fixed {
            content = html;
            report.gallery_links_fixed += count;
        }

        if content != original {
            write_unless_dry_run(&page, &content, options.dry_run)?;
            report.updated_files.push(page);
        }
    }

    for stylesheet in list_files_with_extension(&assets_dir, "css")? {
        let original = read_lossy(&stylesheet)?;
        let content = rewriter.apply(&original, false);
        if content != original {
            write_unless_dry_run(&stylesheet, &content, options.dry_run)?;
            report.updated_files.push(stylesheet);
        }
    }

    if options.dry_run {
        tracing::info!(dir = %thread_dir.display(), "dry run; thread_info.json left unchanged");
    } else {
        report.version_updated =
            thread_info::set_version(thread_dir, VERSION_RECONCILED)?.is_some();
    }

    tracing::info!(
        dir = %thread_dir.display(),
        renamed = report.renamed.len(),
        documents = report.documents.len(),
        updated = report.updated_files.len(),
        gallery_links = report.gallery_links_fixed,
        dry_run = options.dry_run,
        "reconciled thread directory"
    );
    Ok(report)
}

fn classify_assets(assets_dir: &Path, report: &mut ReconcileReport) -> anyhow::Result<()> {
    let mut php_files: Vec<String> = std::fs::read_dir(assets_dir)
        .with_context(|| format!("list assets: {}", assets_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.to_ascii_lowercase().ends_with(".php"))
        .collect();
    php_files.sort();

    for name in php_files {
        let path = assets_dir.join(&name);
        let Some(ext) = read_header(&path).as_deref().and_then(sniff_image_extension) else {
            tracing::debug!(file = %name, "not an image; keeping name");
            report.documents.insert(name);
            continue;
        };

        let (stem, _) = split_extension(&name);
        let mut candidate = format!("{stem}{ext}");
        let mut counter = 1;
        while report.renamed.values().any(|taken| *taken == candidate)
            || (candidate != name && assets_dir.join(&candidate).exists())
        {
            candidate = format!("{stem}_{counter}{ext}");
            counter += 1;
        }
        tracing::info!(from = %name, to = %candidate, "image asset");
        report.renamed.insert(name, candidate);
    }
    Ok(())
}

fn read_header(path: &Path) -> Option<Vec<u8>> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), ?err, "could not read asset");
            return None;
        }
    };
    let mut header = Vec::with_capacity(SNIFF_LEN);
    if let Err(err) = file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut header) {
        tracing::warn!(path = %path.display(), ?err, "could not read asset");
        return None;
    }
    Some(header)
}

/// Renames on disk; entries whose rename fails are dropped so references stay valid.
fn rename_assets(assets_dir: &Path, renamed: &mut BTreeMap<String, String>) {
    renamed.retain(|old, new| {
        match std::fs::rename(assets_dir.join(old.as_str()), assets_dir.join(new.as_str())) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(from = %old, to = %new, ?err, "rename failed; keeping old name");
                false
            }
        }
    });
}

struct RenameRewriter<'a> {
    renamed: &'a BTreeMap<String, String>,
    in_pages: Option<Regex>,
    in_assets: Option<Regex>,
}

impl<'a> RenameRewriter<'a> {
    fn new(renamed: &'a BTreeMap<String, String>) -> anyhow::Result<Self> {
        if renamed.is_empty() {
            return Ok(Self {
                renamed,
                in_pages: None,
                in_assets: None,
            });
        }
        let mut names: Vec<&str> = renamed.keys().map(String::as_str).collect();
        // longest first so a name never matches as the prefix of a longer one
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = names
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        let in_pages = Regex::new(&format!("{ASSETS_DIR}/(?P<name>{alternation})"))
            .context("build rename pattern")?;
        let in_assets =
            Regex::new(&format!("(?P<name>{alternation})")).context("build rename pattern")?;
        Ok(Self {
            renamed,
            in_pages: Some(in_pages),
            in_assets: Some(in_assets),
        })
    }

    fn apply(&self, text: &str, in_page: bool) -> String {
        let pattern = if in_page { &self.in_pages } else { &self.in_assets };
        let Some(pattern) = pattern else {
            return text.to_owned();
        };
        pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let whole = &caps[0];
                let Some(name) = caps.name("name") else {
                    return whole.to_owned();
                };
                let full = caps.get(0).map_or(0..0, |m| m.range());
                let after_ok = !text[full.end..].starts_with(is_name_char);
                let before_ok = in_page || !text[..full.start].ends_with(is_name_char);
                match self.renamed.get(name.as_str()) {
                    Some(new) if before_ok && after_ok => {
                        whole.replace(name.as_str(), new.as_str())
                    }
                    _ => whole.to_owned(),
                }
            })
            .into_owned()
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

fn fix_gallery_links(html: &str, documents: &BTreeSet<String>) -> Option<(String, usize)> {
    if !html.contains(PLACEHOLDER_PREFIX) && documents.is_empty() {
        return None;
    }
    let mut doc = Document::parse(html);
    let mut fixed = 0;
    doc.for_each_element_mut(|el| {
        if !el.is("a") {
            return;
        }
        let Some(href) = el.attr("href") else {
            return;
        };
        if !is_gallery_href(href, documents) {
            return;
        }
        let Some(src) = el
            .find_descendant("img")
            .and_then(|img| img.attr("src"))
            .filter(|src| !src.is_empty() && !src.starts_with("data:"))
            .filter(|src| *src != href)
            .map(str::to_owned)
        else {
            return;
        };
        el.set_attr("href", src);
        fixed += 1;
    });
    (fixed > 0).then(|| (doc.to_html(), fixed))
}

fn is_gallery_href(href: &str, documents: &BTreeSet<String>) -> bool {
    if href.starts_with(PLACEHOLDER_PREFIX) {
        return true;
    }
    let path = href.split('?').next().unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or_default();
    documents.contains(file_name)
}

fn list_files_with_extension(dir: &Path, ext: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("list dir: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    Ok(files)
}

fn read_lossy(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_unless_dry_run(path: &Path, content: &str, dry_run: bool) -> anyhow::Result<()> {
    if dry_run {
        tracing::info!(path = %path.display(), "would update");
        return Ok(());
    }
    std::fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), "updated");
    Ok(())
}
