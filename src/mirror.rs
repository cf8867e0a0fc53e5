use std::path::{Path, PathBuf};

use anyhow::Context as _;
use url::Url;

use crate::assets::AssetResolver;
use crate::config::MirrorConfig;
use crate::css::RegexCssRewriter;
use crate::dom::Document;
use crate::error::MirrorError;
use crate::fetch::{CookieJar, HttpSession, PageFetcher};
use crate::formats::{VERSION_RAW, VERSION_RECONCILED};
use crate::page::PagePipeline;
use crate::progress::ProgressStore;
use crate::reconcile::{self, ReconcileOptions, ReconcileReport};
use crate::schedule::{self, Mode, RunSummary, Scheduler};
use crate::thread_info;
use crate::urls;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionFlag {
    #[default]
    Default,
    Legacy,
    Reconcile,
}

#[derive(Debug, Clone)]
pub struct MirrorRequest {
    pub url: String,
    pub mode: Mode,
    pub version: VersionFlag,
    pub out_dir: Option<PathBuf>,
}

impl MirrorRequest {
    pub fn new(url: impl Into<String>, mode: Mode) -> Self {
        Self {
            url: url.into(),
            mode,
            version: VersionFlag::Default,
            out_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadOutcome {
    pub thread_url: String,
    pub title: String,
    pub out_dir: PathBuf,
    pub total_pages: u32,
    pub selected: Vec<u32>,
    pub summary: RunSummary,
    pub reconciled: Option<ReconcileReport>,
}

/// Refuses `--legacy` on a backup that has already been reconciled.
pub fn check_version_flag(existing_version: Option<u32>, flag: VersionFlag) -> Result<(), MirrorError> {
    match (existing_version, flag) {
        (Some(VERSION_RECONCILED), VersionFlag::Legacy) => Err(MirrorError::conflict(
            "--legacy was given but this backup is already reconciled (version 2); refusing to downgrade",
        )),
        (Some(VERSION_RECONCILED), VersionFlag::Reconcile) => {
            tracing::info!("backup is already reconciled; --reconcile is redundant");
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn run_thread(
    config: &MirrorConfig,
    progress: &mut ProgressStore,
    request: &MirrorRequest,
) -> anyhow::Result<ThreadOutcome> {
    let thread_url = urls::canonical_thread_url(&request.url);
    let parsed = parse_url(&thread_url)?;
    let cookies = CookieJar::load_for(&config.cookies_dir, &parsed);
    let session = HttpSession::new(config, &thread_url, cookies).context("build http session")?;
    let mut fetcher = session.clone();
    run_thread_with(config, progress, request, &mut fetcher, session)
}

pub fn run_thread_with(
    config: &MirrorConfig,
    progress: &mut ProgressStore,
    request: &MirrorRequest,
    fetcher: &mut dyn PageFetcher,
    asset_session: HttpSession,
) -> anyhow::Result<ThreadOutcome> {
    let thread_url = urls::canonical_thread_url(&request.url);
    parse_url(&thread_url)?;

    let existing = existing_backup(config, request, &thread_url);
    let existing_version = existing
        .as_ref()
        .map(|(_, version)| *version);
    check_version_flag(existing_version, request.version)?;

    let first_html = fetcher.fetch_page(&thread_url)?;
    let first_page = Document::parse(&first_html);
    let title = urls::thread_title(&first_page);
    let total_pages = urls::detect_total_pages(&first_page);

    let out_dir = match &existing {
        Some((dir, _)) => {
            tracing::info!(dir = %dir.display(), "found existing backup");
            dir.clone()
        }
        None => config
            .output_root
            .join(urls::thread_dir_name(&title, &thread_url)),
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create thread dir: {}", out_dir.display()))?;

    progress.get_or_create(&thread_url);
    progress.set_out_dir(&thread_url, &out_dir);
    progress.set_total_pages(&thread_url, total_pages);
    thread_info::write(
        &out_dir,
        &thread_url,
        &title,
        existing_version.unwrap_or(VERSION_RAW),
        total_pages,
    )?;
    tracing::info!(thread = %thread_url, title = %title, total_pages, dir = %out_dir.display(), "thread detected");

    let completed = progress
        .entry(&thread_url)
        .map(|entry| entry.completed_pages.clone())
        .unwrap_or_default();
    let selected = schedule::select_pages(&request.mode, total_pages, &completed);

    let mut outcome = ThreadOutcome {
        thread_url: thread_url.clone(),
        title,
        out_dir: out_dir.clone(),
        total_pages,
        selected: selected.clone(),
        summary: RunSummary::default(),
        reconciled: None,
    };
    if selected.is_empty() {
        match request.mode {
            Mode::CheckUpdates { .. } => tracing::info!(total_pages, "no new pages"),
            _ => tracing::info!(total_pages, "all pages already complete; nothing to do"),
        }
        return Ok(outcome);
    }
    tracing::info!(
        count = selected.len(),
        first = selected[0],
        last = selected[selected.len() - 1],
        "downloading pages"
    );

    let resolver = AssetResolver::new(asset_session, &out_dir)?;
    let mut pipeline = PagePipeline::new(resolver, Box::new(RegexCssRewriter));
    let preloaded = request.mode.reuses_first_page().then_some(first_page);
    outcome.summary = Scheduler::new(fetcher, &mut pipeline, progress, &thread_url, &out_dir)
        .run(&selected, total_pages, preloaded);
    tracing::info!(
        processed = outcome.summary.processed.len(),
        skipped = outcome.summary.skipped.len(),
        downloads = pipeline.resolver().downloads(),
        complete = outcome.summary.complete,
        "page loop finished"
    );
    if outcome.summary.outstanding_failures > 0 {
        tracing::warn!(
            failed_assets = outcome.summary.outstanding_failures,
            "some assets failed and were logged; run retry-failed to try them again"
        );
    }

    if request.version == VersionFlag::Legacy {
        tracing::info!("skipping reconciliation (--legacy)");
    } else if !outcome.summary.processed.is_empty() {
        match reconcile::reconcile(&out_dir, ReconcileOptions::default()) {
            Ok(report) => outcome.reconciled = Some(report),
            Err(err) => tracing::warn!(err = %format!("{err:#}"), "reconciliation failed"),
        }
    }

    Ok(outcome)
}

pub fn retry_failed(
    config: &MirrorConfig,
    progress: &mut ProgressStore,
) -> anyhow::Result<Vec<ThreadOutcome>> {
    let threads = progress.threads_with_failures();
    if threads.is_empty() {
        tracing::info!("no logged failures; nothing to retry");
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::new();
    for entry in threads {
        let Some(out_dir) = entry.out_dir.clone().filter(|dir| dir.is_dir()) else {
            tracing::warn!(thread = %entry.url, "output directory not found; skipping");
            continue;
        };
        let pages = entry.pages_with_failures();
        tracing::info!(thread = %entry.url, ?pages, "retrying pages with failed assets");

        let request = MirrorRequest {
            out_dir: Some(out_dir),
            ..MirrorRequest::new(entry.url.clone(), Mode::Retry(pages))
        };
        match run_thread(config, progress, &request) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::warn!(thread = %entry.url, err = %format!("{err:#}"), "retry failed"),
        }
    }
    Ok(outcomes)
}

pub fn check_updates(
    config: &MirrorConfig,
    progress: &mut ProgressStore,
    url: Option<&str>,
) -> anyhow::Result<Vec<ThreadOutcome>> {
    let candidates = match url {
        Some(url) => {
            let thread_url = urls::canonical_thread_url(url);
            let entry = progress
                .entry(&thread_url)
                .cloned()
                .with_context(|| format!("no progress entry for {thread_url}"))?;
            vec![entry]
        }
        None => progress
            .tracked_threads()
            .into_iter()
            .filter(|entry| entry.out_dir.as_deref().is_some_and(Path::is_dir))
            .collect(),
    };
    if candidates.is_empty() {
        tracing::info!("no tracked threads");
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::new();
    for entry in candidates {
        tracing::info!(thread = %entry.url, previous_total = entry.total_pages, "checking for new pages");
        let request = MirrorRequest {
            out_dir: entry.out_dir.clone(),
            ..MirrorRequest::new(
                entry.url.clone(),
                Mode::CheckUpdates {
                    previous_total: entry.total_pages,
                },
            )
        };
        match run_thread(config, progress, &request) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                tracing::warn!(thread = %entry.url, err = %format!("{err:#}"), "update check failed")
            }
        }
    }
    Ok(outcomes)
}

fn parse_url(url: &str) -> Result<Url, MirrorError> {
    Url::parse(url).map_err(|source| MirrorError::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}

fn existing_backup(
    config: &MirrorConfig,
    request: &MirrorRequest,
    thread_url: &str,
) -> Option<(PathBuf, u32)> {
    if let Some(dir) = request.out_dir.as_ref().filter(|dir| dir.is_dir()) {
        return Some((dir.clone(), thread_info::backup_version(dir)));
    }
    thread_info::find_existing_backup(&config.output_root, thread_url)
        .map(|(dir, info)| (dir, info.version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_is_refused_for_reconciled_backups() {
        assert!(matches!(
            check_version_flag(Some(VERSION_RECONCILED), VersionFlag::Legacy),
            Err(MirrorError::ConfigurationConflict(_))
        ));
        assert!(check_version_flag(Some(VERSION_RAW), VersionFlag::Legacy).is_ok());
        assert!(check_version_flag(None, VersionFlag::Legacy).is_ok());
        assert!(check_version_flag(Some(VERSION_RECONCILED), VersionFlag::Reconcile).is_ok());
    }
}
