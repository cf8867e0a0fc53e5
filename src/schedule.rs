use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;
use url::Url;

use crate::assets::PageFailures;
use crate::dom::Document;
use crate::fetch::PageFetcher;
use crate::page::PagePipeline;
use crate::progress::ProgressStore;
use crate::urls;

pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Resume,
    Range { from: Option<u32>, to: Option<u32> },
    Retry(Vec<u32>),
    CheckUpdates { previous_total: u32 },
}

impl Mode {
    pub fn reuses_first_page(&self) -> bool {
        matches!(self, Mode::Resume)
    }
}

pub fn select_pages(mode: &Mode, total_pages: u32, completed: &BTreeSet<u32>) -> Vec<u32> {
    let total = total_pages.max(1);
    match mode {
        Mode::Retry(pages) => pages
            .iter()
            .copied()
            .filter(|page| *page >= 1)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        Mode::Range { from, to } => {
            let start = from.unwrap_or(1).clamp(1, total);
            let end = to.unwrap_or(total).clamp(start, total);
            (start..=end).collect()
        }
        Mode::CheckUpdates { previous_total } => {
            if total <= *previous_total {
                Vec::new()
            } else {
                ((*previous_total).max(1)..=total).collect()
            }
        }
        Mode::Resume => (1..=total).filter(|page| !completed.contains(page)).collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: Vec<u32>,
    pub skipped: Vec<u32>,
    pub outstanding_failures: usize,
    pub complete: bool,
}

pub struct Scheduler<'a> {
    fetcher: &'a mut dyn PageFetcher,
    pipeline: &'a mut PagePipeline,
    progress: &'a mut ProgressStore,
    thread_url: &'a str,
    out_dir: &'a Path,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        fetcher: &'a mut dyn PageFetcher,
        pipeline: &'a mut PagePipeline,
        progress: &'a mut ProgressStore,
        thread_url: &'a str,
        out_dir: &'a Path,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            progress,
            thread_url,
            out_dir,
        }
    }

    /// `first_page` is a copy of page 1 fetched earlier in the run; it is used instead of
    /// refetching when page 1 is selected.
    pub fn run(&mut self, pages: &[u32], total_pages: u32, first_page: Option<Document>) -> RunSummary {
        let mut first_page = first_page;
        let mut summary = RunSummary::default();

        for &page in pages {
            let page_url = urls::page_url(self.thread_url, page);
            let parsed_url = match Url::parse(&page_url) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(page, url = %page_url, ?err, "invalid page url; skipping");
                    summary.skipped.push(page);
                    continue;
                }
            };

            let preloaded = if page == 1 { first_page.take() } else { None };
            let doc = match preloaded {
                Some(doc) => doc,
                None => match self.fetcher.fetch_page(&page_url) {
                    Ok(html) => Document::parse(&html),
                    Err(err) => {
                        tracing::warn!(page, err = %err, "page fetch failed; skipping");
                        summary.skipped.push(page);
                        continue;
                    }
                },
            };

            self.progress.clear_failures_for_page(self.thread_url, page);
            let mut failures = PageFailures {
                store: &mut *self.progress,
                thread_url: self.thread_url,
                page,
            };
            match self
                .pipeline
                .process(page, doc, &parsed_url, self.out_dir, &mut failures)
            {
                Ok(path) => {
                    self.progress.mark_page_complete(self.thread_url, page);
                    tracing::info!(page, total = total_pages, path = %path.display(), "saved page");
                    summary.processed.push(page);
                }
                Err(err) => {
                    tracing::warn!(page, err = %format!("{err:#}"), "page write failed; skipping");
                    summary.skipped.push(page);
                }
            }
        }

        match refresh_index(self.out_dir) {
            Ok(true) => tracing::debug!(dir = %self.out_dir.display(), "refreshed index.html"),
            Ok(false) => {}
            Err(err) => tracing::warn!(err = %format!("{err:#}"), "could not refresh index.html"),
        }

        summary.complete = self
            .progress
            .mark_thread_complete(self.thread_url, total_pages);
        if !summary.complete {
            self.progress.mark_in_progress(self.thread_url);
        }
        summary.outstanding_failures = self
            .progress
            .entry(self.thread_url)
            .map_or(0, |entry| entry.failed_assets.len());
        summary
    }
}

pub fn refresh_index(out_dir: &Path) -> anyhow::Result<bool> {
    let first = out_dir.join(urls::page_file_name(1));
    if !first.is_file() {
        return Ok(false);
    }
    let index = out_dir.join(INDEX_FILE);
    std::fs::copy(&first, &index)
        .with_context(|| format!("copy {} -> {}", first.display(), index.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(pages: &[u32]) -> BTreeSet<u32> {
        pages.iter().copied().collect()
    }

    #[test]
    fn resume_selects_missing_pages() {
        assert_eq!(select_pages(&Mode::Resume, 5, &completed(&[1, 2, 3])), vec![4, 5]);
        assert_eq!(select_pages(&Mode::Resume, 5, &completed(&[1, 3, 5])), vec![2, 4]);
        assert!(select_pages(&Mode::Resume, 3, &completed(&[1, 2, 3])).is_empty());
    }

    #[test]
    fn range_is_clamped_to_the_thread() {
        let done = completed(&[1, 2, 3, 4]);
        let range = |from, to| Mode::Range { from, to };
        assert_eq!(select_pages(&range(Some(2), Some(3)), 5, &done), vec![2, 3]);
        assert_eq!(select_pages(&range(Some(0), Some(99)), 3, &done), vec![1, 2, 3]);
        assert_eq!(select_pages(&range(Some(4), Some(2)), 5, &done), vec![4]);
        assert_eq!(select_pages(&range(None, None), 2, &done), vec![1, 2]);
    }

    #[test]
    fn retry_is_sorted_and_deduplicated() {
        let mode = Mode::Retry(vec![4, 2, 4, 0]);
        assert_eq!(select_pages(&mode, 5, &completed(&[1, 2, 3, 4, 5])), vec![2, 4]);
    }

    #[test]
    fn check_updates_includes_previous_last_page() {
        let all = completed(&[1, 2, 3, 4, 5]);
        let mode = |previous_total| Mode::CheckUpdates { previous_total };
        assert_eq!(select_pages(&mode(5), 7, &all), vec![5, 6, 7]);
        assert!(select_pages(&mode(5), 5, &all).is_empty());
        assert!(select_pages(&mode(7), 5, &all).is_empty());
        assert_eq!(select_pages(&mode(0), 2, &all), vec![1, 2]);
    }

    #[test]
    fn index_copies_first_page() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        assert!(!refresh_index(temp.path())?);

        std::fs::write(temp.path().join("page-1.html"), "<p>one</p>")?;
        assert!(refresh_index(temp.path())?);
        assert_eq!(std::fs::read_to_string(temp.path().join(INDEX_FILE))?, "<p>one</p>");
        Ok(())
    }
}
