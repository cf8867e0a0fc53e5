use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::assets::{ASSETS_DIR, AssetResolver, FailureRecorder, LocalRef};

// `@import` is matched first so its target is treated as a stylesheet, not a plain asset.
static CSS_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)@import\s+(?:url\s*\(\s*)?(?P<iq1>['"]?)(?P<iurl>[^'"\s;)]+)(?P<iq2>['"]?)\s*\)?(?P<media>[^;]*);|url\s*\(\s*(?P<q1>['"]?)(?P<url>[^'")]+?)(?P<q2>['"]?)\s*\)"#,
    )
    .expect("valid css reference regex")
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\s*\(\s*(?P<q1>['"]?)(?P<url>[^'")]+?)(?P<q2>['"]?)\s*\)"#)
        .expect("valid css url regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefBase {
    ThreadDir,
    AssetsDir,
}

impl RefBase {
    pub fn render(self, local: &LocalRef) -> String {
        match (self, local) {
            (RefBase::AssetsDir, LocalRef::Local(path)) => strip_assets_prefix(path).to_owned(),
            _ => local.as_str().to_owned(),
        }
    }

    fn render_path(self, path: &str) -> String {
        match self {
            RefBase::AssetsDir => strip_assets_prefix(path).to_owned(),
            RefBase::ThreadDir => path.to_owned(),
        }
    }
}

fn strip_assets_prefix(path: &str) -> &str {
    path.strip_prefix(ASSETS_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}

pub trait CssRewriter {
    fn rewrite(
        &self,
        css: &str,
        base_url: &Url,
        resolver: &mut AssetResolver,
        failures: &mut dyn FailureRecorder,
        refs: RefBase,
    ) -> String;

    /// Rewrites `url()` references only, as found in `style="..."` attributes.
    fn rewrite_urls(
        &self,
        css: &str,
        base_url: &Url,
        resolver: &mut AssetResolver,
        failures: &mut dyn FailureRecorder,
        refs: RefBase,
    ) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexCssRewriter;

impl CssRewriter for RegexCssRewriter {
    fn rewrite(
        &self,
        css: &str,
        base_url: &Url,
        resolver: &mut AssetResolver,
        failures: &mut dyn FailureRecorder,
        refs: RefBase,
    ) -> String {
        CSS_REF
            .replace_all(css, |caps: &Captures<'_>| {
                let whole = &caps[0];
                if let Some(target) = caps.name("iurl") {
                    let Some(url) = resolvable(target.as_str(), base_url) else {
                        return whole.to_owned();
                    };
                    match resolver.resolve_stylesheet(&url, self, &mut *failures) {
                        Some(local) => format!(
                            "@import url({q1}{path}{q2}){media};",
                            q1 = &caps["iq1"],
                            path = refs.render_path(&local),
                            q2 = &caps["iq2"],
                            media = &caps["media"],
                        ),
                        None => whole.to_owned(),
                    }
                } else {
                    rewrite_url_token(caps, base_url, resolver, &mut *failures, refs)
                }
            })
            .into_owned()
    }

    fn rewrite_urls(
        &self,
        css: &str,
        base_url: &Url,
        resolver: &mut AssetResolver,
        failures: &mut dyn FailureRecorder,
        refs: RefBase,
    ) -> String {
        CSS_URL
            .replace_all(css, |caps: &Captures<'_>| {
                rewrite_url_token(caps, base_url, resolver, &mut *failures, refs)
            })
            .into_owned()
    }
}

fn rewrite_url_token(
    caps: &Captures<'_>,
    base_url: &Url,
    resolver: &mut AssetResolver,
    failures: &mut dyn FailureRecorder,
    refs: RefBase,
) -> String {
    let Some(url) = caps.name("url").and_then(|m| resolvable(m.as_str(), base_url)) else {
        return caps[0].to_owned();
    };
    let local = resolver.resolve(&url, failures);
    format!(
        "url({q1}{path}{q2})",
        q1 = caps.name("q1").map_or("", |m| m.as_str()),
        path = refs.render(&local),
        q2 = caps.name("q2").map_or("", |m| m.as_str()),
    )
}

fn resolvable(raw: &str, base_url: &Url) -> Option<Url> {
    let raw = raw.trim();
    let inline = raw
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"));
    if raw.is_empty() || inline || raw.starts_with('#') {
        return None;
    }
    match base_url.join(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(reference = raw, ?err, "unresolvable css reference");
            None
        }
    }
}
