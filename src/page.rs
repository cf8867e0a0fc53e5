use std::path::{Path, PathBuf};

use anyhow::Context as _;
use url::Url;

use crate::assets::{AssetResolver, FailureRecorder, LocalRef};
use crate::css::{CssRewriter, RefBase};
use crate::dom::{Document, Element, Node};
use crate::layout;
use crate::urls;

pub struct PassContext<'a> {
    pub page: u32,
    pub base_url: &'a Url,
    pub resolver: &'a mut AssetResolver,
    pub css: &'a dyn CssRewriter,
    pub failures: &'a mut dyn FailureRecorder,
}

impl PassContext<'_> {
    fn resolve(&mut self, raw: &str) -> Option<LocalRef> {
        let url = join_reference(self.base_url, raw)?;
        Some(self.resolver.resolve(&url, &mut *self.failures))
    }
}

pub type Pass = fn(Document, &mut PassContext<'_>) -> Document;

pub const PASSES: &[(&str, Pass)] = &[
    ("stylesheet links", stylesheet_links),
    ("style elements", style_elements),
    ("images", images),
    ("attachment links", attachment_links),
    ("media links", media_links),
    ("audio and video", audio_video),
    ("inline styles", inline_styles),
    ("page links", page_links),
    ("clickable images", clickable_images),
    ("layout fixes", layout_fixes),
];

pub struct PagePipeline {
    resolver: AssetResolver,
    css: Box<dyn CssRewriter>,
}

impl PagePipeline {
    pub fn new(resolver: AssetResolver, css: Box<dyn CssRewriter>) -> Self {
        Self { resolver, css }
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }

    pub fn process(
        &mut self,
        page: u32,
        doc: Document,
        page_url: &Url,
        out_dir: &Path,
        failures: &mut dyn FailureRecorder,
    ) -> anyhow::Result<PathBuf> {
        let mut ctx = PassContext {
            page,
            base_url: page_url,
            resolver: &mut self.resolver,
            css: self.css.as_ref(),
            failures,
        };

        let mut doc = doc;
        for (name, pass) in PASSES {
            tracing::debug!(page = ctx.page, pass = *name, "running pass");
            doc = pass(doc, &mut ctx);
        }

        let path = out_dir.join(urls::page_file_name(page));
        std::fs::write(&path, doc.to_html())
            .with_context(|| format!("write page: {}", path.display()))?;
        Ok(path)
    }
}

pub fn join_reference(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn stylesheet_links(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("link") {
            return;
        }
        let is_stylesheet = el
            .attr("rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
        if !is_stylesheet {
            return;
        }
        let Some(url) = el.attr("href").and_then(|href| join_reference(ctx.base_url, href)) else {
            return;
        };
        match ctx
            .resolver
            .resolve_stylesheet(&url, ctx.css, &mut *ctx.failures)
        {
            Some(local) => el.set_attr("href", local),
            None => el.set_attr("href", url.as_str()),
        }
    });
    doc
}

fn style_elements(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("style") || el.attr("id") == Some(layout::FIXES_STYLE_ID) {
            return;
        }
        let css = el.text();
        if css.trim().is_empty() {
            return;
        }
        let rewritten = ctx.css.rewrite(
            &css,
            ctx.base_url,
            ctx.resolver,
            &mut *ctx.failures,
            RefBase::ThreadDir,
        );
        el.set_text(rewritten);
    });
    doc
}

fn images(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("img") {
            return;
        }
        let source = el
            .attr("data-src")
            .filter(|src| !src.trim().is_empty())
            .or_else(|| el.attr("src"))
            .map(str::to_owned);
        if let Some(local) = source.and_then(|src| ctx.resolve(&src)) {
            el.set_attr("src", local.as_str());
            el.remove_attr("data-src");
        }

        if let Some(srcset) = el.attr("srcset").map(str::to_owned) {
            el.set_attr("srcset", rewrite_srcset(&srcset, ctx));
        }
    });
    doc
}

fn rewrite_srcset(srcset: &str, ctx: &mut PassContext<'_>) -> String {
    srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let (raw, descriptor) = match candidate.split_once(char::is_whitespace) {
                Some((raw, descriptor)) => (raw, Some(descriptor.trim())),
                None => (candidate, None),
            };
            match (ctx.resolve(raw), descriptor) {
                (Some(local), Some(descriptor)) => format!("{local} {descriptor}"),
                (Some(local), None) => local.to_string(),
                (None, _) => candidate.to_owned(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn attachment_links(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("a") {
            return;
        }
        let Some(href) = el.attr("href").map(str::to_owned) else {
            return;
        };
        if !href.to_ascii_lowercase().contains("attachment") {
            return;
        }
        if let Some(local) = ctx.resolve(&href) {
            el.set_attr("href", local.as_str());
        }
    });
    doc
}

fn media_links(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("a") {
            return;
        }
        let Some(href) = el.attr("href").map(str::to_owned) else {
            return;
        };
        if !href.contains("index.php?media/") {
            return;
        }
        // the wrapped thumbnail was resolved by the image pass already
        let image_src = el
            .find_descendant("img")
            .and_then(|img| img.attr("src"))
            .filter(|src| !src.is_empty())
            .map(str::to_owned);
        match image_src {
            Some(src) => el.set_attr("href", src),
            None => {
                if let Some(local) = ctx.resolve(&href) {
                    el.set_attr("href", local.as_str());
                }
            }
        }
    });
    doc
}

fn audio_video(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        if !(el.is("video") || el.is("audio") || el.is("source")) {
            return;
        }
        if let Some(local) = el.attr("src").map(str::to_owned).and_then(|src| ctx.resolve(&src)) {
            el.set_attr("src", local.as_str());
        }
        if let Some(local) = el
            .attr("data-src")
            .map(str::to_owned)
            .and_then(|src| ctx.resolve(&src))
        {
            el.set_attr("src", local.as_str());
            el.remove_attr("data-src");
        }
    });
    doc
}

fn inline_styles(mut doc: Document, ctx: &mut PassContext<'_>) -> Document {
    doc.for_each_element_mut(|el| {
        let Some(style) = el.attr("style").map(str::to_owned) else {
            return;
        };
        if !style.to_ascii_lowercase().contains("url(") {
            return;
        }
        let rewritten = ctx.css.rewrite_urls(
            &style,
            ctx.base_url,
            ctx.resolver,
            &mut *ctx.failures,
            RefBase::ThreadDir,
        );
        el.set_attr("style", rewritten);
    });
    doc
}

fn page_links(doc: Document, _: &mut PassContext<'_>) -> Document {
    rewrite_page_links(doc)
}

fn clickable_images(doc: Document, _: &mut PassContext<'_>) -> Document {
    wrap_clickable_images(doc)
}

fn layout_fixes(doc: Document, _: &mut PassContext<'_>) -> Document {
    layout::inject_fixes(doc)
}

pub fn rewrite_page_links(mut doc: Document) -> Document {
    doc.for_each_element_mut(|el| {
        if !el.is("a") {
            return;
        }
        let Some(href) = el.attr("href") else {
            return;
        };
        if href.starts_with("assets/") || href.starts_with("data:") {
            return;
        }
        if let Some(page) = urls::page_number_in_href(href) {
            el.set_attr("href", urls::page_file_name(page));
        } else if urls::is_thread_root_href(href) {
            el.set_attr("href", urls::page_file_name(1));
        }
    });
    doc
}

pub fn wrap_clickable_images(mut doc: Document) -> Document {
    for node in &mut doc.children {
        if let Node::Element(el) = node {
            let in_main = el.has_class("message-cell--main");
            wrap_images_in(el, in_main);
        }
    }
    doc
}

fn wrap_images_in(el: &mut Element, in_main: bool) {
    let parent_is_anchor = el.is("a");
    for node in &mut el.children {
        let Node::Element(child) = node else {
            continue;
        };
        if !child.is("img") {
            let nested = in_main || child.has_class("message-cell--main");
            wrap_images_in(child, nested);
            continue;
        }
        if parent_is_anchor || !is_post_image(child, in_main) {
            continue;
        }
        let Some(src) = child
            .attr("src")
            .filter(|src| !src.is_empty() && !src.starts_with("data:"))
            .map(str::to_owned)
        else {
            continue;
        };

        let mut link = Element::new("a")
            .with_attr("href", src)
            .with_attr("target", "_blank")
            .with_attr("rel", "noopener noreferrer")
            .with_attr("style", "display:inline-block;cursor:zoom-in;");
        link.children.push(Node::Element(child.clone()));
        *node = Node::Element(link);
    }
}

fn is_post_image(img: &Element, in_main: bool) -> bool {
    if img.has_class("bbImage") || img.has_class("bbCodeImage") {
        return true;
    }
    in_main && !img.attr("class").unwrap_or_default().contains("avatar")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::NoFailureRecording;
    use crate::config::MirrorConfig;
    use crate::css::RegexCssRewriter;
    use crate::fetch::{CookieJar, HttpSession};

    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Answers every GET with `body of <path>`.
    struct EchoServer {
        base_url: String,
        shutdown_tx: Option<mpsc::Sender<()>>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl EchoServer {
        fn spawn() -> Self {
            let server = tiny_http::Server::http("127.0.0.1:0").expect("start echo server");
            let base_url = format!("http://{}", server.server_addr());
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let handle = thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };
                    let path = request.url().split('?').next().unwrap_or_default().to_owned();
                    let _ = request.respond(tiny_http::Response::from_string(format!("body of {path}")));
                }
            });
            Self {
                base_url,
                shutdown_tx: Some(shutdown_tx),
                handle: Some(handle),
            }
        }
    }

    impl Drop for EchoServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    #[test]
    fn passes_rewrite_every_asset_reference() -> anyhow::Result<()> {
        let server = EchoServer::spawn();
        let temp = tempfile::TempDir::new()?;
        let assets = temp.path().join("assets");
        std::fs::create_dir_all(&assets)?;
        std::fs::write(assets.join("pre.png"), "already here")?;

        let config = MirrorConfig::new(temp.path());
        let session = HttpSession::new(&config, &server.base_url, CookieJar::default())?;
        let resolver = AssetResolver::new(session, temp.path())?;
        let mut pipeline = PagePipeline::new(resolver, Box::new(RegexCssRewriter));

        let doc = Document::parse(
            r#"<html><head><style>body { background: url('/bg.png') }</style></head><body>
<img src="/a/logo.png">
<img src="/b/logo.png">
<img src="/pre.png">
<img src="/s.png" srcset="/x1.png 1x, /x2.png 2x">
<a href="/index.php?media/7/"><img src="/m.png"></a>
<a href="/index.php?media/8/">clip page</a>
<video data-src="/clip.mp4"></video>
<audio><source src="/track.ogg"></audio>
</body></html>"#,
        );
        let base = Url::parse(&format!("{}/threads/t.1", server.base_url))?;
        let path = pipeline.process(1, doc, &base, temp.path(), &mut NoFailureRecording)?;
        let html = std::fs::read_to_string(path)?;

        assert!(html.contains("url('assets/bg.png')"));

        // same basename, distinct urls, distinct files; the file on disk is never reused
        assert!(html.contains(r#"<img src="assets/logo.png">"#));
        assert!(html.contains(r#"<img src="assets/logo_1.png">"#));
        assert!(html.contains(r#"<img src="assets/pre_1.png">"#));
        assert_eq!(std::fs::read_to_string(assets.join("logo.png"))?, "body of /a/logo.png");
        assert_eq!(std::fs::read_to_string(assets.join("logo_1.png"))?, "body of /b/logo.png");
        assert_eq!(std::fs::read_to_string(assets.join("pre.png"))?, "already here");
        assert_eq!(std::fs::read_to_string(assets.join("pre_1.png"))?, "body of /pre.png");

        assert!(html.contains(r#"srcset="assets/x1.png 1x, assets/x2.png 2x""#));
        assert!(html.contains(r#"<a href="assets/m.png"><img src="assets/m.png"></a>"#));
        assert!(html.contains(r#"<a href="assets/index.php">clip page</a>"#));
        assert!(html.contains(r#"<video src="assets/clip.mp4"></video>"#));
        assert!(html.contains(r#"<source src="assets/track.ogg">"#));
        assert!(!html.contains("data-src"));
        assert_eq!(pipeline.resolver().downloads(), 11);
        Ok(())
    }

    #[test]
    fn page_links_point_at_local_files() {
        let doc = Document::parse(
            r#"<body>
            <a href="https://forum.example/threads/topic.42/page-3">3</a>
            <a href="/threads/topic.42/">first</a>
            <a href="assets/page-2.png">img</a>
            <a href="/members/bob.7/">bob</a>
            </body>"#,
        );
        let html = rewrite_page_links(doc).to_html();
        assert!(html.contains(r#"href="page-3.html""#));
        assert!(html.contains(r#"href="page-1.html""#));
        assert!(html.contains(r#"href="assets/page-2.png""#));
        assert!(html.contains(r#"href="/members/bob.7/""#));
    }

    #[test]
    fn post_images_become_links_once() {
        let doc = Document::parse(
            r#"<body><div class="message-cell--main">
            <img class="avatar avatar--s" src="assets/me.png">
            <p><img src="assets/photo.jpg"></p>
            <a href="x"><img class="bbImage" src="assets/linked.jpg"></a>
            <img class="bbImage" src="data:image/png;base64,AA">
            </div><img class="bbCodeImage" src="assets/outside.png"></body>"#,
        );
        let wrapped = wrap_clickable_images(doc);
        let again = wrap_clickable_images(wrapped.clone());
        assert_eq!(wrapped, again);

        let html = wrapped.to_html();
        assert!(html.contains(
            r#"<a href="assets/photo.jpg" target="_blank" rel="noopener noreferrer" style="display:inline-block;cursor:zoom-in;"><img src="assets/photo.jpg"></a>"#
        ));
        assert!(html.contains(r#"<a href="assets/outside.png""#));
        assert!(!html.contains(r#"<a href="assets/me.png""#));
        assert!(!html.contains(r#"<a href="assets/linked.jpg""#));
        assert_eq!(html.matches("cursor:zoom-in").count(), 2);
    }

    #[test]
    fn join_reference_skips_non_fetchable() -> anyhow::Result<()> {
        let base = Url::parse("https://forum.example/threads/t.1/page-2")?;
        assert!(join_reference(&base, "#post-1").is_none());
        assert!(join_reference(&base, "javascript:void(0)").is_none());
        assert!(join_reference(&base, "mailto:a@b.example").is_none());
        assert!(join_reference(&base, "data:image/gif;base64,R0").is_none());
        assert_eq!(
            join_reference(&base, "/styles/a.css").map(String::from).as_deref(),
            Some("https://forum.example/styles/a.css")
        );
        Ok(())
    }

    #[test]
    fn unreachable_assets_fall_back_to_placeholder() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let config = MirrorConfig::new(temp.path());
        let session = HttpSession::new(&config, "http://127.0.0.1:9/", CookieJar::default())?;
        let resolver = AssetResolver::new(session, temp.path())?;
        let mut pipeline = PagePipeline::new(resolver, Box::new(RegexCssRewriter));

        let doc = Document::parse(
            r#"<html><head></head><body><img data-src="http://127.0.0.1:9/a.png" src="x.gif"></body></html>"#,
        );
        let base = Url::parse("http://127.0.0.1:9/threads/t.1")?;
        let path = pipeline.process(2, doc, &base, temp.path(), &mut NoFailureRecording)?;

        assert_eq!(path, temp.path().join("page-2.html"));
        let html = std::fs::read_to_string(path)?;
        assert!(html.contains(crate::assets::PLACEHOLDER_PREFIX));
        assert!(!html.contains("data-src"));
        assert!(html.contains(layout::FIXES_STYLE_ID));
        assert_eq!(pipeline.resolver().downloads(), 0);
        Ok(())
    }
}
