use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

pub const THREAD_PATH: &str = "/threads/engine-rebuild.42";
pub const THREAD_DIR: &str = "Engine rebuild_42";

pub static PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

pub static JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0xFF, 0xD9,
];

const MAIN_CSS: &str = r#"@import "theme.css";
body { background: url(../img/bg.png) no-repeat; }
.logo { background-image: url("data:image/gif;base64,R0lGODlhAQABAAAAACw="); }
"#;

const THEME_CSS: &str = r#"@import url('main.css') screen;
.p-header { background: url("/img/logo.png"); }
"#;

const VIEWER_HTML: &str = "<!DOCTYPE html><html><body>media viewer</body></html>";

/// A small forum serving one paginated thread plus its assets.
pub struct ForumStub {
    pub base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
    total_pages: Arc<AtomicU32>,
    forbid: Arc<AtomicBool>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ForumStub {
    pub fn spawn(total_pages: u32) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start forum stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let hits = Arc::new(Mutex::new(Vec::new()));
        let total = Arc::new(AtomicU32::new(total_pages));
        let forbid = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let hits = Arc::clone(&hits);
            let total = Arc::clone(&total);
            let forbid = Arc::clone(&forbid);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let url = request.url().to_string();
                    hits.lock().expect("hits lock").push(url.clone());

                    let (status, body) = route(
                        &url,
                        total.load(Ordering::SeqCst),
                        forbid.load(Ordering::SeqCst),
                    );
                    let _ = request
                        .respond(tiny_http::Response::from_data(body).with_status_code(status));
                }
            })
        };

        Self {
            base_url,
            hits,
            total_pages: total,
            forbid,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn thread_url(&self) -> String {
        format!("{}{THREAD_PATH}", self.base_url)
    }

    pub fn asset_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn set_total_pages(&self, total: u32) {
        self.total_pages.store(total, Ordering::SeqCst);
    }

    /// Serves the assets that answered 403 until now.
    pub fn unlock_forbidden(&self) {
        self.forbid.store(false, Ordering::SeqCst);
    }

    /// Number of requests for `path`, ignoring the query string.
    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .iter()
            .filter(|url| url.split('?').next() == Some(path))
            .count()
    }

    pub fn page_hits(&self, page: u32) -> usize {
        if page == 1 {
            self.hits(THREAD_PATH)
        } else {
            self.hits(&format!("{THREAD_PATH}/page-{page}"))
        }
    }
}

impl Drop for ForumStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn route(url: &str, total: u32, forbid: bool) -> (u16, Vec<u8>) {
    let path = url.split('?').next().unwrap_or(url);
    if path == THREAD_PATH {
        return (200, thread_page(1, total).into_bytes());
    }
    if let Some(page) = path
        .strip_prefix(THREAD_PATH)
        .and_then(|rest| rest.strip_prefix("/page-"))
        .and_then(|n| n.parse::<u32>().ok())
    {
        return if (1..=total).contains(&page) {
            (200, thread_page(page, total).into_bytes())
        } else {
            (404, b"no such page".to_vec())
        };
    }

    match path {
        "/styles/main.css" => (200, MAIN_CSS.as_bytes().to_vec()),
        "/styles/theme.css" => (200, THEME_CSS.as_bytes().to_vec()),
        "/img/logo.png" | "/img/bg.png" | "/img/thumb.png" => (200, PNG.to_vec()),
        "/img/secret.png" | "/attachments/locked.png" if forbid => (403, b"forbidden".to_vec()),
        "/img/secret.png" | "/attachments/locked.png" => (200, PNG.to_vec()),
        "/attachments/photo.php" => (200, JPEG.to_vec()),
        "/attachments/view.php" => (200, VIEWER_HTML.as_bytes().to_vec()),
        _ => (404, b"not found".to_vec()),
    }
}

fn thread_page(page: u32, total: u32) -> String {
    let next = (page + 1).min(total);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>(2) Engine rebuild | Example Forum</title>
  <link rel="stylesheet" href="/styles/main.css">
</head>
<body>
  <div class="p-pageWrapper">
    <nav class="pageNav">
      <a href="{THREAD_PATH}/">1</a>
      <a href="{THREAD_PATH}/page-{next}">Next</a>
      <a class="pageNav-jump pageNav-jump--last" href="{THREAD_PATH}/page-{total}">Last</a>
    </nav>
    <article class="message">
      <div class="message-cell--main">
        <p>Post on page {page}</p>
        <img class="bbImage" data-src="/img/logo.png" src="/img/lazy.gif">
        <img src="/img/secret.png" alt="members only">
        <a href="/attachments/view.php?id=3"><img src="/attachments/photo.php?id=3"></a>
        <a href="/attachments/locked.png"><img src="/img/thumb.png"></a>
        <div style="background: url('/img/bg.png')">banner</div>
      </div>
    </article>
  </div>
</body>
</html>
"#
    )
}
