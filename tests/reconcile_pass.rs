use std::fs;
use std::path::Path;

use threadmirror::assets::PLACEHOLDER_DATA_URI;
use threadmirror::formats::VERSION_RECONCILED;
use threadmirror::reconcile::{self, ReconcileOptions};
use threadmirror::thread_info;

const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

fn raw_backup(dir: &Path) -> anyhow::Result<()> {
    let assets = dir.join("assets");
    fs::create_dir_all(&assets)?;
    fs::write(assets.join("foo.php"), JPEG_HEADER)?;
    fs::write(assets.join("foo.jpg"), b"unrelated image")?;
    fs::write(assets.join("bar.php"), b"<!DOCTYPE html><html><body>viewer</body></html>")?;
    fs::write(assets.join("site.css"), ".hero { background: url(foo.php) }")?;
    fs::write(dir.join("thread_url.txt"), "https://forum.example/threads/old-build.7\n")?;
    fs::write(
        dir.join("page-1.html"),
        format!(
            r#"<!DOCTYPE html><html><head></head><body>
<a href="assets/bar.php"><img src="assets/foo.php"></a>
<a href="{PLACEHOLDER_DATA_URI}"><img src="assets/foo.jpg"></a>
<a href="assets/bar.php">viewer without thumbnail</a>
</body></html>"#
        ),
    )?;
    Ok(())
}

#[test]
fn dry_run_changes_nothing() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    raw_backup(temp.path())?;
    let before = fs::read_to_string(temp.path().join("page-1.html"))?;

    let report = reconcile::reconcile(temp.path(), ReconcileOptions { dry_run: true })?;

    assert_eq!(report.renamed.get("foo.php").map(String::as_str), Some("foo_1.jpg"));
    assert_eq!(report.updated_files.len(), 2);
    assert!(!report.version_updated);
    assert!(temp.path().join("assets/foo.php").is_file());
    assert!(!temp.path().join("thread_info.json").exists());
    assert_eq!(fs::read_to_string(temp.path().join("page-1.html"))?, before);
    Ok(())
}

#[test]
fn renames_images_and_fixes_gallery_links() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let dir = temp.path();
    raw_backup(dir)?;

    let report = reconcile::reconcile(dir, ReconcileOptions::default())?;

    assert_eq!(report.renamed.len(), 1);
    assert!(report.documents.contains("bar.php"));
    assert_eq!(report.gallery_links_fixed, 2);
    assert!(dir.join("assets/foo_1.jpg").is_file());
    assert!(dir.join("assets/bar.php").is_file());
    assert_eq!(fs::read(dir.join("assets/foo.jpg"))?, b"unrelated image");

    let page = fs::read_to_string(dir.join("page-1.html"))?;
    assert!(page.contains(r#"<a href="assets/foo_1.jpg"><img src="assets/foo_1.jpg"></a>"#));
    assert!(page.contains(r#"<a href="assets/foo.jpg"><img src="assets/foo.jpg"></a>"#));
    assert!(page.contains(r#"<a href="assets/bar.php">viewer without thumbnail</a>"#));
    assert!(!page.contains("assets/foo.php"));

    let css = fs::read_to_string(dir.join("assets/site.css"))?;
    assert_eq!(css, ".hero { background: url(foo_1.jpg) }");

    let info = thread_info::read(dir).ok_or_else(|| anyhow::anyhow!("thread_info.json missing"))?;
    assert_eq!(info.version, VERSION_RECONCILED);
    assert_eq!(info.url, "https://forum.example/threads/old-build.7");

    // a second pass finds nothing left to rename
    let again = reconcile::reconcile(dir, ReconcileOptions::default())?;
    assert!(again.renamed.is_empty());
    assert!(again.is_noop());
    Ok(())
}

#[test]
fn missing_directory_is_an_error() {
    let result = reconcile::reconcile(Path::new("/definitely/not/a/backup"), ReconcileOptions::default());
    assert!(result.is_err());
}
