use std::path::Path;

use anyhow::Context as _;

/// Reads a JSON document, treating a missing file as `None`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

/// Writes `value` next to `path` under a temporary name, then renames it into place so
/// readers only ever observe a complete document.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?;
    let tmp_path = parent.join(format!(
        "{}.tmp.{}",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("rename tmp to final: {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_leaves_no_tmp_files() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("state.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1}))?;
        write_json_atomic(&path, &serde_json::json!({"a": 2}))?;

        let value: Option<serde_json::Value> = read_json(&path)?;
        assert_eq!(value, Some(serde_json::json!({"a": 2})));

        let entries = std::fs::read_dir(temp.path())?.count();
        assert_eq!(entries, 1);
        Ok(())
    }

    #[test]
    fn missing_file_reads_as_none() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let value: Option<serde_json::Value> = read_json(&temp.path().join("absent.json"))?;
        assert!(value.is_none());
        Ok(())
    }
}
