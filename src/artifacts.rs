//! Local handling of render results: decoding preview images and fetching
//! exported files.

use crate::model::ExportResult;
use crate::service::HttpRenderService;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use std::path::{Path, PathBuf};

/// Decode a `data:<mime>;base64,<payload>` image reference.
pub fn decode_data_url(image_ref: &str) -> Result<Vec<u8>> {
    let rest = image_ref
        .strip_prefix("data:")
        .context("image reference is not a data URL")?;
    let (header, payload) = rest
        .split_once(',')
        .context("data URL has no payload")?;
    if !header.ends_with(";base64") {
        anyhow::bail!("data URL is not base64 encoded ({header})");
    }
    STANDARD
        .decode(payload.trim())
        .context("decode base64 image data")
}

/// Write a preview image reference to `path`, creating parent directories.
pub fn save_preview(image_ref: &str, path: &Path) -> Result<()> {
    let bytes = decode_data_url(image_ref)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

/// Local file name for a download reference such as `/download?path=/srv/out/a.png`.
/// Falls back to the last URL segment, then to `fallback`.
pub fn file_name_from_ref(file_ref: &str, fallback: &str) -> String {
    let Ok(url) = Url::parse("http://localhost/").and_then(|base| base.join(file_ref)) else {
        return fallback.to_string();
    };
    let name = match url.query_pairs().find(|(k, _)| k == "path") {
        Some((_, path)) => base_name(&path),
        None => url.path_segments().and_then(|s| s.last()).and_then(base_name),
    };
    name.unwrap_or_else(|| fallback.to_string())
}

fn base_name(path: &str) -> Option<String> {
    // Server paths may use either separator regardless of the local platform.
    let name = path.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Download every file and the archive of an export into `dir`.
/// Returns the written paths in reply order.
pub async fn download_all(
    service: &HttpRenderService,
    export: &ExportResult,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;

    let refs: Vec<&str> = export
        .file_refs
        .iter()
        .map(String::as_str)
        .chain(export.archive_ref.as_deref())
        .collect();

    let fetches = refs.iter().enumerate().map(|(i, file_ref)| async move {
        let name = file_name_from_ref(file_ref, &format!("artifact-{}", i + 1));
        let path = dir.join(name);
        let bytes = service.download(file_ref).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        log::info!("saved {} ({} bytes)", path.display(), bytes.len());
        Ok::<_, anyhow::Error>(path)
    });
    futures::future::try_join_all(fetches).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG\r\n");
        let bytes = decode_data_url(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(bytes, b"\x89PNG\r\n");
    }

    #[test]
    fn rejects_non_data_urls() {
        assert!(decode_data_url("/download?path=a.png").is_err());
        assert!(decode_data_url("data:image/png,raw").is_err());
        assert!(decode_data_url("data:image/png;base64").is_err());
    }

    #[test]
    fn save_preview_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("preview.png");
        let encoded = STANDARD.encode(b"img");
        save_preview(&format!("data:image/png;base64,{encoded}"), &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"img");
    }

    #[test]
    fn file_names_come_from_path_query() {
        assert_eq!(
            file_name_from_ref("/download?path=/srv/out/timeseries_1.png", "x"),
            "timeseries_1.png"
        );
        assert_eq!(
            file_name_from_ref("/download?path=C%3A%5Cout%5Cchart.pdf", "x"),
            "chart.pdf"
        );
        assert_eq!(file_name_from_ref("/files/bundle.zip", "x"), "bundle.zip");
        assert_eq!(file_name_from_ref("/download?path=", "artifact-1"), "artifact-1");
        assert_eq!(file_name_from_ref("/", "artifact-2"), "artifact-2");
    }
}
