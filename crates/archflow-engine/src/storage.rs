use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;

use crate::images::decode_data_uri;

/// Permanent home for a finished result. `persist` returns the stored
/// location, which replaces the transient backend URL in job rows.
pub trait ObjectStore: Send + Sync {
    fn persist(&self, source: &str, key: &str) -> Result<String>;
}

/// Writes results under a root directory. Data URIs are decoded, hosted URLs
/// downloaded, and local paths copied.
pub struct LocalObjectStore {
    root: PathBuf,
    http: HttpClient,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build download client")?;
        Ok(Self {
            root: root.into(),
            http,
        })
    }

    fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("download failed ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("download failed ({url}): HTTP {}", status.as_u16());
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        let bytes = response
            .bytes()
            .with_context(|| format!("download body read failed ({url})"))?;
        Ok((bytes.to_vec(), mime))
    }
}

impl ObjectStore for LocalObjectStore {
    fn persist(&self, source: &str, key: &str) -> Result<String> {
        let source = source.trim();
        let (bytes, extension) = if source.starts_with("data:") {
            let (mime, bytes) =
                decode_data_uri(source).context("result data URI is not valid base64")?;
            (bytes, extension_for_mime(&mime))
        } else if source.starts_with("http://") || source.starts_with("https://") {
            let (bytes, mime) = self.download(source)?;
            let extension = mime
                .as_deref()
                .map(extension_for_mime)
                .or_else(|| extension_from_path(source))
                .unwrap_or("bin");
            (bytes, extension)
        } else {
            let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
            let bytes =
                fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
            (bytes, extension_from_path(source).unwrap_or("bin"))
        };

        let target = self.root.join(format!("{}.{extension}", sanitize_key(key)));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)
            .with_context(|| format!("failed writing {}", target.display()))?;
        Ok(format!("file://{}", target.display()))
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

fn extension_from_path(source: &str) -> Option<&'static str> {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "mp4" => Some("mp4"),
        _ => None,
    }
}

/// Keys may contain `/` for grouping; anything else unusual (dots
/// included) becomes `_`, so keys never climb out of the root.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '/') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let parts: Vec<&str> = cleaned
        .split('/')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        "result".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{sanitize_key, LocalObjectStore, ObjectStore};

    #[test]
    fn data_uri_is_decoded_to_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalObjectStore::new(temp.path())?;

        let location = store.persist("data:image/jpeg;base64,QUJD", "job-1/0")?;

        let expected = temp.path().join("job-1").join("0.jpg");
        assert_eq!(location, format!("file://{}", expected.display()));
        assert_eq!(fs::read(&expected)?, b"ABC");
        Ok(())
    }

    #[test]
    fn local_file_is_copied() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source.png");
        fs::write(&source, b"png-bytes")?;
        let store = LocalObjectStore::new(temp.path().join("store"))?;

        let location = store.persist(&source.to_string_lossy(), "job-2/0")?;

        assert!(location.ends_with("job-2/0.png"));
        assert_eq!(
            fs::read(temp.path().join("store").join("job-2").join("0.png"))?,
            b"png-bytes"
        );
        Ok(())
    }

    #[test]
    fn keys_cannot_escape_root() {
        assert_eq!(sanitize_key("../../etc/passwd"), "__/__/etc/passwd");
        assert_eq!(sanitize_key("a b/c"), "a_b/c");
        assert_eq!(sanitize_key(""), "result");
    }

    #[test]
    fn malformed_data_uri_fails() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalObjectStore::new(temp.path())?;
        assert!(store.persist("data:image/png,plain", "x").is_err());
        Ok(())
    }
}
