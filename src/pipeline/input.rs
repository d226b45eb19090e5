//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! The source document is parsed from memory, so a download never touches
//! the file system. The `%PDF` magic is checked here so callers get a
//! meaningful error before the parser sees anything.

use crate::error::ChunkscribeError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A source document's raw bytes and a display name for logs and placeholders.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to bytes, downloading it when it is a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ChunkscribeError> {
    if input.trim().is_empty() {
        return Err(ChunkscribeError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<ResolvedInput, ChunkscribeError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ChunkscribeError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(ChunkscribeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    check_magic(&name, &bytes)?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ChunkscribeError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ChunkscribeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ChunkscribeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ChunkscribeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(ChunkscribeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(classify)?.to_vec();
    let name = filename_from_url(url);
    check_magic(&name, &bytes)?;

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok(ResolvedInput { name, bytes })
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), ChunkscribeError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(ChunkscribeError::NotAPdf {
        source_name: name.to_string(),
        magic,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Default output path for a run: `<stem>.<ext>` next to a local input, or in
/// the working directory for a URL.
pub fn default_output_path(input: &str, extension: &str) -> PathBuf {
    let stem = if is_url(input) {
        let name = filename_from_url(input);
        Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "downloaded".to_string())
    } else {
        Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    };

    let file_name = format!("{stem}.{extension}");
    match Path::new(input).parent() {
        Some(parent) if !is_url(input) && !parent.as_os_str().is_empty() => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_falls_back_for_bare_urls() {
        assert_eq!(filename_from_url("https://example.com/a/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://example.com/download"), "downloaded.pdf");
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path("/data/scans/book.pdf", "docx"),
            PathBuf::from("/data/scans/book.docx")
        );
        assert_eq!(default_output_path("book.pdf", "txt"), PathBuf::from("book.txt"));
        assert_eq!(
            default_output_path("https://example.com/x/paper.pdf", "pdf"),
            PathBuf::from("paper.pdf")
        );
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, ChunkscribeError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04 not a pdf").unwrap();
        let err = resolve_input(file.path().to_str().unwrap(), 5).await.unwrap_err();
        match err {
            ChunkscribeError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let err = resolve_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, ChunkscribeError::InvalidInput { .. }));
    }
}
