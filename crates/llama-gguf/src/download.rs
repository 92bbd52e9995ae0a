//! Model downloads.
//!
//! [`download_model`] streams a `.gguf` file into the registry's models
//! directory, showing a progress bar when the server sends a length, and
//! registers the result. Bytes go to `<file>.part` first and are renamed
//! into place only after the body has been fully written.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::registry::ModelRegistry;
use crate::retry::{RetryConfig, with_retry};

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedModel {
    /// Registry ID (the file stem).
    pub model_id: String,
    /// Where the file was written.
    pub path: PathBuf,
}

/// Download `url` into the models directory and register it.
///
/// `url` must end with `.gguf`; its last path segment becomes the file
/// name. Fails without touching the network when that file already exists.
pub async fn download_model(
    registry: &ModelRegistry,
    url: &str,
    aliases: &[String],
    llama2_chat: bool,
    retry: &RetryConfig,
) -> Result<DownloadedModel, String> {
    let filename = gguf_filename(url)?;
    let dest = registry.ensure_models_dir()?.join(filename);
    if dest.exists() {
        return Err(format!("File already exists at {}", dest.display()));
    }

    let client = reqwest::Client::new();
    let resp = with_retry(retry, "download", || start_download(&client, url)).await?;

    let part = part_path(&dest);
    if let Err(e) = write_body(resp, &part).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    move_into_place(&part, &dest).await?;

    eprintln!("Downloaded model to {}", dest.display());

    let model_id = registry.add_model(&dest, aliases, llama2_chat)?;
    info!("Registered downloaded model {model_id}");
    Ok(DownloadedModel {
        model_id,
        path: dest,
    })
}

/// File name for a download URL: the last path segment, which must end
/// with `.gguf`.
pub fn gguf_filename(url: &str) -> Result<&str, String> {
    if !url.ends_with(".gguf") {
        return Err("URL must end with .gguf".to_string());
    }
    match url.rsplit('/').next() {
        Some(name) if name != ".gguf" && !name.is_empty() => Ok(name),
        _ => Err(format!("cannot derive a file name from {url}")),
    }
}

async fn start_download(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, String> {
    debug!("GET {url}");
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("download HTTP {status}"));
    }
    Ok(resp)
}

async fn write_body(mut resp: reqwest::Response, part: &Path) -> Result<u64, String> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| format!("failed to create {}: {e}", part.display()))?;

    let bar = resp.content_length().map(progress_bar);
    let mut written: u64 = 0;

    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| format!("download interrupted: {e}"))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("failed to write {}: {e}", part.display()))?;
        written += chunk.len() as u64;
        if let Some(bar) = &bar {
            bar.set_position(written);
        }
    }

    file.flush()
        .await
        .map_err(|e| format!("failed to flush {}: {e}", part.display()))?;
    if let Some(bar) = bar {
        bar.finish();
    }
    debug!("Wrote {written} bytes to {}", part.display());
    Ok(written)
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg}  [{bar:36}] {percent:>3}%  {eta}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message(format!("Downloading {}", human_size(total)));
    bar
}

/// Rename a finished `.part` file to `dest`, removing it if that fails.
async fn move_into_place(part: &Path, dest: &Path) -> Result<(), String> {
    if let Err(e) = tokio::fs::rename(part, dest).await {
        let _ = tokio::fs::remove_file(part).await;
        return Err(format!("failed to move download into place: {e}"));
    }
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Human-readable byte size, e.g. `"3.83 GB"`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit = UNITS[0];
    for next in UNITS {
        unit = next;
        if size < 1024.0 {
            break;
        }
        if next != "PB" {
            size /= 1024.0;
        }
    }
    format!("{size:.2} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(0), "0.00 B");
        assert_eq!(human_size(1023), "1023.00 B");
        assert_eq!(human_size(1024), "1.00 KB");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(human_size(4_109_853_248), "3.83 GB");
    }

    #[test]
    fn human_size_caps_at_petabytes() {
        let pb = 1024u64.pow(5);
        assert_eq!(human_size(pb), "1.00 PB");
        assert_eq!(human_size(pb * 2048), "2048.00 PB");
    }

    #[test]
    fn filename_is_last_segment() {
        assert_eq!(
            gguf_filename("https://huggingface.co/x/y/resolve/main/llama-2-7b-chat.Q6_K.gguf"),
            Ok("llama-2-7b-chat.Q6_K.gguf")
        );
    }

    #[test]
    fn non_gguf_urls_are_rejected() {
        assert_eq!(
            gguf_filename("https://example.com/model.bin"),
            Err("URL must end with .gguf".to_string())
        );
        assert!(gguf_filename("https://example.com/.gguf").is_err());
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/m/a.gguf")),
            PathBuf::from("/m/a.gguf.part")
        );
    }

    #[tokio::test]
    async fn failed_rename_removes_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("m.gguf.part");
        std::fs::write(&part, b"GGUF").unwrap();
        // A non-empty directory cannot be replaced by a file.
        let dest = dir.path().join("m.gguf");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), b"x").unwrap();

        let err = move_into_place(&part, &dest).await.unwrap_err();
        assert!(err.contains("failed to move download into place"), "{err}");
        assert!(!part.exists());
        assert!(dest.join("keep").exists());
    }

    #[tokio::test]
    async fn existing_file_fails_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let existing = registry.ensure_models_dir().unwrap().join("m.gguf");
        std::fs::write(&existing, b"old").unwrap();

        // Port 9 (discard) is never contacted: the check happens first.
        let err = download_model(
            &registry,
            "http://127.0.0.1:9/m.gguf",
            &[],
            false,
            &RetryConfig::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, format!("File already exists at {}", existing.display()));
        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
    }
}
