use crate::error::{OpusMtError, Result};
use futures_util::StreamExt;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use zip::ZipArchive;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Download progress information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Percentage complete (0-100), 0 when the total size is unknown
    #[must_use]
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => {
                let pct = self.downloaded.saturating_mul(100) / total;
                u8::try_from(pct.min(100)).unwrap_or(100)
            }
            _ => 0,
        }
    }
}

/// Stream `url` into `dest`, creating parent directories as needed
///
/// Data is written to `<dest>.part` and renamed into place once the body has
/// been fully received, so an interrupted download never looks complete.
pub async fn download_file<F>(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    on_progress: F,
) -> Result<PathBuf>
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    let parent = dest
        .parent()
        .ok_or_else(|| OpusMtError::InvalidArgument(format!("No parent for {}", dest.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    tracing::info!("Downloading {url} -> {}", dest.display());

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| OpusMtError::Network(format!("Request to {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(OpusMtError::Network(format!(
            "Download of {url} failed: HTTP {}",
            response.status()
        )));
    }

    let total = response.content_length();
    if let Some(total) = total {
        check_disk_space(parent, total)?;
    }

    let part_path = part_path(dest);
    let downloaded = match write_body(response, &part_path, total, url, &on_progress).await {
        Ok(downloaded) => downloaded,
        Err(e) => {
            tokio::fs::remove_file(&part_path).await.ok();
            return Err(e);
        }
    };
    tokio::fs::rename(&part_path, dest).await?;

    on_progress(DownloadProgress {
        downloaded,
        total: Some(total.unwrap_or(downloaded)),
    });
    tracing::info!(
        "Downloaded {} ({})",
        dest.display(),
        format_bytes(downloaded)
    );

    Ok(dest.to_path_buf())
}

/// Stream the response body into `part_path`, returning the byte count
async fn write_body<F>(
    response: reqwest::Response,
    part_path: &Path,
    total: Option<u64>,
    url: &str,
    on_progress: &F,
) -> Result<u64>
where
    F: Fn(DownloadProgress),
{
    let mut file = tokio::fs::File::create(part_path).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_report = Instant::now();

    on_progress(DownloadProgress { downloaded, total });

    while let Some(item) = stream.next().await {
        let chunk = item
            .map_err(|e| OpusMtError::Network(format!("Download of {url} interrupted: {e}")))?;

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            on_progress(DownloadProgress { downloaded, total });
        }
    }

    file.flush().await?;
    Ok(downloaded)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Unpack `archive` into `dest`
///
/// Entries are unpacked into a `<dest>.partial` staging directory that is
/// renamed to `dest` on success and removed on failure. The archive itself is
/// never touched.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    if dest.exists() {
        return Err(OpusMtError::Archive(format!(
            "Target directory {} already exists",
            dest.display()
        )));
    }

    let mut staging_name = dest.file_name().unwrap_or_default().to_os_string();
    staging_name.push(".partial");
    let staging = dest.with_file_name(staging_name);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    match unpack(archive, &staging) {
        Ok(count) => {
            fs::rename(&staging, dest)?;
            tracing::info!("Extracted {count} files from {}", archive.display());
            Ok(dest.to_path_buf())
        }
        Err(e) => {
            fs::remove_dir_all(&staging).ok();
            Err(e)
        }
    }
}

fn unpack(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        OpusMtError::Archive(format!("Failed to read {}: {e}", archive.display()))
    })?;

    fs::create_dir_all(dest)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| OpusMtError::Archive(format!("Failed to read entry {i}: {e}")))?;

        let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            OpusMtError::Archive(format!("Entry '{}' escapes the archive root", entry.name()))
        })?;
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| {
            OpusMtError::Archive(format!("Failed to unpack '{}': {e}", entry.name()))
        })?;
        files += 1;
    }

    Ok(files)
}

/// Check if enough disk space is available under `dir` for `required_bytes`
#[cfg(unix)]
fn check_disk_space(dir: &Path, required_bytes: u64) -> Result<()> {
    let stats = nix::sys::statvfs::statvfs(dir)
        .map_err(|e| OpusMtError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::useless_conversion)]
    let available_bytes = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());

    // Add 100MB buffer for safety
    let required_with_buffer = required_bytes + (100 * 1_024 * 1_024);

    if available_bytes < required_with_buffer {
        return Err(OpusMtError::Other(format!(
            "Not enough disk space: {} required, {} available",
            format_bytes(required_with_buffer),
            format_bytes(available_bytes)
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
fn check_disk_space(_dir: &Path, _required_bytes: u64) -> Result<()> {
    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }

    #[test]
    fn test_progress_percent() {
        let p = DownloadProgress {
            downloaded: 50,
            total: Some(200),
        };
        assert_eq!(p.percent(), 25);

        let unknown = DownloadProgress {
            downloaded: 50,
            total: None,
        };
        assert_eq!(unknown.percent(), 0);

        let over = DownloadProgress {
            downloaded: 300,
            total: Some(200),
        };
        assert_eq!(over.percent(), 100);
    }

    /// Answer every request with `body`, announcing `declared_len` bytes
    async fn serve(body: &'static [u8], declared_len: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                stream.read(&mut buf).await.ok();
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n"
                );
                stream.write_all(header.as_bytes()).await.ok();
                stream.write_all(body).await.ok();
                stream.shutdown().await.ok();
            }
        });
        format!("http://{addr}/models/en-fi/opus-20230601.zip")
    }

    #[tokio::test]
    async fn test_download_file() {
        let url = serve(b"archive bytes", 13).await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("en-fi/opus-20230601.zip");

        let last = std::sync::Mutex::new(None);
        let out = download_file(&reqwest::Client::new(), &url, &dest, |p| {
            *last.lock().unwrap() = Some(p);
        })
        .await
        .unwrap();

        assert_eq!(out, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
        assert!(!part_path(&dest).exists());
        let last = (*last.lock().unwrap()).unwrap();
        assert_eq!(last.percent(), 100);
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_part_file() {
        let url = serve(b"short", 4096).await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("en-fi/opus-20230601.zip");

        let result = download_file(&reqwest::Client::new(), &url, &dest, |_| {}).await;

        assert!(matches!(result, Err(OpusMtError::Network(_))));
        assert!(!part_path(&dest).exists());
        assert!(!dest.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_removes_part_file() {
        let url = serve(b"archive bytes", 13).await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("opus-20230601.zip");

        // Every write to /dev/full fails with ENOSPC
        let part = part_path(&dest);
        std::os::unix::fs::symlink("/dev/full", &part).unwrap();

        let result = download_file(&reqwest::Client::new(), &url, &dest, |_| {}).await;

        assert!(matches!(result, Err(OpusMtError::Io(_))));
        assert!(fs::symlink_metadata(&part).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/m/en-fi/opus-20230601.zip")),
            PathBuf::from("/m/en-fi/opus-20230601.zip.part")
        );
    }

    #[test]
    fn test_extract_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("opus-20230601.zip");
        write_zip(
            &archive,
            &[
                ("opus.npz", b"weights".as_slice()),
                ("vocab/source.spm", b"spm".as_slice()),
            ],
        );

        let dest = temp_dir.path().join("opus-20230601");
        let out = extract_archive(&archive, &dest).unwrap();

        assert_eq!(out, dest);
        assert_eq!(fs::read(dest.join("opus.npz")).unwrap(), b"weights");
        assert!(dest.join("vocab/source.spm").exists());
        assert!(archive.exists());
        assert!(!temp_dir.path().join("opus-20230601.partial").exists());
    }

    #[test]
    fn test_extract_corrupt_archive_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("opus-20230601.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let dest = temp_dir.path().join("opus-20230601");
        let result = extract_archive(&archive, &dest);

        assert!(matches!(result, Err(OpusMtError::Archive(_))));
        assert!(archive.exists());
        assert!(!dest.exists());
        assert!(!temp_dir.path().join("opus-20230601.partial").exists());
    }

    #[test]
    fn test_extract_refuses_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("opus-20230601.zip");
        write_zip(&archive, &[("opus.npz", b"weights".as_slice())]);
        let dest = temp_dir.path().join("opus-20230601");
        fs::create_dir_all(&dest).unwrap();

        assert!(matches!(
            extract_archive(&archive, &dest),
            Err(OpusMtError::Archive(_))
        ));
    }
}
