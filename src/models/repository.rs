use crate::config::schema::ModelsConfig;
use crate::error::{OpusMtError, Result};
use crate::lang::LanguagePair;
use crate::models::descriptor::{latest_by_date_token, InstallStatus, ModelDescriptor};
use crate::models::download::{self, DownloadProgress};
use crate::models::listing;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Extension of the parameter file that marks a completed install
const PARAMETER_EXTENSION: &str = "npz";

/// Snapshot of the last remote listing
#[derive(Debug, Clone, Default)]
pub struct RemoteStatus {
    pub refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub model_count: usize,
}

#[derive(Debug, Default)]
struct RemoteCatalog {
    models: Vec<ModelDescriptor>,
    refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Events reported by a spawned install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Progress(DownloadProgress),
    Installed(PathBuf),
    Failed(String),
}

/// Local and remote catalogue of versioned translation models
///
/// Installed models live under `<root>/models/<pair>/<name>/`. The remote
/// catalogue is an object-storage bucket advertising
/// `models/<pair>/<name>.zip` archives.
pub struct ModelRepository {
    models_dir: PathBuf,
    storage_url: String,
    max_listing_pages: usize,
    request_timeout: Duration,
    client: reqwest::Client,
    local: RwLock<Vec<ModelDescriptor>>,
    remote: RwLock<RemoteCatalog>,
}

impl ModelRepository {
    /// Create repository from config and scan installed models
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        Self::with_root(
            &root,
            &config.storage_url,
            Duration::from_secs(config.request_timeout_secs),
            config.max_listing_pages,
        )
    }

    /// Create repository for an explicit local root
    pub fn with_root(
        root: &Path,
        storage_url: &str,
        request_timeout: Duration,
        max_listing_pages: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| OpusMtError::Network(format!("Failed to create HTTP client: {e}")))?;

        let repository = Self {
            models_dir: root.join("models"),
            storage_url: storage_url.trim_end_matches('/').to_string(),
            max_listing_pages: max_listing_pages.max(1),
            request_timeout,
            client,
            local: RwLock::new(Vec::new()),
            remote: RwLock::new(RemoteCatalog::default()),
        };
        repository.refresh_local();

        Ok(repository)
    }

    /// Directory holding `<pair>/<name>` model directories
    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Scan the local model root for completed installs
    ///
    /// A directory counts as installed when a parameter file (`*.npz`) exists
    /// anywhere beneath it. A missing root yields an empty list.
    #[must_use]
    pub fn discover_local(&self) -> Vec<ModelDescriptor> {
        if !self.models_dir.is_dir() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut models = Vec::new();

        for entry in WalkDir::new(&self.models_dir)
            .min_depth(3)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(PARAMETER_EXTENSION)
            {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.models_dir) else {
                continue;
            };
            let mut components = relative.components();
            let (Some(pair), Some(name)) = (components.next(), components.next()) else {
                continue;
            };
            let key = format!(
                "{}/{}",
                pair.as_os_str().to_string_lossy(),
                name.as_os_str().to_string_lossy()
            );
            if !seen.insert(key.clone()) {
                continue;
            }

            let model_dir = self.models_dir.join(pair).join(name);
            if let Some(model) = ModelDescriptor::from_key(&key, Some(model_dir)) {
                models.push(model);
            }
        }

        models.sort_by(|a, b| a.key().cmp(&b.key()));
        models
    }

    /// Rescan installed models and update the cached list
    pub fn refresh_local(&self) -> Vec<ModelDescriptor> {
        let models = self.discover_local();
        tracing::debug!("Found {} installed models", models.len());
        *self.local.write().unwrap_or_else(PoisonError::into_inner) = models.clone();
        models
    }

    /// Cached list of installed models
    #[must_use]
    pub fn local_models(&self) -> Vec<ModelDescriptor> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch the remote listing and replace the cached remote catalogue
    ///
    /// On failure the previous catalogue is kept and the error is recorded
    /// in [`remote_status`](Self::remote_status).
    pub async fn discover_remote(&self) -> Result<Vec<ModelDescriptor>> {
        match self.fetch_remote().await {
            Ok(mut models) => {
                let installed: HashSet<String> =
                    self.local_models().iter().map(ModelDescriptor::key).collect();
                for model in &mut models {
                    if installed.contains(&model.key()) {
                        model.mark_installed();
                    }
                }

                let mut remote = self.remote.write().unwrap_or_else(PoisonError::into_inner);
                remote.models = models.clone();
                remote.refreshed_at = Some(Utc::now());
                remote.last_error = None;
                tracing::info!("Remote listing has {} models", models.len());
                Ok(models)
            }
            Err(e) => {
                tracing::warn!("Remote model listing failed, keeping previous list: {e}");
                self.remote
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Refresh the remote catalogue in the background
    pub fn spawn_remote_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let repository = Arc::clone(self);
        tokio::spawn(async move {
            // Failure is recorded in the remote status
            let _ = repository.discover_remote().await;
        })
    }

    async fn fetch_remote(&self) -> Result<Vec<ModelDescriptor>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        for _ in 0..self.max_listing_pages {
            // Whole-request bound for listings; archive downloads only bound the connect
            let mut request = self.client.get(&self.storage_url).timeout(self.request_timeout);
            if let Some(marker) = &marker {
                request = request.query(&[("marker", marker.as_str())]);
            }

            let response = request.send().await.map_err(|e| {
                OpusMtError::Network(format!("Failed to fetch {}: {e}", self.storage_url))
            })?;
            if !response.status().is_success() {
                return Err(OpusMtError::Network(format!(
                    "Listing {} returned HTTP {}",
                    self.storage_url,
                    response.status()
                )));
            }
            let body = response
                .text()
                .await
                .map_err(|e| OpusMtError::Network(format!("Failed to read listing: {e}")))?;

            let page = listing::parse_listing(&body);
            marker = page.next_marker().map(str::to_string);
            keys.extend(page.keys);

            if marker.is_none() {
                break;
            }
        }

        if marker.is_some() {
            tracing::warn!(
                "Remote listing still truncated after {} pages",
                self.max_listing_pages
            );
        }

        Ok(listing::model_descriptors(&keys))
    }

    /// Freshness of the cached remote catalogue
    #[must_use]
    pub fn remote_status(&self) -> RemoteStatus {
        let remote = self.remote.read().unwrap_or_else(PoisonError::into_inner);
        RemoteStatus {
            refreshed_at: remote.refreshed_at,
            last_error: remote.last_error.clone(),
            model_count: remote.models.len(),
        }
    }

    /// Cached remote catalogue from the last successful discovery
    #[must_use]
    pub fn remote_models(&self) -> Vec<ModelDescriptor> {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models
            .clone()
    }

    /// Case-sensitive substring filter over the remote catalogue
    #[must_use]
    pub fn filter(&self, source: &str, target: &str, name: &str) -> Vec<ModelDescriptor> {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models
            .iter()
            .filter(|m| {
                m.source_language_string().contains(source)
                    && m.target_language_string().contains(target)
                    && m.name.contains(name)
            })
            .cloned()
            .collect()
    }

    /// Directory of the newest installed model for `pair`
    ///
    /// Reads `<root>/models/<pair>/` directly so a freshly extracted model is
    /// picked up without a rescan.
    #[must_use]
    pub fn resolve_latest_local(&self, pair: &LanguagePair) -> Option<PathBuf> {
        let pair_dir = self.models_dir.join(pair.to_string());
        let entries = fs::read_dir(&pair_dir).ok()?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !is_staging_dir(p))
            .collect();
        dirs.sort();

        latest_by_date_token(dirs, |p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    /// Newest remote model for `pair` if it is not installed yet
    #[must_use]
    pub fn has_newer_remote(&self, pair: &LanguagePair) -> Option<ModelDescriptor> {
        let remote = self.remote.read().unwrap_or_else(PoisonError::into_inner);
        let newest = latest_by_date_token(
            remote.models.iter().filter(|m| m.is_for_pair(pair)),
            |m| m.name.clone(),
        )?;

        if self.models_dir.join(&newest.pair).join(&newest.name).is_dir() {
            None
        } else {
            Some(newest.clone())
        }
    }

    /// Whether any installed model serves `pair`
    ///
    /// Uses only the cached local list; call [`refresh_local`](Self::refresh_local)
    /// after installing.
    #[must_use]
    pub fn is_pair_supported(&self, pair: &LanguagePair) -> bool {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|m| m.is_for_pair(pair))
    }

    /// Local path where the archive for `descriptor` is stored
    #[must_use]
    pub fn archive_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir
            .join(&descriptor.pair)
            .join(format!("{}.zip", descriptor.name))
    }

    /// Download the archive for `descriptor` without extracting it
    pub async fn download<F>(&self, descriptor: &ModelDescriptor, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let url = format!("{}/models/{}.zip", self.storage_url, descriptor.key());
        let dest = self.archive_path(descriptor);

        download::download_file(&self.client, &url, &dest, |progress| {
            self.set_remote_progress(descriptor, progress.percent());
            on_progress(progress);
        })
        .await
    }

    /// Unpack a `<pair>/<name>.zip` archive into the sibling `<pair>/<name>/` directory
    ///
    /// The archive is left in place on failure and only deleted after a
    /// successful extraction when `delete_archive` is set.
    pub async fn extract(&self, archive: &Path, delete_archive: bool) -> Result<PathBuf> {
        let dest = model_dir_for_archive(archive)?;
        let archive_for_task = archive.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            download::extract_archive(&archive_for_task, &dest)
        })
        .await
        .map_err(|e| OpusMtError::Other(format!("Extraction task panicked: {e}")))??;

        if delete_archive {
            tokio::fs::remove_file(archive).await?;
        }

        self.refresh_local();
        Ok(dir)
    }

    /// Download, extract and register `descriptor`
    pub async fn install<F>(&self, descriptor: &ModelDescriptor, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let archive = self.download(descriptor, on_progress).await?;
        let dir = self.extract(&archive, true).await?;

        let mut remote = self.remote.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = remote.models.iter_mut().find(|m| m.key() == descriptor.key()) {
            model.mark_installed();
        }

        tracing::info!("Installed model {} at {}", descriptor.key(), dir.display());
        Ok(dir)
    }

    /// Install `descriptor` in the background, reporting through `events`
    pub fn spawn_install(
        self: &Arc<Self>,
        descriptor: ModelDescriptor,
        events: mpsc::UnboundedSender<InstallEvent>,
    ) -> JoinHandle<()> {
        let repository = Arc::clone(self);
        tokio::spawn(async move {
            let progress_tx = events.clone();
            let result = repository
                .install(&descriptor, move |progress| {
                    progress_tx.send(InstallEvent::Progress(progress)).ok();
                })
                .await;

            let event = match result {
                Ok(dir) => InstallEvent::Installed(dir),
                Err(e) => {
                    tracing::error!("Installing {} failed: {e}", descriptor.key());
                    InstallEvent::Failed(e.to_string())
                }
            };
            events.send(event).ok();
        })
    }

    fn set_remote_progress(&self, descriptor: &ModelDescriptor, percent: u8) {
        let mut remote = self.remote.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = remote.models.iter_mut().find(|m| m.key() == descriptor.key()) {
            if model.status == InstallStatus::NotInstalled {
                model.install_progress = percent;
            }
        }
    }
}

fn is_staging_dir(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("partial")
}

/// `<...>/<pair>/<name>.zip` -> `<...>/<pair>/<name>`
fn model_dir_for_archive(archive: &Path) -> Result<PathBuf> {
    let invalid = || {
        OpusMtError::Archive(format!(
            "Archive {} does not match the <pair>/<name>.zip layout",
            archive.display()
        ))
    };

    if archive.extension().and_then(|e| e.to_str()) != Some("zip") {
        return Err(invalid());
    }
    let name = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(invalid)?;
    let pair = archive
        .parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .ok_or_else(invalid)?;

    ModelDescriptor::from_key(&format!("{pair}/{name}"), None).ok_or_else(invalid)?;
    Ok(archive.with_extension(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn repository(root: &Path) -> ModelRepository {
        ModelRepository::with_root(root, "http://127.0.0.1:9", Duration::from_secs(1), 2).unwrap()
    }

    fn install_fake_model(root: &Path, key: &str) -> PathBuf {
        let dir = root.join("models").join(key);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.npz"), b"weights").unwrap();
        dir
    }

    fn set_remote(repo: &ModelRepository, keys: &[&str]) {
        let models = keys
            .iter()
            .filter_map(|k| ModelDescriptor::from_key(k, None))
            .collect();
        repo.remote.write().unwrap().models = models;
    }

    #[test]
    fn test_discover_local_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir.path().join("does-not-exist"));
        assert!(repo.discover_local().is_empty());
        assert!(repo.local_models().is_empty());
    }

    #[test]
    fn test_discover_local_requires_parameter_file() {
        let temp_dir = TempDir::new().unwrap();
        install_fake_model(temp_dir.path(), "en-fi/opus-20230101");
        fs::create_dir_all(temp_dir.path().join("models/en-fi/opus-20230601")).unwrap();

        let nested = temp_dir.path().join("models/sv-fi/opus-20220101/inner");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.npz"), b"x").unwrap();
        fs::write(nested.join("b.npz"), b"x").unwrap();

        let repo = repository(temp_dir.path());
        let keys: Vec<String> = repo.local_models().iter().map(ModelDescriptor::key).collect();
        assert_eq!(keys, vec!["en-fi/opus-20230101", "sv-fi/opus-20220101"]);

        let sv = &repo.local_models()[1];
        assert_eq!(
            sv.path.as_deref(),
            Some(temp_dir.path().join("models/sv-fi/opus-20220101").as_path())
        );
        assert_eq!(sv.status, InstallStatus::Installed);
    }

    #[test]
    fn test_resolve_latest_local() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("models/en-fi/20230101")).unwrap();
        fs::create_dir_all(temp_dir.path().join("models/en-fi/20230601")).unwrap();
        fs::create_dir_all(temp_dir.path().join("models/en-fi/untagged")).unwrap();

        let repo = repository(temp_dir.path());
        let pair: LanguagePair = "en-fi".parse().unwrap();
        assert_eq!(
            repo.resolve_latest_local(&pair),
            Some(temp_dir.path().join("models/en-fi/20230601"))
        );
    }

    #[test]
    fn test_resolve_latest_local_tie_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("models/en-fi/b-20230101")).unwrap();
        fs::create_dir_all(temp_dir.path().join("models/en-fi/a-20230101")).unwrap();

        let repo = repository(temp_dir.path());
        let pair: LanguagePair = "en-fi".parse().unwrap();
        assert_eq!(
            repo.resolve_latest_local(&pair),
            Some(temp_dir.path().join("models/en-fi/b-20230101"))
        );
    }

    #[test]
    fn test_resolve_latest_local_missing_pair() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        assert_eq!(repo.resolve_latest_local(&"fi-en".parse().unwrap()), None);
    }

    #[test]
    fn test_is_pair_supported_uses_cache() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        let pair: LanguagePair = "en-fi".parse().unwrap();
        assert!(!repo.is_pair_supported(&pair));

        install_fake_model(temp_dir.path(), "en-fi/opus-20230101");
        assert!(!repo.is_pair_supported(&pair));

        repo.refresh_local();
        assert!(repo.is_pair_supported(&pair));
        assert!(!repo.is_pair_supported(&"fi-en".parse().unwrap()));
    }

    #[test]
    fn test_filter() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        set_remote(
            &repo,
            &[
                "en-fi/opus-20230101",
                "en+sv-fi/opus-20220101",
                "fi-en/tatoeba-20230601",
            ],
        );

        assert_eq!(repo.filter("", "", "").len(), 3);
        assert_eq!(repo.filter("sv", "", "").len(), 1);
        assert_eq!(repo.filter("", "fi", "opus").len(), 2);
        assert_eq!(repo.filter("", "", "tatoeba")[0].key(), "fi-en/tatoeba-20230601");
        assert!(repo.filter("EN", "", "").is_empty());
    }

    #[test]
    fn test_has_newer_remote() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        let pair: LanguagePair = "en-fi".parse().unwrap();
        set_remote(&repo, &["en-fi/opus-20230601", "en-fi/opus-20230101", "fi-en/opus-20240101"]);

        let newer = repo.has_newer_remote(&pair).unwrap();
        assert_eq!(newer.key(), "en-fi/opus-20230601");

        fs::create_dir_all(temp_dir.path().join("models/en-fi/opus-20230601")).unwrap();
        assert!(repo.has_newer_remote(&pair).is_none());
    }

    #[test]
    fn test_has_newer_remote_empty_catalogue() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        assert!(repo.has_newer_remote(&"en-fi".parse().unwrap()).is_none());
    }

    #[test]
    fn test_archive_path() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        let model = ModelDescriptor::from_key("en-fi/opus-20230601", None).unwrap();
        assert_eq!(
            repo.archive_path(&model),
            temp_dir.path().join("models/en-fi/opus-20230601.zip")
        );
    }

    #[test]
    fn test_model_dir_for_archive() {
        assert_eq!(
            model_dir_for_archive(Path::new("/r/models/en-fi/opus-20230601.zip")).unwrap(),
            PathBuf::from("/r/models/en-fi/opus-20230601")
        );
        assert!(model_dir_for_archive(Path::new("/r/models/enfi/opus.zip")).is_err());
        assert!(model_dir_for_archive(Path::new("/r/models/en-fi/opus.tar")).is_err());
        assert!(model_dir_for_archive(Path::new("opus.zip")).is_err());
    }

    #[tokio::test]
    async fn test_extract_mismatched_name_keeps_archive() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        let archive = temp_dir.path().join("stray.zip");
        fs::write(&archive, b"zip?").unwrap();

        let result = repo.extract(&archive, true).await;
        assert!(matches!(result, Err(OpusMtError::Archive(_))));
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_extract_registers_model() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        let pair_dir = temp_dir.path().join("models/en-fi");
        fs::create_dir_all(&pair_dir).unwrap();

        let archive = pair_dir.join("opus-20230601.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        writer
            .start_file("opus.npz", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"weights").unwrap();
        writer.finish().unwrap();

        let dir = repo.extract(&archive, true).await.unwrap();
        assert_eq!(dir, pair_dir.join("opus-20230601"));
        assert!(dir.join("opus.npz").exists());
        assert!(!archive.exists());
        assert!(repo.is_pair_supported(&"en-fi".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_stalled_listing_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold connections without ever answering
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let temp_dir = TempDir::new().unwrap();
        let repo = ModelRepository::with_root(
            temp_dir.path(),
            &format!("http://{addr}/bucket"),
            Duration::from_millis(300),
            1,
        )
        .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), repo.discover_remote())
            .await
            .expect("listing request must time out on its own");
        assert!(matches!(result, Err(OpusMtError::Network(_))));
        assert!(repo.remote_status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_discover_remote_failure_keeps_stale_list() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(temp_dir.path());
        set_remote(&repo, &["en-fi/opus-20230101"]);

        let result = repo.discover_remote().await;
        assert!(matches!(result, Err(OpusMtError::Network(_))));

        let status = repo.remote_status();
        assert!(status.refreshed_at.is_none());
        assert!(status.last_error.is_some());
        assert_eq!(status.model_count, 1);
        assert_eq!(repo.remote_models().len(), 1);
    }
}
