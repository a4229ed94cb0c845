//! Remote plugin repositories.
//!
//! A repository is a base URL under which plugin manifests live as
//! `<base>/<name>.toml`. GitHub page links are turned into raw-content links
//! when added. The package index, a small JSON file, remembers the
//! repositories and where each installed plugin came from:
//!
//! ```json
//! {
//!   "repos": ["https://raw.githubusercontent.com/user/plugins/master"],
//!   "installed": { "greeter": "https://raw.githubusercontent.com/user/plugins/master/greeter.toml" }
//! }
//! ```
//!
//! The index is always read, modified and written whole. Install and update
//! write the manifest, then load it; if the loader rejects it the file change
//! is undone and the running version (if any) keeps serving.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use haruka_core::RetryExecutor;
use haruka_framework::Loader;

use crate::error::{FetchError, PackageError, PackageResult};

const RAW_HOST: &str = "raw.githubusercontent.com";
const DEFAULT_BRANCH: &str = "master";
const MANIFEST_EXT: &str = "toml";
/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Turns a GitHub page URL into a raw-content base URL.
///
/// `github.com/<user>/<repo>` gets the `master` branch appended;
/// `github.com/<user>/<repo>/blob/<branch>/...` keeps its branch. Raw and
/// non-GitHub URLs only lose trailing slashes.
pub fn normalize_repo_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains(RAW_HOST) || !url.contains("github.com") {
        return url.to_string();
    }
    let raw = url.replacen("github.com", RAW_HOST, 1);
    if raw.contains("/blob/") {
        raw.replacen("/blob/", "/", 1).trim_end_matches('/').to_string()
    } else {
        format!("{raw}/{DEFAULT_BRANCH}")
    }
}

/// `user/repo` part of a repository URL, for listings.
pub fn repo_short_name(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let parts: Vec<&str> = rest.split('/').skip(1).filter(|p| !p.is_empty()).take(2).collect();
    if parts.is_empty() {
        rest.to_string()
    } else {
        parts.join("/")
    }
}

/// Plugin names become file names, so they are kept to a safe alphabet.
pub fn validate_plugin_name(name: &str) -> PackageResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(PackageError::InvalidName(name.to_string()))
    }
}

// =============================================================================
// Index
// =============================================================================

/// Contents of the package index file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    /// Normalized repository base URLs, in the order they were added.
    #[serde(default)]
    pub repos: Vec<String>,
    /// Plugin name → URL it was downloaded from.
    #[serde(default)]
    pub installed: BTreeMap<String, String>,
}

// =============================================================================
// Sources
// =============================================================================

/// Where plugin manifests are downloaded from.
#[async_trait]
pub trait PackageSource: Send + Sync + 'static {
    /// Fetches `url`. `Ok(None)` means the file does not exist there.
    async fn fetch(&self, url: &str) -> Result<Option<String>, FetchError>;
}

/// [`PackageSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> PackageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("haruka/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PackageError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Option<String>, FetchError> {
        let request_err = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let resp = self.client.get(url).send().await.map_err(request_err)?;
        let status = resp.status();
        if status.is_success() {
            return resp.text().await.map(Some).map_err(request_err);
        }
        match status {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
                Err(FetchError::RateLimited { retry_after })
            }
            other => Err(FetchError::Status {
                url: url.to_string(),
                status: other.as_u16(),
            }),
        }
    }
}

// =============================================================================
// RepoManager
// =============================================================================

/// A plugin found in a repository.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub repo: String,
    pub url: String,
    content: String,
}

/// Result of a successful install or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    pub url: String,
    /// Loader summary.
    pub detail: String,
}

/// Manages repositories and repository-installed plugins.
pub struct RepoManager {
    index_path: PathBuf,
    source: Arc<dyn PackageSource>,
    retry: RetryExecutor,
    /// Serializes index and manifest writes.
    lock: Mutex<()>,
}

impl RepoManager {
    pub fn new(
        index_path: impl Into<PathBuf>,
        source: Arc<dyn PackageSource>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            index_path: index_path.into(),
            source,
            retry,
            lock: Mutex::new(()),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Reads the index, creating an empty one if the file is missing.
    pub async fn load_index(&self) -> PackageResult<PackageIndex> {
        match tokio::fs::read_to_string(&self.index_path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| PackageError::Index {
                path: self.index_path.clone(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let index = PackageIndex::default();
                self.save_index(&index).await?;
                debug!(path = %self.index_path.display(), "Created package index");
                Ok(index)
            }
            Err(e) => Err(PackageError::io(&self.index_path, e)),
        }
    }

    async fn save_index(&self, index: &PackageIndex) -> PackageResult<()> {
        if let Some(parent) = self.index_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PackageError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(index).map_err(|e| PackageError::Index {
            path: self.index_path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.index_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| PackageError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.index_path)
            .await
            .map_err(|e| PackageError::io(&self.index_path, e))
    }

    /// Adds a repository. Returns the normalized URL and whether it was new.
    pub async fn add_repo(&self, url: &str) -> PackageResult<(String, bool)> {
        let _guard = self.lock.lock().await;
        let normalized = normalize_repo_url(url);
        let mut index = self.load_index().await?;
        if index.repos.contains(&normalized) {
            return Ok((normalized, false));
        }
        index.repos.push(normalized.clone());
        self.save_index(&index).await?;
        info!(repo = %normalized, "Repository added");
        Ok((normalized, true))
    }

    pub async fn repos(&self) -> PackageResult<Vec<String>> {
        Ok(self.load_index().await?.repos)
    }

    pub async fn installed(&self) -> PackageResult<BTreeMap<String, String>> {
        Ok(self.load_index().await?.installed)
    }

    /// Downloads `url` through the retry executor.
    pub async fn fetch(&self, url: &str) -> PackageResult<Option<String>> {
        Ok(self.retry.execute(|| self.source.fetch(url)).await?)
    }

    /// Looks for `<name>.toml` in every repository whose URL contains
    /// `selector` (case-insensitive), or in all of them.
    ///
    /// Repositories are queried concurrently; results keep the index order.
    /// A repository that fails to answer is skipped.
    pub async fn search(&self, name: &str, selector: Option<&str>) -> PackageResult<Vec<Candidate>> {
        validate_plugin_name(name)?;
        let repos = self.repos().await?;
        if repos.is_empty() {
            return Err(PackageError::NoRepositories);
        }
        let selector = selector.map(str::to_lowercase);

        let lookups = repos
            .into_iter()
            .filter(|repo| {
                selector
                    .as_ref()
                    .is_none_or(|sel| repo.to_lowercase().contains(sel.as_str()))
            })
            .map(|repo| async move {
                let url = format!("{repo}/{name}.{MANIFEST_EXT}");
                match self.fetch(&url).await {
                    Ok(Some(content)) => Some(Candidate { repo, url, content }),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(repo = %repo, error = %e, "Repository lookup failed");
                        None
                    }
                }
            });
        Ok(join_all(lookups).await.into_iter().flatten().collect())
    }

    /// Installs `name` from the connected repositories.
    ///
    /// Several matches without a selector are reported as
    /// [`PackageError::Ambiguous`].
    pub async fn install(
        &self,
        loader: &Loader,
        name: &str,
        selector: Option<&str>,
    ) -> PackageResult<InstallReport> {
        let mut candidates = self.search(name, selector).await?;
        if candidates.is_empty() {
            return Err(PackageError::NotFound(name.to_string()));
        }
        if candidates.len() > 1 && selector.is_none() {
            return Err(PackageError::Ambiguous {
                name: name.to_string(),
                candidates: candidates.iter().map(|c| repo_short_name(&c.repo)).collect(),
            });
        }
        let chosen = candidates.swap_remove(0);

        let _guard = self.lock.lock().await;
        let detail = self.write_and_load(loader, name, &chosen.content).await?;
        let mut index = self.load_index().await?;
        index.installed.insert(name.to_string(), chosen.url.clone());
        self.save_index(&index).await?;

        info!(plugin = name, url = %chosen.url, "Plugin installed");
        Ok(InstallReport {
            name: name.to_string(),
            url: chosen.url,
            detail,
        })
    }

    /// Re-downloads a repository-installed plugin and reloads it.
    pub async fn update(&self, loader: &Loader, name: &str) -> PackageResult<InstallReport> {
        validate_plugin_name(name)?;
        let _guard = self.lock.lock().await;
        self.update_locked(loader, name).await
    }

    /// Updates every repository-installed plugin, one at a time.
    pub async fn update_all(
        &self,
        loader: &Loader,
    ) -> PackageResult<Vec<(String, PackageResult<InstallReport>)>> {
        let _guard = self.lock.lock().await;
        let installed = self.load_index().await?.installed;
        let mut results = Vec::with_capacity(installed.len());
        for name in installed.keys() {
            let result = self.update_locked(loader, name).await;
            results.push((name.clone(), result));
        }
        Ok(results)
    }

    async fn update_locked(&self, loader: &Loader, name: &str) -> PackageResult<InstallReport> {
        let url = self
            .load_index()
            .await?
            .installed
            .get(name)
            .cloned()
            .ok_or_else(|| PackageError::NotTracked(name.to_string()))?;
        let content = self
            .fetch(&url)
            .await?
            .ok_or_else(|| PackageError::NotFound(name.to_string()))?;
        let detail = self.write_and_load(loader, name, &content).await?;
        info!(plugin = name, "Plugin updated");
        Ok(InstallReport {
            name: name.to_string(),
            url,
            detail,
        })
    }

    /// Unloads `plugins.<name>`, deletes its manifest and forgets its
    /// origin. Returns `false` if there was nothing to remove.
    pub async fn remove(&self, loader: &Loader, name: &str) -> PackageResult<bool> {
        validate_plugin_name(name)?;
        let _guard = self.lock.lock().await;

        let module_id = format!("plugins.{name}");
        let unloaded = loader.unload(&module_id).await.map_err(|e| PackageError::Load {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let path = loader.manifest_path(name);
        let deleted = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(PackageError::io(&path, e)),
        };

        let mut index = self.load_index().await?;
        let forgotten = index.installed.remove(name).is_some();
        if forgotten {
            self.save_index(&index).await?;
        }

        if unloaded || deleted {
            info!(plugin = name, "Plugin removed");
        }
        Ok(unloaded || deleted)
    }

    /// Writes the manifest and loads it, undoing the write on failure.
    async fn write_and_load(&self, loader: &Loader, name: &str, content: &str) -> PackageResult<String> {
        let path = loader.manifest_path(name);
        let previous = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(PackageError::io(&path, e)),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PackageError::io(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PackageError::io(&path, e))?;

        let report = loader.load(name).await;
        if report.success {
            return Ok(report.detail);
        }

        let restored = match &previous {
            Some(old) => tokio::fs::write(&path, old).await,
            None => tokio::fs::remove_file(&path).await,
        };
        if let Err(e) = restored {
            warn!(path = %path.display(), error = %e, "Failed to roll back plugin file");
        }
        Err(PackageError::Load {
            name: name.to_string(),
            reason: report.detail,
        })
    }
}

impl std::fmt::Debug for RepoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoManager")
            .field("index_path", &self.index_path)
            .field("retry", self.retry.policy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use haruka_framework::{ListenerRegistry, ModuleCatalog, Registry};
    use parking_lot::Mutex as SyncMutex;

    use super::*;

    /// Serves fixed bodies; the first `limited` calls answer 429.
    #[derive(Default)]
    struct MapSource {
        files: SyncMutex<HashMap<String, String>>,
        limited: SyncMutex<u32>,
    }

    impl MapSource {
        fn with(files: &[(&str, &str)]) -> Arc<Self> {
            let source = Self::default();
            for (url, body) in files {
                source.files.lock().insert(url.to_string(), body.to_string());
            }
            Arc::new(source)
        }
    }

    #[async_trait]
    impl PackageSource for MapSource {
        async fn fetch(&self, url: &str) -> Result<Option<String>, FetchError> {
            {
                let mut limited = self.limited.lock();
                if *limited > 0 {
                    *limited -= 1;
                    return Err(FetchError::RateLimited {
                        retry_after: Duration::from_secs(1),
                    });
                }
            }
            Ok(self.files.lock().get(url).cloned())
        }
    }

    const REPO_A: &str = "https://raw.githubusercontent.com/alice/plugins/master";
    const REPO_B: &str = "https://raw.githubusercontent.com/bob/extras/master";
    const ECHO_MANIFEST: &str = "kind = \"echo\"\n";

    struct Fixture {
        dir: tempfile::TempDir,
        loader: Loader,
        manager: RepoManager,
    }

    fn fixture(source: Arc<MapSource>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(ModuleCatalog::new());
        crate::builtin::register_all(&catalog);
        let loader = Loader::new(
            Arc::new(Registry::default()),
            Arc::new(ListenerRegistry::new()),
            catalog,
            dir.path().join("plugins"),
        );
        let manager = RepoManager::new(
            dir.path().join("configs/repos.json"),
            source,
            RetryExecutor::default(),
        );
        Fixture { dir, loader, manager }
    }

    #[test]
    fn test_normalize_repo_url() {
        assert_eq!(
            normalize_repo_url("https://github.com/alice/plugins"),
            "https://raw.githubusercontent.com/alice/plugins/master"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/alice/plugins/"),
            "https://raw.githubusercontent.com/alice/plugins/master"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/alice/plugins/blob/dev/mods"),
            "https://raw.githubusercontent.com/alice/plugins/dev/mods"
        );
        assert_eq!(normalize_repo_url(&format!("{REPO_A}/")), REPO_A);
        assert_eq!(
            normalize_repo_url("https://example.org/haruka/"),
            "https://example.org/haruka"
        );
    }

    #[test]
    fn test_repo_short_name_and_names() {
        assert_eq!(repo_short_name(REPO_A), "alice/plugins");
        assert!(validate_plugin_name("cute_v2-beta").is_ok());
        assert!(validate_plugin_name("../etc").is_err());
        assert!(validate_plugin_name("").is_err());
    }

    #[tokio::test]
    async fn test_index_created_and_repos_deduplicated() {
        let f = fixture(MapSource::with(&[]));
        assert_eq!(f.manager.load_index().await.unwrap(), PackageIndex::default());
        assert!(f.manager.index_path().exists());

        let (url, added) = f.manager.add_repo("https://github.com/alice/plugins").await.unwrap();
        assert_eq!(url, REPO_A);
        assert!(added);
        let (_, added) = f.manager.add_repo(REPO_A).await.unwrap();
        assert!(!added);
        assert_eq!(f.manager.repos().await.unwrap(), vec![REPO_A.to_string()]);
    }

    #[tokio::test]
    async fn test_install_loads_and_records() {
        let url = format!("{REPO_A}/greeter.toml");
        let f = fixture(MapSource::with(&[(&url, ECHO_MANIFEST)]));
        f.manager.add_repo(REPO_A).await.unwrap();

        let report = f.manager.install(&f.loader, "greeter", None).await.unwrap();
        assert_eq!(report.url, url);
        assert!(f.loader.registry().snapshot().module("plugins.greeter").is_some());
        assert_eq!(f.manager.installed().await.unwrap().get("greeter"), Some(&url));
        assert!(f.dir.path().join("plugins/greeter.toml").exists());
    }

    #[tokio::test]
    async fn test_install_requires_selector_when_ambiguous() {
        let f = fixture(MapSource::with(&[
            (&format!("{REPO_A}/greeter.toml"), ECHO_MANIFEST),
            (&format!("{REPO_B}/greeter.toml"), ECHO_MANIFEST),
        ]));
        f.manager.add_repo(REPO_A).await.unwrap();
        f.manager.add_repo(REPO_B).await.unwrap();

        let err = f.manager.install(&f.loader, "greeter", None).await.unwrap_err();
        match err {
            PackageError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates, vec!["alice/plugins", "bob/extras"]);
            }
            other => panic!("unexpected: {other}"),
        }

        let report = f
            .manager
            .install(&f.loader, "greeter", Some("Bob/Extras"))
            .await
            .unwrap();
        assert!(report.url.starts_with(REPO_B));
    }

    #[tokio::test]
    async fn test_failed_install_removes_file() {
        let f = fixture(MapSource::with(&[(
            &format!("{REPO_A}/broken.toml"),
            "kind = \"no-such-kind\"\n",
        )]));
        f.manager.add_repo(REPO_A).await.unwrap();

        let err = f.manager.install(&f.loader, "broken", None).await.unwrap_err();
        assert!(matches!(err, PackageError::Load { .. }));
        assert!(!f.dir.path().join("plugins/broken.toml").exists());
        assert!(f.manager.installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_restores_previous_file() {
        let url = format!("{REPO_A}/greeter.toml");
        let source = MapSource::with(&[(&url, ECHO_MANIFEST)]);
        let f = fixture(Arc::clone(&source));
        f.manager.add_repo(REPO_A).await.unwrap();
        f.manager.install(&f.loader, "greeter", None).await.unwrap();
        let version = f
            .loader
            .registry()
            .snapshot()
            .module("plugins.greeter")
            .unwrap()
            .instance
            .version();

        source.files.lock().insert(url, "this is = not toml [".into());
        let err = f.manager.update(&f.loader, "greeter").await.unwrap_err();
        assert!(matches!(err, PackageError::Load { .. }));

        let on_disk = std::fs::read_to_string(f.dir.path().join("plugins/greeter.toml")).unwrap();
        assert_eq!(on_disk, ECHO_MANIFEST);
        let still = f.loader.registry().snapshot();
        assert_eq!(still.module("plugins.greeter").unwrap().instance.version(), version);
    }

    #[tokio::test]
    async fn test_update_untracked_plugin() {
        let f = fixture(MapSource::with(&[]));
        let err = f.manager.update(&f.loader, "manual").await.unwrap_err();
        assert!(matches!(err, PackageError::NotTracked(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_absorbs_rate_limit() {
        let source = MapSource::with(&[("https://x/a.toml", "kind = \"echo\"")]);
        *source.limited.lock() = 2;
        let f = fixture(Arc::clone(&source));

        let start = tokio::time::Instant::now();
        let body = f.manager.fetch("https://x/a.toml").await.unwrap();
        assert_eq!(body.as_deref(), Some("kind = \"echo\""));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_remove_unloads_and_forgets() {
        let url = format!("{REPO_A}/greeter.toml");
        let f = fixture(MapSource::with(&[(&url, ECHO_MANIFEST)]));
        f.manager.add_repo(REPO_A).await.unwrap();
        f.manager.install(&f.loader, "greeter", None).await.unwrap();

        assert!(f.manager.remove(&f.loader, "greeter").await.unwrap());
        assert!(f.loader.registry().snapshot().module("plugins.greeter").is_none());
        assert!(!f.dir.path().join("plugins/greeter.toml").exists());
        assert!(f.manager.installed().await.unwrap().is_empty());

        assert!(!f.manager.remove(&f.loader, "greeter").await.unwrap());
    }
}
