//! Per-project file snapshots.
//!
//! A [`SnapshotStore`] belongs to one project context and doubles as the
//! [`SnapshotProvider`] its engine pulls text from. Refreshes are serialized
//! through a store-wide gate, so concurrent requests on the same root never
//! interleave a read-compare-update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

use crate::engine::syntax::SupportedLanguage;
use crate::engine::SnapshotProvider;

/// Captured text of one file as the engine sees it.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub text: Arc<str>,
    /// Starts at 1 and increases on every observed content change.
    pub version: u64,
    pub modified: Option<SystemTime>,
}

pub struct SnapshotStore {
    root: PathBuf,
    max_files: usize,
    entries: RwLock<HashMap<PathBuf, Arc<FileSnapshot>>>,
    refresh_gate: Mutex<()>,
    discovered: OnceCell<Vec<PathBuf>>,
}

impl SnapshotStore {
    pub fn new(root: PathBuf, max_files: usize) -> Self {
        Self {
            root,
            max_files,
            entries: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(()),
            discovered: OnceCell::new(),
        }
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<FileSnapshot>> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn tracked_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Re-read `path` from disk and record it. The version only moves when the
    /// text differs from the stored snapshot.
    pub async fn refresh(&self, path: &Path) -> std::io::Result<Arc<FileSnapshot>> {
        let _gate = self.refresh_gate.lock().await;

        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        let text = tokio::fs::read_to_string(path).await?;

        let mut entries = self.entries.write().await;
        let next = match entries.get(path) {
            Some(current) if *current.text == *text => {
                if current.modified == modified {
                    return Ok(current.clone());
                }
                Arc::new(FileSnapshot {
                    modified,
                    ..(**current).clone()
                })
            }
            Some(current) => {
                debug!(
                    "Snapshot changed: {} (v{} -> v{})",
                    path.display(),
                    current.version,
                    current.version + 1
                );
                Arc::new(FileSnapshot {
                    path: path.to_path_buf(),
                    text: Arc::from(text),
                    version: current.version + 1,
                    modified,
                })
            }
            None => Arc::new(FileSnapshot {
                path: path.to_path_buf(),
                text: Arc::from(text),
                version: 1,
                modified,
            }),
        };

        entries.insert(path.to_path_buf(), next.clone());
        Ok(next)
    }

    async fn discovered(&self) -> &[PathBuf] {
        self.discovered
            .get_or_init(|| async {
                let root = self.root.clone();
                let max_files = self.max_files;
                match tokio::task::spawn_blocking(move || discover_files(&root, max_files)).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!("Project file discovery failed for {}: {}", self.root.display(), e);
                        Vec::new()
                    }
                }
            })
            .await
    }

    async fn is_stale(&self, snapshot: &FileSnapshot) -> bool {
        match tokio::fs::metadata(&snapshot.path).await {
            Ok(meta) => meta.modified().ok() != snapshot.modified,
            Err(_) => false,
        }
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for SnapshotStore {
    async fn snapshot(&self, file: &Path) -> Option<Arc<FileSnapshot>> {
        if let Some(current) = self.get(file).await {
            if !self.is_stale(&current).await {
                return Some(current);
            }
            return match self.refresh(file).await {
                Ok(fresh) => Some(fresh),
                Err(e) => {
                    debug!("Keeping last snapshot of {}: {}", file.display(), e);
                    Some(current)
                }
            };
        }

        if self.discovered().await.binary_search_by(|p| p.as_path().cmp(file)).is_err() {
            return None;
        }

        match self.refresh(file).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Failed to load {}: {}", file.display(), e);
                None
            }
        }
    }

    async fn file_names(&self) -> Vec<PathBuf> {
        let mut names = self.discovered().await.to_vec();
        names.extend(self.entries.read().await.keys().cloned());
        names.sort();
        names.dedup();
        names
    }
}

/// Gitignore-aware walk of `root` for source files, sorted.
fn discover_files(root: &Path, max_files: usize) -> Vec<PathBuf> {
    let walker = ignore::WalkBuilder::new(root)
        .require_git(false)
        .filter_entry(|entry| {
            !matches!(
                entry.file_name().to_str(),
                Some("node_modules") | Some(".git")
            )
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping entry during discovery: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if SupportedLanguage::from_path(entry.path()).is_none() {
            continue;
        }
        if files.len() >= max_files {
            warn!(
                "Project {} has more than {} source files; the rest are loaded on demand only",
                root.display(),
                max_files
            );
            break;
        }
        files.push(entry.into_path());
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical_root(dir: &TempDir) -> PathBuf {
        dir.path().canonicalize().unwrap()
    }

    #[tokio::test]
    async fn test_refresh_bumps_version_only_on_change() {
        let dir = TempDir::new().unwrap();
        let root = canonical_root(&dir);
        let file = root.join("a.ts");
        std::fs::write(&file, "const x = 1;").unwrap();

        let store = SnapshotStore::new(root, 100);
        let first = store.refresh(&file).await.unwrap();
        assert_eq!(first.version, 1);

        let same = store.refresh(&file).await.unwrap();
        assert_eq!(same.version, 1);

        std::fs::write(&file, "const y = 2;").unwrap();
        let changed = store.refresh(&file).await.unwrap();
        assert_eq!(changed.version, 2);
        assert_eq!(&*changed.text, "const y = 2;");
        assert_eq!(store.tracked_count().await, 1);
    }

    #[tokio::test]
    async fn test_provider_serves_discovered_files_only() {
        let dir = TempDir::new().unwrap();
        let root = canonical_root(&dir);
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("src/a.ts"), "export const a = 1;").unwrap();
        std::fs::write(root.join("src/b.js"), "var b = 2;").unwrap();
        std::fs::write(root.join("README.md"), "# readme").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "module.exports = 1;").unwrap();

        let store = SnapshotStore::new(root.clone(), 100);
        let names = store.file_names().await;
        assert_eq!(names, vec![root.join("src/a.ts"), root.join("src/b.js")]);

        let a = store.snapshot(&root.join("src/a.ts")).await.unwrap();
        assert_eq!(&*a.text, "export const a = 1;");
        assert!(store.snapshot(&root.join("README.md")).await.is_none());
        assert!(store
            .snapshot(&root.join("node_modules/pkg/index.js"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_discovery_respects_file_cap() {
        let dir = TempDir::new().unwrap();
        let root = canonical_root(&dir);
        for i in 0..5 {
            std::fs::write(root.join(format!("f{i}.ts")), "let v = 1;").unwrap();
        }
        let store = SnapshotStore::new(root, 3);
        assert_eq!(store.file_names().await.len(), 3);
    }
}
