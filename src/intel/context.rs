//! Project context cache.
//!
//! One [`ProjectContext`] per normalized project root. Contexts are built
//! lazily and at most once per root: the cache map only hands out a per-root
//! slot, and construction happens inside that slot's `OnceCell`, so requests
//! for different roots never wait on each other.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::project_config::{CompilerOptions, ProjectConfigResolver, ResolvedConfig};
use super::snapshot::{FileSnapshot, SnapshotStore};
use crate::cache::{CacheStats, LruCache};
use crate::config::IntelConfig;
use crate::engine::{AnalysisEngine, EngineError, EngineFactory, SyntaxEngineFactory};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("File path is empty")]
    EmptyPath,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create analysis context for {root}: {source}")]
    Engine {
        root: PathBuf,
        #[source]
        source: EngineError,
    },
}

/// Analysis state for one project root.
pub struct ProjectContext {
    /// Unique per process; a rebuilt context never reuses an id.
    pub id: u64,
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub options: CompilerOptions,
    pub engine: Arc<dyn AnalysisEngine>,
    pub snapshots: Arc<SnapshotStore>,
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectContext")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<OnceCell<Arc<ProjectContext>>>;

pub struct ProjectContextCache {
    resolver: ProjectConfigResolver,
    factory: Arc<dyn EngineFactory>,
    slots: Mutex<LruCache<String, Slot>>,
    max_project_files: usize,
    next_id: AtomicU64,
}

impl ProjectContextCache {
    pub fn new(factory: Arc<dyn EngineFactory>, config: &IntelConfig) -> Self {
        Self {
            resolver: ProjectConfigResolver::new(),
            factory,
            slots: Mutex::new(LruCache::new(config.max_contexts)),
            max_project_files: config.max_project_files,
            next_id: AtomicU64::new(1),
        }
    }

    /// Cache backed by the tree-sitter engine.
    pub fn with_syntax_engine(config: &IntelConfig) -> Self {
        Self::new(Arc::new(SyntaxEngineFactory), config)
    }

    /// Context for the project that owns `file`, with the file's snapshot
    /// refreshed from disk.
    pub async fn get_context(&self, file: &Path) -> Result<Arc<ProjectContext>, ContextError> {
        let file = normalize_file(file).await?;
        let resolved = self.resolve_config(&file).await?;
        let root = project_root(&file, &resolved);
        let key = root_key(&root);

        let slot = self.slot(&key).await;
        let context = slot
            .get_or_try_init(|| self.create_context(root, resolved))
            .await?
            .clone();

        self.refresh(&context, &file).await?;
        Ok(context)
    }

    /// Drop every context. The next request builds fresh ones.
    pub async fn cleanup(&self) {
        let dropped = self.slots.lock().await.clear();
        let live = dropped.iter().filter(|slot| slot.initialized()).count();
        info!("Dropped {} project context(s)", live);
    }

    /// Number of cached roots, including ones still under construction.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn stats(&self) -> CacheStats {
        self.slots.lock().await.stats()
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        let key = key.to_string();
        if let Some(slot) = slots.get(&key) {
            return slot;
        }

        let slot: Slot = Arc::new(OnceCell::new());
        for evicted in slots.put(key, slot.clone()) {
            if let Some(context) = evicted.get() {
                info!(
                    "Evicted project context #{} ({})",
                    context.id,
                    context.root.display()
                );
            }
        }
        slot
    }

    /// Config lookup walks and reads the file system, so it runs on the
    /// blocking pool.
    async fn resolve_config(&self, file: &Path) -> Result<ResolvedConfig, ContextError> {
        let resolver = self.resolver.clone();
        let lookup = file.to_path_buf();
        tokio::task::spawn_blocking(move || resolver.resolve(&lookup))
            .await
            .map_err(|e| ContextError::Engine {
                root: file.to_path_buf(),
                source: EngineError::Task(format!("config resolution failed: {}", e)),
            })
    }

    async fn create_context(
        &self,
        root: PathBuf,
        resolved: ResolvedConfig,
    ) -> Result<Arc<ProjectContext>, ContextError> {
        let snapshots = Arc::new(SnapshotStore::new(root.clone(), self.max_project_files));
        let engine = self
            .factory
            .create_context(&resolved.options, &root, snapshots.clone())
            .map_err(|source| ContextError::Engine {
                root: root.clone(),
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "Created project context #{} for {} (config: {})",
            id,
            root.display(),
            resolved
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        );

        Ok(Arc::new(ProjectContext {
            id,
            root,
            config_path: resolved.config_path,
            options: resolved.options,
            engine,
            snapshots,
        }))
    }

    async fn refresh(
        &self,
        context: &ProjectContext,
        file: &Path,
    ) -> Result<Arc<FileSnapshot>, ContextError> {
        let snapshot = context
            .snapshots
            .refresh(file)
            .await
            .map_err(|source| ContextError::Io {
                path: file.to_path_buf(),
                source,
            })?;
        debug!(
            "Context #{}: {} at v{}",
            context.id,
            file.display(),
            snapshot.version
        );
        Ok(snapshot)
    }
}

/// Canonical absolute path of an existing file.
pub async fn normalize_file(file: &Path) -> Result<PathBuf, ContextError> {
    if file.as_os_str().is_empty() {
        return Err(ContextError::EmptyPath);
    }
    let canonical = match tokio::fs::canonicalize(file).await {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ContextError::FileNotFound(file.to_path_buf()))
        }
        Err(source) => {
            return Err(ContextError::Io {
                path: file.to_path_buf(),
                source,
            })
        }
    };
    match tokio::fs::metadata(&canonical).await {
        Ok(meta) if meta.is_file() => Ok(canonical),
        _ => Err(ContextError::FileNotFound(file.to_path_buf())),
    }
}

fn project_root(file: &Path, resolved: &ResolvedConfig) -> PathBuf {
    resolved
        .config_path
        .as_deref()
        .and_then(Path::parent)
        .or_else(|| file.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.to_path_buf())
}

/// Cache key for a root: `/` separators, case-folded where the file system
/// is case-insensitive.
fn root_key(root: &Path) -> String {
    let key = root.to_string_lossy().replace('\\', "/");
    if cfg!(any(windows, target_os = "macos")) {
        key.to_lowercase()
    } else {
        key
    }
}
