//! Server state. Holds the shared symbol service and process-wide counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::LensConfig;
use crate::daemon::handlers::common::ToolContext;
use crate::intel::{ProjectContextCache, SymbolEditService};

/// State shared by every request for the lifetime of the server process.
pub struct ServerState {
    /// Base for relative `file` arguments.
    pub project_dir: PathBuf,
    pub symbols: Arc<SymbolEditService>,
    pub started_at: Instant,
    pub shutdown_token: CancellationToken,
    /// Bounds in-flight requests.
    pub request_semaphore: Arc<Semaphore>,
    pub metrics: Arc<ServerMetrics>,
}

impl ServerState {
    pub fn new(project_dir: PathBuf, config: &LensConfig) -> Self {
        let cache = Arc::new(ProjectContextCache::with_syntax_engine(&config.intel));
        let symbols = Arc::new(SymbolEditService::new(cache));
        Self::with_service(project_dir, config, symbols)
    }

    pub fn with_service(
        project_dir: PathBuf,
        config: &LensConfig,
        symbols: Arc<SymbolEditService>,
    ) -> Self {
        let permits = config.server.max_concurrent_requests.max(1);
        Self {
            project_dir,
            symbols,
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            request_semaphore: Arc::new(Semaphore::new(permits)),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            root_path: Arc::new(self.project_dir.clone()),
            symbols: self.symbols.clone(),
        }
    }

    pub async fn status(&self) -> Value {
        let cache = self.symbols.cache();
        let stats = cache.stats().await;
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "project_dir": self.project_dir.display().to_string(),
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "contexts": cache.len().await,
            "context_cache": {
                "entries": stats.entries,
                "hits": stats.hits,
                "misses": stats.misses,
                "evictions": stats.evictions,
                "hit_rate": stats.hit_rate(),
            },
            "metrics": self.metrics.snapshot(),
        })
    }
}

/// Lock-free request counters.
pub struct ServerMetrics {
    pub tool_calls: AtomicUsize,
    /// Calls answered with `isError: true`
    pub tool_errors: AtomicUsize,
    /// Cumulative tool latency in microseconds (divide by tool_calls for avg)
    pub tool_latency_us: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            tool_calls: AtomicUsize::new(0),
            tool_errors: AtomicUsize::new(0),
            tool_latency_us: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn record_call(&self, latency_us: usize, is_error: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        self.tool_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        if is_error {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Value {
        let calls = self.tool_calls.load(Ordering::Relaxed);
        let latency_total = self.tool_latency_us.load(Ordering::Relaxed);
        let avg_latency_us = if calls > 0 { latency_total / calls } else { 0 };

        json!({
            "tool_calls": calls,
            "tool_errors": self.tool_errors.load(Ordering::Relaxed),
            "avg_tool_latency_us": avg_latency_us,
            "cleanups": self.cleanups.load(Ordering::Relaxed),
        })
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
