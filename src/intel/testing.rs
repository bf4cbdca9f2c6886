//! Test doubles for the engine capability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::{
    AnalysisEngine, EngineError, EngineFactory, Occurrence, SnapshotProvider, SymbolRef,
    SyntaxEngineFactory,
};
use crate::intel::project_config::CompilerOptions;

/// Wraps the syntax engine factory and counts successful constructions.
#[derive(Default)]
pub struct CountingFactory {
    inner: SyntaxEngineFactory,
    created: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingFactory {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for CountingFactory {
    fn create_context(
        &self,
        options: &CompilerOptions,
        root: &Path,
        provider: Arc<dyn SnapshotProvider>,
    ) -> Result<Arc<dyn AnalysisEngine>, EngineError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Language("scripted failure".to_string()));
        }
        let engine = self.inner.create_context(options, root, provider)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(engine)
    }
}

/// Engine that answers from a script instead of parsing anything.
#[derive(Default)]
pub struct ScriptedEngine {
    pub symbol: Option<SymbolRef>,
    /// Returned as-is, in this order.
    pub occurrences: Vec<Occurrence>,
    pub texts: HashMap<PathBuf, Arc<str>>,
    /// When set, symbol resolution fails with this engine fault.
    pub fault: Option<String>,
}

#[async_trait::async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn resolve_symbol_at(
        &self,
        _file: &Path,
        _offset: usize,
    ) -> Result<Option<SymbolRef>, EngineError> {
        match &self.fault {
            Some(message) => Err(EngineError::Task(message.clone())),
            None => Ok(self.symbol.clone()),
        }
    }

    async fn find_all_occurrences(
        &self,
        _symbol: &SymbolRef,
    ) -> Result<Vec<Occurrence>, EngineError> {
        Ok(self.occurrences.clone())
    }

    async fn current_text(&self, file: &Path) -> Result<Arc<str>, EngineError> {
        self.texts
            .get(file)
            .cloned()
            .ok_or_else(|| EngineError::FileNotFound(file.to_path_buf()))
    }
}

/// Hands out one shared [`ScriptedEngine`] for every context.
pub struct ScriptedFactory {
    pub engine: Arc<ScriptedEngine>,
}

impl EngineFactory for ScriptedFactory {
    fn create_context(
        &self,
        _options: &CompilerOptions,
        _root: &Path,
        _provider: Arc<dyn SnapshotProvider>,
    ) -> Result<Arc<dyn AnalysisEngine>, EngineError> {
        Ok(self.engine.clone())
    }
}

pub fn occurrence(file: &Path, offset: usize, length: usize, is_definition: bool) -> Occurrence {
    Occurrence {
        file: file.to_path_buf(),
        offset,
        length,
        is_definition,
        is_write: is_definition,
        is_shorthand: false,
    }
}
