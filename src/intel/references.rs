//! Symbol edit service: find references.
//!
//! Expected failures (bad input, unknown file, position outside the file) are
//! returned as values carrying an `error` message. Only engine faults are
//! propagated as `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::context::{normalize_file, ContextError, ProjectContext, ProjectContextCache};
use super::position::{CodecError, PositionCodec};
use crate::engine::{EngineError, SymbolRef};

/// One place a symbol appears.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ReferenceEntry {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub preview: String,
    pub is_definition: bool,
    pub is_write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferencesReport {
    pub symbol: Option<String>,
    pub count: usize,
    pub references: Vec<ReferenceEntry>,
}

impl ReferencesReport {
    fn empty() -> Self {
        Self {
            symbol: None,
            count: 0,
            references: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FindReferencesResponse {
    Found(ReferencesReport),
    Invalid { error: String },
}

impl FindReferencesResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Internal failure split: `Invalid` becomes an `{ error }` value, `Engine`
/// is propagated.
#[derive(Debug)]
pub(crate) enum RequestError {
    Invalid(String),
    Engine(EngineError),
}

impl From<EngineError> for RequestError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<CodecError> for RequestError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Engine(e) => Self::Engine(e),
            other => Self::Invalid(other.to_string()),
        }
    }
}

impl From<ContextError> for RequestError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Engine { source, .. } => Self::Engine(source),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// A request position resolved against its project.
pub(crate) struct Target {
    pub context: Arc<ProjectContext>,
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// find-references and rename over a shared [`ProjectContextCache`].
pub struct SymbolEditService {
    cache: Arc<ProjectContextCache>,
}

impl SymbolEditService {
    pub fn new(cache: Arc<ProjectContextCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ProjectContextCache> {
        &self.cache
    }

    pub async fn find_references(
        &self,
        file: &Path,
        line: i64,
        column: i64,
        include_definition: bool,
    ) -> Result<FindReferencesResponse, EngineError> {
        match self.collect_references(file, line, column, include_definition).await {
            Ok(report) => Ok(FindReferencesResponse::Found(report)),
            Err(RequestError::Invalid(error)) => {
                debug!("find_references rejected: {}", error);
                Ok(FindReferencesResponse::Invalid { error })
            }
            Err(RequestError::Engine(e)) => Err(e),
        }
    }

    /// Validate the position and open the file's project context.
    pub(crate) async fn open(
        &self,
        file: &Path,
        line: i64,
        column: i64,
    ) -> Result<Target, RequestError> {
        if file.as_os_str().is_empty() {
            return Err(ContextError::EmptyPath.into());
        }
        let (line, column) = match (usize::try_from(line), usize::try_from(column)) {
            (Ok(line), Ok(column)) if line >= 1 && column >= 1 => (line, column),
            _ => {
                return Err(RequestError::Invalid(format!(
                    "Line and column must be integers >= 1 (got {}:{})",
                    line, column
                )))
            }
        };

        let file = normalize_file(file).await?;
        let context = self.cache.get_context(&file).await?;
        Ok(Target {
            context,
            file,
            line,
            column,
        })
    }

    /// Symbol under the target position, if any.
    pub(crate) async fn symbol_at(
        codec: &mut PositionCodec<'_>,
        target: &Target,
    ) -> Result<Option<SymbolRef>, RequestError> {
        let offset = codec
            .offset_of(&target.file, target.line, target.column)
            .await?;
        Ok(target
            .context
            .engine
            .resolve_symbol_at(&target.file, offset)
            .await?)
    }

    async fn collect_references(
        &self,
        file: &Path,
        line: i64,
        column: i64,
        include_definition: bool,
    ) -> Result<ReferencesReport, RequestError> {
        let target = self.open(file, line, column).await?;
        let engine = target.context.engine.as_ref();
        let mut codec = PositionCodec::new(engine);

        let Some(symbol) = Self::symbol_at(&mut codec, &target).await? else {
            return Ok(ReferencesReport::empty());
        };
        let occurrences = engine.find_all_occurrences(&symbol).await?;

        let mut references = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            if occurrence.is_definition && !include_definition {
                continue;
            }
            let position = codec.position_of(&occurrence.file, occurrence.offset).await?;
            let preview = codec.preview(&occurrence.file, position.line).await?;
            references.push(ReferenceEntry {
                file: occurrence.file.display().to_string(),
                line: position.line,
                column: position.column,
                preview,
                is_definition: occurrence.is_definition,
                is_write: occurrence.is_write,
            });
        }

        references.sort();
        references.dedup_by(|a, b| a.file == b.file && a.line == b.line && a.column == b.column);

        Ok(ReferencesReport {
            symbol: Some(symbol.name),
            count: references.len(),
            references,
        })
    }
}
