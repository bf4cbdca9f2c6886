//! Analysis engine capability.
//!
//! The code-intelligence core only talks to an engine through these traits:
//! an [`EngineFactory`] builds one [`AnalysisEngine`] per project context, and
//! the engine pulls file text through the [`SnapshotProvider`] it was given.
//! Offsets are UTF-16 code units.

pub mod binding;
pub mod syntax;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::intel::project_config::CompilerOptions;
use crate::intel::snapshot::FileSnapshot;

pub use syntax::SyntaxEngineFactory;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("File not found in project: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported language for {0}")]
    UnsupportedLanguage(PathBuf),

    #[error("Failed to parse {0}")]
    Parse(PathBuf),

    #[error("Language setup failed: {0}")]
    Language(String),

    #[error("Engine task failed: {0}")]
    Task(String),
}

/// What kind of program entity a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
    Class,
    Interface,
    TypeAlias,
    Enum,
    Import,
    Property,
    Global,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variable => "variable",
            Self::Parameter => "parameter",
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::TypeAlias => "type_alias",
            Self::Enum => "enum",
            Self::Import => "import",
            Self::Property => "property",
            Self::Global => "global",
        }
    }
}

/// Where a symbol is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolLocation {
    pub file: PathBuf,
    pub offset: usize,
}

/// A resolved symbol. Two refs denote the same symbol when they are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolRef {
    pub name: String,
    pub kind: SymbolKind,
    /// `None` for names the project never declares (ambient globals) and for
    /// properties, which are matched by name.
    pub declaration: Option<SymbolLocation>,
}

impl SymbolRef {
    /// Whether renaming stays inside code the project owns.
    pub fn is_renameable(&self) -> bool {
        match self.kind {
            SymbolKind::Global | SymbolKind::Import => false,
            SymbolKind::Property => true,
            _ => self.declaration.is_some(),
        }
    }
}

/// One appearance of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Occurrence {
    pub file: PathBuf,
    pub offset: usize,
    /// Span length in UTF-16 code units.
    pub length: usize,
    pub is_definition: bool,
    pub is_write: bool,
    /// Shorthand object key (`{ foo }`); renaming it must keep the key.
    pub is_shorthand: bool,
}

/// Source of file text for an engine.
#[async_trait::async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Current snapshot of `file`, or `None` when the file is not part of the
    /// project.
    async fn snapshot(&self, file: &Path) -> Option<Arc<FileSnapshot>>;

    /// Every file the project knows about.
    async fn file_names(&self) -> Vec<PathBuf>;
}

/// Engine handle for one project context.
#[async_trait::async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn resolve_symbol_at(
        &self,
        file: &Path,
        offset: usize,
    ) -> Result<Option<SymbolRef>, EngineError>;

    async fn find_all_occurrences(&self, symbol: &SymbolRef)
        -> Result<Vec<Occurrence>, EngineError>;

    /// Text the engine currently sees for `file`.
    async fn current_text(&self, file: &Path) -> Result<Arc<str>, EngineError>;
}

/// Builds engine handles for project contexts.
pub trait EngineFactory: Send + Sync {
    fn create_context(
        &self,
        options: &CompilerOptions,
        root: &Path,
        provider: Arc<dyn SnapshotProvider>,
    ) -> Result<Arc<dyn AnalysisEngine>, EngineError>;
}
