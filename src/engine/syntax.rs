//! Tree-sitter backed engine for JavaScript and TypeScript.
//!
//! Each file is parsed on demand and cached per snapshot version. Symbols are
//! canonicalized to their declaration: a named import of a relative module is
//! followed to the exported top-level declaration it names, so every file
//! agrees on one [`SymbolRef`] per entity.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use tree_sitter::{Language, Parser};

use super::binding::{DeclId, FileBindings, IdentRole, ImportBinding, Ident};
use super::{
    AnalysisEngine, EngineError, EngineFactory, Occurrence, SnapshotProvider, SymbolKind,
    SymbolLocation, SymbolRef,
};
use crate::intel::position::OffsetMap;
use crate::intel::project_config::CompilerOptions;

/// Source languages the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedLanguage {
    TypeScript,
    Tsx,
    JavaScript,
}

impl SupportedLanguage {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn is_javascript(&self) -> bool {
        matches!(self, Self::JavaScript)
    }

    pub(crate) fn tree_sitter_language(&self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            // JSX needs the TSX grammar; it also accepts plain JavaScript
            Self::Tsx | Self::JavaScript => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

/// Module specifier extensions tried in order.
const MODULE_EXTENSIONS: &[&str] = &["ts", "tsx", "d.ts", "js", "jsx", "mts", "cts", "mjs", "cjs"];

/// Builds [`SyntaxEngine`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxEngineFactory;

impl EngineFactory for SyntaxEngineFactory {
    fn create_context(
        &self,
        options: &CompilerOptions,
        root: &Path,
        provider: Arc<dyn SnapshotProvider>,
    ) -> Result<Arc<dyn AnalysisEngine>, EngineError> {
        // fail at construction rather than on the first request
        let mut parser = Parser::new();
        for language in [SupportedLanguage::TypeScript, SupportedLanguage::Tsx] {
            parser
                .set_language(&language.tree_sitter_language())
                .map_err(|e| EngineError::Language(e.to_string()))?;
        }

        debug!("Creating syntax engine for {}", root.display());
        Ok(Arc::new(SyntaxEngine::new(root.to_path_buf(), options.clone(), provider)))
    }
}

struct ParsedFile {
    version: u64,
    text: Arc<str>,
    offsets: OffsetMap,
    bindings: FileBindings,
}

impl ParsedFile {
    fn utf16(&self, byte: usize) -> usize {
        self.offsets.to_utf16(byte)
    }

    fn occurrence(&self, file: &Path, ident: &Ident, is_definition: bool) -> Occurrence {
        let start = self.utf16(ident.start);
        Occurrence {
            file: file.to_path_buf(),
            offset: start,
            length: self.utf16(ident.end) - start,
            is_definition,
            is_write: ident.is_write,
            is_shorthand: ident.is_shorthand,
        }
    }

    fn symbol_for(&self, file: &Path, decl: DeclId) -> SymbolRef {
        let decl = &self.bindings.decls[decl];
        SymbolRef {
            name: decl.name.clone(),
            kind: decl.kind,
            declaration: Some(SymbolLocation {
                file: file.to_path_buf(),
                offset: self.utf16(self.bindings.idents[decl.ident].start),
            }),
        }
    }

    fn decl_at(&self, offset: usize) -> Option<DeclId> {
        let byte = self.offsets.to_byte(offset)?;
        self.bindings.decl_starting_at(byte)
    }
}

fn parse_file(
    path: &Path,
    language: SupportedLanguage,
    text: Arc<str>,
    version: u64,
) -> Result<ParsedFile, EngineError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| EngineError::Language(e.to_string()))?;
    let tree = parser
        .parse(text.as_bytes(), None)
        .ok_or_else(|| EngineError::Parse(path.to_path_buf()))?;

    let bindings = FileBindings::collect(tree.root_node(), text.as_bytes());
    Ok(ParsedFile {
        version,
        offsets: OffsetMap::new(&text),
        text,
        bindings,
    })
}

/// Engine for one project context.
pub struct SyntaxEngine {
    root: PathBuf,
    options: CompilerOptions,
    provider: Arc<dyn SnapshotProvider>,
    parsed: RwLock<HashMap<PathBuf, Arc<ParsedFile>>>,
}

impl SyntaxEngine {
    pub fn new(root: PathBuf, options: CompilerOptions, provider: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            root,
            options,
            provider,
            parsed: RwLock::new(HashMap::new()),
        }
    }

    async fn parsed(&self, file: &Path) -> Result<Arc<ParsedFile>, EngineError> {
        let snapshot = self
            .provider
            .snapshot(file)
            .await
            .ok_or_else(|| EngineError::FileNotFound(file.to_path_buf()))?;

        if let Some(cached) = self.parsed.read().await.get(file) {
            if cached.version == snapshot.version && Arc::ptr_eq(&cached.text, &snapshot.text) {
                return Ok(cached.clone());
            }
        }

        let language = SupportedLanguage::from_path(file)
            .ok_or_else(|| EngineError::UnsupportedLanguage(file.to_path_buf()))?;
        let path = file.to_path_buf();
        let text = snapshot.text.clone();
        let version = snapshot.version;
        let parsed = tokio::task::spawn_blocking(move || parse_file(&path, language, text, version))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;

        let parsed = Arc::new(parsed);
        self.parsed
            .write()
            .await
            .insert(file.to_path_buf(), parsed.clone());
        Ok(parsed)
    }

    /// Source files that belong to the project under its compiler options.
    async fn project_files(&self) -> Vec<PathBuf> {
        let allow_js = self.options.allows_js();
        self.provider
            .file_names()
            .await
            .into_iter()
            .filter(|file| match SupportedLanguage::from_path(file) {
                Some(language) => allow_js || !language.is_javascript(),
                None => false,
            })
            .collect()
    }

    /// Declaration a named import refers to, when it lives in the project.
    async fn follow_import(
        &self,
        from: &Path,
        binding: &ImportBinding,
    ) -> Result<Option<(PathBuf, Arc<ParsedFile>, DeclId)>, EngineError> {
        let known: HashSet<PathBuf> = self.project_files().await.into_iter().collect();
        let Some(target) = resolve_module(from, &binding.source, &known) else {
            return Ok(None);
        };
        let parsed = match self.parsed(&target).await {
            Ok(parsed) => parsed,
            Err(EngineError::FileNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(parsed
            .bindings
            .exported_decl(&binding.imported)
            .map(|decl| (target, parsed, decl)))
    }

    async fn canonical(
        &self,
        file: &Path,
        parsed: &ParsedFile,
        decl: DeclId,
    ) -> Result<SymbolRef, EngineError> {
        if let Some(binding) = &parsed.bindings.decls[decl].import {
            if let Some((target_file, target, target_decl)) = self.follow_import(file, binding).await? {
                return Ok(target.symbol_for(&target_file, target_decl));
            }
            let mut symbol = parsed.symbol_for(file, decl);
            symbol.kind = SymbolKind::Import;
            return Ok(symbol);
        }
        Ok(parsed.symbol_for(file, decl))
    }

    /// Parse every project file, skipping the ones that vanished.
    async fn parse_all(&self, files: &[PathBuf]) -> Vec<(PathBuf, Arc<ParsedFile>)> {
        let results = futures::future::join_all(files.iter().map(|file| self.parsed(file))).await;
        files
            .iter()
            .zip(results)
            .filter_map(|(file, result)| match result {
                Ok(parsed) => Some((file.clone(), parsed)),
                Err(e) => {
                    debug!("Skipping {} in {}: {}", file.display(), self.root.display(), e);
                    None
                }
            })
            .collect()
    }

    async fn declared_occurrences(
        &self,
        location: &SymbolLocation,
        out: &mut Vec<Occurrence>,
    ) -> Result<(), EngineError> {
        let home = self.parsed(&location.file).await?;
        let Some(decl) = home.decl_at(location.offset) else {
            return Ok(());
        };

        for ident in &home.bindings.idents {
            if ident.role == IdentRole::Value && ident.binding() == Some(decl) {
                out.push(home.occurrence(&location.file, ident, ident.decl.is_some()));
            }
        }

        // Importers reach the declaration under its own name only. An
        // `export { e as f }` alias keeps its public name, so `f` imports are
        // a different identifier and stay out of the occurrence set.
        let name = home.bindings.decls[decl].name.as_str();
        if !home.bindings.export_names_of(decl).contains(&name) {
            return Ok(());
        }

        let files: Vec<PathBuf> = self
            .project_files()
            .await
            .into_iter()
            .filter(|file| *file != location.file)
            .collect();
        let mut known: HashSet<PathBuf> = files.iter().cloned().collect();
        known.insert(location.file.clone());

        for (file, parsed) in self.parse_all(&files).await {
            for ident in &parsed.bindings.idents {
                let Some(binding) = &ident.import_ref else {
                    continue;
                };
                if binding.imported != name {
                    continue;
                }
                if resolve_module(&file, &binding.source, &known).as_deref() != Some(location.file.as_path()) {
                    continue;
                }
                out.push(parsed.occurrence(&file, ident, false));

                if let Some(local) = ident.decl {
                    for user in parsed.bindings.idents.iter().filter(|u| {
                        u.role == IdentRole::Value && u.decl.is_none() && u.binding() == Some(local)
                    }) {
                        out.push(parsed.occurrence(&file, user, false));
                    }
                }
            }
        }
        Ok(())
    }

    async fn named_occurrences(&self, symbol: &SymbolRef, out: &mut Vec<Occurrence>) {
        let files = self.project_files().await;
        for (file, parsed) in self.parse_all(&files).await {
            for ident in &parsed.bindings.idents {
                if ident.name != symbol.name {
                    continue;
                }
                match symbol.kind {
                    SymbolKind::Property if ident.role == IdentRole::Property => {
                        out.push(parsed.occurrence(&file, ident, ident.is_property_decl));
                    }
                    SymbolKind::Property => {}
                    _ if ident.role == IdentRole::Value
                        && ident.binding().is_none()
                        && ident.import_ref.is_none() =>
                    {
                        out.push(parsed.occurrence(&file, ident, false));
                    }
                    _ => {}
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AnalysisEngine for SyntaxEngine {
    async fn resolve_symbol_at(
        &self,
        file: &Path,
        offset: usize,
    ) -> Result<Option<SymbolRef>, EngineError> {
        let parsed = self.parsed(file).await?;
        let Some(byte) = parsed.offsets.to_byte(offset) else {
            return Ok(None);
        };
        let Some(ident) = parsed.bindings.ident_at(byte) else {
            return Ok(None);
        };

        let symbol = match ident.role {
            IdentRole::Property => SymbolRef {
                name: ident.name.clone(),
                kind: SymbolKind::Property,
                declaration: None,
            },
            IdentRole::Opaque => {
                let Some(binding) = &ident.import_ref else {
                    return Ok(None);
                };
                match self.follow_import(file, binding).await? {
                    Some((target_file, target, decl)) => target.symbol_for(&target_file, decl),
                    None => return Ok(None),
                }
            }
            IdentRole::Value => match ident.binding() {
                Some(decl) => self.canonical(file, &parsed, decl).await?,
                None => SymbolRef {
                    name: ident.name.clone(),
                    kind: SymbolKind::Global,
                    declaration: None,
                },
            },
        };
        Ok(Some(symbol))
    }

    async fn find_all_occurrences(
        &self,
        symbol: &SymbolRef,
    ) -> Result<Vec<Occurrence>, EngineError> {
        let mut out = Vec::new();
        match (&symbol.declaration, symbol.kind) {
            (Some(location), kind) if kind != SymbolKind::Property => {
                self.declared_occurrences(location, &mut out).await?
            }
            _ => self.named_occurrences(symbol, &mut out).await,
        }

        out.sort_by(|a, b| a.file.cmp(&b.file).then(a.offset.cmp(&b.offset)));
        out.dedup_by(|a, b| a.file == b.file && a.offset == b.offset);
        Ok(out)
    }

    async fn current_text(&self, file: &Path) -> Result<Arc<str>, EngineError> {
        self.provider
            .snapshot(file)
            .await
            .map(|snapshot| snapshot.text.clone())
            .ok_or_else(|| EngineError::FileNotFound(file.to_path_buf()))
    }
}

/// File a relative module specifier names, among `known` files.
fn resolve_module(from: &Path, source: &str, known: &HashSet<PathBuf>) -> Option<PathBuf> {
    if !source.starts_with('.') {
        return None;
    }
    let base = normalize_lexically(&from.parent()?.join(source));

    let mut candidates = vec![base.clone()];
    candidates.extend(MODULE_EXTENSIONS.iter().map(|ext| with_suffix(&base, ext)));

    // "./util.js" written in TypeScript sources names "./util.ts"
    if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
        if matches!(ext, "js" | "jsx" | "mjs" | "cjs") {
            let stem = base.with_extension("");
            candidates.extend(["ts", "tsx", "mts", "cts"].iter().map(|ext| with_suffix(&stem, ext)));
        }
    }
    candidates.extend(
        MODULE_EXTENSIONS
            .iter()
            .map(|ext| base.join(format!("index.{ext}"))),
    );

    candidates.into_iter().find(|candidate| known.contains(candidate))
}

fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
