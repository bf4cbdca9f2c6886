//! Symbol edit service: rename planning.
//!
//! Computes the edit set for renaming a symbol. Nothing is written to disk
//! and no snapshot is touched.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::position::PositionCodec;
use super::references::{RequestError, SymbolEditService};
use crate::engine::EngineError;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// ES reserved words, strict-mode reserved words, and `await`.
const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw",
    "true", "try", "typeof", "var", "void", "while", "with", "yield", "implements", "interface",
    "let", "package", "private", "protected", "public", "static", "await",
];

/// Replace `old_text` between two positions with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EditOperation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamePlan {
    pub can_rename: bool,
    pub edits: Vec<EditOperation>,
    pub files_affected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RenameResponse {
    Planned(RenamePlan),
    Rejected { can_rename: bool, reason: String },
    Invalid { error: String },
}

impl RenameResponse {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            can_rename: false,
            reason: reason.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Check `name` against identifier grammar and the reserved words.
pub fn validate_new_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("New name must not be empty".to_string());
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(format!("'{}' is not a valid identifier", name));
    }
    if RESERVED_WORDS.contains(&name) {
        return Err(format!("'{}' is a reserved word", name));
    }
    Ok(())
}

impl SymbolEditService {
    pub async fn rename_symbol(
        &self,
        file: &Path,
        line: i64,
        column: i64,
        new_name: &str,
    ) -> Result<RenameResponse, EngineError> {
        if let Err(error) = validate_new_name(new_name) {
            return Ok(RenameResponse::Invalid { error });
        }

        match self.plan_rename(file, line, column, new_name).await {
            Ok(response) => Ok(response),
            Err(RequestError::Invalid(error)) => {
                debug!("rename_symbol rejected: {}", error);
                Ok(RenameResponse::Invalid { error })
            }
            Err(RequestError::Engine(e)) => Err(e),
        }
    }

    async fn plan_rename(
        &self,
        file: &Path,
        line: i64,
        column: i64,
        new_name: &str,
    ) -> Result<RenameResponse, RequestError> {
        let target = self.open(file, line, column).await?;
        let engine = target.context.engine.as_ref();
        let mut codec = PositionCodec::new(engine);

        let Some(symbol) = Self::symbol_at(&mut codec, &target).await? else {
            return Ok(RenameResponse::rejected(format!(
                "No symbol at {}:{}",
                target.line, target.column
            )));
        };
        if !symbol.is_renameable() {
            return Ok(RenameResponse::rejected(format!(
                "'{}' ({}) is not declared in this project and cannot be renamed",
                symbol.name,
                symbol.kind.as_str()
            )));
        }

        let occurrences = engine.find_all_occurrences(&symbol).await?;
        let mut edits = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            let end = occurrence.offset + occurrence.length;
            let old_text = codec
                .text_between(&occurrence.file, occurrence.offset, end)
                .await?;
            if old_text != symbol.name {
                warn!(
                    "Skipping occurrence '{}' of '{}' at {}:{}",
                    old_text,
                    symbol.name,
                    occurrence.file.display(),
                    occurrence.offset
                );
                continue;
            }
            // `{ foo }` becomes `{ foo: bar }` so the object key survives
            let new_text = if occurrence.is_shorthand {
                format!("{}: {}", old_text, new_name)
            } else {
                new_name.to_string()
            };
            let start_pos = codec.position_of(&occurrence.file, occurrence.offset).await?;
            let end_pos = codec.position_of(&occurrence.file, end).await?;
            edits.push(EditOperation {
                file: occurrence.file.display().to_string(),
                line: start_pos.line,
                column: start_pos.column,
                end_line: end_pos.line,
                end_column: end_pos.column,
                old_text,
                new_text,
            });
        }

        edits.sort();
        edits.dedup_by(|a, b| a.file == b.file && a.line == b.line && a.column == b.column);

        let mut files_affected: Vec<String> = edits.iter().map(|e| e.file.clone()).collect();
        files_affected.dedup();

        debug!(
            "Rename '{}' -> '{}': {} edit(s) in {} file(s)",
            symbol.name,
            new_name,
            edits.len(),
            files_affected.len()
        );

        Ok(RenameResponse::Planned(RenamePlan {
            can_rename: true,
            edits,
            files_affected,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntelConfig;
    use crate::intel::context::ProjectContextCache;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    const EXAMPLE: &str = "const foo = 1;\nconst bar = foo;\nconsole.log(foo);";

    fn service() -> SymbolEditService {
        SymbolEditService::new(Arc::new(ProjectContextCache::with_syntax_engine(
            &IntelConfig::default(),
        )))
    }

    fn fixture(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for (name, text) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }
        (dir, root)
    }

    fn plan(response: RenameResponse) -> RenamePlan {
        match response {
            RenameResponse::Planned(plan) => plan,
            other => panic!("expected a rename plan, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_new_name() {
        assert!(validate_new_name("baz").is_ok());
        assert!(validate_new_name("_private$").is_ok());
        assert!(validate_new_name("$").is_ok());
        assert!(validate_new_name("").is_err());
        assert!(validate_new_name("123abc").is_err());
        assert!(validate_new_name("my variable").is_err());
        assert!(validate_new_name("café").is_err());
        for word in ["class", "await", "let", "yield", "interface"] {
            assert!(validate_new_name(word).is_err(), "{word}");
        }
    }

    #[tokio::test]
    async fn test_rename_local_variable() {
        let (_dir, root) = fixture(&[("a.ts", EXAMPLE)]);
        let file = root.join("a.ts");

        let plan = plan(service().rename_symbol(&file, 1, 7, "baz").await.unwrap());
        assert!(plan.can_rename);
        assert_eq!(plan.edits.len(), 3);
        assert!(plan.edits.iter().all(|e| e.old_text == "foo" && e.new_text == "baz"));
        assert_eq!(plan.files_affected, vec![file.display().to_string()]);

        let first = &plan.edits[0];
        assert_eq!((first.line, first.column), (1, 7));
        assert_eq!((first.end_line, first.end_column), (1, 10));
    }

    #[tokio::test]
    async fn test_rename_does_not_touch_disk() {
        let (_dir, root) = fixture(&[("a.ts", EXAMPLE)]);
        let file = root.join("a.ts");
        let service = service();

        service.rename_symbol(&file, 1, 7, "baz").await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), EXAMPLE);

        let context = service.cache().get_context(&file).await.unwrap();
        assert_eq!(context.snapshots.get(&file).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_invalid_names_yield_error_without_edits() {
        let (_dir, root) = fixture(&[("a.ts", EXAMPLE)]);
        let file = root.join("a.ts");
        let service = service();

        for name in ["class", "123abc", "my variable", ""] {
            let response = service.rename_symbol(&file, 1, 7, name).await.unwrap();
            assert!(response.is_error(), "{name:?}");
            let value = serde_json::to_value(&response).unwrap();
            assert!(value["error"].is_string());
            assert!(value.get("edits").is_none());
        }
    }

    #[tokio::test]
    async fn test_name_is_validated_before_the_file() {
        let service = service();
        let response = service
            .rename_symbol(Path::new("/definitely/not/here.ts"), 1, 1, "class")
            .await
            .unwrap();
        match response {
            RenameResponse::Invalid { error } => assert!(error.contains("reserved")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(service.cache().len().await, 0);
    }

    #[tokio::test]
    async fn test_keyword_and_global_cannot_be_renamed() {
        let (_dir, root) = fixture(&[("a.ts", EXAMPLE)]);
        let file = root.join("a.ts");
        let service = service();

        // `const` keyword
        let keyword = service.rename_symbol(&file, 1, 1, "baz").await.unwrap();
        assert!(!keyword.is_error());
        assert!(matches!(keyword, RenameResponse::Rejected { can_rename: false, .. }));

        // `console`
        let global = service.rename_symbol(&file, 3, 1, "baz").await.unwrap();
        let value = serde_json::to_value(&global).unwrap();
        assert_eq!(value["can_rename"], serde_json::json!(false));
        assert!(value["reason"].as_str().unwrap().contains("console"));
    }

    #[tokio::test]
    async fn test_rename_across_files() {
        let (_dir, root) = fixture(&[
            ("src/util.ts", "export function format(v: number) {\n  return `${v}`;\n}\n"),
            (
                "src/main.ts",
                "import { format } from './util';\nconst s = format(1) + format(2);\n",
            ),
            ("src/other.ts", "const format = 3;\nexport { format as f };\n"),
        ]);
        let main = root.join("src/main.ts");

        let plan = plan(
            service()
                .rename_symbol(&main, 2, 11, "render")
                .await
                .unwrap(),
        );
        assert_eq!(plan.edits.len(), 4);
        assert_eq!(
            plan.files_affected,
            vec![
                root.join("src/main.ts").display().to_string(),
                root.join("src/util.ts").display().to_string(),
            ]
        );
        let spots: Vec<(usize, usize)> = plan.edits.iter().map(|e| (e.line, e.column)).collect();
        assert_eq!(spots, vec![(1, 10), (2, 11), (2, 23), (1, 17)]);
    }

    #[tokio::test]
    async fn test_rename_keeps_export_alias() {
        let (_dir, root) = fixture(&[
            ("lib.ts", "export const e = 1;\nexport { e as f };\n"),
            ("main.ts", "import { f } from './lib';\nconsole.log(f);\n"),
        ]);
        let lib = root.join("lib.ts");

        let plan = plan(service().rename_symbol(&lib, 1, 14, "z").await.unwrap());
        assert!(plan.edits.iter().all(|e| e.old_text == "e"));
        assert_eq!(plan.files_affected, vec![lib.display().to_string()]);
        let spots: Vec<(usize, usize)> = plan.edits.iter().map(|e| (e.line, e.column)).collect();
        assert_eq!(spots, vec![(1, 14), (2, 10)]);
    }

    #[tokio::test]
    async fn test_rename_plain_export_follows_importers() {
        let (_dir, root) = fixture(&[
            ("lib.ts", "const e = 1;\nexport { e };\n"),
            ("main.ts", "import { e } from './lib';\nconsole.log(e);\n"),
        ]);
        let lib = root.join("lib.ts");

        let plan = plan(service().rename_symbol(&lib, 1, 7, "z").await.unwrap());
        assert_eq!(plan.edits.len(), 4);
        assert!(plan.edits.iter().all(|e| e.old_text == "e"));
        assert_eq!(plan.files_affected.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_expands_shorthand_properties() {
        let (_dir, root) = fixture(&[(
            "a.ts",
            "const foo = 1;\nconst o = { foo };\nconsole.log(o.foo);\nconst { foo: a } = o;\n",
        )]);
        let file = root.join("a.ts");

        let plan = plan(service().rename_symbol(&file, 1, 7, "baz").await.unwrap());
        assert_eq!(plan.edits.len(), 2);
        assert_eq!((plan.edits[0].line, plan.edits[0].column), (1, 7));
        assert_eq!(plan.edits[0].new_text, "baz");
        assert_eq!((plan.edits[1].line, plan.edits[1].column), (2, 13));
        assert_eq!(plan.edits[1].old_text, "foo");
        assert_eq!(plan.edits[1].new_text, "foo: baz");
    }

    #[tokio::test]
    async fn test_rename_destructured_shorthand() {
        let (_dir, root) = fixture(&[(
            "a.ts",
            "const o = { foo: 1 };\nconst { foo } = o;\nconsole.log(foo);\n",
        )]);
        let file = root.join("a.ts");

        let plan = plan(service().rename_symbol(&file, 3, 13, "bar").await.unwrap());
        let texts: Vec<(&str, &str)> = plan
            .edits
            .iter()
            .map(|e| (e.old_text.as_str(), e.new_text.as_str()))
            .collect();
        assert_eq!(texts, vec![("foo", "foo: bar"), ("foo", "bar")]);
    }

    #[tokio::test]
    async fn test_rename_respects_shadowing() {
        let (_dir, root) = fixture(&[(
            "a.ts",
            "let n = 1;\nfunction f(n: number) {\n  return n;\n}\nn = f(n);\n",
        )]);
        let file = root.join("a.ts");

        let plan = plan(service().rename_symbol(&file, 1, 5, "m").await.unwrap());
        let spots: Vec<(usize, usize)> = plan.edits.iter().map(|e| (e.line, e.column)).collect();
        assert_eq!(spots, vec![(1, 5), (5, 1), (5, 7)]);
    }

    #[tokio::test]
    async fn test_astral_text_spans() {
        let (_dir, root) = fixture(&[("a.ts", "const s = \"😀\"; let x = s;\nx;\n")]);
        let file = root.join("a.ts");

        let plan = plan(service().rename_symbol(&file, 1, 21, "y").await.unwrap());
        assert_eq!(plan.edits.len(), 2);
        assert_eq!(plan.edits[0].old_text, "x");
        assert_eq!((plan.edits[0].column, plan.edits[0].end_column), (21, 22));
        assert_eq!((plan.edits[1].line, plan.edits[1].column), (2, 1));
    }
}
