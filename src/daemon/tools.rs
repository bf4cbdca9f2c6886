//! MCP tool table: dispatch by name plus the advertised schemas.

use anyhow::Result;
use serde_json::{json, Value};

use super::handlers::symbols;
use crate::error::LensError;

pub use super::handlers::common::{ToolContext, ToolOutput};

/// Dispatch a tool call by name.
pub async fn dispatch(name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
    match name {
        "find_references" => symbols::tool_find_references(args, ctx).await,
        "rename_symbol" => symbols::tool_rename_symbol(args, ctx).await,
        _ => Err(LensError::MethodNotFound(name.to_string()).into()),
    }
}

/// Tool definitions returned by `tools/list`.
pub fn core_tools_list() -> Vec<Value> {
    vec![
        json!({
            "name": "find_references",
            "description": "Find every reference to the symbol at a 1-based line/column in a JavaScript or TypeScript file. Returns sorted locations with line previews.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file": { "type": "string", "description": "Source file path (absolute, or relative to the project directory)" },
                    "line": { "type": "integer", "description": "1-based line number", "minimum": 1 },
                    "column": { "type": "integer", "description": "1-based column in UTF-16 code units", "minimum": 1 },
                    "include_definition": { "type": "boolean", "description": "Include the declaration site in the results", "default": true }
                },
                "required": ["file", "line", "column"]
            }
        }),
        json!({
            "name": "rename_symbol",
            "description": "Plan a rename of the symbol at a 1-based line/column. Returns the edit set across the project without modifying any file.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file": { "type": "string", "description": "Source file path (absolute, or relative to the project directory)" },
                    "line": { "type": "integer", "description": "1-based line number", "minimum": 1 },
                    "column": { "type": "integer", "description": "1-based column in UTF-16 code units", "minimum": 1 },
                    "new_name": { "type": "string", "description": "New identifier (must not be a reserved word)" }
                },
                "required": ["file", "line", "column", "new_name"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntelConfig;
    use crate::intel::{ProjectContextCache, SymbolEditService};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(root: PathBuf) -> ToolContext {
        let cache = Arc::new(ProjectContextCache::with_syntax_engine(&IntelConfig::default()));
        ToolContext {
            root_path: Arc::new(root),
            symbols: Arc::new(SymbolEditService::new(cache)),
        }
    }

    fn project() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(
            root.join("a.ts"),
            "const foo = 1;\nconst bar = foo;\nconsole.log(foo);",
        )
        .unwrap();
        (dir, root)
    }

    #[test]
    fn test_tools_list_schemas() {
        let tools = core_tools_list();
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        assert_eq!(names, vec!["find_references", "rename_symbol"]);
        for tool in &tools {
            assert_eq!(tool["inputSchema"]["type"], json!("object"));
            assert!(tool["inputSchema"]["required"].as_array().unwrap().len() >= 3);
        }
    }

    #[tokio::test]
    async fn test_dispatch_relative_file() {
        let (_dir, root) = project();
        let ctx = context(root);

        let output = dispatch(
            "find_references",
            json!({ "file": "a.ts", "line": 1, "column": 7 }),
            &ctx,
        )
        .await
        .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.value["count"], json!(3));
        assert_eq!(output.value["symbol"], json!("foo"));
    }

    #[tokio::test]
    async fn test_dispatch_flags_invalid_requests() {
        let (_dir, root) = project();
        let ctx = context(root);

        let missing = dispatch("find_references", json!({ "line": 1, "column": 1 }), &ctx)
            .await
            .unwrap();
        assert!(missing.is_error);
        assert!(missing.value["error"].is_string());

        let bad_name = dispatch(
            "rename_symbol",
            json!({ "file": "a.ts", "line": 1, "column": 7, "newName": "class" }),
            &ctx,
        )
        .await
        .unwrap();
        assert!(bad_name.is_error);

        let not_renameable = dispatch(
            "rename_symbol",
            json!({ "file": "a.ts", "line": 3, "column": 1, "new_name": "log" }),
            &ctx,
        )
        .await
        .unwrap();
        assert!(!not_renameable.is_error);
        assert_eq!(not_renameable.value["can_rename"], json!(false));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_fractional_position() {
        let (_dir, root) = project();
        let ctx = context(root);

        let output = dispatch(
            "find_references",
            json!({ "file": "a.ts", "line": 1.5, "column": 7 }),
            &ctx,
        )
        .await
        .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["error"], json!("line must be an integer (got 1.5)"));

        let output = dispatch(
            "rename_symbol",
            json!({ "file": "a.ts", "line": 1, "column": "7", "new_name": "baz" }),
            &ctx,
        )
        .await
        .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["error"], json!("column must be an integer (got \"7\")"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let ctx = context(PathBuf::from("/tmp"));
        let err = dispatch("frobnicate", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LensError>(),
            Some(LensError::MethodNotFound(_))
        ));
    }
}
