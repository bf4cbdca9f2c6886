//! Project configuration discovery (`tsconfig.json` / `jsconfig.json`).
//!
//! The nearest config above a source file decides both the project root and
//! the options the engine is built with. `extends` chains are followed and
//! merged child-over-parent. Anything that goes wrong here degrades to the
//! default options; it is never surfaced to callers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Config file names, in lookup order at each directory level.
pub const CONFIG_FILE_NAMES: &[&str] = &["tsconfig.json", "jsconfig.json"];

/// Maximum `extends` depth followed before giving up on the rest of a chain.
const MAX_EXTENDS_DEPTH: usize = 8;

#[derive(Error, Debug)]
enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_js: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_js: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub es_module_interop: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_lib_check: Option<bool>,
}

impl CompilerOptions {
    /// Options used when no usable configuration exists.
    pub fn defaults() -> Self {
        Self {
            target: Some("ES2020".into()),
            module: Some("ESNext".into()),
            module_resolution: Some("node".into()),
            strict: Some(true),
            allow_js: Some(true),
            es_module_interop: Some(true),
            skip_lib_check: Some(true),
            ..Default::default()
        }
    }

    /// Layer `child` over `self`; every option the child sets wins.
    pub fn merged_with(self, child: CompilerOptions) -> Self {
        Self {
            target: child.target.or(self.target),
            module: child.module.or(self.module),
            module_resolution: child.module_resolution.or(self.module_resolution),
            strict: child.strict.or(self.strict),
            allow_js: child.allow_js.or(self.allow_js),
            check_js: child.check_js.or(self.check_js),
            jsx: child.jsx.or(self.jsx),
            base_url: child.base_url.or(self.base_url),
            paths: child.paths.or(self.paths),
            root_dir: child.root_dir.or(self.root_dir),
            es_module_interop: child.es_module_interop.or(self.es_module_interop),
            skip_lib_check: child.skip_lib_check.or(self.skip_lib_check),
        }
    }

    pub fn allows_js(&self) -> bool {
        self.allow_js.unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Extends {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    extends: Option<Extends>,
    compiler_options: Option<CompilerOptions>,
}

/// Outcome of resolving the configuration for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub options: CompilerOptions,
}

impl ResolvedConfig {
    fn fallback() -> Self {
        Self {
            config_path: None,
            options: CompilerOptions::defaults(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectConfigResolver;

impl ProjectConfigResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, file: &Path) -> ResolvedConfig {
        let Some(config_path) = file.parent().and_then(find_config) else {
            debug!("No project config above {}", file.display());
            return ResolvedConfig::fallback();
        };

        let mut chain = Vec::new();
        match load_chain(&config_path, 0, &mut chain) {
            Ok(options) => ResolvedConfig {
                options: CompilerOptions::defaults().merged_with(options),
                config_path: Some(config_path),
            },
            Err(e) => {
                warn!("{}; using default options", e);
                ResolvedConfig::fallback()
            }
        }
    }
}

/// Nearest config file at or above `dir`.
fn find_config(dir: &Path) -> Option<PathBuf> {
    dir.ancestors().find_map(|level| {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| level.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Options of `path` merged over its `extends` ancestors.
fn load_chain(
    path: &Path,
    depth: usize,
    visited: &mut Vec<PathBuf>,
) -> Result<CompilerOptions, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RawConfig =
        serde_json::from_str(&strip_json_comments(&raw)).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    visited.push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));

    let own = config.compiler_options.unwrap_or_default();
    let parents = match config.extends {
        None => Vec::new(),
        Some(Extends::One(spec)) => vec![spec],
        Some(Extends::Many(specs)) => specs,
    };

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let mut inherited = CompilerOptions::default();
    for spec in parents {
        if depth + 1 >= MAX_EXTENDS_DEPTH {
            warn!(
                "extends chain deeper than {} at {}; ignoring '{}'",
                MAX_EXTENDS_DEPTH,
                path.display(),
                spec
            );
            continue;
        }
        let Some(parent) = resolve_extends(base_dir, &spec) else {
            warn!("Cannot resolve extends '{}' from {}", spec, path.display());
            continue;
        };
        if visited.contains(&parent) {
            warn!("Cyclic extends '{}' in {}", spec, path.display());
            continue;
        }
        // later entries of an extends array override earlier ones
        inherited = inherited.merged_with(load_chain(&parent, depth + 1, visited)?);
    }

    // `visited` is the current extends path; siblings may share a base
    visited.pop();
    Ok(inherited.merged_with(own))
}

fn resolve_extends(base_dir: &Path, spec: &str) -> Option<PathBuf> {
    let with_json = |p: PathBuf| -> Option<PathBuf> {
        if p.is_file() {
            return Some(p);
        }
        let mut name = p.clone().into_os_string();
        name.push(".json");
        let alt = PathBuf::from(name);
        alt.is_file().then_some(alt)
    };

    let candidate = if spec.starts_with('.') || Path::new(spec).is_absolute() {
        with_json(base_dir.join(spec))
    } else {
        base_dir
            .ancestors()
            .map(|dir| dir.join("node_modules").join(spec))
            .find_map(|p| {
                with_json(p.clone()).or_else(|| with_json(p.join("tsconfig.json")))
            })
    }?;

    Some(candidate.canonicalize().unwrap_or(candidate))
}

/// Strip `//` and `/* */` comments and trailing commas from JSON.
pub fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if ch == '\\' {
                if let Some(&next) = chars.peek() {
                    out.push(next);
                    chars.next();
                }
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    strip_trailing_commas(&out)
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = input.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "src/a.ts", "let a = 1;");
        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved, ResolvedConfig::fallback());
    }

    #[test]
    fn test_nearest_config_wins() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tsconfig.json", r#"{ "compilerOptions": { "target": "ES5" } }"#);
        let inner = write(
            dir.path(),
            "pkg/tsconfig.json",
            r#"{ "compilerOptions": { "target": "ES2022" } }"#,
        );
        let file = write(dir.path(), "pkg/src/deep/a.ts", "let a = 1;");

        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved.config_path, Some(inner));
        assert_eq!(resolved.options.target.as_deref(), Some("ES2022"));
        // unset options come from the defaults
        assert_eq!(resolved.options.module.as_deref(), Some("ESNext"));
    }

    #[test]
    fn test_jsconfig_is_recognised() {
        let dir = TempDir::new().unwrap();
        let config = write(dir.path(), "jsconfig.json", r#"{ "compilerOptions": { "checkJs": true } }"#);
        let file = write(dir.path(), "a.js", "var a;");
        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved.config_path, Some(config));
        assert_eq!(resolved.options.check_js, Some(true));
    }

    #[test]
    fn test_extends_chain_child_overrides_parent() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "configs/base.json",
            r#"{ "compilerOptions": { "target": "ES5", "strict": false, "jsx": "react" } }"#,
        );
        write(
            dir.path(),
            "configs/mid.json",
            r#"{ "extends": "./base", "compilerOptions": { "strict": true } }"#,
        );
        write(
            dir.path(),
            "app/tsconfig.json",
            r#"{
                // comments are allowed
                "extends": "../configs/mid.json",
                "compilerOptions": { "target": "ES2021", },
            }"#,
        );
        let file = write(dir.path(), "app/main.ts", "let a = 1;");

        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert!(resolved.config_path.is_some());
        assert_eq!(resolved.options.target.as_deref(), Some("ES2021"));
        assert_eq!(resolved.options.strict, Some(true));
        assert_eq!(resolved.options.jsx.as_deref(), Some("react"));
    }

    #[test]
    fn test_extends_array_later_entries_win() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", r#"{ "compilerOptions": { "target": "ES5", "jsx": "preserve" } }"#);
        write(dir.path(), "b.json", r#"{ "compilerOptions": { "target": "ES2017" } }"#);
        write(dir.path(), "tsconfig.json", r#"{ "extends": ["./a.json", "./b.json"] }"#);
        let file = write(dir.path(), "x.ts", "");

        let options = ProjectConfigResolver::new().resolve(&file).options;
        assert_eq!(options.target.as_deref(), Some("ES2017"));
        assert_eq!(options.jsx.as_deref(), Some("preserve"));
    }

    #[test]
    fn test_shared_base_applies_under_each_sibling() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "base.json", r#"{ "compilerOptions": { "target": "ES5", "jsx": "react" } }"#);
        write(
            dir.path(),
            "a.json",
            r#"{ "extends": "./base.json", "compilerOptions": { "target": "ES2017" } }"#,
        );
        write(dir.path(), "b.json", r#"{ "extends": "./base.json" }"#);
        write(dir.path(), "tsconfig.json", r#"{ "extends": ["./a.json", "./b.json"] }"#);
        let file = write(dir.path(), "x.ts", "");

        let options = ProjectConfigResolver::new().resolve(&file).options;
        // b inherits base, and b comes last
        assert_eq!(options.target.as_deref(), Some("ES5"));
        assert_eq!(options.jsx.as_deref(), Some("react"));
    }

    #[test]
    fn test_self_referential_extends_terminates() {
        let dir = TempDir::new().unwrap();
        let config = write(
            dir.path(),
            "tsconfig.json",
            r#"{ "extends": "./tsconfig.json", "compilerOptions": { "target": "ES2019" } }"#,
        );
        write(dir.path(), "loop-a.json", r#"{ "extends": "./loop-b.json" }"#);
        write(dir.path(), "loop-b.json", r#"{ "extends": "./loop-a.json" }"#);
        let file = write(dir.path(), "a.ts", "");

        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved.config_path, Some(config));
        assert_eq!(resolved.options.target.as_deref(), Some("ES2019"));

        let mut visited = Vec::new();
        let looped = load_chain(&dir.path().join("loop-a.json"), 0, &mut visited);
        assert!(looped.is_ok());
    }

    #[test]
    fn test_malformed_config_falls_back() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tsconfig.json", r#"{ "compilerOptions": { "target": "#);
        let file = write(dir.path(), "a.ts", "");
        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved, ResolvedConfig::fallback());
    }

    #[test]
    fn test_malformed_parent_falls_back() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "base.json", "{ not json");
        write(dir.path(), "tsconfig.json", r#"{ "extends": "./base.json" }"#);
        let file = write(dir.path(), "a.ts", "");
        let resolved = ProjectConfigResolver::new().resolve(&file);
        assert_eq!(resolved.config_path, None);
    }

    #[test]
    fn test_extends_from_node_modules() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/@tsconfig/node18/tsconfig.json",
            r#"{ "compilerOptions": { "module": "Node16" } }"#,
        );
        write(dir.path(), "tsconfig.json", r#"{ "extends": "@tsconfig/node18/tsconfig.json" }"#);
        let file = write(dir.path(), "a.ts", "");
        let options = ProjectConfigResolver::new().resolve(&file).options;
        assert_eq!(options.module.as_deref(), Some("Node16"));
    }

    #[test]
    fn test_strip_json_comments() {
        let input = r#"{
  // line
  "a": "http://x", /* block */
  "b": [1, 2,],
}"#;
        let value: serde_json::Value = serde_json::from_str(&strip_json_comments(input)).unwrap();
        assert_eq!(value["a"], "http://x");
        assert_eq!(value["b"], serde_json::json!([1, 2]));
    }
}
