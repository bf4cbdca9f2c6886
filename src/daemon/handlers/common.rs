use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::intel::SymbolEditService;

/// Shared handles every tool handler receives. Cheap to clone into tasks.
#[derive(Clone)]
pub struct ToolContext {
    /// Directory relative `file` arguments resolve against.
    pub root_path: Arc<PathBuf>,
    pub symbols: Arc<SymbolEditService>,
}

/// Structured tool result plus the MCP `isError` side channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn new<T: Serialize>(value: &T, is_error: bool) -> anyhow::Result<Self> {
        Ok(Self {
            value: serde_json::to_value(value)?,
            is_error,
        })
    }
}

/// Relative paths resolve against `root`; an empty path stays empty so the
/// service can reject it.
pub fn resolve_path_buf(root: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if file.is_empty() || p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(file)
    }
}

/// First string argument found under any of `keys`.
pub fn str_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| args.get(*key).and_then(|v| v.as_str()))
}

/// Integer argument. Missing reads as 0, which the service rejects as an
/// invalid position; a present non-integer is reported with its raw value.
pub fn int_arg(args: &Value, key: &str) -> Result<i64, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| format!("{} must be an integer (got {})", key, v)),
    }
}

/// `line` and `column` together, failing on the first non-integer.
pub fn position_args(args: &Value) -> Result<(i64, i64), String> {
    Ok((int_arg(args, "line")?, int_arg(args, "column")?))
}

pub fn bool_arg(args: &Value, keys: &[&str], default: bool) -> bool {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(|v| v.as_bool()))
        .unwrap_or(default)
}
