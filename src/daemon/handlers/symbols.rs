use anyhow::Result;
use serde_json::Value;

use super::common::{bool_arg, position_args, resolve_path_buf, str_arg, ToolContext, ToolOutput};
use crate::error::LensError;
use crate::intel::references::FindReferencesResponse;
use crate::intel::rename::RenameResponse;

pub async fn tool_find_references(args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
    let file = str_arg(&args, &["file"]).unwrap_or("");
    let path = resolve_path_buf(&ctx.root_path, file);
    let (line, column) = match position_args(&args) {
        Ok(position) => position,
        Err(error) => {
            let response = FindReferencesResponse::Invalid { error };
            return ToolOutput::new(&response, true);
        }
    };
    let include_definition = bool_arg(&args, &["include_definition", "includeDefinition"], true);

    let response = ctx
        .symbols
        .find_references(&path, line, column, include_definition)
        .await
        .map_err(LensError::Engine)?;
    ToolOutput::new(&response, response.is_error())
}

pub async fn tool_rename_symbol(args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
    let file = str_arg(&args, &["file"]).unwrap_or("");
    let path = resolve_path_buf(&ctx.root_path, file);
    let (line, column) = match position_args(&args) {
        Ok(position) => position,
        Err(error) => return ToolOutput::new(&RenameResponse::Invalid { error }, true),
    };
    let new_name = str_arg(&args, &["new_name", "newName"]).unwrap_or("");

    let response = ctx
        .symbols
        .rename_symbol(&path, line, column, new_name)
        .await
        .map_err(LensError::Engine)?;
    ToolOutput::new(&response, response.is_error())
}
