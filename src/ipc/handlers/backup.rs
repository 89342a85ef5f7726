use crate::backup;
use crate::ipc::helpers::{get_required_str, ledger_mut, require_admin, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Ledger, SeedAdmin};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn path_param(params: &Value, key: &str) -> Result<PathBuf, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    }
    Ok(PathBuf::from(raw))
}

fn io_failed(e: anyhow::Error, path: &Path) -> HandlerErr {
    HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": path.to_string_lossy() })),
    }
}

fn handle_export(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let out = path_param(params, "outPath")?;
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let snapshot = ledger_mut(state)?.snapshot()?;
    let export = backup::export_workspace_bundle(&workspace, &snapshot, &out).map_err(|e| io_failed(e, &out))?;
    tracing::info!(path = %out.to_string_lossy(), "workspace exported");
    Ok(json!({
        "path": out.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "snapshotSha256": export.snapshot_sha256,
    }))
}

/// Replaces the workspace database and reopens it. The session ends, since
/// the restored data may not contain the signed-in account.
fn handle_import(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let src = path_param(params, "inPath")?;
    if !src.is_file() {
        return Err(HandlerErr {
            code: "not_found",
            message: "bundle file not found".to_string(),
            details: Some(json!({ "path": src.to_string_lossy() })),
        });
    }
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    state.ledger = None;
    state.session = None;
    let imported = backup::import_workspace_bundle(&src, &workspace).map_err(|e| io_failed(e, &src));
    // Reopen even when the import failed.
    let ledger = Ledger::open(&workspace, &SeedAdmin::default())
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    state.ledger = Some(ledger);
    let imported = imported?;
    tracing::info!(path = %src.to_string_lossy(), format = %imported.bundle_format_detected, "workspace imported");
    Ok(json!({
        "bundleFormatDetected": imported.bundle_format_detected,
        "collections": imported.collections,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => handle_export(state, &req.params),
        "backup.import" => handle_import(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
