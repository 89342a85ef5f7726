use crate::ipc::helpers::{
    get_bool, get_optional_str, get_required_str, ledger_mut, require_admin, respond, to_value, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Ledger, SeedAdmin};
use crate::store::StorePath;
use serde_json::{json, Value};
use std::path::PathBuf;

fn handle_health(state: &mut AppState) -> HandlerResult {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "online": state.ledger.as_ref().map(|l| l.is_online()),
    }))
}

/// Opens (or creates) the workspace and seeds its administrator when the
/// user collection is empty.
fn handle_workspace_select(state: &mut AppState, params: &Value) -> HandlerResult {
    let path = get_optional_str(params, "path")
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params("missing params.path"))?;
    let defaults = SeedAdmin::default();
    let seed = SeedAdmin {
        email: get_optional_str(params, "adminEmail").unwrap_or(defaults.email),
        password: get_optional_str(params, "adminPassword").unwrap_or(defaults.password),
        name: get_optional_str(params, "adminName").unwrap_or(defaults.name),
    };

    // Release the previous database before opening the next one.
    state.ledger = None;
    state.session = None;
    state.workspace = None;
    let ledger = Ledger::open(&path, &seed).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
    state.ledger = Some(ledger);
    state.workspace = Some(path.clone());
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

fn handle_connection_status(state: &mut AppState) -> HandlerResult {
    let ledger = ledger_mut(state)?;
    let online = ledger.is_online();
    let cached = ledger.records().cached_paths();
    Ok(json!({ "online": online, "cachedPaths": cached }))
}

/// The store's reachability as observed by the front end.
fn handle_connection_set(state: &mut AppState, params: &Value) -> HandlerResult {
    let online = get_bool(params, "online")?;
    ledger_mut(state)?.records().set_online(online);
    Ok(json!({ "online": online }))
}

fn handle_settings_get(state: &mut AppState) -> HandlerResult {
    let ledger = ledger_mut(state)?;
    to_value(ledger.policy())
}

fn handle_settings_update(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let policy = ledger_mut(state)?.update_policy(patch)?;
    to_value(&policy)
}

fn path_param(params: &Value) -> Result<StorePath, HandlerErr> {
    let raw = get_required_str(params, "path")?;
    StorePath::parse(&raw).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn handle_data_get(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    let value = ledger_mut(state)?.records().get_data(&path)?;
    Ok(json!({ "value": value }))
}

fn handle_data_list(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    let items = ledger_mut(state)?.records().get_array_data(&path)?;
    Ok(json!({ "items": items }))
}

fn handle_data_set(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    let value = params.get("value").cloned().unwrap_or(Value::Null);
    ledger_mut(state)?.records().save_data(&path, value)?;
    Ok(json!({ "ok": true }))
}

fn handle_data_push(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    let value = params
        .get("value")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
    let id = ledger_mut(state)?.records().push_data(&path, value)?;
    Ok(json!({ "id": id }))
}

fn handle_data_update(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    let Some(partial) = params.get("partial").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing partial"));
    };
    ledger_mut(state)?
        .records()
        .update_data(&path, partial.clone())?;
    Ok(json!({ "ok": true }))
}

fn handle_data_delete(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let path = path_param(params)?;
    ledger_mut(state)?.records().delete_data(&path)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "health" => handle_health(state),
        "workspace.select" => handle_workspace_select(state, p),
        "connection.status" => handle_connection_status(state),
        "connection.set" => handle_connection_set(state, p),
        "settings.get" => handle_settings_get(state),
        "settings.update" => handle_settings_update(state, p),
        "data.get" => handle_data_get(state, p),
        "data.list" => handle_data_list(state, p),
        "data.set" => handle_data_set(state, p),
        "data.push" => handle_data_push(state, p),
        "data.update" => handle_data_update(state, p),
        "data.delete" => handle_data_delete(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
