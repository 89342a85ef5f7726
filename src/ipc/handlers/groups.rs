use crate::ipc::helpers::{
    current_user, get_id_list, get_optional_str, get_required_id, get_required_str, ledger_mut, require_admin,
    respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_groups_list(state: &mut AppState) -> HandlerResult {
    current_user(state)?;
    let groups = ledger_mut(state)?.list_groups()?;
    Ok(json!({ "groups": groups }))
}

fn handle_groups_create(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let student_ids = get_id_list(params, "studentIds")?;
    let group = ledger_mut(state)?.create_group(&name, &description, &student_ids, &admin.id)?;
    Ok(json!({ "group": group }))
}

fn handle_groups_assign_student(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let group_id = get_required_id(params, "groupId")?;
    let student_id = get_required_id(params, "studentId")?;
    let group = ledger_mut(state)?.assign_student_to_group(&group_id, &student_id)?;
    Ok(json!({ "group": group }))
}

fn handle_groups_remove_student(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let group_id = get_required_id(params, "groupId")?;
    let student_id = get_required_id(params, "studentId")?;
    let group = ledger_mut(state)?.remove_student_from_group(&group_id, &student_id)?;
    Ok(json!({ "group": group }))
}

fn handle_groups_delete(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let group_id = get_required_id(params, "groupId")?;
    ledger_mut(state)?.delete_group(&group_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "groups.list" => handle_groups_list(state),
        "groups.create" => handle_groups_create(state, p),
        "groups.assignStudent" => handle_groups_assign_student(state, p),
        "groups.removeStudent" => handle_groups_remove_student(state, p),
        "groups.delete" => handle_groups_delete(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
