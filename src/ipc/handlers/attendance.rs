use crate::ipc::helpers::{
    get_id_list, get_optional_date, get_required_date, get_required_id, get_required_str, ledger_mut,
    listing_scope, require_admin, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use serde_json::{json, Value};

fn status_param(params: &Value) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    AttendanceStatus::parse(raw.trim())
        .ok_or_else(|| HandlerErr::bad_params("status must be present, absent or late"))
}

fn handle_mark(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let status = status_param(params)?;
    let record = ledger_mut(state)?.mark_attendance(&student_id, date, status, &admin.id)?;
    Ok(json!({ "record": record }))
}

fn handle_mark_many(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let student_ids = get_id_list(params, "studentIds")?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    let date = get_required_date(params, "date")?;
    let status = status_param(params)?;
    let records = ledger_mut(state)?.mark_attendance_many(&student_ids, date, status, &admin.id)?;
    Ok(json!({ "records": records }))
}

fn handle_confirm(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let date = get_required_date(params, "date")?;
    let password = get_required_str(params, "password")?;
    let confirmation = ledger_mut(state)?.confirm_attendance(&admin, date, &password)?;
    Ok(json!({ "confirmation": confirmation }))
}

fn handle_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = listing_scope(state, params, "studentId")?;
    let date = get_optional_date(params, "date")?;
    let ledger = ledger_mut(state)?;
    let records = ledger.list_attendance(date, student_id.as_deref())?;
    let locked = ledger.locked_dates()?;
    Ok(json!({ "records": records, "lockedDates": locked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "attendance.mark" => handle_mark(state, p),
        "attendance.markMany" => handle_mark_many(state, p),
        "attendance.confirm" => handle_confirm(state, p),
        "attendance.list" => handle_list(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
