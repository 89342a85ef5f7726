use crate::ipc::helpers::{
    acting_student, get_optional_id, get_optional_str, get_required_i64, get_required_id, get_required_str,
    ledger_mut, listing_scope, require_admin, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::WithdrawalStatus;
use serde_json::{json, Value};

fn handle_request(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = acting_student(state, params, "studentId")?;
    let coins = get_required_i64(params, "coins")?;
    let card_number = get_required_str(params, "cardNumber")?;
    let method = get_optional_str(params, "method");
    let password = get_required_str(params, "password")?;
    let operation_id = get_optional_id(params, "operationId")?;
    let request = ledger_mut(state)?.request_withdrawal(
        &student_id,
        coins,
        &card_number,
        method.as_deref(),
        &password,
        operation_id.as_deref(),
    )?;
    Ok(json!({ "request": request }))
}

fn handle_approve(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let request_id = get_required_id(params, "requestId")?;
    let request = ledger_mut(state)?.approve_withdrawal(&request_id, &admin.id)?;
    Ok(json!({ "request": request }))
}

fn handle_reject(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let request_id = get_required_id(params, "requestId")?;
    let reason = get_optional_str(params, "reason");
    let request = ledger_mut(state)?.reject_withdrawal(&request_id, &admin.id, reason.as_deref())?;
    Ok(json!({ "request": request }))
}

fn handle_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = listing_scope(state, params, "studentId")?;
    let status: Option<WithdrawalStatus> = match params.get("status").filter(|v| !v.is_null()) {
        None => None,
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|_| HandlerErr::bad_params("status must be pending, approved or rejected"))?,
        ),
    };
    let requests = ledger_mut(state)?.list_withdrawals(student_id.as_deref(), status)?;
    Ok(json!({ "requests": requests }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "withdrawals.request" => handle_request(state, p),
        "withdrawals.approve" => handle_approve(state, p),
        "withdrawals.reject" => handle_reject(state, p),
        "withdrawals.list" => handle_list(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
