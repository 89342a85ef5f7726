use crate::ipc::helpers::{
    acting_student, get_id_list, get_optional_datetime, get_optional_i64, get_optional_id, get_optional_str,
    get_required_i64, get_required_id, ledger_mut, listing_scope, require_admin, respond, to_value, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_create(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let student_ids = get_id_list(params, "studentIds")?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    let amount = get_required_i64(params, "amount")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let due_date = get_optional_datetime(params, "dueDate")?;
    let payments =
        ledger_mut(state)?.create_monthly_payment(&student_ids, amount, &description, due_date, &admin.id)?;
    Ok(json!({ "payments": payments }))
}

fn handle_pay_with_coins(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = acting_student(state, params, "studentId")?;
    let payment_id = get_required_id(params, "paymentId")?;
    let amount = get_optional_i64(params, "amount")?;
    let operation_id = get_optional_id(params, "operationId")?;
    let paid = ledger_mut(state)?.pay_with_coins(&student_id, &payment_id, amount, operation_id.as_deref())?;
    to_value(&paid)
}

fn handle_confirm(state: &mut AppState, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let payment_id = get_required_id(params, "paymentId")?;
    let payment = ledger_mut(state)?.confirm_payment(&payment_id, &admin.id)?;
    Ok(json!({ "payment": payment }))
}

fn handle_penalty(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let reason = get_optional_str(params, "reason");
    let moved = ledger_mut(state)?.apply_payment_penalty(&student_id, reason.as_deref())?;
    to_value(&moved)
}

fn handle_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = listing_scope(state, params, "studentId")?;
    let payments = ledger_mut(state)?.list_payments(student_id.as_deref())?;
    Ok(json!({ "payments": payments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "payments.create" => handle_create(state, p),
        "payments.payWithCoins" => handle_pay_with_coins(state, p),
        "payments.confirm" => handle_confirm(state, p),
        "payments.penalty" => handle_penalty(state, p),
        "payments.list" => handle_list(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
