use crate::ipc::helpers::{
    get_optional_id, get_optional_str, get_required_i64, get_required_id, get_required_str, ledger_mut,
    listing_scope, require_admin, respond, to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::TransactionType;
use serde_json::{json, Value};

fn handle_adjust(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let amount = get_required_i64(params, "amount")?;
    let reason = get_required_str(params, "reason")?;
    let kind = match get_optional_str(params, "type") {
        None => TransactionType::Adjustment,
        Some(raw) => TransactionType::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown transaction type: {}", raw)))?,
    };
    let operation_id = get_optional_id(params, "operationId")?;
    let moved = ledger_mut(state)?.adjust_coins(&student_id, amount, &reason, kind, operation_id.as_deref())?;
    to_value(&moved)
}

fn handle_fine(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let amount = get_required_i64(params, "amount")?;
    let reason = get_required_str(params, "reason")?;
    let operation_id = get_optional_id(params, "operationId")?;
    let moved = ledger_mut(state)?.apply_fine(&student_id, amount, &reason, operation_id.as_deref())?;
    to_value(&moved)
}

fn handle_task_penalty(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let reason = get_optional_str(params, "reason");
    let moved = ledger_mut(state)?.apply_task_penalty(&student_id, reason.as_deref())?;
    to_value(&moved)
}

fn handle_transactions(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = listing_scope(state, params, "studentId")?;
    let transactions = ledger_mut(state)?.transactions_for(student_id.as_deref())?;
    Ok(json!({ "transactions": transactions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "coins.adjust" => handle_adjust(state, p),
        "coins.fine" => handle_fine(state, p),
        "coins.taskPenalty" => handle_task_penalty(state, p),
        "coins.transactions" => handle_transactions(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
