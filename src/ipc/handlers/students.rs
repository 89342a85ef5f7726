use crate::ipc::helpers::{
    acting_student, get_required_id, get_required_str, ledger_mut, require_admin, respond, to_value,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::public_user;
use serde_json::{json, Value};

fn handle_students_list(state: &mut AppState) -> HandlerResult {
    require_admin(state)?;
    let ledger = ledger_mut(state)?;
    let students = ledger.list_students()?;
    let policy = ledger.policy();
    let rows: Vec<Value> = students.iter().map(|s| public_user(s, policy)).collect();
    Ok(json!({ "students": rows }))
}

fn handle_students_rename(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    let name = get_required_str(params, "name")?;
    let ledger = ledger_mut(state)?;
    let student = ledger.update_student_name(&student_id, &name)?;
    Ok(json!({ "student": public_user(&student, ledger.policy()) }))
}

fn handle_students_remove(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let student_id = get_required_id(params, "studentId")?;
    ledger_mut(state)?.remove_student(&student_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_students_reconcile(state: &mut AppState, params: &Value) -> HandlerResult {
    let student_id = acting_student(state, params, "studentId")?;
    let report = ledger_mut(state)?.reconcile(&student_id)?;
    to_value(&report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state),
        "students.rename" => handle_students_rename(state, p),
        "students.remove" => handle_students_remove(state, p),
        "students.reconcile" => handle_students_reconcile(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
