use crate::ipc::helpers::{
    acting_student, current_user, get_id_list, get_optional_datetime, get_optional_i64, get_optional_id,
    get_optional_str, get_required_id, get_required_str, ledger_mut, listing_scope, require_admin, respond,
    to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{AssignmentDraft, AssignmentKind, TestDraft};
use crate::model::{AssignmentStatus, Question, Role};
use serde_json::{json, Value};

fn id_key(kind: AssignmentKind) -> &'static str {
    match kind {
        AssignmentKind::Task => "taskId",
        AssignmentKind::Test => "testId",
        AssignmentKind::Project => "projectId",
    }
}

/// Removes answer keys from serialized tests.
fn redact_answers(tests: &mut Value) {
    let Some(items) = tests.as_array_mut() else {
        return;
    };
    for test in items {
        if let Some(questions) = test.get_mut("questions").and_then(|q| q.as_array_mut()) {
            for q in questions {
                if let Some(obj) = q.as_object_mut() {
                    obj.remove("correctAnswer");
                }
            }
        }
    }
}

fn targeting(params: &Value) -> Result<(Option<String>, Option<Vec<String>>), HandlerErr> {
    let group_id = get_optional_id(params, "groupId")?;
    let assigned = get_id_list(params, "assignedStudents")?;
    Ok((group_id, Some(assigned).filter(|a| !a.is_empty())))
}

fn handle_create(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let title = get_required_str(params, "title")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let (group_id, assigned_students) = targeting(params)?;
    let ledger = ledger_mut(state)?;
    match kind {
        AssignmentKind::Test => {
            let questions: Vec<Question> = params
                .get("questions")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| HandlerErr::bad_params(format!("invalid questions: {}", e)))?
                .unwrap_or_default();
            let draft = TestDraft {
                title,
                description,
                questions,
                time_limit: get_optional_i64(params, "timeLimit")?,
                group_id,
                assigned_students,
            };
            let test = ledger.create_test(draft, &admin.id)?;
            Ok(json!({ "test": test }))
        }
        AssignmentKind::Task | AssignmentKind::Project => {
            let draft = AssignmentDraft {
                title,
                description,
                deadline: get_optional_datetime(params, "deadline")?,
                reward: get_optional_i64(params, "reward")?,
                group_id,
                assigned_students,
                website_url: get_optional_str(params, "websiteUrl"),
            };
            if kind == AssignmentKind::Task {
                let task = ledger.create_task(draft, &admin.id)?;
                Ok(json!({ "task": task }))
            } else {
                let project = ledger.create_project(draft, &admin.id)?;
                Ok(json!({ "project": project }))
            }
        }
    }
}

fn handle_list(state: &mut AppState, kind: AssignmentKind) -> HandlerResult {
    require_admin(state)?;
    let ledger = ledger_mut(state)?;
    Ok(match kind {
        AssignmentKind::Task => json!({ "tasks": ledger.list_tasks()? }),
        AssignmentKind::Test => json!({ "tests": ledger.list_tests()? }),
        AssignmentKind::Project => json!({ "projects": ledger.list_projects()? }),
    })
}

fn handle_set_status(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let id = get_required_id(params, id_key(kind))?;
    let status: AssignmentStatus = params
        .get("status")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| HandlerErr::bad_params("status must be active or inactive"))?;
    ledger_mut(state)?.set_assignment_status(kind, &id, status)?;
    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let id = get_required_id(params, id_key(kind))?;
    ledger_mut(state)?.delete_assignment(kind, &id)?;
    Ok(json!({ "ok": true }))
}

fn handle_clear(state: &mut AppState, kind: AssignmentKind) -> HandlerResult {
    require_admin(state)?;
    ledger_mut(state)?.clear_assignments(kind)?;
    Ok(json!({ "ok": true }))
}

fn handle_submit(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    let student_id = acting_student(state, params, "studentId")?;
    let id = get_required_id(params, id_key(kind))?;
    let ledger = ledger_mut(state)?;
    match kind {
        AssignmentKind::Test => {
            let answers: Vec<Option<usize>> = params
                .get("answers")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| HandlerErr::bad_params("answers must be an array of option indexes"))?;
            let result = ledger.submit_test(&student_id, &id, &answers)?;
            Ok(json!({ "result": result }))
        }
        AssignmentKind::Task => {
            let description = get_required_str(params, "description")?;
            let submission = ledger.submit_task(&student_id, &id, &description)?;
            Ok(json!({ "submission": submission }))
        }
        AssignmentKind::Project => {
            let description = get_required_str(params, "description")?;
            let submission = ledger.submit_project(&student_id, &id, &description)?;
            Ok(json!({ "submission": submission }))
        }
    }
}

fn handle_grade(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    let admin = require_admin(state)?;
    let submission_id = get_required_id(params, "submissionId")?;
    let reward = get_optional_i64(params, "reward")?;
    let feedback = get_optional_str(params, "feedback");
    let ledger = ledger_mut(state)?;
    let graded = match kind {
        AssignmentKind::Project => {
            ledger.grade_project_submission(&submission_id, reward, feedback.as_deref(), &admin.id)?
        }
        _ => ledger.grade_submission(&submission_id, reward, feedback.as_deref(), &admin.id)?,
    };
    Ok(json!({ "submission": graded }))
}

fn handle_submissions(state: &mut AppState, kind: AssignmentKind, params: &Value) -> HandlerResult {
    let student_id = listing_scope(state, params, "studentId")?;
    let ledger = ledger_mut(state)?;
    if kind == AssignmentKind::Test {
        let results = ledger.list_test_results(student_id.as_deref())?;
        return Ok(json!({ "results": results }));
    }
    let submissions = ledger.list_submissions(kind, student_id.as_deref())?;
    Ok(json!({ "submissions": submissions }))
}

/// What the student can currently see; answer keys are hidden from
/// students.
fn handle_for_student(state: &mut AppState, params: &Value) -> HandlerResult {
    let user = current_user(state)?;
    let student_id = acting_student(state, params, "studentId")?;
    let listing = ledger_mut(state)?.assignments_for_student(&student_id)?;
    let mut out = to_value(&listing)?;
    if user.role != Role::Admin {
        if let Some(tests) = out.get_mut("tests") {
            redact_answers(tests);
        }
    }
    Ok(out)
}

fn dispatch(state: &mut AppState, kind: AssignmentKind, verb: &str, params: &Value) -> Option<HandlerResult> {
    Some(match (kind, verb) {
        (_, "list") => handle_list(state, kind),
        (_, "create") => handle_create(state, kind, params),
        (_, "setStatus") => handle_set_status(state, kind, params),
        (_, "delete") => handle_delete(state, kind, params),
        (_, "clear") => handle_clear(state, kind),
        (_, "submit") => handle_submit(state, kind, params),
        (AssignmentKind::Test, "results") => handle_submissions(state, kind, params),
        (AssignmentKind::Task | AssignmentKind::Project, "grade") => handle_grade(state, kind, params),
        (AssignmentKind::Task | AssignmentKind::Project, "submissions") => {
            handle_submissions(state, kind, params)
        }
        _ => return None,
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method == "assignments.forStudent" {
        return Some(respond(&req.id, handle_for_student(state, &req.params)));
    }
    let (family, verb) = req.method.split_once('.')?;
    if !matches!(family, "tasks" | "tests" | "projects") {
        return None;
    }
    let kind = AssignmentKind::parse(family)?;
    let result = dispatch(state, kind, verb, &req.params)?;
    Some(respond(&req.id, result))
}
