use crate::error::LedgerError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::ledger::Ledger;
use crate::model::{Role, User};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(id: &str, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn to_value<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("store_failed", e.to_string()))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Present, non-blank string parameter.
pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Document ids end up as path segments, so the separator and the
/// characters the store reserves are refused.
pub fn get_required_id(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let id = get_required_str(params, key)?;
    let id = id.trim();
    if id.is_empty() || id.contains(['/', '.', '#', '$', '[', ']']) {
        return Err(HandlerErr::bad_params(format!("invalid {}", key)));
    }
    Ok(id.to_string())
}

pub fn get_optional_id(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => get_required_id(params, key).map(Some),
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-integer {}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_bool(params: &Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Missing means empty.
pub fn get_id_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let id = item
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.contains(['/', '.', '#', '$', '[', ']']))
            .ok_or_else(|| HandlerErr::bad_params(format!("invalid entry in {}", key)))?;
        out.push(id.to_string());
    }
    Ok(out)
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key) {
        None => Ok(None),
        Some(_) => get_required_date(params, key).map(Some),
    }
}

/// Accepts RFC 3339 timestamps or plain dates (midnight UTC).
pub fn get_optional_datetime(params: &Value, key: &str) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key) else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a date", key)))
}

pub fn ledger_mut(state: &mut AppState) -> Result<&mut Ledger, HandlerErr> {
    state
        .ledger
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Signed-in user, re-read so role and name changes are picked up. While
/// offline the session copy is used.
pub fn current_user(state: &mut AppState) -> Result<User, HandlerErr> {
    ledger_mut(state)?;
    let session = state
        .session
        .clone()
        .ok_or_else(|| HandlerErr::new("not_authenticated", "sign in first"))?;
    let user = match ledger_mut(state)?.load_user(&session.id) {
        Ok(u) => u,
        Err(LedgerError::Offline) => return Ok(session),
        Err(LedgerError::NotFound(_)) => {
            state.session = None;
            return Err(HandlerErr::new("not_authenticated", "account no longer exists"));
        }
        Err(e) => return Err(e.into()),
    };
    state.session = Some(user.clone());
    Ok(user)
}

pub fn require_admin(state: &mut AppState) -> Result<User, HandlerErr> {
    let user = current_user(state)?;
    if user.role != Role::Admin {
        return Err(HandlerErr::new("forbidden", "administrator access required"));
    }
    Ok(user)
}

/// Student the request acts on: students always act on themselves; admins
/// name one with `key`.
pub fn acting_student(state: &mut AppState, params: &Value, key: &str) -> Result<String, HandlerErr> {
    let user = current_user(state)?;
    let named = get_optional_id(params, key)?;
    match user.role {
        Role::Admin => named.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key))),
        Role::Student => match named {
            Some(id) if id != user.id => Err(HandlerErr::new(
                "forbidden",
                "students may only act on their own account",
            )),
            _ => Ok(user.id),
        },
    }
}

/// Filter for listings: admins may pass `key` (or nothing for everyone);
/// students always see their own rows.
pub fn listing_scope(state: &mut AppState, params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let user = current_user(state)?;
    match user.role {
        Role::Admin => get_optional_id(params, key),
        Role::Student => acting_student(state, params, key).map(Some),
    }
}
