use crate::ipc::helpers::{
    current_user, get_optional_str, get_required_str, ledger_mut, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{public_user, Registration};
use serde_json::{json, Value};

fn handle_login(state: &mut AppState, params: &Value) -> HandlerResult {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let ledger = ledger_mut(state)?;
    let Some(user) = ledger.authenticate_user(&email, &password)? else {
        return Err(HandlerErr::new("invalid_credentials", "email or password is incorrect"));
    };
    let doc = public_user(&user, ledger.policy());
    state.session = Some(user);
    Ok(json!({ "user": doc }))
}

/// Ends the session and drops every cached read.
fn handle_logout(state: &mut AppState) -> HandlerResult {
    state.session = None;
    if let Some(ledger) = state.ledger.as_mut() {
        ledger.records().clear_cache();
    }
    Ok(json!({ "ok": true }))
}

/// Registers a student and signs them in.
fn handle_register(state: &mut AppState, params: &Value) -> HandlerResult {
    let reg = Registration {
        name: get_required_str(params, "name")?,
        email: get_required_str(params, "email")?,
        password: get_required_str(params, "password")?,
        telegram: get_optional_str(params, "telegram"),
        referral_code: get_optional_str(params, "referralCode"),
    };
    let ledger = ledger_mut(state)?;
    let user = ledger.register_user(reg)?;
    let doc = public_user(&user, ledger.policy());
    state.session = Some(user);
    Ok(json!({ "user": doc }))
}

fn handle_whoami(state: &mut AppState) -> HandlerResult {
    if state.session.is_none() {
        return Ok(json!({ "user": null }));
    }
    let user = current_user(state)?;
    let ledger = ledger_mut(state)?;
    Ok(json!({ "user": public_user(&user, ledger.policy()) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_login(state, &req.params),
        "auth.logout" => handle_logout(state),
        "auth.register" => handle_register(state, &req.params),
        "auth.whoami" => handle_whoami(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
