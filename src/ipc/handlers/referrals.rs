use crate::ipc::helpers::{
    get_optional_str, get_required_id, ledger_mut, listing_scope, require_admin, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::ReferralStatus;
use serde_json::{json, Value};

fn handle_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let referrer_id = listing_scope(state, params, "referrerId")?;
    let status: Option<ReferralStatus> = match params.get("status").filter(|v| !v.is_null()) {
        None => None,
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|_| HandlerErr::bad_params("status must be pending, approved or rejected"))?,
        ),
    };
    let referrals = ledger_mut(state)?.list_referrals(referrer_id.as_deref(), status)?;
    Ok(json!({ "referrals": referrals }))
}

fn handle_approve(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let referral_id = get_required_id(params, "referralId")?;
    let referral = ledger_mut(state)?.approve_referral(&referral_id)?;
    Ok(json!({ "referral": referral }))
}

fn handle_reject(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let referral_id = get_required_id(params, "referralId")?;
    let reason = get_optional_str(params, "reason");
    let referral = ledger_mut(state)?.reject_referral(&referral_id, reason.as_deref())?;
    Ok(json!({ "referral": referral }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "referrals.list" => handle_list(state, p),
        "referrals.approve" => handle_approve(state, p),
        "referrals.reject" => handle_reject(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
