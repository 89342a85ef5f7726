use crate::ipc::helpers::{ledger_mut, require_admin, respond, to_value, HandlerResult};
use crate::ipc::types::{AppState, Request};

fn handle_overview(state: &mut AppState) -> HandlerResult {
    require_admin(state)?;
    let stats = ledger_mut(state)?.get_statistics()?;
    to_value(&stats)
}

fn handle_payments(state: &mut AppState) -> HandlerResult {
    require_admin(state)?;
    let stats = ledger_mut(state)?.get_payment_statistics()?;
    to_value(&stats)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.overview" => handle_overview(state),
        "stats.payments" => handle_payments(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
