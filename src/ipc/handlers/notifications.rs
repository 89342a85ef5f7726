use crate::ipc::helpers::{
    current_user, get_id_list, get_optional_i64, get_optional_str, get_required_id, get_required_str,
    ledger_mut, listing_scope, require_admin, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Priority, Role};
use serde_json::{json, Value};

fn handle_list(state: &mut AppState) -> HandlerResult {
    let user = current_user(state)?;
    let (notifications, unread) = ledger_mut(state)?.notifications_for(&user.id)?;
    Ok(json!({ "notifications": notifications, "unread": unread }))
}

fn handle_mark_read(state: &mut AppState, params: &Value) -> HandlerResult {
    let user = current_user(state)?;
    let id = get_required_id(params, "notificationId")?;
    let owner = (user.role != Role::Admin).then_some(user.id.as_str());
    ledger_mut(state)?.mark_notification_as_read(&id, owner)?;
    Ok(json!({ "ok": true }))
}

/// Admin message to the listed users, or every student when none are listed.
fn handle_send(state: &mut AppState, params: &Value) -> HandlerResult {
    require_admin(state)?;
    let user_ids = get_id_list(params, "userIds")?;
    let title = get_required_str(params, "title")?;
    let message = get_required_str(params, "message")?;
    let priority: Priority = match params.get("priority").filter(|v| !v.is_null()) {
        None => Priority::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| HandlerErr::bad_params("priority must be high, normal or low"))?,
    };
    let sent = ledger_mut(state)?.send_notification(&user_ids, &title, &message, priority)?;
    Ok(json!({ "recipients": sent }))
}

fn handle_activity_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let user_id = listing_scope(state, params, "userId")?;
    let entries = ledger_mut(state)?.activity_for(user_id.as_deref())?;
    Ok(json!({ "activity": entries }))
}

fn handle_chat_send(state: &mut AppState, params: &Value) -> HandlerResult {
    let user = current_user(state)?;
    let text = get_optional_str(params, "text").unwrap_or_default();
    let image_url = get_optional_str(params, "imageUrl");
    let message = ledger_mut(state)?.send_chat_message(&user, &text, image_url.as_deref())?;
    Ok(json!({ "message": message }))
}

fn handle_chat_list(state: &mut AppState, params: &Value) -> HandlerResult {
    current_user(state)?;
    let limit = match get_optional_i64(params, "limit")? {
        Some(n) if n < 0 => return Err(HandlerErr::bad_params("limit must be >= 0")),
        Some(n) => Some(n as usize),
        None => None,
    };
    let messages = ledger_mut(state)?.chat_messages(limit)?;
    Ok(json!({ "messages": messages }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "notifications.list" => handle_list(state),
        "notifications.markRead" => handle_mark_read(state, p),
        "notifications.send" => handle_send(state, p),
        "activity.list" => handle_activity_list(state, p),
        "chat.send" => handle_chat_send(state, p),
        "chat.list" => handle_chat_list(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
