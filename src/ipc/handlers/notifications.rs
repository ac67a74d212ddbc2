use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_query_failed, get_optional_bool, get_required_str, require_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repo::{Repository, UserRow};
use serde_json::{json, Value};

fn load_user(repo: &Repository<'_>, user_id: &str) -> Result<UserRow, HandlerErr> {
    let user = repo
        .find_user(user_id)
        .map_err(db_query_failed)?
        .ok_or_else(|| HandlerErr::new("not_found", "user not found"))?;
    if user.banned {
        return Err(HandlerErr::new("forbidden", "user is banned"));
    }
    Ok(user)
}

fn notifications_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (_, conn) = require_workspace(state)?;
    let user_id = get_required_str(params, "userId")?;
    let unread_only = get_optional_bool(params, "unreadOnly")?.unwrap_or(false);

    let repo = Repository::new(conn);
    let user = load_user(&repo, &user_id)?;
    let rows = repo
        .notifications_for_user(&user, unread_only)
        .map_err(db_query_failed)?;
    let unread = rows.iter().filter(|n| !n.read).count();
    Ok(json!({ "notifications": rows, "unreadCount": unread }))
}

fn notifications_mark_read(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (_, conn) = require_workspace(state)?;
    let user_id = get_required_str(params, "userId")?;
    let notification_id = get_required_str(params, "notificationId")?;

    let repo = Repository::new(conn);
    let user = load_user(&repo, &user_id)?;
    let marked = repo
        .mark_notification_read(&user.id, &notification_id)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if !marked {
        return Err(HandlerErr::new("not_found", "notification not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "notifications.list" => notifications_list(state, &req.params),
        "notifications.markRead" => notifications_mark_read(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
