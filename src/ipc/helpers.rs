use crate::ipc::error::err;
use crate::ipc::types::AppState;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;

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

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_query_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn require_workspace(state: &AppState) -> Result<(&Path, &Connection), HandlerErr> {
    match (state.workspace.as_deref(), state.db.as_ref()) {
        (Some(ws), Some(conn)) => Ok((ws, conn)),
        _ => Err(HandlerErr::new("no_workspace", "select a workspace first")),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be string", key))),
    }
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be boolean", key))),
    }
}
