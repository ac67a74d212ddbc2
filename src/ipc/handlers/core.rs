use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::settings;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match get_required_str(&req.params, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.response(&req.id),
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // A broken settings row must not keep the workspace closed.
            if let Err(e) = settings::load_upload_settings(&conn) {
                warn!(error = %e, "upload settings unreadable; defaults will apply");
            }
            info!(workspace = %path.to_string_lossy(), "workspace selected");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            warn!(workspace = %path.to_string_lossy(), error = %e, "failed to open workspace");
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
