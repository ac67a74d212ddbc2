use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, get_optional_bool, get_optional_str, get_required_str, require_workspace,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repo::Repository;
use crate::settings::{self, UploadSettings};
use crate::sheet;
use crate::upload::{BulkUploader, UploadOptions};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::warn;

fn load_settings(conn: &Connection) -> UploadSettings {
    settings::load_upload_settings(conn).unwrap_or_else(|e| {
        warn!(error = %e, "falling back to default upload settings");
        UploadSettings::default()
    })
}

fn handle_validate_sheet(state: &mut AppState, req: &Request) -> Value {
    let sheet_path = match get_required_str(&req.params, "sheetPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let sheet_name = match get_optional_str(&req.params, "sheetName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let sheet_name = sheet_name.unwrap_or_else(|| {
        state
            .db
            .as_ref()
            .map(load_settings)
            .unwrap_or_default()
            .sheet_name
    });

    let check = sheet::check_sheet(&sheet_path, &sheet_name);
    ok(
        &req.id,
        json!({ "valid": check.is_valid, "message": check.message }),
    )
}

fn bulk_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (workspace, conn) = require_workspace(state)?;
    let sheet_path = PathBuf::from(get_required_str(params, "sheetPath")?);
    let uploaded_by = get_required_str(params, "uploadedBy")?;
    let sheet_name = get_optional_str(params, "sheetName")?;

    let settings = load_settings(conn);
    let options = UploadOptions::defaults_from(&settings)
        .merged_with(params.get("options"))
        .map_err(|m| HandlerErr::new("bad_params", m))?;
    let sheet_name = sheet_name.unwrap_or_else(|| settings.sheet_name.clone());

    let uploader = BulkUploader::new(conn, workspace, settings);
    match uploader.run(&sheet_path, &sheet_name, &uploaded_by, options) {
        Ok(summary) => Ok(json!({ "success": true, "results": summary })),
        Err(e) => {
            warn!(sheet = %sheet_path.to_string_lossy(), error = %e, "sheet rejected");
            Err(HandlerErr {
                code: "invalid_sheet",
                message: e.to_string(),
                details: Some(json!({ "success": false, "sheetPath": sheet_path.to_string_lossy() })),
            })
        }
    }
}

fn handle_bulk_upload(state: &mut AppState, req: &Request) -> Value {
    match bulk_upload(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_resources_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match get_optional_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let include_inactive = match get_optional_bool(&req.params, "includeInactive") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e.response(&req.id),
    };

    match Repository::new(conn).list_resources(class_id.as_deref(), include_inactive) {
        Ok(rows) => ok(&req.id, json!({ "resources": rows })),
        Err(e) => db_query_failed(e).response(&req.id),
    }
}

fn handle_resources_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let resource_id = match get_required_str(&req.params, "resourceId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match Repository::new(conn).deactivate_resource(&resource_id) {
        Ok(true) => ok(&req.id, json!({ "ok": true, "resourceId": resource_id })),
        Ok(false) => err(&req.id, "not_found", "resource not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_record_download(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let resource_id = match get_required_str(&req.params, "resourceId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match Repository::new(conn).record_download(&resource_id) {
        Ok(Some((filepath, count))) => ok(
            &req.id,
            json!({ "filepath": filepath, "downloadCount": count }),
        ),
        Ok(None) => err(&req.id, "not_found", "resource not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "resources.validateSheet" => Some(handle_validate_sheet(state, req)),
        "resources.bulkUpload" => Some(handle_bulk_upload(state, req)),
        "resources.list" => Some(handle_resources_list(state, req)),
        "resources.delete" => Some(handle_resources_delete(state, req)),
        "resources.recordDownload" => Some(handle_record_download(state, req)),
        _ => None,
    }
}
