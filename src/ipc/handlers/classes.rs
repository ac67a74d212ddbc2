use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::repo::Repository;
use serde_json::json;
use tracing::info;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match Repository::new(conn).list_classes() {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let repo = Repository::new(conn);
    match repo.find_class_id_by_name(&name) {
        Ok(Some(existing)) => {
            return err(
                &req.id,
                "conflict",
                format!("class '{}' already exists", name),
                Some(json!({ "classId": existing })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match repo.create_class(&name) {
        Ok(class_id) => {
            info!(class = %name, "class created");
            ok(&req.id, json!({ "classId": class_id, "name": name }))
        }
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        _ => None,
    }
}
