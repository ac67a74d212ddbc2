mod test_support;

use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use test_support::{
    error_code, request, request_ok, spawn_sidecar, temp_dir, write_file, write_sheet,
};

fn insert_user(workspace: &Path, id: &str, class_id: Option<&str>, paid: bool, banned: bool) {
    let conn = Connection::open(workspace.join("classhub.sqlite3")).expect("open workspace db");
    conn.execute(
        "INSERT INTO users(id, username, password_hash, class_id, paid, banned, created_at)
         VALUES(?, ?, 'x', ?, ?, ?, '2024-01-01T00:00:00Z')",
        (id, id, class_id, paid as i64, banned as i64),
    )
    .expect("insert user");
}

fn titles(result: &serde_json::Value) -> Vec<String> {
    let mut out: Vec<String> = result["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .map(|n| n["title"].as_str().unwrap_or_default().to_string())
        .collect();
    out.sort();
    out
}

#[test]
fn uploads_notify_students_by_class_and_access() {
    let workspace = temp_dir("classhubd-notify");
    let a = workspace.join("incoming/a.pdf");
    let w = workspace.join("incoming/w.pdf");
    let o = workspace.join("incoming/o.pdf");
    write_file(&a, b"a");
    write_file(&w, b"w");
    write_file(&o, b"o");
    let sheet = write_sheet(
        &workspace.join("incoming/upload.csv"),
        &[
            ["a.pdf", &*a.to_string_lossy(), "Algebra", "", "Notes", "10th"],
            ["w.pdf", &*w.to_string_lossy(), "Drill", "", "Worksheet", "10th"],
            ["o.pdf", &*o.to_string_lossy(), "Optics", "", "Notes", "9th"],
        ],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tenth = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "10th" }));
    request_ok(&mut stdin, &mut reader, "3", "classes.create", json!({ "name": "9th" }));
    let tenth_id = tenth["classId"].as_str().expect("classId").to_string();

    insert_user(&workspace, "free-10", Some(&tenth_id), false, false);
    insert_user(&workspace, "paid-10", Some(&tenth_id), true, false);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "resources.bulkUpload",
        json!({ "sheetPath": sheet.to_string_lossy(), "uploadedBy": "admin" }),
    );
    assert_eq!(res["results"]["successful_uploads"], json!(3));

    let free = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notifications.list",
        json!({ "userId": "free-10" }),
    );
    assert_eq!(titles(&free), vec!["New Notes: Algebra".to_string()]);
    assert_eq!(free["unreadCount"], json!(1));

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.list",
        json!({ "userId": "paid-10" }),
    );
    assert_eq!(
        titles(&paid),
        vec![
            "New Notes: Algebra".to_string(),
            "New Worksheet: Drill".to_string()
        ]
    );
    let drill = paid["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .find(|n| n["title"] == json!("New Worksheet: Drill"))
        .expect("drill notification");
    assert_eq!(drill["target"], json!("paid"));
    assert_eq!(drill["classId"], json!(tenth_id));
    assert_eq!(drill["read"], json!(false));
}

#[test]
fn mark_read_is_per_user_and_filters_unread() {
    let workspace = temp_dir("classhubd-notify-read");
    let a = workspace.join("incoming/a.pdf");
    write_file(&a, b"a");
    let sheet = write_sheet(
        &workspace.join("incoming/upload.csv"),
        &[["a.pdf", &*a.to_string_lossy(), "Algebra", "", "Notes", "10th"]],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "10th" }));
    let class_id = class["classId"].as_str().expect("classId").to_string();
    insert_user(&workspace, "s1", Some(&class_id), false, false);
    insert_user(&workspace, "s2", Some(&class_id), false, false);
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "resources.bulkUpload",
        json!({ "sheetPath": sheet.to_string_lossy(), "uploadedBy": "admin" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.list",
        json!({ "userId": "s1" }),
    );
    let notification_id = listed["notifications"][0]["id"]
        .as_str()
        .expect("notification id")
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notifications.markRead",
        json!({ "userId": "s1", "notificationId": notification_id }),
    );
    // Marking twice is harmless.
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.markRead",
        json!({ "userId": "s1", "notificationId": notification_id }),
    );

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notifications.list",
        json!({ "userId": "s1", "unreadOnly": true }),
    );
    assert_eq!(s1["notifications"], json!([]));
    assert_eq!(s1["unreadCount"], json!(0));

    let s2 = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notifications.list",
        json!({ "userId": "s2", "unreadOnly": true }),
    );
    assert_eq!(s2["unreadCount"], json!(1));

    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "notifications.markRead",
        json!({ "userId": "s1", "notificationId": "does-not-exist" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));
}

#[test]
fn banned_and_unknown_users_are_refused() {
    let workspace = temp_dir("classhubd-notify-banned");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    insert_user(&workspace, "banned", None, true, true);

    let res = request(
        &mut stdin,
        &mut reader,
        "2",
        "notifications.list",
        json!({ "userId": "banned" }),
    );
    assert_eq!(error_code(&res), Some("forbidden"));

    let res = request(
        &mut stdin,
        &mut reader,
        "3",
        "notifications.list",
        json!({ "userId": "ghost" }),
    );
    assert_eq!(error_code(&res), Some("not_found"));

    let res = request(&mut stdin, &mut reader, "4", "notifications.list", json!({}));
    assert_eq!(error_code(&res), Some("bad_params"));
}
