use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

pub const UPLOADS_SECTION_KEY: &str = "setup.uploads";

/// Per-workspace configuration for the bulk upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    pub sheet_name: String,
    pub uploads_dir: String,
    pub nest_by_class: bool,
    pub allowed_extensions: Vec<String>,
    pub paid_categories: Vec<String>,
    pub default_skip_duplicates: bool,
    pub default_skip_missing: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            sheet_name: "Resources".to_string(),
            uploads_dir: "uploads".to_string(),
            nest_by_class: true,
            allowed_extensions: [
                "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "png", "jpg", "jpeg",
                "mp4",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            paid_categories: ["worksheet", "formula", "formula sheet"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_skip_duplicates: false,
            default_skip_missing: false,
        }
    }
}

impl UploadSettings {
    pub fn is_allowed_extension(&self, file_name: &str) -> bool {
        let Some(ext) = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
        else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    pub fn is_paid_category(&self, category: &str) -> bool {
        let c = category.trim().to_lowercase();
        self.paid_categories
            .iter()
            .any(|p| p.trim().to_lowercase() == c)
    }
}

pub fn defaults_json() -> Value {
    serde_json::to_value(UploadSettings::default()).unwrap_or_else(|_| json!({}))
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_string_list(v: &Value, key: &str, max_len: usize) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    arr.iter()
        .map(|item| parse_string_max(item, key, max_len))
        .filter(|r| !matches!(r, Ok(s) if s.is_empty()))
        .collect()
}

fn parse_uploads_dir(v: &Value, key: &str) -> Result<String, String> {
    let s = parse_string_max(v, key, 200)?;
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    let p = std::path::Path::new(&s);
    if p.is_absolute()
        || p
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(format!("{} must be a relative path inside the workspace", key));
    }
    Ok(s)
}

/// Applies `patch` onto `current`, validating each field. Unknown fields are rejected.
pub fn merge_uploads_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "sheetName" => {
                obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
            }
            "uploadsDir" => {
                obj.insert(k.clone(), Value::String(parse_uploads_dir(v, k)?));
            }
            "nestByClass" | "defaultSkipDuplicates" | "defaultSkipMissing" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            "allowedExtensions" => {
                let exts = parse_string_list(v, k, 10)?
                    .into_iter()
                    .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                    .collect::<Vec<_>>();
                if exts.is_empty() {
                    return Err(format!("{} must not be empty", k));
                }
                if let Some(bad) = exts
                    .iter()
                    .find(|e| e.is_empty() || !e.chars().all(|c| c.is_ascii_alphanumeric()))
                {
                    return Err(format!("{} contains an invalid extension: {:?}", k, bad));
                }
                obj.insert(k.clone(), json!(exts));
            }
            "paidCategories" => {
                obj.insert(k.clone(), json!(parse_string_list(v, k, 64)?));
            }
            _ => return Err(format!("unknown uploads field: {}", k)),
        }
    }
    Ok(())
}

pub fn load_uploads_section(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = defaults_json();
    let Some(saved) = db::settings_get_json(conn, UPLOADS_SECTION_KEY)? else {
        return Ok(current);
    };
    let Some(saved_obj) = saved.as_object() else {
        warn!(key = UPLOADS_SECTION_KEY, "saved upload settings are not an object; using defaults");
        return Ok(current);
    };
    // One field at a time so a bad value only resets that field.
    for (k, v) in saved_obj {
        let mut single = Map::new();
        single.insert(k.clone(), v.clone());
        if let Err(e) = merge_uploads_patch(&mut current, &single) {
            warn!(field = %k, error = %e, "ignoring invalid saved upload setting");
        }
    }
    Ok(current)
}

pub fn load_upload_settings(conn: &Connection) -> anyhow::Result<UploadSettings> {
    let section = load_uploads_section(conn)?;
    Ok(serde_json::from_value(section)?)
}
