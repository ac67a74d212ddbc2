//! Bulk resource upload: sheet rows in, placed files plus `resources` and
//! `notifications` rows out, with a per-row summary for the caller.

use crate::placement::FilePlacer;
use crate::repo::{Access, NewNotification, NewResource, Repository};
use crate::settings::UploadSettings;
use crate::sheet::{self, SheetError, SheetRow};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub skip_duplicates: bool,
    pub skip_missing: bool,
    pub dry_run: bool,
}

impl UploadOptions {
    pub fn defaults_from(settings: &UploadSettings) -> Self {
        Self {
            skip_duplicates: settings.default_skip_duplicates,
            skip_missing: settings.default_skip_missing,
            dry_run: false,
        }
    }

    /// Overlays an `options` object (snake_case, camelCase accepted) onto `self`.
    pub fn merged_with(mut self, raw: Option<&Value>) -> Result<Self, String> {
        let Some(raw) = raw else {
            return Ok(self);
        };
        if raw.is_null() {
            return Ok(self);
        }
        let Some(obj) = raw.as_object() else {
            return Err("options must be an object".to_string());
        };
        for (k, v) in obj {
            let slot = match k.as_str() {
                "skip_duplicates" | "skipDuplicates" => &mut self.skip_duplicates,
                "skip_missing" | "skipMissing" => &mut self.skip_missing,
                "dry_run" | "dryRun" => &mut self.dry_run,
                _ => continue,
            };
            *slot = v
                .as_bool()
                .ok_or_else(|| format!("options.{} must be boolean", k))?;
        }
        Ok(self)
    }
}

/// Result object returned to the caller; field names are part of the wire contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub total_files: usize,
    pub successful_uploads: usize,
    pub failed_uploads: usize,
    pub skipped_duplicates: usize,
    pub skipped_missing: usize,
    pub success: Vec<String>,
    pub errors: Vec<String>,
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("Class '{0}' not found")]
    UnknownClass(String),
    #[error("Resource '{title}' already exists for class '{class_name}'")]
    Duplicate { title: String, class_name: String },
    #[error("File not found: {0}")]
    MissingFile(String),
    #[error("File type not allowed: {0}")]
    DisallowedExtension(String),
    #[error("Failed to copy {file}: {source}")]
    Placement {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Database error for '{title}': {source}")]
    Database {
        title: String,
        #[source]
        source: rusqlite::Error,
    },
}

enum RowOutcome {
    Uploaded(String),
    Skipped(RowError),
    Failed(RowError),
}

pub struct BulkUploader<'c> {
    conn: &'c Connection,
    workspace: PathBuf,
    settings: UploadSettings,
    placer: FilePlacer,
}

impl<'c> BulkUploader<'c> {
    pub fn new(conn: &'c Connection, workspace: &Path, settings: UploadSettings) -> Self {
        let placer = FilePlacer::new(workspace.join(&settings.uploads_dir), settings.nest_by_class);
        Self {
            conn,
            workspace: workspace.to_path_buf(),
            settings,
            placer,
        }
    }

    /// Validates the sheet, then processes every row independently.
    /// Only a sheet-level problem is returned as `Err`; row problems land in the summary.
    pub fn run(
        &self,
        sheet_path: &Path,
        sheet_name: &str,
        uploaded_by: &str,
        options: UploadOptions,
    ) -> Result<UploadSummary, SheetError> {
        let rows = sheet::read_sheet(sheet_path, sheet_name)?;
        let base_dir = sheet_path.parent().unwrap_or(Path::new(""));

        let mut summary = UploadSummary {
            total_files: rows.len(),
            dry_run: options.dry_run,
            ..UploadSummary::default()
        };
        let mut claimed = Claims::default();

        for row in &rows {
            match self.process_row(row, base_dir, uploaded_by, options, &mut claimed) {
                RowOutcome::Uploaded(msg) => {
                    debug!(row = row.row, title = %row.title, "{}", msg);
                    summary.success.push(format!("Row {}: {}", row.row, msg));
                }
                RowOutcome::Skipped(e) => {
                    debug!(row = row.row, reason = %e, "row skipped");
                    match e {
                        RowError::Duplicate { .. } => summary.skipped_duplicates += 1,
                        _ => summary.skipped_missing += 1,
                    }
                    summary.skipped.push(format!("Row {}: Skipped: {}", row.row, e));
                }
                RowOutcome::Failed(e) => {
                    warn!(row = row.row, error = %e, "row failed");
                    summary.errors.push(format!("Row {}: {}", row.row, e));
                }
            }
        }
        summary.successful_uploads = summary.success.len();
        summary.failed_uploads = summary.errors.len();

        info!(
            sheet = %sheet_path.to_string_lossy(),
            total = summary.total_files,
            successful = summary.successful_uploads,
            failed = summary.failed_uploads,
            skipped = summary.skipped.len(),
            dry_run = summary.dry_run,
            "bulk upload finished"
        );
        Ok(summary)
    }

    fn process_row(
        &self,
        row: &SheetRow,
        base_dir: &Path,
        uploaded_by: &str,
        options: UploadOptions,
        claimed: &mut Claims,
    ) -> RowOutcome {
        let repo = Repository::new(self.conn);
        let db_err = |source| RowError::Database {
            title: row.title.clone(),
            source,
        };

        let class_id = match repo.find_class_id_by_name(&row.class_name) {
            Ok(Some(id)) => id,
            Ok(None) => return RowOutcome::Failed(RowError::UnknownClass(row.class_name.clone())),
            Err(e) => return RowOutcome::Failed(db_err(e)),
        };

        let key = (row.title.clone(), class_id.clone());
        let exists = if claimed.titles.contains(&key) {
            true
        } else {
            match repo.find_active_resource(&row.title, &class_id) {
                Ok(found) => found.is_some(),
                Err(e) => return RowOutcome::Failed(db_err(e)),
            }
        };
        if exists {
            return by_policy(options.skip_duplicates, duplicate_of(row));
        }

        let source = resolve_source(base_dir, &row.file_path);
        if !source.is_file() {
            return by_policy(
                options.skip_missing,
                RowError::MissingFile(row.file_path.clone()),
            );
        }

        if !self.settings.is_allowed_extension(&row.file_name) {
            return RowOutcome::Failed(RowError::DisallowedExtension(row.file_name.clone()));
        }

        if options.dry_run {
            let dest = self.placer.preview(
                &row.file_name,
                &row.class_name,
                &row.category,
                &claimed.paths,
            );
            let shown = self.relative(&dest);
            claimed.titles.insert(key);
            claimed.paths.insert(dest);
            return RowOutcome::Uploaded(format!("Would upload '{}' to {}", row.title, shown));
        }

        let placed = match self
            .placer
            .place(&source, &row.file_name, &row.class_name, &row.category)
        {
            Ok(p) => p,
            Err(source) => {
                return RowOutcome::Failed(RowError::Placement {
                    file: row.file_path.clone(),
                    source,
                })
            }
        };
        let stored = self.relative(&placed);

        if let Err(e) = self.register(row, &class_id, &stored, uploaded_by) {
            // Keep disk and database in step: a copy without a row is garbage.
            if let Err(rm) = std::fs::remove_file(&placed) {
                warn!(path = %placed.to_string_lossy(), error = %rm, "failed to remove orphaned copy");
            }
            return match e {
                RowError::Duplicate { .. } => by_policy(options.skip_duplicates, e),
                other => RowOutcome::Failed(other),
            };
        }
        claimed.titles.insert(key);
        claimed.paths.insert(placed);
        RowOutcome::Uploaded(format!("Uploaded '{}' to {}", row.title, stored))
    }

    /// Inserts the resource and its notification in one transaction.
    fn register(
        &self,
        row: &SheetRow,
        class_id: &str,
        stored_path: &str,
        uploaded_by: &str,
    ) -> Result<String, RowError> {
        let to_row_err = |source: rusqlite::Error| {
            if is_unique_violation(&source) {
                duplicate_of(row)
            } else {
                RowError::Database {
                    title: row.title.clone(),
                    source,
                }
            }
        };

        let access = if self.settings.is_paid_category(&row.category) {
            Access::Paid
        } else {
            Access::All
        };
        let filename = Path::new(stored_path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(stored_path);

        let tx = self.conn.unchecked_transaction().map_err(to_row_err)?;
        let repo = Repository::new(&tx);
        let resource_id = repo
            .insert_resource(&NewResource {
                filename,
                class_id,
                filepath: stored_path,
                title: &row.title,
                description: &row.description,
                category: &row.category,
                paid_status: access,
                uploaded_by,
            })
            .map_err(to_row_err)?;
        let title = format!("New {}: {}", row.category, row.title);
        let message = format!("'{}' is now available for {}", row.title, row.class_name);
        repo.insert_notification(&NewNotification {
            title: &title,
            message: &message,
            target: access,
            class_id: Some(class_id),
            resource_id: Some(&resource_id),
            created_by: Some(uploaded_by),
        })
        .map_err(to_row_err)?;
        tx.commit().map_err(to_row_err)?;
        Ok(resource_id)
    }

    /// Workspace-relative path with `/` separators, as stored in `resources.filepath`.
    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.workspace).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Title/class pairs and destinations already taken earlier in the same run.
#[derive(Default)]
struct Claims {
    titles: HashSet<(String, String)>,
    paths: HashSet<PathBuf>,
}

fn by_policy(skip: bool, e: RowError) -> RowOutcome {
    if skip {
        RowOutcome::Skipped(e)
    } else {
        RowOutcome::Failed(e)
    }
}

fn duplicate_of(row: &SheetRow) -> RowError {
    RowError::Duplicate {
        title: row.title.clone(),
        class_name: row.class_name.clone(),
    }
}

fn resolve_source(base_dir: &Path, file_path: &str) -> PathBuf {
    let p = Path::new(file_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
