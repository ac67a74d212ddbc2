use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const MAX_SUFFIX: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryFolder {
    StudyMaterials,
    Assignments,
    Notes,
    PracticeTests,
    ReferenceBooks,
    Videos,
    Other,
}

// First substring hit wins, so more specific keywords come first.
const CATEGORY_KEYWORDS: &[(&str, CategoryFolder)] = &[
    ("study material", CategoryFolder::StudyMaterials),
    ("assignment", CategoryFolder::Assignments),
    ("homework", CategoryFolder::Assignments),
    ("practice", CategoryFolder::PracticeTests),
    ("test", CategoryFolder::PracticeTests),
    ("note", CategoryFolder::Notes),
    ("reference", CategoryFolder::ReferenceBooks),
    ("book", CategoryFolder::ReferenceBooks),
    ("video", CategoryFolder::Videos),
];

impl CategoryFolder {
    pub const ALL: [CategoryFolder; 7] = [
        CategoryFolder::StudyMaterials,
        CategoryFolder::Assignments,
        CategoryFolder::Notes,
        CategoryFolder::PracticeTests,
        CategoryFolder::ReferenceBooks,
        CategoryFolder::Videos,
        CategoryFolder::Other,
    ];

    pub fn from_category(category: &str) -> Self {
        let lowered = category.trim().to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map(|(_, folder)| *folder)
            .unwrap_or(CategoryFolder::Other)
    }

    pub fn folder_name(self) -> &'static str {
        match self {
            CategoryFolder::StudyMaterials => "study_materials",
            CategoryFolder::Assignments => "assignments",
            CategoryFolder::Notes => "notes",
            CategoryFolder::PracticeTests => "practice_tests",
            CategoryFolder::ReferenceBooks => "reference_books",
            CategoryFolder::Videos => "videos",
            CategoryFolder::Other => "other",
        }
    }
}

fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

/// Folder name for a class label: `"Class 10 / A"` becomes `"Class_10_A"`.
pub fn sanitize_folder_name(class_name: &str) -> String {
    let s = sanitize_component(class_name);
    if s.is_empty() {
        "unassigned".to_string()
    } else {
        s
    }
}

/// Destination file name: last path component only, unsafe characters collapsed.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let s = sanitize_component(last);
    if s.is_empty() {
        "file".to_string()
    } else {
        s
    }
}

/// `name.pdf` with `n = 2` gives `name_2.pdf`; `n = 0` is the name itself.
pub fn suffixed_name(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{n}.{ext}"),
        None => format!("{stem}_{n}"),
    }
}

/// Copies source files into `<root>/[<class>/]<category>/<name>`.
#[derive(Debug, Clone)]
pub struct FilePlacer {
    root: PathBuf,
    nest_by_class: bool,
}

impl FilePlacer {
    pub fn new(root: impl Into<PathBuf>, nest_by_class: bool) -> Self {
        Self {
            root: root.into(),
            nest_by_class,
        }
    }

    pub fn target_dir(&self, class_name: &str, category: &str) -> PathBuf {
        let mut dir = self.root.clone();
        if self.nest_by_class {
            dir.push(sanitize_folder_name(class_name));
        }
        dir.push(CategoryFolder::from_category(category).folder_name());
        dir
    }

    /// Where `place` would put the file right now, without touching disk.
    /// Paths in `taken` count as occupied even though nothing exists there yet.
    pub fn preview(
        &self,
        file_name: &str,
        class_name: &str,
        category: &str,
        taken: &HashSet<PathBuf>,
    ) -> PathBuf {
        let dir = self.target_dir(class_name, category);
        let name = sanitize_file_name(file_name);
        (0..MAX_SUFFIX)
            .map(|n| dir.join(suffixed_name(&name, n)))
            .find(|p| !p.exists() && !taken.contains(p))
            .unwrap_or_else(|| dir.join(suffixed_name(&name, MAX_SUFFIX)))
    }

    /// Copies `source` to a fresh destination and returns its path. The source is left alone.
    pub fn place(
        &self,
        source: &Path,
        file_name: &str,
        class_name: &str,
        category: &str,
    ) -> io::Result<PathBuf> {
        let dir = self.target_dir(class_name, category);
        std::fs::create_dir_all(&dir)?;
        let mut src = File::open(source)?;
        let (dest, mut dst) = reserve_unique(&dir, &sanitize_file_name(file_name))?;

        let copied = io::copy(&mut src, &mut dst).and_then(|_| preserve_metadata(&src, &dst));
        if let Err(e) = copied {
            drop(dst);
            let _ = std::fs::remove_file(&dest);
            return Err(e);
        }
        Ok(dest)
    }
}

fn preserve_metadata(src: &File, dst: &File) -> io::Result<()> {
    let meta = src.metadata()?;
    if let Ok(modified) = meta.modified() {
        dst.set_modified(modified)?;
    }
    dst.set_permissions(meta.permissions())
}

/// Claims the first free `name`, `name_1`, ... in `dir` with create-new semantics.
fn reserve_unique(dir: &Path, file_name: &str) -> io::Result<(PathBuf, File)> {
    for n in 0..MAX_SUFFIX {
        let candidate = dir.join(suffixed_name(file_name, n));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(f) => return Ok((candidate, f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        format!("no free name for {} in {}", file_name, dir.to_string_lossy()),
    ))
}
