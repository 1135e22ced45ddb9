/// Submission-scoped working copy
///
/// Each evaluation copies `<project>/src` into its own `test-NNN` directory, so
/// parallel evaluations never share files.
use crate::config::types::{GradeError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

pub const SOURCE_DIR: &str = "src";
pub const LOG_DIR: &str = "log";

/// Working copy of one submission
pub struct SubmissionWorkspace {
    number: usize,
    project_dir: PathBuf,
    dir: PathBuf,
    /// Copied and added files, relative to `dir`
    files: Vec<PathBuf>,
    /// Extra archive entries: (archive name, file on disk)
    extra_files: Vec<(String, PathBuf)>,
    keep: bool,
    removed: bool,
}

impl SubmissionWorkspace {
    /// Copy `<project>/src` to `<project>/test-NNN`, lower-casing file suffixes
    pub fn create(project_dir: &Path, number: usize, keep: bool) -> Result<Self> {
        let source = project_dir.join(SOURCE_DIR);
        if !source.is_dir() {
            return Err(GradeError::Config(format!(
                "no submission sources in {}",
                source.display()
            )));
        }
        let dir = project_dir.join(format!("test-{:03}", number));
        if dir.exists() {
            log::warn!("Replacing stale working copy {}", dir.display());
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir).map_err(|e| {
            GradeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create working copy {}: {}", dir.display(), e),
            ))
        })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let relative = lowercase_suffix(relative);
            let target = dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files.push(relative);
        }
        fs::create_dir_all(dir.join(LOG_DIR))?;
        log::info!("Working copy {} with {} files", dir.display(), files.len());

        Ok(Self {
            number,
            project_dir: project_dir.to_path_buf(),
            dir,
            files,
            extra_files: Vec::new(),
            keep,
            removed: false,
        })
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.join(LOG_DIR)
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn extra_files(&self) -> &[(String, PathBuf)] {
        &self.extra_files
    }

    /// `<project>/test-NNN.zip`
    pub fn archive_path(&self) -> PathBuf {
        self.dir.with_extension("zip")
    }

    /// Create the log file `log/<sub>/<name>` if missing, parents included.
    ///
    /// Existing content is kept so several runs share one transcript.
    pub fn log_file(&self, sub: &str, name: &str) -> Result<PathBuf> {
        let path = self.log_dir().join(sub).join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(path)
    }

    /// Write a new source file with a unique name; returns its relative path
    pub fn add_source(&mut self, text: &str, suffix: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(format!("test-{}{}", short_id(), suffix));
        fs::write(self.dir.join(&relative), text)?;
        self.files.push(relative.clone());
        Ok(relative)
    }

    /// Ship `path` in the archive under `name`; a later file replaces an earlier one
    pub fn add_extra(&mut self, name: impl Into<String>, path: PathBuf) {
        let name = name.into();
        match self.extra_files.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = path,
            None => self.extra_files.push((name, path)),
        }
    }

    /// Remove the working copy unless configured to keep it (idempotent)
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        if self.keep {
            log::info!("Keeping working copy {}", self.dir.display());
            return Ok(());
        }
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                log::warn!("Failed to remove working copy {}: {}", self.dir.display(), e);
            }
        }
        Ok(())
    }
}

impl Drop for SubmissionWorkspace {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

pub(crate) fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn lowercase_suffix(path: &Path) -> PathBuf {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.chars().any(|c| c.is_uppercase()) => {
            path.with_extension(ext.to_lowercase())
        }
        _ => path.to_path_buf(),
    }
}
