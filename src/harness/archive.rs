/// Per-submission archive: `test.json`, `src/…`, `log/…` and extra files
use crate::check::Check;
use crate::config::types::{GradeError, Result};
use crate::harness::workspace::{SubmissionWorkspace, LOG_DIR, SOURCE_DIR};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CHECKS_ENTRY: &str = "test.json";

/// Write `test-NNN.zip` next to the working copy
pub fn write_archive(workspace: &SubmissionWorkspace, root: &Check) -> Result<PathBuf> {
    let path = workspace.archive_path();
    let mut zip = ZipWriter::new(File::create(&path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(CHECKS_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(root)?)?;

    for relative in workspace.files() {
        let source = workspace.dir().join(relative);
        if source.is_file() {
            add_file(&mut zip, &source, &entry_name(SOURCE_DIR, relative), options)?;
        }
    }
    for (name, source) in workspace.extra_files() {
        if source.is_file() {
            add_file(&mut zip, source, name, options)?;
        }
    }
    let log_dir = workspace.log_dir();
    for entry in WalkDir::new(&log_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(&log_dir) {
            add_file(&mut zip, entry.path(), &entry_name(LOG_DIR, relative), options)?;
        }
    }
    zip.finish()?;
    log::info!("Archived {}", path.display());
    Ok(path)
}

fn entry_name(prefix: &str, relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{}/{}", prefix, parts.join("/"))
}

fn add_file(
    zip: &mut ZipWriter<File>,
    source: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    zip.start_file(name, options)?;
    let mut file = File::open(source)?;
    std::io::copy(&mut file, zip)?;
    Ok(())
}

/// Read the check tree back from an archive
pub fn read_checks(path: &Path) -> Result<Check> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut entry = archive.by_name(CHECKS_ENTRY).map_err(|e| {
        GradeError::Archive(format!("{} in {}: {}", CHECKS_ENTRY, path.display(), e))
    })?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(serde_json::from_str(&text)?)
}
