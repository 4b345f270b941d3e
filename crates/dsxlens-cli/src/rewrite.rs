//! Rewriting export files in place, keeping a backup of the original

use anyhow::{bail, Context, Result};
use dsxlens_engine::{apply, plan_replacement, ChangelogEntry, IndexOptions, MutationOutcome, ReplacementRequest};
use dsxlens_export::{ExportFile, JobDocument};
use std::path::{Path, PathBuf};

/// A file after one replacement request
pub struct FileRewrite {
    pub path: PathBuf,
    pub original: String,
    pub rewritten: String,
    pub outcomes: Vec<MutationOutcome>,

    /// Jobs left unchanged because their revision failed, with the reason
    pub skipped: Vec<(String, String)>,
}

impl FileRewrite {
    pub fn is_changed(&self) -> bool {
        self.original != self.rewritten
    }

    pub fn changelog(&self) -> impl Iterator<Item = &ChangelogEntry> {
        self.outcomes.iter().flat_map(|outcome| outcome.changelog.iter())
    }
}

/// Apply `request` to every job in `text`
///
/// A job whose modifications cannot be applied is skipped and reported; the
/// other jobs of the file are still rewritten.
pub fn rewrite_file(path: &Path, text: String, request: &ReplacementRequest, options: &IndexOptions) -> FileRewrite {
    let mut export = ExportFile::parse(&text);
    let jobs: Vec<JobDocument> = export.jobs().cloned().collect();

    let mut outcomes = Vec::new();
    let mut skipped = Vec::new();
    for document in &jobs {
        let modifications = plan_replacement(document, request, options);
        if modifications.is_empty() {
            continue;
        }
        match apply(document, &modifications) {
            Ok(outcome) => {
                export.replace_job(&document.name, outcome.revision.document.clone());
                outcomes.push(outcome);
            }
            Err(error) => {
                tracing::warn!(job = %document.name, %error, "job left unchanged");
                skipped.push((document.name.clone(), error.to_string()));
            }
        }
    }

    FileRewrite {
        path: path.to_path_buf(),
        original: text,
        rewritten: export.to_text(),
        outcomes,
        skipped,
    }
}

/// `orders.dsx` + `backup` -> `orders.dsx.backup`
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix.trim_start_matches('.'));
    PathBuf::from(name)
}

/// Write the original text to the backup file, then the rewritten text over `path`
pub fn write_with_backup(rewrite: &FileRewrite, suffix: &str) -> Result<PathBuf> {
    if let Some(outcome) = rewrite.outcomes.iter().find(|outcome| !outcome.backup.verify()) {
        bail!("backup of job {} does not match its recorded hash", outcome.backup.job);
    }

    let backup = backup_path(&rewrite.path, suffix);
    std::fs::write(&backup, &rewrite.original)
        .with_context(|| format!("Failed to write backup {}", backup.display()))?;
    std::fs::write(&rewrite.path, &rewrite.rewritten)
        .with_context(|| format!("Failed to write {}", rewrite.path.display()))?;

    tracing::info!(path = %rewrite.path.display(), backup = %backup.display(), "rewrote export file");
    Ok(backup)
}
