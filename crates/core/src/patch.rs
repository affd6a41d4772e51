//! `Patch` and `PatchApply`: the two accepted patch shapes a builder may
//! produce, and the atomic-per-batch apply routine shared by both. Grounded
//! on the exact-match-or-abort discipline of `tools::edit` and the
//! backup/rollback discipline of `tools::apply_patch`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Replace,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReplaceEdit {
    pub action: EditAction,
    pub file: String,
    pub search_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_block: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Patch {
    SearchReplace { edits: Vec<SearchReplaceEdit> },
    FileWrites { files: Vec<FileWrite>, delete: Vec<String> },
}

impl Patch {
    /// Every file path this patch will touch, in patch order.
    pub fn touched_paths(&self) -> Vec<String> {
        match self {
            Patch::SearchReplace { edits } => {
                let mut out: Vec<String> = edits.iter().map(|e| e.file.clone()).collect();
                out.dedup();
                out
            }
            Patch::FileWrites { files, delete } => {
                let mut out: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
                out.extend(delete.iter().cloned());
                out
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackResult {
    pub ok: bool,
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchApplyFailure {
    pub error: String,
    pub source: String,
    pub patches: Vec<String>,
    pub rollback: RollbackResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// True when the underlying cause is ENOENT / an unknown target path --
    /// these trigger a single bounded replan rather than a plain retry.
    pub deterministic: bool,
}

enum Backup {
    Existed(String),
    Absent,
}

/// Apply a `Patch` against `cwd`, atomically at the batch level: either every
/// edit lands, or every file touched in this batch is restored to its
/// pre-apply content.
pub fn apply_patch(
    patch: &Patch,
    cwd: &Path,
    target_files: &[String],
    create_files: &[String],
) -> Result<Vec<String>, PatchApplyFailure> {
    match patch {
        Patch::SearchReplace { edits } => apply_search_replace(edits, cwd),
        Patch::FileWrites { files, delete } => apply_file_writes(files, delete, cwd, target_files, create_files),
    }
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) }
}

fn snapshot(path: &Path) -> Backup {
    match std::fs::read_to_string(path) {
        Ok(content) => Backup::Existed(content),
        Err(_) => Backup::Absent,
    }
}

fn restore_all(cwd: &Path, backups: &HashMap<String, Backup>) -> RollbackResult {
    let mut restored = Vec::new();
    let mut failed = Vec::new();
    for (file, backup) in backups {
        let path = resolve(cwd, file);
        let result = match backup {
            Backup::Existed(content) => std::fs::write(&path, content),
            Backup::Absent => {
                if path.exists() {
                    std::fs::remove_file(&path)
                } else {
                    Ok(())
                }
            }
        };
        match result {
            Ok(()) => restored.push(file.clone()),
            Err(_) => failed.push(file.clone()),
        }
    }
    RollbackResult { ok: failed.is_empty(), restored, failed }
}

fn apply_search_replace(edits: &[SearchReplaceEdit], cwd: &Path) -> Result<Vec<String>, PatchApplyFailure> {
    let mut backups: HashMap<String, Backup> = HashMap::new();
    let mut touched: Vec<String> = Vec::new();

    for edit in edits {
        backups
            .entry(edit.file.clone())
            .or_insert_with(|| snapshot(&resolve(cwd, &edit.file)));
    }

    for edit in edits {
        let path = resolve(cwd, &edit.file);
        let deterministic_missing = !path.exists();

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return Err(fail(
                    format!("cannot read {}: {e}", edit.file),
                    "read",
                    &touched,
                    cwd,
                    &backups,
                    deterministic_missing,
                ));
            }
        };

        let count = content.matches(&edit.search_block).count();
        if count != 1 {
            let reason = if count == 0 {
                format!("search_block not found in {}", edit.file)
            } else {
                format!("search_block matched {count} times in {} (must match exactly once)", edit.file)
            };
            return Err(fail(reason, "match", &touched, cwd, &backups, false));
        }

        let new_content = match edit.action {
            EditAction::Delete => content.replacen(&edit.search_block, "", 1),
            EditAction::Replace => {
                let replacement = edit.replace_block.as_deref().unwrap_or("");
                content.replacen(&edit.search_block, replacement, 1)
            }
        };

        if let Err(e) = std::fs::write(&path, &new_content) {
            return Err(fail(
                format!("cannot write {}: {e}", edit.file),
                "write",
                &touched,
                cwd,
                &backups,
                false,
            ));
        }
        touched.push(edit.file.clone());
    }

    Ok(dedup(touched))
}

fn apply_file_writes(
    files: &[FileWrite],
    delete: &[String],
    cwd: &Path,
    target_files: &[String],
    create_files: &[String],
) -> Result<Vec<String>, PatchApplyFailure> {
    let mut backups: HashMap<String, Backup> = HashMap::new();
    let mut touched: Vec<String> = Vec::new();

    for file in files {
        backups
            .entry(file.path.clone())
            .or_insert_with(|| snapshot(&resolve(cwd, &file.path)));
    }
    for path in delete {
        backups
            .entry(path.clone())
            .or_insert_with(|| snapshot(&resolve(cwd, path)));
    }

    for file in files {
        let allowed = target_files.iter().any(|t| t == &file.path) || create_files.iter().any(|c| c == &file.path);
        if !allowed {
            return Err(fail(
                format!("{} is not a declared plan target or create_files entry", file.path),
                "guardrail",
                &touched,
                cwd,
                &backups,
                false,
            ));
        }

        let path = resolve(cwd, &file.path);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(fail(format!("cannot create parent dirs for {}: {e}", file.path), "write", &touched, cwd, &backups, false));
            }
        }
        if let Err(e) = std::fs::write(&path, &file.content) {
            return Err(fail(format!("cannot write {}: {e}", file.path), "write", &touched, cwd, &backups, false));
        }
        touched.push(file.path.clone());
    }

    for path in delete {
        let full = resolve(cwd, path);
        if !full.exists() {
            return Err(fail(format!("cannot delete {path}: does not exist"), "delete", &touched, cwd, &backups, true));
        }
        if let Err(e) = std::fs::remove_file(&full) {
            return Err(fail(format!("cannot delete {path}: {e}"), "delete", &touched, cwd, &backups, false));
        }
        touched.push(path.clone());
    }

    Ok(dedup(touched))
}

fn dedup(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v.dedup();
    v
}

fn fail(
    error: String,
    source: &str,
    touched_before_failure: &[String],
    cwd: &Path,
    backups: &HashMap<String, Backup>,
    deterministic: bool,
) -> PatchApplyFailure {
    let rollback = restore_all(cwd, backups);
    PatchApplyFailure {
        error,
        source: source.to_string(),
        patches: touched_before_failure.to_vec(),
        rollback,
        raw_output: None,
        deterministic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn search_replace_applies_unique_match() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const greeting = \"Hello\";\n").unwrap();

        let patch = Patch::SearchReplace {
            edits: vec![SearchReplaceEdit {
                action: EditAction::Replace,
                file: "index.ts".into(),
                search_block: "\"Hello\"".into(),
                replace_block: Some("\"Hi\"".into()),
            }],
        };

        let touched = apply_patch(&patch, dir.path(), &["index.ts".into()], &[]).unwrap();
        assert_eq!(touched, vec!["index.ts".to_string()]);
        let content = std::fs::read_to_string(dir.path().join("index.ts")).unwrap();
        assert!(content.contains("\"Hi\""));
    }

    #[test]
    fn search_replace_ambiguous_match_aborts_whole_batch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "x\n").unwrap();
        std::fs::write(dir.path().join("b.ts"), "foo\nfoo\n").unwrap();

        let patch = Patch::SearchReplace {
            edits: vec![
                SearchReplaceEdit { action: EditAction::Replace, file: "a.ts".into(), search_block: "x".into(), replace_block: Some("y".into()) },
                SearchReplaceEdit { action: EditAction::Replace, file: "b.ts".into(), search_block: "foo".into(), replace_block: Some("bar".into()) },
            ],
        };

        let err = apply_patch(&patch, dir.path(), &["a.ts".into(), "b.ts".into()], &[]).unwrap_err();
        assert!(err.rollback.ok);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "x\n");
    }

    #[test]
    fn file_writes_reject_paths_outside_plan_targets() {
        let dir = tempdir().unwrap();
        let patch = Patch::FileWrites {
            files: vec![FileWrite { path: "sneaky.rs".into(), content: "fn main(){}".into() }],
            delete: vec![],
        };
        let err = apply_patch(&patch, dir.path(), &["allowed.rs".into()], &[]).unwrap_err();
        assert_eq!(err.source, "guardrail");
        assert!(!dir.path().join("sneaky.rs").exists());
    }

    #[test]
    fn file_writes_allows_declared_create_files() {
        let dir = tempdir().unwrap();
        let patch = Patch::FileWrites {
            files: vec![FileWrite { path: "new.rs".into(), content: "fn main(){}".into() }],
            delete: vec![],
        };
        let touched = apply_patch(&patch, dir.path(), &[], &["new.rs".into()]).unwrap();
        assert_eq!(touched, vec!["new.rs".to_string()]);
    }

    #[test]
    fn delete_missing_path_is_deterministic_failure() {
        let dir = tempdir().unwrap();
        let patch = Patch::FileWrites { files: vec![], delete: vec!["ghost.rs".into()] };
        let err = apply_patch(&patch, dir.path(), &[], &[]).unwrap_err();
        assert!(err.deterministic);
    }

    #[test]
    fn rollback_restores_newly_created_file_to_absent() {
        let dir = tempdir().unwrap();
        let patch = Patch::FileWrites {
            files: vec![
                FileWrite { path: "ok.rs".into(), content: "fn a(){}".into() },
            ],
            delete: vec!["ghost.rs".into()],
        };
        let err = apply_patch(&patch, dir.path(), &[], &["ok.rs".into()]).unwrap_err();
        assert!(err.rollback.ok);
        assert!(!dir.path().join("ok.rs").exists());
    }
}
