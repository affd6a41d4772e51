use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn plans_dir(project_root: &Path) -> PathBuf {
    project_root.join(".nyzhi").join("plans")
}

pub fn load_plan(project_root: &Path, name: &str) -> Result<Option<String>> {
    let dir = plans_dir(project_root);
    let safe_name: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let path = dir.join(format!("{safe_name}.md"));
    if path.exists() {
        Ok(Some(std::fs::read_to_string(&path)?))
    } else {
        Ok(None)
    }
}

pub fn list_plans(project_root: &Path) -> Result<Vec<String>> {
    let dir = plans_dir(project_root);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = name.strip_suffix(".md") {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// A single todo item on a session's `.plan.md` checklist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanTodo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanFrontmatter {
    pub name: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub todos: Vec<PlanTodo>,
}

/// The `create_plan` tool's persisted artifact: YAML frontmatter (name,
/// overview, todos) followed by a free-form Markdown body, one per session.
#[derive(Debug, Clone, Default)]
pub struct PlanFile {
    pub frontmatter: PlanFrontmatter,
    pub body: String,
}

impl PlanFile {
    /// (completed, total) todo count, for a quick progress readout.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.frontmatter.todos.len();
        let done = self.frontmatter.todos.iter().filter(|t| t.status == TodoStatus::Completed).count();
        (done, total)
    }
}

fn session_plan_path(project_root: &Path, session_id: &str) -> PathBuf {
    plans_dir(project_root).join(format!("{session_id}.plan.md"))
}

pub fn serialize_plan(plan: &PlanFile) -> String {
    let yaml = serde_yaml::to_string(&plan.frontmatter).unwrap_or_default();
    format!("---\n{yaml}---\n\n{}", plan.body)
}

fn parse_plan(content: &str) -> PlanFile {
    let trimmed = content.trim_start();
    if let Some(after_first) = trimmed.strip_prefix("---") {
        if let Some(end) = after_first.find("\n---") {
            let yaml_str = &after_first[..end];
            let body = after_first[end + 4..].trim_start_matches('\n').to_string();
            let frontmatter = serde_yaml::from_str(yaml_str).unwrap_or_default();
            return PlanFile { frontmatter, body };
        }
    }
    PlanFile { frontmatter: PlanFrontmatter::default(), body: content.to_string() }
}

pub fn load_session_plan(project_root: &Path, session_id: &str) -> Result<Option<PlanFile>> {
    let path = session_plan_path(project_root, session_id);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(Some(parse_plan(&content)))
}

pub fn save_session_plan(project_root: &Path, session_id: &str, plan: &PlanFile) -> Result<PathBuf> {
    let dir = plans_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let path = session_plan_path(project_root, session_id);
    std::fs::write(&path, serialize_plan(plan))?;
    Ok(path)
}
