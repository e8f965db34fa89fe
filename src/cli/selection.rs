use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use pilot_core_types::TestCase;

use crate::task_loader::{discover_tasks, TaskFilter};

/// Task selection flags shared by `run` and `list`.
#[derive(Args, Clone, Debug)]
pub struct TaskSelectionArgs {
    /// Directory containing task YAML/JSON files
    #[arg(long, default_value = "tasks")]
    pub tasks_dir: PathBuf,

    /// Only run the task with this id (repeatable)
    #[arg(long = "task", value_name = "ID")]
    pub tasks: Vec<String>,

    /// Only include tasks carrying this tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Exclude tasks carrying this tag (repeatable)
    #[arg(long = "exclude-tag", value_name = "TAG")]
    pub exclude_tags: Vec<String>,

    /// Include tasks marked skip
    #[arg(long)]
    pub include_skipped: bool,

    /// Order tasks by priority (1 first)
    #[arg(long)]
    pub sort_by_priority: bool,
}

impl TaskSelectionArgs {
    pub fn filter(&self) -> TaskFilter {
        TaskFilter {
            ids: self.tasks.clone(),
            include_tags: self.tags.iter().cloned().collect(),
            exclude_tags: self.exclude_tags.iter().cloned().collect(),
            include_skipped: self.include_skipped,
            sort_by_priority: self.sort_by_priority,
        }
    }

    pub fn discover(&self) -> Result<Vec<TestCase>> {
        discover_tasks(&self.tasks_dir, &self.filter())
            .with_context(|| format!("Failed to load tasks from {}", self.tasks_dir.display()))
    }
}
