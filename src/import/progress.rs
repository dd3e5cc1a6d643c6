//! Import task states and progress updates.

use std::time::Duration;

/// Lifecycle of one import task.
///
/// `Running` and `Paused` are the only reversible pair; everything after
/// them is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTaskState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed(String),
}

impl ImportTaskState {
    /// Terminal states can never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportTaskState::Completed | ImportTaskState::Cancelled | ImportTaskState::Failed(_)
        )
    }

    /// Active tasks count toward aggregate progress
    pub fn is_active(&self) -> bool {
        matches!(self, ImportTaskState::Running | ImportTaskState::Paused)
    }
}

/// One progress observation, recomputed per unit of work
#[derive(Debug, Clone)]
pub struct ImportProgressUpdate {
    pub task_id: String,
    pub current_file_index: usize,
    pub total_files: usize,
    /// Progress through the current file, 0.0..=1.0
    pub current_file_progress: f64,
    /// Progress through the whole batch, 0.0..=1.0
    pub overall_progress: f64,
    pub current_file_name: Option<String>,
    pub state: ImportTaskState,
    /// Moving-average estimate; `None` until one item has completed
    pub estimated_time_remaining: Option<Duration>,
}

impl ImportProgressUpdate {
    /// Initial progress for a freshly created task
    pub fn initial(task_id: &str, total_files: usize, state: ImportTaskState) -> Self {
        Self {
            task_id: task_id.to_string(),
            current_file_index: 0,
            total_files,
            current_file_progress: 0.0,
            overall_progress: 0.0,
            current_file_name: None,
            state,
            estimated_time_remaining: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(ImportTaskState::Completed.is_terminal());
        assert!(ImportTaskState::Cancelled.is_terminal());
        assert!(ImportTaskState::Failed("x".into()).is_terminal());
        assert!(!ImportTaskState::Running.is_terminal());
        assert!(!ImportTaskState::Paused.is_terminal());

        assert!(ImportTaskState::Running.is_active());
        assert!(ImportTaskState::Paused.is_active());
        assert!(!ImportTaskState::Idle.is_active());
        assert!(!ImportTaskState::Completed.is_active());
    }
}
