use vidgrab_core::{StatusReport, TaskStatus, VidgrabError, VidgrabResult, format_progress};

/// A task that reached `complete` and can be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask {
    pub task_id: String,
    pub filename: Option<String>,
    pub download_url: String,
}

/// Client-side view of a download task.
///
/// Every transition out of `Tracking` is driven by a server [`StatusReport`];
/// the client never infers progress on its own. `Complete` and `Failed` are
/// final and ignore anything that arrives afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    Submitting,
    Tracking {
        task_id: String,
        download_url: String,
        status: TaskStatus,
        progress: f64,
    },
    Complete {
        task_id: String,
        filename: Option<String>,
        download_url: String,
    },
    Failed {
        message: String,
    },
}

impl TaskState {
    pub fn submit(&mut self) {
        if !self.is_terminal() {
            *self = TaskState::Submitting;
        }
    }

    pub fn accepted(&mut self, task_id: impl Into<String>, download_url: impl Into<String>) {
        *self = TaskState::Tracking {
            task_id: task_id.into(),
            download_url: download_url.into(),
            status: TaskStatus::Starting,
            progress: 0.0,
        };
    }

    /// Mirrors a server report. Returns `false` when the report was ignored.
    pub fn apply(&mut self, report: &StatusReport) -> bool {
        let TaskState::Tracking {
            task_id,
            download_url,
            status,
            progress,
        } = self
        else {
            return false;
        };

        match report.status {
            TaskStatus::Starting | TaskStatus::Downloading | TaskStatus::Merging => {
                *status = report.status;
                if let Some(value) = report.progress {
                    *progress = value;
                }
            }
            TaskStatus::Complete => {
                *self = TaskState::Complete {
                    task_id: std::mem::take(task_id),
                    filename: report.filename.clone(),
                    download_url: std::mem::take(download_url),
                };
            }
            TaskStatus::Error => {
                *self = TaskState::Failed {
                    message: report
                        .message
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                };
            }
        }
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.is_terminal() {
            *self = TaskState::Failed {
                message: message.into(),
            };
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete { .. } | TaskState::Failed { .. })
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskState::Tracking { task_id, .. } | TaskState::Complete { task_id, .. } => {
                Some(task_id)
            }
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            TaskState::Tracking { progress, .. } => Some(*progress),
            TaskState::Complete { .. } => Some(100.0),
            _ => None,
        }
    }

    /// Only a completed task has a link to its file.
    pub fn download_url(&self) -> Option<&str> {
        match self {
            TaskState::Complete { download_url, .. } => Some(download_url),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            TaskState::Idle => "Waiting for a URL".to_string(),
            TaskState::Submitting => "Submitting...".to_string(),
            TaskState::Tracking {
                status, progress, ..
            } => match status {
                TaskStatus::Starting => "Starting...".to_string(),
                TaskStatus::Downloading => format!("Downloading... {}", format_progress(*progress)),
                TaskStatus::Merging => "Merging audio and video...".to_string(),
                TaskStatus::Complete | TaskStatus::Error => status.to_string(),
            },
            TaskState::Complete { filename, .. } => match filename {
                Some(name) => format!("Complete: {name}"),
                None => "Complete".to_string(),
            },
            TaskState::Failed { message } => format!("Error: {message}"),
        }
    }

    pub fn finish(self) -> VidgrabResult<CompletedTask> {
        match self {
            TaskState::Complete {
                task_id,
                filename,
                download_url,
            } => Ok(CompletedTask {
                task_id,
                filename,
                download_url,
            }),
            TaskState::Failed { message } => Err(VidgrabError::TaskFailed(message)),
            other => Err(VidgrabError::InvalidInput(format!(
                "task has not finished: {}",
                other.label()
            ))),
        }
    }
}
