use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vidgrab_core::{VidgrabError, VidgrabResult};

use crate::api::BackendClient;
use crate::task::{CompletedTask, TaskState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls `GET /api/status/:id` on a fixed timer until the task is terminal.
///
/// A failed status request ends polling; there are no retries.
#[derive(Debug, Clone)]
pub struct TaskPoller {
    client: BackendClient,
    interval: Duration,
}

impl TaskPoller {
    pub fn new(client: BackendClient, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self { client, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for `task_id` to finish, handing every state change to `observer`.
    pub async fn wait<F>(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> VidgrabResult<CompletedTask>
    where
        F: FnMut(&TaskState),
    {
        let mut state = TaskState::default();
        state.accepted(task_id, self.client.download_file_url(task_id));
        observer(&state);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task_id, "polling cancelled");
                    return Err(VidgrabError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task_id, "polling cancelled");
                    return Err(VidgrabError::Cancelled);
                }
                result = self.client.status(task_id) => result,
            };

            let report = match report {
                Ok(report) => report,
                Err(err) => {
                    state.fail(err.to_string());
                    observer(&state);
                    return Err(err);
                }
            };
            debug!(task_id, status = %report.status, progress = ?report.progress, "polled task");

            state.apply(&report);
            observer(&state);

            if state.is_terminal() {
                if let TaskState::Complete { filename, .. } = &state {
                    info!(task_id, filename = ?filename, "task complete");
                }
                return state.finish();
            }
        }
    }
}
