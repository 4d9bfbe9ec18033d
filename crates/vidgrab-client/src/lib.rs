mod api;
mod poller;
mod task;

pub use api::{BackendClient, SavedFile, Submission};
pub use poller::{DEFAULT_POLL_INTERVAL, TaskPoller};
pub use task::{CompletedTask, TaskState};
pub use tokio_util::sync::CancellationToken;
