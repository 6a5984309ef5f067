use thiserror::Error;

/// Errors surfaced by [`crate::TaskQueue`] construction.
///
/// The submission API (`post`, `post_delayed`, `post_and_reply`) is
/// fire-and-forget and never returns a [`Result`] — only building the queue
/// itself can fail.
#[derive(Error, Debug)]
pub enum TaskQueueError {
    #[error("task queue name must not be empty")]
    MissingName,
}

pub type Result<T> = std::result::Result<T, TaskQueueError>;
