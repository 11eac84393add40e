//! The process's long-running roles and the supervisor that drives them.
//!
//! wayfinder runs at most three roles in one process: the web API, the
//! enricher (scheduler + crawl workers) and the embedding producer. A role
//! is a single cooperative loop: it runs until its shutdown token fires,
//! winds down its own tasks, and returns. Cancellation is the only stop
//! signal; returning is the acknowledgement.

pub mod supervisor;
pub mod web;

use tokio_util::sync::CancellationToken;

/// Why a role's task ended.
#[derive(Debug)]
pub enum RoleExit {
    /// Observed the shutdown signal and wound down cleanly.
    Shutdown,
    /// Returned without being asked to stop. Roles are expected to run
    /// forever, so this is treated as a fault by the caller.
    Stopped,
    /// Failed with an error.
    Failed(anyhow::Error),
}

/// One long-running role of the process.
#[async_trait::async_trait]
pub trait Role: Send {
    /// The role's name for logging and shutdown reporting.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled. Implementations own their inner
    /// tasks and must not return before those have finished winding down.
    async fn run(&mut self, shutdown: CancellationToken) -> crate::error::Result<()>;
}
