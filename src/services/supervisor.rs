use std::time::{Duration, Instant};

use futures::future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::{Role, RoleExit};

/// Spawns roles with child shutdown tokens, surfaces the first one to
/// exit, and stops the rest under a shared grace deadline.
///
/// There is no registry: the set of roles is fixed per process (web,
/// enricher, embedder, chosen by the CLI subcommand), so the supervisor
/// just keeps the spawned handles in order.
pub struct Supervisor {
    shutdown: CancellationToken,
    running: Vec<(&'static str, JoinHandle<RoleExit>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            running: Vec::new(),
        }
    }

    /// Spawn a role onto the runtime with its own child shutdown token.
    pub fn spawn<R: Role + 'static>(&mut self, mut role: R) {
        let name = role.name();
        let token = self.shutdown.child_token();

        let handle = tokio::spawn(async move {
            info!(role = name, "role started");
            let stop_requested = token.clone();
            match role.run(token).await {
                Ok(()) if stop_requested.is_cancelled() => RoleExit::Shutdown,
                Ok(()) => RoleExit::Stopped,
                Err(e) => RoleExit::Failed(e),
            }
        });

        self.running.push((name, handle));
    }

    pub fn role_count(&self) -> usize {
        self.running.len()
    }

    /// Wait until any role exits and report which one and why. The exited
    /// role is removed; the others keep running until [`Supervisor::stop`].
    pub async fn wait_any(&mut self) -> (&'static str, RoleExit) {
        if self.running.is_empty() {
            return (
                "none",
                RoleExit::Failed(anyhow::anyhow!("no roles spawned")),
            );
        }

        let (result, index, _) =
            future::select_all(self.running.iter_mut().map(|(_, handle)| handle)).await;
        let (name, _) = self.running.remove(index);

        match result {
            Ok(exit) => (name, exit),
            Err(e) => {
                error!(role = name, "role task panicked: {e}");
                (name, RoleExit::Failed(anyhow::anyhow!("task panic: {e}")))
            }
        }
    }

    /// Cancel every remaining role and drain them under one shared grace
    /// deadline.
    ///
    /// Returns the elapsed time when everything wound down, or the names of
    /// the roles that failed or outlived the deadline.
    pub async fn stop(&mut self, grace: Duration) -> Result<Duration, Vec<&'static str>> {
        info!(
            roles = self.running.len(),
            grace = format!("{grace:.2?}"),
            "stopping roles"
        );
        self.shutdown.cancel();

        let started = Instant::now();
        let mut laggards: Vec<&'static str> = Vec::new();

        for (name, handle) in self.running.drain(..) {
            let remaining = grace.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(RoleExit::Failed(e))) => {
                    warn!(role = name, error = ?e, "role failed while stopping");
                    laggards.push(name);
                }
                Ok(Ok(_)) => debug!(role = name, "role stopped"),
                Ok(Err(e)) => {
                    warn!(role = name, "role task panicked while stopping: {e}");
                    laggards.push(name);
                }
                Err(_) => {
                    warn!(role = name, "role outlived the shutdown grace period");
                    laggards.push(name);
                }
            }
        }

        if laggards.is_empty() {
            Ok(started.elapsed())
        } else {
            Err(laggards)
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
