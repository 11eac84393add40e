//! Process health flags surfaced by /health and /ready.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flags for the fixed set of concerns the endpoints report:
/// database reachability (maintained by the web role's probe loop) and
/// embedder readiness (the query path works without it, but /ready exposes
/// whether vectors are being produced).
#[derive(Clone, Debug, Default)]
pub struct HealthState {
    inner: Arc<Flags>,
}

#[derive(Debug, Default)]
struct Flags {
    db_ok: AtomicBool,
    embedder_ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_db_ok(&self, ok: bool) {
        self.inner.db_ok.store(ok, Ordering::Relaxed);
    }

    pub fn db_ok(&self) -> bool {
        self.inner.db_ok.load(Ordering::Relaxed)
    }

    pub fn set_embedder_ready(&self, ready: bool) {
        self.inner.embedder_ready.store(ready, Ordering::Relaxed);
    }

    pub fn embedder_ready(&self) -> bool {
        self.inner.embedder_ready.load(Ordering::Relaxed)
    }
}
