use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::Role;
use crate::state::AppState;
use crate::web::create_router;

/// The HTTP API role: axum server plus a periodic database probe that
/// keeps the shared health flags current.
pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }

    /// Ping the database every 30 seconds and record the result.
    async fn db_probe_loop(state: AppState, shutdown: CancellationToken) {
        use std::time::Duration;
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let ok = match sqlx::query_scalar::<_, i32>("SELECT 1")
                        .fetch_one(&state.db_pool)
                        .await
                    {
                        Ok(_) => true,
                        Err(e) => {
                            warn!(error = %e, "DB probe failed");
                            false
                        }
                    };
                    state.health.set_db_ok(ok);
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

#[async_trait::async_trait]
impl Role for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> crate::error::Result<()> {
        let app = create_router(self.app_state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(
            role = "web",
            address = %addr,
            link = format!("http://localhost:{}", addr.port()),
            "web server listening"
        );

        let probe = tokio::spawn(Self::db_probe_loop(
            self.app_state.clone(),
            shutdown.clone(),
        ));

        let serve_shutdown = shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                serve_shutdown.cancelled().await;
            })
            .await;

        // The probe only ends on cancellation; if serving failed on its own
        // there is nothing left for it to report
        probe.abort();
        let _ = probe.await;

        served?;
        info!(role = "web", "web server stopped");
        Ok(())
    }
}
