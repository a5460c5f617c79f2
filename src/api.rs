use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::core::{EngineStatus, Orchestrator, SubmissionRecord};
use crate::types::DispatcherStats;

/// 읽기 전용 상태 API 서버
pub struct ApiServer {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
}

impl ApiServer {
    pub fn new(config: Arc<Config>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { config, orchestrator }
    }

    pub fn router(&self) -> Router {
        let for_stats = Arc::clone(&self.orchestrator);
        let for_status = Arc::clone(&self.orchestrator);
        let for_history = Arc::clone(&self.orchestrator);

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/health", get(|| async { Json(health()) }))
            .route("/stats", get(move || get_stats(Arc::clone(&for_stats))))
            .route("/api/status", get(move || get_status(Arc::clone(&for_status))))
            .route("/api/submissions", get(move || get_submissions(Arc::clone(&for_history))))
            .layer(cors)
    }

    /// 백그라운드에서 서버를 띄운다
    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.monitoring.api_port));
        tracing::info!("🛰️ API server listening on http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
                tracing::error!("API server error: {}", e);
            }
        });

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

fn health() -> HealthResponse {
    HealthResponse { ok: true }
}

async fn get_stats(orchestrator: Arc<Orchestrator>) -> Json<DispatcherStats> {
    Json(orchestrator.dispatcher_stats())
}

async fn get_status(orchestrator: Arc<Orchestrator>) -> Json<EngineStatus> {
    Json(orchestrator.status())
}

async fn get_submissions(orchestrator: Arc<Orchestrator>) -> Json<Vec<SubmissionRecord>> {
    Json(orchestrator.submission_history().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::StaticFeeModel;
    use crate::core::evaluation_worker::tests::{pool_of, zero_fees};
    use crate::core::{Collaborators, WatcherState};
    use crate::mocks::{MockChainProvider, MockEvaluator, MockRelayClient, MockSigner};
    use crate::types::RelayOutcome;

    async fn orchestrator() -> Arc<Orchestrator> {
        let mut config = Config::default();
        config.engine.workers = Some(3);
        let collaborators = Collaborators {
            provider: Arc::new(MockChainProvider::new().with_sequence_count(3)),
            fee_model: Arc::new(StaticFeeModel::new(zero_fees())),
            signer: Arc::new(MockSigner::new()),
            relay: Arc::new(MockRelayClient::new(RelayOutcome::Included)),
            evaluator: Arc::new(MockEvaluator::new()),
            pool: pool_of(4),
        };
        Arc::new(Orchestrator::build(Arc::new(config), collaborators).await.unwrap())
    }

    #[test]
    fn health_serializes_ok_flag() {
        let body = serde_json::to_value(health()).unwrap();
        assert_eq!(body, serde_json::json!({ "ok": true }));
    }

    #[tokio::test]
    async fn status_reports_sequence_and_pool() {
        let orchestrator = orchestrator().await;
        let Json(status) = get_status(Arc::clone(&orchestrator)).await;
        assert!(!status.is_running);
        assert_eq!(status.next_sequence, 3);
        assert_eq!(status.strategy_pool_size, 4);
        assert_eq!(status.watcher.state, WatcherState::Disconnected);

        let body = serde_json::to_value(&status).unwrap();
        assert!(body.get("dispatcher").is_some());
        assert!(body.get("submissions").is_some());
    }

    #[tokio::test]
    async fn stats_and_submissions_start_empty() {
        let orchestrator = orchestrator().await;
        let Json(stats) = get_stats(Arc::clone(&orchestrator)).await;
        assert_eq!(stats.submitted, 0);
        let Json(history) = get_submissions(orchestrator).await;
        assert!(history.is_empty());
    }
}
