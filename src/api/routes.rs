//! API route definitions

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use super::handlers;
use super::server::AppState;

/// Budget for every route except the diagnostic fetch, which is bounded by
/// the orchestrator's own deadline
pub const QUICK_ROUTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    let quick = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route("/api/pool/stats", get(handlers::pool::stats))
        .route("/api/pool/refresh", post(handlers::pool::refresh))
        .layer(TimeoutLayer::new(QUICK_ROUTE_TIMEOUT));

    Router::new()
        .merge(quick)
        .route("/api/fetch", post(handlers::fetch::fetch_url))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::fetch::backoff::Backoff;
    use crate::fetch::orchestrator::{FetcherConfig, ResilientFetcher};
    use crate::fetch::transport::{ProxyTransport, TransportResponse};
    use crate::models::ProxyAddr;
    use crate::proxy::pool::{PoolConfig, ProxyPool};
    use crate::proxy::sourcing::ProxySource;
    use crate::proxy::validator::ProxyCheck;
    use crate::random::Entropy;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use reqwest::header::HeaderMap;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct FixedSource;

    #[async_trait]
    impl ProxySource for FixedSource {
        async fn fetch_candidates(&self) -> HashSet<ProxyAddr> {
            HashSet::from([
                ProxyAddr::parse("10.3.0.1:8080").unwrap(),
                ProxyAddr::parse("10.3.0.2:8080").unwrap(),
            ])
        }
    }

    struct PassAll;

    #[async_trait]
    impl ProxyCheck for PassAll {
        async fn validate(&self, candidates: Vec<ProxyAddr>) -> Vec<ProxyAddr> {
            candidates
        }
    }

    struct EchoTransport;

    #[async_trait]
    impl ProxyTransport for EchoTransport {
        async fn get(
            &self,
            url: &str,
            _proxy: &ProxyAddr,
            _headers: HeaderMap,
            _timeout: Duration,
        ) -> Result<TransportResponse> {
            Ok(TransportResponse {
                status: 200,
                body: format!("<html>{}</html>", url),
            })
        }
    }

    async fn app(dir: &tempfile::TempDir) -> (Router, Arc<ProxyPool>) {
        let pool = Arc::new(ProxyPool::new(
            PoolConfig {
                min_pool_size: 0,
                max_pool_size: 10,
                cache_path: dir.path().join("healthy_proxies.json"),
                cache_max_age: Duration::from_secs(1800),
            },
            Arc::new(FixedSource),
            Arc::new(PassAll),
        ));
        pool.initialize().await;

        let fetcher = ResilientFetcher::new(
            pool.clone(),
            Arc::new(EchoTransport),
            FetcherConfig::default(),
        )
        .with_backoff(Backoff::none())
        .with_entropy(Entropy::seeded(1));

        let state = AppState::new(pool.clone(), Arc::new(fetcher));
        (create_router(state), pool)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir).await;

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reports_pool_and_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir).await;

        let response = router
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["pool"]["available"], 2);
        assert_eq!(body["pool"]["below_minimum"], false);
        assert_eq!(body["tiers"]["count"], 1);
    }

    #[tokio::test]
    async fn test_pool_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (router, pool) = app(&dir).await;
        pool.report_failed(&ProxyAddr::parse("10.3.0.1:8080").unwrap());

        let response = router
            .oneshot(Request::get("/api/pool/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;

        assert_eq!(body["total_sourced"], 2);
        assert_eq!(body["currently_healthy"], 1);
        assert_eq!(body["total_failed"], 1);
    }

    #[tokio::test]
    async fn test_pool_refresh_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir).await;

        let response = router
            .oneshot(
                Request::post("/api/pool/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_fetch_reports_tier_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir).await;

        let response = router
            .oneshot(
                Request::post("/api/fetch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url": "https://shop.example/p/1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["tier"]["kind"], "proxied");
        assert_eq!(
            body["content_bytes"],
            "<html>https://shop.example/p/1</html>".len()
        );
        assert!(body.get("content").is_none());
        assert_eq!(body["attempts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir).await;

        let response = router
            .oneshot(
                Request::post("/api/fetch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url": "mailto:ops@example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
