//! 路由
//!
//! /v1 下的接口挂在限流守卫后面；health 与 metrics 不计入配额

use crate::rate_limit::identity;
use crate::rate_limit::request_guard;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cuba_common::HealthReport;
use cuba_errors::AppError;
use cuba_throttle::{Decision, PlanTier, UsageDecision};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

/// 计划解析缓存的 TTL
const PLAN_CACHE_TTL: Duration = Duration::from_secs(60);

/// AppError 的 HTTP 载体
struct ApiError(AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_problem_details())).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/v1/limits/check", post(check_limits))
        .layer(middleware::from_fn_with_state(state.clone(), request_guard));

    Router::new()
        .merge(guarded)
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    user_id: String,
    plan: Option<String>,
    #[serde(default)]
    estimated_tokens: u64,
}

/// 单个计数器状态
#[derive(Debug, Serialize)]
struct CounterStatus {
    allowed: bool,
    count: u64,
    remaining: u64,
    limit: u64,
    reset_at: u64,
}

impl From<&Decision> for CounterStatus {
    fn from(decision: &Decision) -> Self {
        Self {
            allowed: decision.allowed,
            count: decision.count,
            remaining: decision.remaining,
            limit: decision.limit,
            reset_at: decision.reset_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    tier: &'static str,
    requests: CounterStatus,
    tokens: CounterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl From<UsageDecision> for CheckResponse {
    fn from(decision: UsageDecision) -> Self {
        Self {
            allowed: decision.allowed,
            tier: decision.tier.as_str(),
            retry_after: decision.retry_after(),
            requests: CounterStatus::from(&decision.requests),
            tokens: CounterStatus::from(&decision.tokens),
        }
    }
}

/// 用量预检
///
/// 上游服务在消耗 AI 配额前调用。判定只在响应体里给出，
/// 由调用方自行翻译为传输层语义
async fn check_limits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let user_id = request.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError(AppError::validation("user_id must not be empty")));
    }

    // 计划来源优先级：请求体 > 请求头 > 近期缓存，全部缺失按 free
    let tier = request
        .plan
        .or_else(|| identity::plan_name(&headers))
        .map(|plan| {
            let tier = PlanTier::parse(&plan);
            state.plan_cache.set(user_id.clone(), tier, PLAN_CACHE_TTL);
            tier
        })
        .or_else(|| state.plan_cache.get(&user_id))
        .unwrap_or(PlanTier::Free);

    let decision = state
        .meter
        .check_tier(&user_id, tier, request.estimated_tokens);

    let labels = [(
        "verdict",
        if decision.allowed { "allowed" } else { "denied" }.to_string(),
    )];
    counter!("gateway_usage_checks_total", &labels).increment(1);

    debug!(
        user = %user_id,
        tier = tier.as_str(),
        allowed = decision.allowed,
        "Usage check"
    );

    Ok(Json(CheckResponse::from(decision)))
}

async fn health(State(state): State<AppState>) -> Response {
    let mut report = HealthReport::new();
    report.add_component("sweeper", state.sweeper.is_running(), None);
    report.add_component(
        "window_limiter",
        true,
        Some(format!("{} tracked keys", state.limiter.tracked_keys())),
    );
    report.add_component(
        "usage_meter",
        true,
        Some(format!("{} tracked keys", state.meter.tracked_keys())),
    );
    report.add_component(
        "plan_cache",
        true,
        Some(format!("{} entries", state.plan_cache.len())),
    );

    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn not_found() -> ApiError {
    ApiError(AppError::not_found("no such endpoint"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use cuba_common::ManualClock;
    use cuba_config::LimitsConfig;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn open_limits() -> LimitsConfig {
        // 守卫放宽，专注测试用量计量本身
        LimitsConfig {
            ip_per_minute: 10_000,
            user_per_minute: 10_000,
            anonymous_daily: 10_000,
            ..Default::default()
        }
    }

    fn test_router(limits: LimitsConfig) -> Router {
        let state = test_support::state_with_clock(limits, Arc::new(ManualClock::new(1_000_000)));
        build_router(state)
    }

    fn check_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/limits/check")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-api-user", "caller")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_free_plan_verdict_flips_at_ceiling() {
        let app = test_router(open_limits());

        // free 档 10 次放行
        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(check_request(json!({"user_id": "u1", "plan": "free"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["allowed"], json!(true));
        }

        // 第 11 次仍是 200，但判定为拒绝，由调用方翻译
        let response = app
            .clone()
            .oneshot(check_request(json!({"user_id": "u1", "plan": "free"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["allowed"], json!(false));
        assert_eq!(body["requests"]["allowed"], json!(false));
        assert!(body["retry_after"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_pro_plan_passes_free_ceiling() {
        let app = test_router(open_limits());

        for _ in 0..20 {
            let response = app
                .clone()
                .oneshot(check_request(json!({"user_id": "u1", "plan": "pro"})))
                .await
                .unwrap();
            let body = json_body(response).await;
            assert_eq!(body["allowed"], json!(true));
            assert_eq!(body["tier"], json!("pro"));
        }
    }

    #[tokio::test]
    async fn test_unknown_plan_treated_as_free() {
        let app = test_router(open_limits());

        let response = app
            .clone()
            .oneshot(check_request(json!({"user_id": "u1", "plan": "ENTERPRISE"})))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["tier"], json!("free"));
        assert_eq!(body["requests"]["limit"], json!(10));
    }

    #[tokio::test]
    async fn test_plan_is_cached_for_subsequent_calls() {
        let app = test_router(open_limits());

        // 第一次调用携带计划
        let response = app
            .clone()
            .oneshot(check_request(json!({"user_id": "u1", "plan": "pro"})))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["tier"], json!("pro"));

        // 后续调用省略计划，命中缓存仍按 pro 计
        let response = app
            .clone()
            .oneshot(check_request(json!({"user_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["tier"], json!("pro"));
    }

    #[tokio::test]
    async fn test_token_budget_reported_in_verdict() {
        let app = test_router(open_limits());

        let response = app
            .clone()
            .oneshot(check_request(
                json!({"user_id": "u1", "plan": "free", "estimated_tokens": 12000}),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["allowed"], json!(false));
        assert_eq!(body["tokens"]["allowed"], json!(false));
        // token 被拒的调用不消耗请求配额
        assert_eq!(body["requests"]["count"], json!(0));
    }

    #[tokio::test]
    async fn test_empty_user_id_is_validation_error() {
        let app = test_router(open_limits());

        let response = app
            .clone()
            .oneshot(check_request(json!({"user_id": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["status"], json!(400));
        assert_eq!(body["title"], json!("Validation Error"));
    }

    #[tokio::test]
    async fn test_health_reports_components() {
        let app = test_router(open_limits());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["healthy"], json!(true));
        let names: Vec<&str> = body["components"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"sweeper"));
        assert!(names.contains(&"window_limiter"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_problem_details_404() {
        let app = test_router(open_limits());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["title"], json!("Resource Not Found"));
    }
}
