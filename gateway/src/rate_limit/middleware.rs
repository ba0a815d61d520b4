//! 限流中间件
//!
//! 把核心限流判定翻译为 HTTP 语义：429 + Problem Details +
//! X-RateLimit 响应头

use crate::rate_limit::identity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cuba_errors::AppError;
use cuba_throttle::Decision;
use metrics::counter;
use std::time::Duration;
use tracing::{debug, warn};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 入口守卫
///
/// 所有流量先过单 IP 每分钟计数；认证流量再过单用户每分钟计数，
/// 两个计数器任一超限即拒绝。匿名流量改为附加每日配额
pub async fn request_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.limits.enabled {
        return next.run(request).await;
    }

    let (ip, user) = {
        let headers = request.headers();
        (identity::client_ip(headers), identity::user_id(headers))
    };
    let path = request.uri().path().to_string();

    let ip_decision = state
        .limiter
        .check(&format!("ip:{ip}"), 1, state.limits.ip_per_minute, MINUTE);
    if !ip_decision.allowed {
        return deny("ip", &ip, &path, &ip_decision);
    }

    let decision = match user {
        Some(user) => {
            let user_decision = state.limiter.check(
                &format!("user:{user}"),
                1,
                state.limits.user_per_minute,
                MINUTE,
            );
            if !user_decision.allowed {
                return deny("user", &user, &path, &user_decision);
            }
            user_decision
        }
        None => {
            let daily = state.limiter.check(
                &format!("anon:{ip}"),
                1,
                state.limits.anonymous_daily,
                DAY,
            );
            if !daily.allowed {
                return deny("anonymous", &ip, &path, &daily);
            }
            daily
        }
    };

    counter!("gateway_requests_allowed_total").increment(1);
    debug!(
        ip,
        path,
        count = decision.count,
        remaining = decision.remaining,
        "Request allowed"
    );

    let mut response = next.run(request).await;
    add_rate_limit_headers(&mut response, &decision);
    response
}

/// 限流触发，返回 429
fn deny(scope: &'static str, identity: &str, path: &str, decision: &Decision) -> Response {
    warn!(scope, identity, path, limit = decision.limit, "Rate limit exceeded");

    let labels = [("scope", scope.to_string())];
    counter!("gateway_requests_denied_total", &labels).increment(1);

    let retry_after = decision.retry_after.unwrap_or(0);
    let error =
        AppError::resource_exhausted(format!("rate limit exceeded, retry after {retry_after}s"));

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(error.to_problem_details()),
    )
        .into_response();
    add_rate_limit_headers(&mut response, decision);
    response
}

/// 为响应添加限流相关头
pub(crate) fn add_rate_limit_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();

    if let Ok(val) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", val);
    }
    if let Ok(val) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", val);
    }
    if let Ok(val) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", val);
    }
    if let Some(retry_after) = decision.retry_after {
        if let Ok(val) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert("Retry-After", val);
        }
    }
}
