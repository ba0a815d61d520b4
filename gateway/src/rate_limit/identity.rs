//! 客户端身份解析
//!
//! IP 从代理头解析；用户与计划由上游认证层通过请求头注入，
//! 认证本身不在本服务范围内

use axum::http::HeaderMap;

/// 缺失 IP 头时的共享桶
///
/// 同一代理后的多个匿名客户端会合并进这个桶，这是已接受的限制
pub const UNKNOWN_IP: &str = "unknown";

/// 上游注入的用户标识头
pub const USER_HEADER: &str = "x-api-user";

/// 上游注入的计划名头
pub const PLAN_HEADER: &str = "x-api-plan";

/// 从代理头解析客户端 IP
///
/// 依次尝试 x-forwarded-for（第一个非空段，去除空白）、x-real-ip、
/// cf-connecting-ip；全部缺失时归入 "unknown"
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|s| !s.is_empty()))
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| header_value(headers, "cf-connecting-ip"))
        .unwrap_or(UNKNOWN_IP)
        .to_string()
}

/// 认证用户标识（未认证时为 None）
pub fn user_id(headers: &HeaderMap) -> Option<String> {
    header_value(headers, USER_HEADER).map(str::to_string)
}

/// 用户的计划名（未注入时为 None）
pub fn plan_name(headers: &HeaderMap) -> Option<String> {
    header_value(headers, PLAN_HEADER).map(str::to_string)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
