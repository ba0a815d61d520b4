//! cuba-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Internal(_) => 500,
            Self::ResourceExhausted(_) => 429,
        }
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.to_string(),
            instance: None,
        }
    }

    fn problem_type(&self) -> String {
        match self {
            Self::NotFound(_) => "https://api.cuba-erp.com/problems/not-found".to_string(),
            Self::Validation(_) => "https://api.cuba-erp.com/problems/validation".to_string(),
            Self::Internal(_) => "https://api.cuba-erp.com/problems/internal".to_string(),
            Self::ResourceExhausted(_) => {
                "https://api.cuba-erp.com/problems/resource-exhausted".to_string()
            }
        }
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found".to_string(),
            Self::Validation(_) => "Validation Error".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
            Self::ResourceExhausted(_) => "Resource Exhausted".to_string(),
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
