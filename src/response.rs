//! 响应信封
//! 错误与成功响应的统一 JSON 结构，以及请求 ID 生成

use crate::error::{AuthError, AuthErrorType};
use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// 生成请求 ID：`req_<unix 毫秒>_<base36 随机串>`
pub fn generate_request_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let random: u64 = rand::thread_rng().gen();
    format!("req_{}_{}", millis, to_base36(random))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// ISO-8601 时间戳（毫秒精度，UTC）
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 错误详情
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: AuthErrorType,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&AuthError> for ErrorBody {
    fn from(e: &AuthError) -> Self {
        Self {
            error_type: e.error_type,
            message: e.message.clone(),
            code: e.code().to_string(),
            field: e.field.clone(),
            details: e.details.clone(),
            suggestions: e.suggestions.clone(),
            retry_after: e.retry_after,
        }
    }
}

/// 错误响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub timestamp: String,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(error: &AuthError, request_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            error: ErrorBody::from(error),
            timestamp: format_timestamp(timestamp),
            request_id: request_id.to_string(),
        }
    }
}

/// 成功响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

fn insert_request_id(response: &mut Response, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
}

/// 构造错误响应，设置 X-Request-Id 与 Retry-After
pub fn error_response(error: &AuthError, request_id: &str, timestamp: DateTime<Utc>) -> Response {
    let body = ErrorResponse::new(error, request_id, timestamp);
    let mut response = (error.status_code(), Json(body)).into_response();

    insert_request_id(&mut response, request_id);
    if let Some(secs) = error.retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }

    response
}

/// 构造成功响应
pub fn create_success_response<T: Serialize>(
    data: T,
    message: impl Into<String>,
    request_id: Option<&str>,
) -> Response {
    let body = SuccessResponse {
        success: true,
        data,
        message: message.into(),
        timestamp: format_timestamp(Utc::now()),
        request_id: request_id.map(str::to_string),
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Some(id) = request_id {
        insert_request_id(&mut response, id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_request_id_format() {
        let re = Regex::new(r"^req_\d+_[a-z0-9]+$").unwrap();
        for _ in 0..50 {
            let id = generate_request_id();
            assert!(re.is_match(&id), "bad request id: {id}");
        }
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_error_response_headers() {
        let error = AuthError::rate_limit_exceeded(42);
        let response = error_response(&error, "req_1_abc", Utc::now());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req_1_abc");
        assert_eq!(response.headers().get("retry-after").unwrap(), "42");
    }

    #[test]
    fn test_error_body_omits_empty_optionals() {
        let body = ErrorResponse::new(&AuthError::invalid_credentials(), "req_1_a", Utc::now());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["type"], "INVALID_CREDENTIALS");
        assert_eq!(json["error"]["code"], "INVALID_CREDENTIALS");
        assert!(json["error"].get("retryAfter").is_none());
        assert!(json["error"].get("field").is_none());
        assert_eq!(json["requestId"], "req_1_a");
    }
}
