//! 登录保护相关的 HTTP 处理器
//!
//! 外部路由层在执行实际登录前调用 check，登录完成后上报 outcome

use crate::{
    error::{AppError, AuthError},
    handlers::{parse_json, request_id},
    middleware::AppState,
    models::security_event::RequestContext,
    response::create_success_response,
};
use axum::{extract::Request, response::Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_action() -> String {
    "login".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardCheckRequest {
    pub email: String,
    #[serde(default = "default_action")]
    pub action: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcomeRequest {
    pub email: String,
    pub success: bool,
    pub user_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcomeResponse {
    pub success: bool,
    pub failed_attempts: u64,
    pub max_attempts: u32,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<chrono::DateTime<chrono::Utc>>,
}

/// 执行受保护动作前的检查
pub async fn check(
    state: Arc<AppState>,
    context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let request_id = request_id(&req);
    let body: GuardCheckRequest = parse_json(req).await?;

    let decision = state
        .auth_guard
        .guard(&body.action, Some(&body.email), &context)
        .await?;

    Ok(create_success_response(
        decision,
        "Request permitted",
        request_id.as_deref(),
    ))
}

/// 上报登录结果
pub async fn outcome(
    state: Arc<AppState>,
    context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let request_id = request_id(&req);
    let body: LoginOutcomeRequest = parse_json(req).await?;
    crate::services::auth_guard::validate_email(&body.email)?;

    let response = if body.success {
        let user_id = body
            .user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthError::validation("userId is required for a successful login").with_field("userId")
            })?;
        state
            .auth_guard
            .record_login_success(&body.email, user_id, &context)
            .await;
        LoginOutcomeResponse {
            success: true,
            failed_attempts: 0,
            max_attempts: state.config.security.max_login_attempts,
            locked: false,
            locked_until: None,
        }
    } else {
        let outcome = state
            .auth_guard
            .record_login_failure(
                &body.email,
                &context,
                body.reason.as_deref().unwrap_or("invalid_credentials"),
            )
            .await;
        LoginOutcomeResponse {
            success: false,
            failed_attempts: outcome.failed_attempts,
            max_attempts: outcome.max_attempts,
            locked: outcome.lockout.is_some(),
            locked_until: outcome.lockout.map(|r| r.locked_until),
        }
    };

    Ok(create_success_response(
        response,
        "Login outcome recorded",
        request_id.as_deref(),
    ))
}
