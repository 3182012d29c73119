//! 错误处理层
//!
//! 把任意错误收敛为安全的响应信封，并为每次错误记录一条安全事件。
//! 只有 `AppError::Auth` 的字段会出现在响应中，其余错误统一为 INTERNAL_ERROR。

use crate::{
    clock::SharedClock,
    error::{AppError, AuthError, AuthErrorType},
    models::security_event::RequestContext,
    response::{error_response, generate_request_id},
    services::security_logger::SecurityLogger,
};
use axum::response::Response;
use std::sync::Arc;

/// 错误发生时的上下文
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_request(mut self, request: &RequestContext) -> Self {
        self.ip_address = Some(request.ip_address.clone());
        self.user_agent = Some(request.user_agent.clone());
        self
    }

    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.email = email.map(str::to_string);
        self
    }

    pub fn with_user_id(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::new(
            self.ip_address
                .clone()
                .unwrap_or_else(|| RequestContext::UNKNOWN.to_string()),
            self.user_agent
                .clone()
                .unwrap_or_else(|| RequestContext::UNKNOWN.to_string()),
        )
    }
}

pub struct ErrorHandler {
    logger: Arc<SecurityLogger>,
    clock: SharedClock,
}

impl ErrorHandler {
    pub fn new(logger: Arc<SecurityLogger>, clock: SharedClock) -> Self {
        Self { logger, clock }
    }

    /// 处理错误并构造响应
    pub async fn handle_error(&self, error: &AppError, context: &ErrorContext) -> Response {
        let public = error.to_public();
        let request_id = generate_request_id();

        if public.error_type == AuthErrorType::InternalError {
            tracing::error!(
                operation = %context.operation,
                request_id = %request_id,
                error = %error,
                "Unhandled error in auth operation"
            );
        } else {
            tracing::info!(
                operation = %context.operation,
                request_id = %request_id,
                error_type = %public.error_type,
                "Auth operation rejected"
            );
        }

        metrics::counter!("auth_errors_total", "type" => public.error_type.as_str()).increment(1);

        // 记录失败不会影响响应
        self.logger
            .log_auth_error(
                &context.operation,
                public.error_type,
                &request_id,
                context.user_id.as_deref(),
                context.email.as_deref(),
                &context.request_context(),
            )
            .await;

        error_response(&public, &request_id, self.clock.now())
    }

    pub async fn handle_auth_error(&self, error: AuthError, context: &ErrorContext) -> Response {
        self.handle_error(&AppError::Auth(error), context).await
    }
}
