//! HTTP 中间件
//! 应用状态、请求追踪、客户端信息提取与认证错误处理包装

use crate::{
    cache::{CacheClient, CacheStore},
    clock::SharedClock,
    config::AppConfig,
    error::AppError,
    models::security_event::RequestContext,
    repository::security_event_repo::SecurityEventRepository,
    response::X_REQUEST_ID,
    services::{
        auth_guard::AuthGuard,
        error_handler::{ErrorContext, ErrorHandler},
        feature_flags::{FeatureFlagService, FlagSource},
        lockout_service::LockoutService,
        maintenance::MaintenanceService,
        rate_limiter::RateLimiter,
        security_logger::SecurityLogger,
        token_service::TokenService,
    },
};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 服务均以 Arc 共享，Clone 只是指针拷贝
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Option<sqlx::PgPool>,
    pub clock: SharedClock,
    pub cache: CacheClient,
    pub rate_limiter: Arc<RateLimiter>,
    pub lockout_service: Arc<LockoutService>,
    pub token_service: Arc<TokenService>,
    pub feature_flags: Arc<FeatureFlagService>,
    pub security_logger: Arc<SecurityLogger>,
    pub error_handler: Arc<ErrorHandler>,
    pub auth_guard: Arc<AuthGuard>,
    pub maintenance: Arc<MaintenanceService>,
}

impl AppState {
    /// 组装所有服务
    pub fn new(
        config: AppConfig,
        db: Option<sqlx::PgPool>,
        store: Arc<dyn CacheStore>,
        event_repo: Arc<dyn SecurityEventRepository>,
        flag_source: Arc<dyn FlagSource>,
        clock: SharedClock,
    ) -> Self {
        let cache = CacheClient::new(store, &config.cache);

        let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), clock.clone()));
        let lockout_service = Arc::new(LockoutService::new(
            cache.clone(),
            clock.clone(),
            &config.security,
        ));
        let token_service = Arc::new(TokenService::new(
            cache.clone(),
            clock.clone(),
            &config.security,
        ));
        let feature_flags = Arc::new(FeatureFlagService::new(
            flag_source,
            clock.clone(),
            config.flags.cache_ttl_secs,
            config.flags.environment.clone(),
        ));
        let security_logger = Arc::new(SecurityLogger::new(
            cache.clone(),
            event_repo,
            clock.clone(),
            &config,
        ));
        let error_handler = Arc::new(ErrorHandler::new(security_logger.clone(), clock.clone()));
        let auth_guard = Arc::new(AuthGuard::new(
            feature_flags.clone(),
            rate_limiter.clone(),
            lockout_service.clone(),
            security_logger.clone(),
            config.security.clone(),
            clock.clone(),
        ));
        let maintenance = Arc::new(MaintenanceService::new(
            cache.clone(),
            lockout_service.clone(),
            feature_flags.clone(),
            security_logger.clone(),
            clock.clone(),
            &config.database,
        ));

        Self {
            config,
            db,
            clock,
            cache,
            rate_limiter,
            lockout_service,
            token_service,
            feature_flags,
            security_logger,
            error_handler,
            auth_guard,
            maintenance,
        }
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let method = req.method().clone();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        // 错误响应已带有 requestId，保持一致
        if !response.headers().contains_key(X_REQUEST_ID) {
            if let Ok(value) = HeaderValue::from_str(&crate::response::generate_request_id()) {
                response.headers_mut().insert(X_REQUEST_ID, value);
            }
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl RequestContext {
    /// 从请求头提取客户端 IP 与 User-Agent
    ///
    /// 信任代理时依次取 X-Forwarded-For 的第一个地址、X-Real-IP；
    /// 都没有时为 "unknown"
    pub fn from_headers(headers: &HeaderMap, trust_proxy: bool) -> Self {
        let mut ip_address = None;
        if trust_proxy {
            ip_address = header_str(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or_else(|| header_str(headers, "x-real-ip"));
        }

        Self::new(
            ip_address.unwrap_or(Self::UNKNOWN),
            header_str(headers, "user-agent").unwrap_or(Self::UNKNOWN),
        )
    }
}

/// 为认证相关操作加上统一错误处理
///
/// 处理函数返回的任何错误都交给 [`ErrorHandler`]，生成安全的错误信封并记录安全事件
pub fn with_auth_error_handling<H, Fut>(
    state: Arc<AppState>,
    operation: &'static str,
    handler: H,
) -> impl Fn(Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    H: Fn(Arc<AppState>, RequestContext, Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send + 'static,
{
    move |req: Request| -> BoxFuture<'static, Response> {
        let state = state.clone();
        let handler = handler.clone();
        Box::pin(async move {
            let context =
                RequestContext::from_headers(req.headers(), state.config.security.trust_proxy);

            match handler(state.clone(), context.clone(), req).await {
                Ok(response) => response,
                Err(error) => {
                    let error_context = ErrorContext::new(operation).with_request(&context);
                    state.error_handler.handle_error(&error, &error_context).await
                }
            }
        })
    }
}
