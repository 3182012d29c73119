//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    handlers,
    middleware::{with_auth_error_handling, AppState},
};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 登录保护，供外部路由层在登录前后调用
    let auth_routes = Router::new()
        .route(
            "/api/v1/auth/login/check",
            post(with_auth_error_handling(
                state.clone(),
                "login_check",
                handlers::auth::check,
            )),
        )
        .route(
            "/api/v1/auth/login/outcome",
            post(with_auth_error_handling(
                state.clone(),
                "login_outcome",
                handlers::auth::outcome,
            )),
        );

    // 管理端；访问控制由外部网关负责
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/security/report",
            get(with_auth_error_handling(
                state.clone(),
                "security_report",
                handlers::admin::security_report,
            )),
        )
        .route(
            "/api/v1/admin/security/events/{subject}",
            get(with_auth_error_handling(
                state.clone(),
                "recent_security_events",
                handlers::admin::recent_events,
            )),
        )
        .route(
            "/api/v1/admin/lockouts",
            get(with_auth_error_handling(
                state.clone(),
                "list_lockouts",
                handlers::admin::list_lockouts,
            )),
        )
        .route(
            "/api/v1/admin/lockouts/cleanup",
            post(with_auth_error_handling(
                state.clone(),
                "cleanup_lockouts",
                handlers::admin::cleanup_lockouts,
            )),
        )
        .route(
            "/api/v1/admin/maintenance",
            post(with_auth_error_handling(
                state.clone(),
                "run_maintenance",
                handlers::admin::run_maintenance,
            )),
        )
        .route(
            "/api/v1/admin/lockouts/{email}",
            delete(with_auth_error_handling(
                state.clone(),
                "clear_lockout",
                handlers::admin::clear_lockout,
            )),
        )
        .route(
            "/api/v1/admin/flags",
            get(with_auth_error_handling(
                state.clone(),
                "list_flags",
                handlers::admin::list_flags,
            )),
        )
        .route(
            "/api/v1/admin/flags/{name}",
            put(with_auth_error_handling(
                state.clone(),
                "update_flag",
                handlers::admin::update_flag,
            )),
        );

    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
