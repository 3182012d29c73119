//! 安全管理端处理器
//! 安全报表、最近事件、锁定管理、功能开关

use crate::{
    error::{AppError, AuthError},
    handlers::{parse_json, parse_query, path_param, request_id},
    middleware::AppState,
    models::{feature_flag::FlagUpdate, security_event::RequestContext},
    response::create_success_response,
};
use axum::{extract::Request, response::Response};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// 报表默认覆盖的时间范围（小时）
const DEFAULT_REPORT_HOURS: i64 = 24;

/// 最近事件默认条数
const DEFAULT_EVENT_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResult {
    removed: u64,
}

/// 安全报表
pub async fn security_report(
    state: Arc<AppState>,
    _context: RequestContext,
    mut req: Request,
) -> Result<Response, AppError> {
    let query: ReportQuery = parse_query(&mut req).await?;
    let end = query.end.unwrap_or_else(|| state.clock.now());
    let start = query
        .start
        .unwrap_or_else(|| end - Duration::hours(DEFAULT_REPORT_HOURS));

    if start > end {
        return Err(AuthError::validation("start must not be after end")
            .with_field("start")
            .into());
    }

    let report = state
        .security_logger
        .generate_security_report(start, end)
        .await?;

    Ok(create_success_response(
        report,
        "Security report generated",
        request_id(&req).as_deref(),
    ))
}

/// 某个用户最近的安全事件
pub async fn recent_events(
    state: Arc<AppState>,
    _context: RequestContext,
    mut req: Request,
) -> Result<Response, AppError> {
    let subject = path_param(&mut req).await?;
    let query: EventsQuery = parse_query(&mut req).await?;

    let events = state
        .security_logger
        .get_recent_events(&subject, query.limit.unwrap_or(DEFAULT_EVENT_LIMIT))
        .await;

    Ok(create_success_response(
        events,
        "Recent security events",
        request_id(&req).as_deref(),
    ))
}

/// 列出活跃锁定
pub async fn list_lockouts(
    state: Arc<AppState>,
    _context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let lockouts = state.lockout_service.list_active_lockouts().await;
    Ok(create_success_response(
        lockouts,
        "Active lockouts",
        request_id(&req).as_deref(),
    ))
}

/// 解除锁定
pub async fn clear_lockout(
    state: Arc<AppState>,
    context: RequestContext,
    mut req: Request,
) -> Result<Response, AppError> {
    let email = path_param(&mut req).await?;
    crate::services::auth_guard::validate_email(&email)?;

    state.lockout_service.clear_account_lockout(&email).await?;
    state
        .security_logger
        .log_account_unlocked(&email, &context, "admin")
        .await;

    Ok(create_success_response(
        json!({ "email": email }),
        "Account lockout cleared",
        request_id(&req).as_deref(),
    ))
}

/// 清理锁定索引中的过期条目
pub async fn cleanup_lockouts(
    state: Arc<AppState>,
    _context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let removed = state.lockout_service.cleanup_expired_lockouts().await?;
    Ok(create_success_response(
        CleanupResult { removed },
        "Lockout index cleaned up",
        request_id(&req).as_deref(),
    ))
}

/// 运行一次维护：过期键、锁定索引、开关缓存、过旧事件
pub async fn run_maintenance(
    state: Arc<AppState>,
    _context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let report = state.maintenance.run().await;
    Ok(create_success_response(
        report,
        "Maintenance completed",
        request_id(&req).as_deref(),
    ))
}

/// 所有功能开关
pub async fn list_flags(
    state: Arc<AppState>,
    _context: RequestContext,
    req: Request,
) -> Result<Response, AppError> {
    let flags = state.feature_flags.get_all_flags().await?;
    Ok(create_success_response(
        flags,
        "Feature flags",
        request_id(&req).as_deref(),
    ))
}

/// 更新功能开关
pub async fn update_flag(
    state: Arc<AppState>,
    _context: RequestContext,
    mut req: Request,
) -> Result<Response, AppError> {
    let name = path_param(&mut req).await?;
    let request_id = request_id(&req);
    let update: FlagUpdate = parse_json(req).await?;

    let flag = state.feature_flags.update_flag(&name, update).await?;

    Ok(create_success_response(
        flag,
        "Feature flag updated",
        request_id.as_deref(),
    ))
}
