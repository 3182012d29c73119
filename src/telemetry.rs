//! 日志与追踪系统
//! 初始化结构化日志和指标描述

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 安全事件降级通道的日志 target
pub const SECURITY_FALLBACK_TARGET: &str = "security_fallback";

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // 保留 target，降级通道依赖它区分安全事件
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer().pretty().boxed(),
        _ => tracing_subscriber::fmt::layer().boxed(),
    };

    // 测试中可能重复初始化，忽略已存在的全局 subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .try_init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        environment = %config.flags.environment,
        "Telemetry initialized"
    );
}

/// 注册指标说明
///
/// metrics 0.24 在首次使用时创建指标，这里只补充描述信息
pub fn init_metrics() {
    metrics::describe_counter!("rate_limit_checks_total", "Rate limit checks by result");
    metrics::describe_counter!(
        "rate_limit_fail_open_total",
        "Rate limit checks allowed because the cache store was unavailable"
    );
    metrics::describe_counter!("account_lockouts_total", "Accounts locked");
    metrics::describe_counter!("security_events_total", "Security events logged by type");
    metrics::describe_counter!(
        "security_event_fallback_total",
        "Security events written to the fallback log channel"
    );
    metrics::describe_counter!(
        "security_event_repo_timeouts_total",
        "Security event repository calls that timed out"
    );
    metrics::describe_counter!("auth_errors_total", "Error responses by error type");
    metrics::describe_counter!("cache_store_timeouts_total", "Cache store calls that timed out");
    metrics::describe_counter!("http_requests_total", "HTTP requests");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP request latency");
    tracing::debug!("Metrics initialized");
}
