//! 认证安全控制面主入口

use auth_guard::{
    cache::{CacheStore, MemoryStore},
    clock::{system_clock, Clock},
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::{MemorySecurityEventRepository, PgSecurityEventRepository, SecurityEventRepository},
    routes,
    services::{FlagSource, StaticFlagSource},
    telemetry,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("auth-guard {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 按优先级加载：.env.local > .env.development > .env
    if let Ok(path) = std::env::var("AUTH_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "auth-guard starting...");

    // 3. 持久化存储（可选）
    let db_pool = db::connect_optional(&config.database).await?;
    let event_repo: Arc<dyn SecurityEventRepository> = match &db_pool {
        Some(pool) => Arc::new(PgSecurityEventRepository::new(pool.clone())),
        None => Arc::new(MemorySecurityEventRepository::with_capacity(
            config.database.memory_event_capacity,
        )),
    };

    // 4. 缓存存储与开关来源
    let clock = system_clock();
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
    let flag_source: Arc<dyn FlagSource> = Arc::new(StaticFlagSource::with_defaults(clock.now()));

    let app_state = Arc::new(AppState::new(
        config.clone(),
        db_pool,
        store,
        event_repo,
        flag_source,
        clock,
    ));

    // 预热开关缓存，失败只记录
    match app_state.feature_flags.warm_up().await {
        Ok(count) => tracing::info!(count, "Feature flag cache warmed up"),
        Err(e) => tracing::warn!(error = %e, "Feature flag warm-up failed"),
    }

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 收到信号后开始关闭，并在超时后强制退出
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("auth-guard {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: auth-guard [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 AUTH_ 前缀的环境变量完成");
    println!("  例如 AUTH_SECURITY__MAX_LOGIN_ATTEMPTS=5");
}
