//! 认证安全控制面
//! 速率限制、账户锁定、功能开关、安全事件审计与统一错误响应

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod response;
pub mod routes;
pub mod services;
pub mod telemetry;
