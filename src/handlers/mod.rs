//! HTTP 处理器模块

pub mod admin;
pub mod auth;
pub mod health;

use crate::error::{AppError, AuthError};
use axum::{
    extract::{FromRequest, Path, Query, Request},
    Json, RequestExt,
};
use serde::de::DeserializeOwned;

/// 解析 JSON 请求体，格式错误归为 VALIDATION_ERROR
pub(crate) async fn parse_json<T: DeserializeOwned + Send>(req: Request) -> Result<T, AppError> {
    let Json(body) = Json::<T>::from_request(req, &()).await.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "Rejected request body");
        AuthError::validation("Request body is not valid JSON for this operation").with_field("body")
    })?;
    Ok(body)
}

/// 解析查询参数
pub(crate) async fn parse_query<T: DeserializeOwned + Send + 'static>(
    req: &mut Request,
) -> Result<T, AppError> {
    let Query(query) = req.extract_parts::<Query<T>>().await.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "Rejected query string");
        AuthError::validation("Query string is invalid for this operation").with_field("query")
    })?;
    Ok(query)
}

/// 读取单个路径参数
pub(crate) async fn path_param(req: &mut Request) -> Result<String, AppError> {
    let Path(value) = req
        .extract_parts::<Path<String>>()
        .await
        .map_err(|rejection| {
            tracing::debug!(error = %rejection.body_text(), "Rejected path parameter");
            AuthError::validation("Path parameter is invalid").with_field("path")
        })?;
    Ok(value)
}

/// 请求头中的 X-Request-Id（如果有）
pub(crate) fn request_id(req: &Request) -> Option<String> {
    req.headers()
        .get(crate::response::X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
