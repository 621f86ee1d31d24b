//! 路由定义

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::web::handlers;
use crate::web::state::AppState;

/// 上传体积在文件上限之外留出的余量，超出限制时由上传处理函数转成 `FileError::TooLarge`
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// 创建配置好全部路由的 Router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_file_size_bytes() + BODY_LIMIT_SLACK;

    let sessions = Router::new()
        .route("/api/sessions", post(handlers::create_session))
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/sessions/{id}/document", post(handlers::upload_document))
        .route("/api/sessions/{id}/text", post(handlers::submit_text))
        .route("/api/sessions/{id}/run", post(handlers::start_run))
        .route("/api/sessions/{id}/reset", post(handlers::reset_session))
        .route("/api/sessions/{id}/report", get(handlers::download_report))
        .route("/api/sessions/{id}/export", get(handlers::export_session));

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .merge(sessions)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
