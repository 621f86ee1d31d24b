//! HTTP 请求处理

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Json,
};
use chrono::{DateTime, Local};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, FileError, SessionError};
use crate::models::document::DocumentInfo;
use crate::models::session::{RunSettings, RunState, SessionSnapshot};
use crate::models::{MAX_FOLLOWUPS, MAX_QA_TURNS, MIN_QA_TURNS};
use crate::orchestrator::{RunEvent, SessionStore};
use crate::services::report_builder::fallback_report;
use crate::web::state::AppState;

/// 内嵌的前端页面
const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// 访问密码请求头
pub const PASSWORD_HEADER: &str = "x-access-password";

/// SSE 保活间隔
const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub sessions: usize,
}

/// 前端初始化所需的默认参数
#[derive(Debug, Serialize)]
pub struct RunDefaults {
    pub pair_count: usize,
    pub min_pair_count: usize,
    pub max_pair_count: usize,
    pub enable_followup: bool,
    pub followup_threshold: f32,
    pub max_followups: usize,
    pub max_file_size_mb: usize,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub defaults: RunDefaults,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub name: Option<String>,
    pub text: String,
}

/// 运行参数，未填写的项使用配置默认值
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub pair_count: Option<usize>,
    pub enable_followup: Option<bool>,
    pub followup_threshold: Option<f32>,
    pub max_followups: Option<usize>,
    pub quick_report: Option<bool>,
}

impl RunRequest {
    fn into_settings(self, defaults: RunSettings) -> RunSettings {
        RunSettings {
            pair_count: self.pair_count.unwrap_or(defaults.pair_count),
            enable_followup: self.enable_followup.unwrap_or(defaults.enable_followup),
            followup_threshold: self
                .followup_threshold
                .unwrap_or(defaults.followup_threshold)
                .clamp(0.0, 1.0),
            max_followups: self.max_followups.unwrap_or(defaults.max_followups),
            quick_report: self.quick_report.unwrap_or(defaults.quick_report),
        }
    }
}

/// 会话导出
#[derive(Debug, Serialize)]
pub struct SessionExport {
    pub exported_at: DateTime<Local>,
    pub model: String,
    pub session: SessionSnapshot,
}

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model_name.clone(),
        sessions: state.store.len(),
    })
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<CreateSessionResponse>)> {
    let supplied = headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());
    state.check_password(supplied)?;

    let session_id = state.store.create();
    let settings = state.default_settings();
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            defaults: RunDefaults {
                pair_count: settings.pair_count,
                min_pair_count: MIN_QA_TURNS,
                max_pair_count: MAX_QA_TURNS,
                enable_followup: settings.enable_followup,
                followup_threshold: settings.followup_threshold,
                max_followups: settings.max_followups.min(MAX_FOLLOWUPS),
                max_file_size_mb: state.config.max_file_size_mb,
            },
        }),
    ))
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionStore::parse_id(&id)?;
    Ok(Json(state.store.snapshot(&id).await?))
}

/// POST /api/sessions/{id}/document
///
/// 请求体为 PDF 原始字节，文件名通过 `?name=` 传入。
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<DocumentInfo>> {
    let id = SessionStore::parse_id(&id)?;
    state.store.get(&id)?;
    let body = body.map_err(|rejection| upload_rejection(&state, &headers, rejection))?;

    let file_name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "document.pdf".to_string());
    info!("📤 会话 {} 上传文件: {} ({} 字节)", id, file_name, body.len());

    state.loader.validate_upload(&body)?;
    let document = state.loader.load_pdf_async(file_name, body.to_vec()).await?;
    let info = state.store.load_document(&id, document).await?;
    Ok(Json(info))
}

/// 请求体读取失败；超过路由体积限制的按文件过大处理
fn upload_rejection(state: &AppState, headers: &HeaderMap, rejection: BytesRejection) -> AppError {
    if rejection.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return FileError::Unreadable(rejection.body_text()).into();
    }

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| state.config.max_file_size_bytes() + 1);
    FileError::TooLarge {
        size,
        limit_mb: state.config.max_file_size_mb,
    }
    .into()
}

/// POST /api/sessions/{id}/text
pub async fn submit_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TextRequest>,
) -> AppResult<Json<DocumentInfo>> {
    let id = SessionStore::parse_id(&id)?;
    state.store.get(&id)?;

    let name = request.name.unwrap_or_default();
    let document = state.loader.load_text(&name, &request.text)?;
    let info = state.store.load_document(&id, document).await?;
    Ok(Json(info))
}

/// POST /api/sessions/{id}/run
///
/// 校验通过后在后台启动运行，响应为运行事件的 SSE 流。
/// 客户端断开不会中止运行，之后仍可通过快照查看结果。
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = SessionStore::parse_id(&id)?;
    let settings = request.into_settings(state.default_settings());

    let ticket = state.store.begin_run(&id, settings).await?;
    let (tx, rx) = mpsc::unbounded_channel();

    let processor = state.processor.clone();
    tokio::spawn(async move {
        if let Err(e) = processor.execute(ticket, tx).await {
            debug!("运行结束: {}", e);
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}

fn to_sse_event(event: &RunEvent) -> Event {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            warn!("⚠️  事件序列化失败: {}", e);
            "{}".to_string()
        }
    };
    Event::default().event(event.name()).data(data)
}

/// POST /api/sessions/{id}/reset
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionStore::parse_id(&id)?;
    state.store.reset(&id).await?;
    Ok(Json(state.store.snapshot(&id).await?))
}

/// GET /api/sessions/{id}/report
///
/// 运行失败时用已完成的问答拼出一份报告。
pub async fn download_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = SessionStore::parse_id(&id)?;
    let handle = state.store.get(&id)?;

    let report = handle
        .read(|s| {
            if let Some(report) = s.report() {
                return Some(report.to_string());
            }
            let pairs = s.log().qa_pairs();
            if matches!(s.state(), RunState::Failed { .. }) && !pairs.is_empty() {
                let title = s.document().map_or("文档", |d| d.file_name.as_str());
                return Some(fallback_report(title, s.summary().unwrap_or_default(), &pairs));
            }
            None
        })
        .await
        .ok_or(SessionError::NoReport)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"report.md\"",
            ),
        ],
        report,
    )
        .into_response())
}

/// GET /api/sessions/{id}/export
pub async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionExport>> {
    let id = SessionStore::parse_id(&id)?;
    let session = state.store.snapshot(&id).await?;
    Ok(Json(SessionExport {
        exported_at: Local::now(),
        model: state.model_name.clone(),
        session,
    }))
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = SessionStore::parse_id(&id)?;
    state.store.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
