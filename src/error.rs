use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 应用程序错误类型
///
/// 所有错误都在编排层边界被捕获，写入会话并展示给用户，不做自动重试。
#[derive(Debug, Error)]
pub enum AppError {
    /// 上传文件无效（类型错误 / 过大 / 损坏 / 无文本）
    #[error("文件错误: {0}")]
    InvalidFile(#[from] FileError),
    /// 文档 token 数超过上限且无法分段
    #[error("Token 超限: 文档约 {tokens} tokens，上限 {ceiling} ({reason})")]
    TokenLimitExceeded {
        tokens: usize,
        ceiling: usize,
        reason: String,
    },
    /// 配置错误（缺少 API Key / 密码错误等）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 上游 LLM API 错误
    #[error("LLM错误: {0}")]
    Upstream(#[from] LlmError),
    /// 提示词模板错误
    #[error("提示词错误: {0}")]
    Prompt(#[from] PromptError),
    /// 会话状态错误
    #[error("会话错误: {0}")]
    Session(#[from] SessionError),
    /// 监听端口 / 服务运行错误
    #[error("服务器错误: {0}")]
    Server(#[from] std::io::Error),
}

/// 文件相关错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("文件大小 {size} 字节超过上限 {limit_mb}MB")]
    TooLarge { size: usize, limit_mb: usize },
    #[error("仅支持 PDF 文件")]
    NotPdf,
    #[error("文件为空")]
    Empty,
    #[error("PDF 解析失败: {source}")]
    Corrupt {
        #[source]
        source: lopdf::Error,
    },
    #[error("PDF 已加密，无法读取")]
    Encrypted,
    #[error("PDF 中没有可提取的文本")]
    NoText,
    #[error("PDF 解析任务异常: {0}")]
    Extraction(String),
    #[error("读取上传内容失败: {0}")]
    Unreadable(String),
    #[error("文本输入无效: {reason}")]
    InvalidText { reason: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("环境变量 OPENAI_API_KEY 未设置")]
    MissingApiKey,
    #[error("访问密码不正确")]
    BadPassword,
    #[error("读取配置文件失败 ({path}): {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件失败 ({path}): {source}")]
    FileParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    #[error("配置项 {field} 无效: {reason}")]
    Invalid { field: String, reason: String },
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM 请求超时 (模型: {model}, {secs}秒)")]
    Timeout { model: String, secs: u64 },
    #[error("LLM 请求频率受限 (模型: {model}): {message}")]
    RateLimited { model: String, message: String },
    #[error("LLM 响应格式错误 (模型: {model}): {message}")]
    Malformed { model: String, message: String },
    #[error("LLM 返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    #[error("LLM API调用失败 (模型: {model}): {source}")]
    ApiCallFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 提示词模板错误
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("读取提示词文件失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("解析提示词文件失败 ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("未知的模板 ID: {0}")]
    UnknownTemplate(String),
    #[error("找不到模板 {id} (版本: {version})")]
    NotFound { id: String, version: String },
    #[error("无效的模板版本: {0}")]
    InvalidVersion(String),
    #[error("模板 {id} 包含未知占位符 {{{placeholder}}}")]
    UnknownPlaceholder { id: String, placeholder: String },
    #[error("模板 {id} 缺少必需占位符 {{{placeholder}}}")]
    MissingPlaceholder { id: String, placeholder: String },
    #[error("模板 {id} 属于 {actual} 角色，不能由 {requested} 使用")]
    RoleMismatch {
        id: String,
        actual: String,
        requested: String,
    },
}

/// 会话错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("会话不存在: {0}")]
    NotFound(String),
    #[error("当前会话已有任务在运行")]
    RunInProgress,
    #[error("尚未上传文档")]
    NoDocument,
    #[error("问答轮数 {value} 超出范围 [{min}, {max}]")]
    InvalidPairCount { value: usize, min: usize, max: usize },
    #[error("状态 {from} 无法切换到 {to}")]
    InvalidTransition { from: String, to: String },
    #[error("任务已被重置取消")]
    Cancelled,
    #[error("报告尚未生成")]
    NoReport,
}

impl AppError {
    /// 错误分类代码（用于前端展示与日志）
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidFile(_) => "INVALID_FILE",
            AppError::TokenLimitExceeded { .. } => "TOKEN_LIMIT_EXCEEDED",
            AppError::Config(ConfigError::BadPassword) => "UNAUTHORIZED",
            AppError::Config(_) => "CONFIGURATION_ERROR",
            AppError::Upstream(_) => "UPSTREAM_API_ERROR",
            AppError::Prompt(_) => "PROMPT_LOAD_ERROR",
            AppError::Session(SessionError::NotFound(_)) => "SESSION_NOT_FOUND",
            AppError::Session(SessionError::Cancelled) => "CANCELLED",
            AppError::Session(_) => "SESSION_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
        }
    }

    /// 对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidFile(FileError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InvalidFile(_) => StatusCode::BAD_REQUEST,
            AppError::TokenLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Config(ConfigError::BadPassword) => StatusCode::UNAUTHORIZED,
            AppError::Config(_) | AppError::Prompt(_) | AppError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Upstream(LlmError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(LlmError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Session(SessionError::NotFound(_))
            | AppError::Session(SessionError::NoReport) => StatusCode::NOT_FOUND,
            AppError::Session(SessionError::RunInProgress)
            | AppError::Session(SessionError::InvalidTransition { .. })
            | AppError::Session(SessionError::Cancelled) => StatusCode::CONFLICT,
            AppError::Session(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// 创建 LLM API 调用错误
    pub fn llm_api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Upstream(LlmError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建文本输入错误
    pub fn invalid_text(reason: impl Into<String>) -> Self {
        AppError::InvalidFile(FileError::InvalidText {
            reason: reason.into(),
        })
    }

    /// 底层原因（不重复 `error` 中已有的文字）
    pub fn details(&self) -> Option<String> {
        use std::error::Error as _;

        let cause = match self {
            AppError::InvalidFile(e) => e.source(),
            AppError::Config(e) => e.source(),
            AppError::Upstream(e) => e.source(),
            AppError::Prompt(e) => e.source(),
            AppError::Session(e) => e.source(),
            AppError::Server(e) => e.source(),
            AppError::TokenLimitExceeded { .. } => None,
        };
        cause.map(|c| c.to_string())
    }

    /// 是否由重置取消引起
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Session(SessionError::Cancelled))
    }
}

/// HTTP 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "请求处理失败");
        } else {
            tracing::warn!(code = self.code(), error = %self, "请求被拒绝");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
