use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};

/// 程序配置
///
/// 加载顺序：默认值 → TOML 配置文件 → 环境变量，最后统一校验。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    // --- LLM 配置 ---
    /// API 密钥，只从环境变量读取
    #[serde(skip)]
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub temperature: f32,
    /// 单次回复的最大 token 数
    pub max_response_tokens: u32,
    /// 单次请求（或流式分片间隔）超时秒数
    pub request_timeout_secs: u64,
    // --- 文档配置 ---
    pub max_file_size_mb: usize,
    /// 文档 token 上限
    pub max_tokens: usize,
    /// 超限分段时允许的最大段数
    pub max_chunks: usize,
    /// 是否提取 PDF 内嵌图片
    pub extract_images: bool,
    pub max_images: usize,
    // --- 问答配置 ---
    pub default_qa_turns: usize,
    pub enable_followup: bool,
    pub followup_threshold: f32,
    pub max_followup_questions: usize,
    // --- 提示词配置 ---
    /// 自定义提示词文件，不设置时使用内置模板
    pub prompt_file: Option<String>,
    /// "latest" 或具体版本号（如 "v2"）
    pub prompt_version: String,
    // --- 会话配置 ---
    /// 访问密码，只从环境变量读取
    #[serde(skip)]
    pub app_password: Option<String>,
    /// 会话空闲多久后回收（分钟）
    pub session_ttl_minutes: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8501,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            temperature: 0.7,
            max_response_tokens: 2000,
            request_timeout_secs: 120,
            max_file_size_mb: 50,
            max_tokens: 250_000,
            max_chunks: 8,
            extract_images: false,
            max_images: 20,
            default_qa_turns: 10,
            enable_followup: false,
            followup_threshold: 0.6,
            max_followup_questions: 3,
            prompt_file: None,
            prompt_version: "latest".to_string(),
            app_password: None,
            session_ttl_minutes: 120,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从配置文件加载（文件不存在时使用默认值），然后应用环境变量并校验
    pub fn load(path: &Path) -> AppResult<Self> {
        let base = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::info!("未找到配置文件 {}，使用默认配置", path.display());
            Self::default()
        };

        let config = base.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 解析 TOML 配置文件
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, origin: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::FileParse {
            path: origin.to_string(),
            source,
        })?;
        Ok(config)
    }

    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().apply_env()
    }

    /// 用环境变量覆盖当前配置
    pub fn apply_env(mut self) -> AppResult<Self> {
        if let Some(key) = env_string("OPENAI_API_KEY") {
            self.llm_api_key = key;
        }
        if let Some(password) = env_string("APP_PASSWORD") {
            self.app_password = Some(password);
        }
        if let Some(base) = env_string("OPENAI_API_BASE") {
            self.llm_api_base_url = base;
        }
        if let Some(model) = env_string("LLM_MODEL_NAME") {
            self.llm_model_name = model;
        }
        if let Some(host) = env_string("HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            self.port = port;
        }
        if let Some(verbose) = env_parse::<bool>("VERBOSE_LOGGING")? {
            self.verbose_logging = verbose;
        }
        Ok(self)
    }

    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey.into());
        }
        if self.port == 0 {
            return Err(invalid("port", "端口不能为 0"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens", "必须大于 0"));
        }
        if self.max_file_size_mb == 0 {
            return Err(invalid("max_file_size_mb", "必须大于 0"));
        }
        if self.max_chunks == 0 {
            return Err(invalid("max_chunks", "必须大于 0"));
        }
        if !(crate::models::MIN_QA_TURNS..=crate::models::MAX_QA_TURNS)
            .contains(&self.default_qa_turns)
        {
            return Err(invalid(
                "default_qa_turns",
                format!(
                    "必须在 {}-{} 之间",
                    crate::models::MIN_QA_TURNS,
                    crate::models::MAX_QA_TURNS
                ),
            ));
        }
        if self.max_followup_questions > crate::models::MAX_FOLLOWUPS {
            return Err(invalid(
                "max_followup_questions",
                format!("不能超过 {}", crate::models::MAX_FOLLOWUPS),
            ));
        }
        if !(0.0..=1.0).contains(&self.followup_threshold) {
            return Err(invalid("followup_threshold", "必须在 0.0-1.0 之间"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "必须大于 0"));
        }
        Ok(())
    }

    /// 文件大小上限（字节）
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    /// 是否启用访问密码
    pub fn password_required(&self) -> bool {
        self.app_password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> crate::error::AppError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }),
    }
}
