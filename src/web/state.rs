//! 共享应用状态

use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppResult, ConfigError};
use crate::models::prompt::PromptStore;
use crate::models::session::RunSettings;
use crate::orchestrator::{RunProcessor, SessionStore};
use crate::services::document_loader::DocumentLoader;
use crate::services::llm_service::ChatModel;

/// 所有请求共享的状态
pub struct AppState {
    pub config: Config,
    pub store: SessionStore,
    pub loader: DocumentLoader,
    pub processor: Arc<RunProcessor>,
    pub model_name: String,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn ChatModel>, prompts: Arc<PromptStore>) -> Self {
        let model_name = model.model_name().to_string();
        Self {
            store: SessionStore::new(),
            loader: DocumentLoader::new(&config),
            processor: Arc::new(RunProcessor::new(model, prompts, &config)),
            model_name,
            config,
        }
    }

    /// 校验访问密码，未配置密码时总是通过
    pub fn check_password(&self, supplied: Option<&str>) -> AppResult<()> {
        match self.config.app_password.as_deref() {
            Some(expected) if !expected.is_empty() => {
                if supplied == Some(expected) {
                    Ok(())
                } else {
                    Err(ConfigError::BadPassword.into())
                }
            }
            _ => Ok(()),
        }
    }

    /// 配置中的默认运行参数
    pub fn default_settings(&self) -> RunSettings {
        RunSettings {
            pair_count: self.config.default_qa_turns,
            enable_followup: self.config.enable_followup,
            followup_threshold: self.config.followup_threshold,
            max_followups: self.config.max_followup_questions,
            quick_report: false,
        }
    }
}
