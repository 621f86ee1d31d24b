//! LLM 服务 - 业务能力层
//!
//! 只负责"一次 chat completion 调用"能力，不关心提示词内容和流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//! - 支持整段返回和流式返回两种方式

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, LlmError};
use crate::models::prompt::{AgentRole, TemplateId};

/// 一次 LLM 请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub role: AgentRole,
    pub template: TemplateId,
    pub system: String,
    pub user: String,
}

/// 流式片段回调，片段只在回调期间有效
pub type FragmentFn<'a> = dyn for<'f> Fn(&'f str) + Send + Sync + 'a;

/// LLM 调用接口
///
/// 编排层只依赖这个 trait，测试时可以换成脚本化的实现。
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// 一次性返回完整回复
    async fn complete(&self, request: &ChatRequest) -> AppResult<String>;

    /// 流式返回，每收到一个片段调用一次 `on_fragment`，最终返回完整文本
    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        on_fragment: &FragmentFn<'_>,
    ) -> AppResult<String> {
        let text = self.complete(request).await?;
        on_fragment(&text);
        Ok(text)
    }
}

/// 基于 async-openai 的 LLM 服务
///
/// 职责：
/// - 把 system / user 文本组装成 chat completion 请求
/// - 超时控制（流式时按分片间隔计时）
/// - 把上游错误归类为 `LlmError`
/// - 不重试
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_response_tokens,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// 构建请求
    fn build_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> AppResult<CreateChatCompletionRequest> {
        let mut messages = Vec::new();

        if !request.system.trim().is_empty() {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.as_str())
                .build()
                .map_err(|e| AppError::llm_api_failed(&self.model_name, e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user.as_str())
            .build()
            .map_err(|e| AppError::llm_api_failed(&self.model_name, e))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);
        if stream {
            builder.stream(true);
        }

        builder
            .build()
            .map_err(|e| AppError::llm_api_failed(&self.model_name, e))
    }

    fn timeout_error(&self) -> AppError {
        LlmError::Timeout {
            model: self.model_name.clone(),
            secs: self.timeout.as_secs(),
        }
        .into()
    }
}

#[async_trait]
impl ChatModel for LlmService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: &ChatRequest) -> AppResult<String> {
        debug!(
            "调用 LLM API，模型: {}, 角色: {}, 模板: {}",
            self.model_name, request.role, request.template
        );
        debug!("用户消息长度: {} 字符", request.user.chars().count());

        let api_request = self.build_request(request, false)?;

        // 调用 API
        let response = timeout(self.timeout, self.client.chat().create(api_request))
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                classify_error(&self.model_name, self.timeout, e)
            })?;

        debug!("LLM API 调用成功");

        // 提取响应内容
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        on_fragment: &FragmentFn<'_>,
    ) -> AppResult<String> {
        debug!(
            "调用 LLM API (流式)，模型: {}, 角色: {}, 模板: {}",
            self.model_name, request.role, request.template
        );

        let api_request = self.build_request(request, true)?;

        let mut stream = timeout(self.timeout, self.client.chat().create_stream(api_request))
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| {
                warn!("LLM 流式调用失败: {}", e);
                classify_error(&self.model_name, self.timeout, e)
            })?;

        let mut content = String::new();
        loop {
            // 超时按相邻分片的间隔计算
            let next = timeout(self.timeout, stream.next())
                .await
                .map_err(|_| self.timeout_error())?;

            let Some(chunk) = next else {
                break;
            };

            let chunk = chunk.map_err(|e| {
                warn!("LLM 流式响应出错: {}", e);
                classify_error(&self.model_name, self.timeout, e)
            })?;

            for choice in chunk.choices {
                if let Some(fragment) = choice.delta.content {
                    if !fragment.is_empty() {
                        on_fragment(&fragment);
                        content.push_str(&fragment);
                    }
                }
            }
        }

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyContent {
                model: self.model_name.clone(),
            }
            .into());
        }

        debug!("LLM 流式调用完成，共 {} 字符", content.chars().count());
        Ok(content)
    }
}

/// 把 async-openai 的错误归类
fn classify_error(model: &str, limit: Duration, error: OpenAIError) -> AppError {
    if matches!(error, OpenAIError::JSONDeserialize(..)) {
        return LlmError::Malformed {
            model: model.to_string(),
            message: error.to_string(),
        }
        .into();
    }

    let message = error.to_string();
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        return LlmError::RateLimited {
            model: model.to_string(),
            message,
        }
        .into();
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return LlmError::Timeout {
            model: model.to_string(),
            secs: limit.as_secs(),
        }
        .into();
    }

    AppError::llm_api_failed(model, error)
}
