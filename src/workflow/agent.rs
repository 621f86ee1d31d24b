//! 智能体请求构建
//!
//! 学生、老师、摘要三种智能体共用同一个构建器：角色 + 模板 ID + 变量
//! → 渲染提示词 → 一次 LLM 调用。构建器本身不保存任何对话状态。

use std::sync::Arc;

use tracing::debug;

use crate::error::AppResult;
use crate::models::prompt::{AgentRole, PromptStore, PromptVars, TemplateId};
use crate::services::llm_service::{ChatModel, ChatRequest, FragmentFn};

/// 一次智能体调用的描述
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub role: AgentRole,
    pub template: TemplateId,
    pub vars: PromptVars,
}

impl AgentCall {
    pub fn new(role: AgentRole, template: TemplateId) -> Self {
        Self {
            role,
            template,
            vars: PromptVars::new(),
        }
    }

    /// 设置一个模板变量
    pub fn var(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.vars.insert(key, value.into());
        self
    }

    /// 摘要智能体：总结文档
    pub fn summarize(document: &str) -> Self {
        Self::new(AgentRole::Summarizer, TemplateId::DocumentSummary).var("document", document)
    }

    /// 摘要智能体：汇总报告
    pub fn final_report(
        document_excerpt: &str,
        summary: &str,
        qa_pairs: &str,
        pair_count: usize,
    ) -> Self {
        Self::new(AgentRole::Summarizer, TemplateId::FinalReport)
            .var("document_excerpt", document_excerpt)
            .var("summary", summary)
            .var("qa_pairs", qa_pairs)
            .var("pair_count", pair_count.to_string())
    }
}

/// 智能体调用器
#[derive(Clone)]
pub struct Agent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptStore>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptStore>) -> Self {
        Self { model, prompts }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// 渲染提示词，得到可以直接发送的请求
    pub fn build(&self, call: &AgentCall) -> AppResult<ChatRequest> {
        let (system, user) = self.prompts.render(call.template, call.role, &call.vars)?;
        debug!(
            "构建 {} 请求 (模板: {}, 版本: {})",
            call.role,
            call.template,
            self.prompts.get(call.template)?.version
        );

        Ok(ChatRequest {
            role: call.role,
            template: call.template,
            system,
            user,
        })
    }

    /// 调用并返回完整文本
    pub async fn ask(&self, call: &AgentCall) -> AppResult<String> {
        let request = self.build(call)?;
        self.model.complete(&request).await
    }

    /// 流式调用，片段通过 `on_fragment` 转发
    pub async fn ask_streaming(
        &self,
        call: &AgentCall,
        on_fragment: &FragmentFn<'_>,
    ) -> AppResult<String> {
        let request = self.build(call)?;
        self.model.complete_streaming(&request, on_fragment).await
    }
}
