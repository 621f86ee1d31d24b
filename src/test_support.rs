//! 单元测试共用的替身实现

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppResult, LlmError};
use crate::models::chat::Role;
use crate::models::prompt::TemplateId;
use crate::services::llm_service::{ChatModel, ChatRequest, FragmentFn};
use crate::workflow::qa_flow::{TurnDraft, TurnSink};

/// 按模板返回固定内容的模型
pub(crate) struct ScriptedModel {
    fail_on: Option<TemplateId>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self {
            fail_on: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 遇到该模板时返回上游错误
    pub(crate) fn fail_on(mut self, template: TemplateId) -> Self {
        self.fail_on = Some(template);
        self
    }

    /// 每次调用前等待
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_for(&self, template: TemplateId) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.template == template)
            .collect()
    }

    fn reply(&self, template: TemplateId) -> String {
        match template {
            TemplateId::DocumentSummary => "这是文档摘要：文档介绍了所有权与借用。".to_string(),
            TemplateId::Question => {
                let n = self.requests_for(TemplateId::Question).len();
                format!("第{}个问题：这一部分的要点是什么？", n)
            }
            TemplateId::Answer => "这一部分讲的是所有权。".to_string(),
            TemplateId::FinalReport => "这是一份学习报告。".to_string(),
            TemplateId::FollowUpQuestion => "能再具体一点吗？".to_string(),
            TemplateId::FollowUpAnswer => "补充说明。".to_string(),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> AppResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(request.template) {
            return Err(LlmError::EmptyContent {
                model: "scripted".to_string(),
            }
            .into());
        }
        Ok(self.reply(request.template))
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        on_fragment: &FragmentFn<'_>,
    ) -> AppResult<String> {
        let text = self.complete(request).await?;
        let middle = text.chars().count() / 2;
        let head: String = text.chars().take(middle).collect();
        let tail: String = text.chars().skip(middle).collect();
        for part in [head, tail] {
            if !part.is_empty() {
                on_fragment(&part);
            }
        }
        Ok(text)
    }
}

/// 记录流程产出的接收方
#[derive(Default)]
pub(crate) struct RecordingSink {
    turns: Mutex<Vec<TurnDraft>>,
    fragments: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn turns(&self) -> Vec<TurnDraft> {
        self.turns.lock().unwrap().clone()
    }

    pub(crate) fn fragment_count(&self) -> usize {
        self.fragments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnSink for RecordingSink {
    async fn on_turn(&self, turn: TurnDraft) -> AppResult<()> {
        self.turns.lock().unwrap().push(turn);
        Ok(())
    }

    fn on_fragment(&self, _role: Role, _pair: usize, _fragment: &str) {
        self.fragments.fetch_add(1, Ordering::SeqCst);
    }
}
