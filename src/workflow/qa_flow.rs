//! 问答流程 - 流程层
//!
//! 核心职责：定义"一轮问答"的完整处理流程
//!
//! 流程顺序：
//! 1. 学生根据当前章节提问
//! 2. 老师根据参考文档回答
//! 3. （可选）回答足够复杂时追问，最多 3 次

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::AppResult;
use crate::models::chat::{QaPair, Role, TurnKind};
use crate::models::prompt::{AgentRole, TemplateId};
use crate::models::session::RunSettings;
use crate::services::report_builder::{format_question_history, format_recent_exchanges};
use crate::utils::logging::truncate_text;
use crate::workflow::agent::{Agent, AgentCall};
use crate::workflow::qa_ctx::QaCtx;

/// 老师回答参考的最近问答组数
const RECENT_EXCHANGES: usize = 2;
/// 最近问答中回答的截断长度
const RECENT_ANSWER_CHARS: usize = 150;

/// 专业术语指标
const COMPLEX_TERMS: &[&str] = &[
    "算法", "框架", "架构", "协议", "接口", "实现", "方法", "对象", "模型", "理论", "假设",
    "分析", "评估", "验证", "实证", "系统", "过程", "机制", "结构", "功能", "概念", "原理",
    "定律", "规则", "标准", "指标",
];

/// 复杂句式指标
const COMPLEX_CONNECTIVES: &[&str] = &[
    "也就是说", "换言之", "因此", "其结果", "另一方面", "然而", "此外", "而且", "具体来说",
];

/// 一条待写入的发言
#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub role: Role,
    pub kind: TurnKind,
    pub pair: usize,
    pub followup: Option<usize>,
    pub content: String,
}

/// 流程产出的接收方
///
/// 编排层负责把发言写入会话并推送给前端；返回错误（如会话已被重置）时流程立即停止。
#[async_trait]
pub trait TurnSink: Send + Sync {
    async fn on_turn(&self, turn: TurnDraft) -> AppResult<()>;

    /// 流式片段
    fn on_fragment(&self, role: Role, pair: usize, fragment: &str);
}

/// 单轮问答结果
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub followups: usize,
}

/// 问答流程
///
/// - 编排"一轮"问答：提问 → 回答 → 追问
/// - 不持有会话状态，历史由调用方传入
/// - 只依赖智能体调用器
pub struct QaFlow {
    agent: Agent,
    verbose_logging: bool,
}

impl QaFlow {
    pub fn new(agent: Agent, verbose_logging: bool) -> Self {
        Self {
            agent,
            verbose_logging,
        }
    }

    pub async fn run(
        &self,
        ctx: &QaCtx,
        history: &[QaPair],
        settings: &RunSettings,
        sink: &dyn TurnSink,
    ) -> AppResult<TurnOutcome> {
        // ========== 1. 学生提问 ==========
        info!("{} 🙋 学生提问中...", ctx);
        let question_call = AgentCall::new(AgentRole::Student, TemplateId::Question)
            .var("section", ctx.section.as_str())
            .var("pair_number", ctx.turn.to_string())
            .var("pair_count", ctx.total.to_string())
            .var("history", format_question_history(history))
            .var("summary", &*ctx.summary);

        let question = self
            .agent
            .ask_streaming(&question_call, &|f| {
                sink.on_fragment(Role::Student, ctx.turn, f)
            })
            .await?;
        self.log_text(ctx, "问题", &question);

        sink.on_turn(TurnDraft {
            role: Role::Student,
            kind: TurnKind::Main,
            pair: ctx.turn,
            followup: None,
            content: question.clone(),
        })
        .await?;

        // ========== 2. 老师回答 ==========
        info!("{} 👩‍🏫 老师回答中...", ctx);
        let answer_call = AgentCall::new(AgentRole::Teacher, TemplateId::Answer)
            .var("question", question.as_str())
            .var("section", ctx.section.as_str())
            .var("document", &*ctx.reference)
            .var(
                "history",
                format_recent_exchanges(history, RECENT_EXCHANGES, RECENT_ANSWER_CHARS),
            );

        let answer = self
            .agent
            .ask_streaming(&answer_call, &|f| {
                sink.on_fragment(Role::Teacher, ctx.turn, f)
            })
            .await?;
        self.log_text(ctx, "回答", &answer);

        sink.on_turn(TurnDraft {
            role: Role::Teacher,
            kind: TurnKind::Main,
            pair: ctx.turn,
            followup: None,
            content: answer.clone(),
        })
        .await?;

        // ========== 3. 追问（可选） ==========
        let followups = self
            .run_followups(ctx, settings, question, answer, sink)
            .await?;

        Ok(TurnOutcome { followups })
    }

    /// 回答复杂度达到阈值时追问，复杂度低于阈值立即停止
    async fn run_followups(
        &self,
        ctx: &QaCtx,
        settings: &RunSettings,
        mut last_question: String,
        mut last_answer: String,
        sink: &dyn TurnSink,
    ) -> AppResult<usize> {
        let limit = settings.followup_limit();
        let mut count = 0;

        while count < limit {
            let score = answer_complexity(&last_answer);
            debug!("{} 回答复杂度: {:.2}", ctx, score);
            if score < settings.followup_threshold {
                break;
            }

            let n = count + 1;
            info!("{} 🔁 追问 {}/{} (复杂度 {:.2})", ctx, n, limit, score);

            let question_call = AgentCall::new(AgentRole::Student, TemplateId::FollowUpQuestion)
                .var("question", last_question.as_str())
                .var("answer", last_answer.as_str())
                .var("section", ctx.section.as_str());
            let question = self
                .agent
                .ask_streaming(&question_call, &|f| {
                    sink.on_fragment(Role::Student, ctx.turn, f)
                })
                .await?;
            sink.on_turn(TurnDraft {
                role: Role::Student,
                kind: TurnKind::FollowUp,
                pair: ctx.turn,
                followup: Some(n),
                content: question.clone(),
            })
            .await?;

            let answer_call = AgentCall::new(AgentRole::Teacher, TemplateId::FollowUpAnswer)
                .var("question", question.as_str())
                .var("previous_answer", last_answer.as_str())
                .var("section", ctx.section.as_str());
            let answer = self
                .agent
                .ask_streaming(&answer_call, &|f| {
                    sink.on_fragment(Role::Teacher, ctx.turn, f)
                })
                .await?;
            sink.on_turn(TurnDraft {
                role: Role::Teacher,
                kind: TurnKind::FollowUp,
                pair: ctx.turn,
                followup: Some(n),
                content: answer.clone(),
            })
            .await?;

            last_question = question;
            last_answer = answer;
            count = n;
        }

        Ok(count)
    }

    fn log_text(&self, ctx: &QaCtx, label: &str, text: &str) {
        if self.verbose_logging {
            info!("{} {}: {}", ctx, label, text);
        } else {
            debug!("{} {}: {}", ctx, label, truncate_text(text, 80));
        }
    }
}

/// 回答的专业度评分（0.0-1.0）
///
/// 术语命中数 / 10 × 0.4 + 连接词命中数 / 5 × 0.3 + min(字数 / 500, 1) × 0.3
pub fn answer_complexity(answer: &str) -> f32 {
    let terms = COMPLEX_TERMS.iter().filter(|t| answer.contains(*t)).count() as f32;
    let connectives = COMPLEX_CONNECTIVES
        .iter()
        .filter(|c| answer.contains(*c))
        .count() as f32;
    let length = (answer.chars().count() as f32 / 500.0).min(1.0);

    ((terms / 10.0) * 0.4 + (connectives / 5.0) * 0.3 + length * 0.3).min(1.0)
}
