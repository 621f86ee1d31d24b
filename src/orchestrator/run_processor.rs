//! 单次运行处理器 - 编排层
//!
//! ## 职责
//!
//! 驱动一个会话从 Summarizing 到 Done 的完整状态机：
//!
//! ```text
//! Idle → Summarizing → QaExchanging(1..N) → Compiling → Done
//!              ↘               ↘                ↘
//!                          Failed
//! ```
//!
//! - 每个状态按顺序执行，同一时间只有一个 API 调用
//! - 进度通过 `RunEvent` 推送给前端（SSE）
//! - 任何上游错误都会让会话进入 Failed，不重试
//! - 重置会话时取消令牌触发，任务立即停止，迟到的写入被丢弃

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppResult, SessionError};
use crate::models::chat::{ChatTurn, Role};
use crate::models::prompt::{AgentRole, PromptStore};
use crate::models::session::{RunState, SessionStats};
use crate::orchestrator::session_store::{RunTicket, SessionHandle};
use crate::services::llm_service::ChatModel;
use crate::services::report_builder::{
    document_excerpt, ensure_report_structure, fallback_report, format_qa_for_report,
};
use crate::services::token_counter::{estimate_tokens, split_sections_across};
use crate::utils::logging::{log_run_start, log_turn_complete, print_final_stats};
use crate::workflow::agent::{Agent, AgentCall};
use crate::workflow::qa_ctx::QaCtx;
use crate::workflow::qa_flow::{QaFlow, TurnDraft, TurnSink};

/// 汇总报告中引用的文档开头长度
const REPORT_EXCERPT_CHARS: usize = 2000;

/// 章节加参考段落超过 token 上限时，回答只依据章节
const SECTION_ONLY_REFERENCE: &str = "（文档较长，本轮只提供下方的相关章节）";

/// 推送给前端的运行事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    StateChanged {
        state: RunState,
    },
    /// 文档超过 token 上限，已分段处理
    DocumentSegmented {
        chunks: usize,
        total_tokens: usize,
        ceiling: usize,
    },
    /// 流式片段；摘要与报告的 pair 为 0
    Fragment {
        speaker: AgentRole,
        pair: usize,
        text: String,
    },
    SummaryReady {
        summary: String,
    },
    TurnAdded {
        turn: ChatTurn,
    },
    ReportReady {
        report: String,
    },
    Failed {
        code: String,
        message: String,
    },
    Finished {
        stats: SessionStats,
    },
}

impl RunEvent {
    /// SSE 事件名
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::StateChanged { .. } => "state_changed",
            RunEvent::DocumentSegmented { .. } => "document_segmented",
            RunEvent::Fragment { .. } => "fragment",
            RunEvent::SummaryReady { .. } => "summary_ready",
            RunEvent::TurnAdded { .. } => "turn_added",
            RunEvent::ReportReady { .. } => "report_ready",
            RunEvent::Failed { .. } => "failed",
            RunEvent::Finished { .. } => "finished",
        }
    }

    /// 是否为最后一个事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Failed { .. } | RunEvent::Finished { .. })
    }
}

/// 运行处理器
///
/// 由所有会话共享，本身不保存任何会话状态。
pub struct RunProcessor {
    agent: Agent,
    flow: QaFlow,
    ceiling: usize,
}

impl RunProcessor {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptStore>, config: &Config) -> Self {
        let agent = Agent::new(model, prompts);
        Self {
            flow: QaFlow::new(agent.clone(), config.verbose_logging),
            agent,
            ceiling: config.max_tokens,
        }
    }

    /// 执行一次运行，直到完成、失败或被取消
    pub async fn execute(&self, ticket: RunTicket, events: UnboundedSender<RunEvent>) -> AppResult<()> {
        let session_id = ticket.handle.id.to_string();
        log_run_start(
            &session_id,
            &ticket.document.file_name,
            ticket.settings.pair_count,
        );

        let result = tokio::select! {
            _ = ticket.cancel.cancelled() => Err(SessionError::Cancelled.into()),
            result = self.drive(&ticket, &events) => result,
        };

        match &result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                warn!("⚠️  会话 {} 的运行已取消", session_id);
            }
            Err(e) => {
                error!("❌ 会话 {} 运行失败: {}", session_id, e);
                let code = e.code().to_string();
                let message = e.to_string();
                let recorded = ticket
                    .handle
                    .commit(ticket.generation, |s| {
                        s.fail(&code, message.clone());
                        Ok(())
                    })
                    .await;
                if recorded.is_ok() {
                    let _ = events.send(RunEvent::StateChanged {
                        state: RunState::Failed {
                            message: message.clone(),
                        },
                    });
                    let _ = events.send(RunEvent::Failed { code, message });
                }
            }
        }

        ticket.handle.finish_run(ticket.generation).await;
        result
    }

    async fn drive(&self, ticket: &RunTicket, events: &UnboundedSender<RunEvent>) -> AppResult<()> {
        let handle = &ticket.handle;
        let generation = ticket.generation;
        let document = &ticket.document;
        let total = ticket.settings.pair_count;

        // ========== 1. 摘要 ==========
        let _ = events.send(RunEvent::StateChanged {
            state: RunState::Summarizing,
        });

        if document.is_segmented() {
            warn!(
                "⚠️  文档约 {} tokens，按 {} 段处理",
                document.total_tokens,
                document.chunks.len()
            );
            let _ = events.send(RunEvent::DocumentSegmented {
                chunks: document.chunks.len(),
                total_tokens: document.total_tokens,
                ceiling: self.ceiling,
            });
        }

        info!("📝 生成文档摘要...");
        let summary = self
            .agent
            .ask_streaming(
                &AgentCall::summarize(document.summary_source()),
                &fragment_forwarder(events, AgentRole::Summarizer, 0),
            )
            .await?;

        handle
            .commit(generation, |s| {
                s.set_summary(summary.clone());
                Ok(())
            })
            .await?;
        let _ = events.send(RunEvent::SummaryReady {
            summary: summary.clone(),
        });
        info!("✓ 摘要完成 ({} 字符)", summary.chars().count());

        // ========== 2. 问答 ==========
        let summary: Arc<str> = Arc::from(summary);
        let sections = split_sections_across(&document.chunks, total);
        let sink = SessionSink {
            handle: handle.clone(),
            generation,
            events: events.clone(),
        };

        for (i, section) in sections.into_iter().enumerate() {
            let turn = i + 1;
            let state = RunState::QaExchanging { turn, total };
            let history = handle
                .commit(generation, |s| {
                    s.transition(state.clone())?;
                    Ok(s.log().qa_pairs())
                })
                .await?;
            let _ = events.send(RunEvent::StateChanged { state });

            let reference = self.reference_for(&section, document.reference_for_turn(turn, total));
            let ctx = QaCtx::new(handle.id, turn, total, section, reference, summary.clone());

            let outcome = self
                .flow
                .run(&ctx, &history, &ticket.settings, &sink)
                .await?;
            log_turn_complete(turn, total, outcome.followups);
        }

        // ========== 3. 汇总报告 ==========
        let pairs = handle
            .commit(generation, |s| {
                s.transition(RunState::Compiling)?;
                Ok(s.log().qa_pairs())
            })
            .await?;
        let _ = events.send(RunEvent::StateChanged {
            state: RunState::Compiling,
        });

        let report = if ticket.settings.quick_report {
            info!("📋 快速模式：直接拼接摘要与问答");
            fallback_report(&document.file_name, &summary, &pairs)
        } else {
            info!("📋 生成汇总报告...");
            let call = AgentCall::final_report(
                &document_excerpt(
                    &document.text,
                    REPORT_EXCERPT_CHARS.min(self.ceiling.saturating_mul(4)),
                ),
                &summary,
                &format_qa_for_report(&pairs),
                total,
            );
            let raw_report = self
                .agent
                .ask_streaming(&call, &fragment_forwarder(events, AgentRole::Summarizer, 0))
                .await?;
            ensure_report_structure(&raw_report, &summary, &pairs)
        };

        let stats = handle
            .commit(generation, |s| {
                s.set_report(report.clone());
                s.transition(RunState::Done)?;
                Ok(s.stats())
            })
            .await?;

        let _ = events.send(RunEvent::ReportReady { report });
        let _ = events.send(RunEvent::StateChanged {
            state: RunState::Done,
        });
        print_final_stats(
            &handle.id.to_string(),
            stats.qa_count,
            stats.followup_count,
            stats.duration_secs.unwrap_or(0),
        );
        let _ = events.send(RunEvent::Finished { stats });

        Ok(())
    }

    /// 老师回答的参考文本：章节与参考段落一起发送时不能超过 token 上限
    fn reference_for(&self, section: &str, chunk: &str) -> Arc<str> {
        if estimate_tokens(section) + estimate_tokens(chunk) <= self.ceiling {
            Arc::from(chunk)
        } else {
            debug!("参考段落约 {} tokens，本轮只发送章节", estimate_tokens(chunk));
            Arc::from(SECTION_ONLY_REFERENCE)
        }
    }
}

/// 把流式片段转成事件
fn fragment_forwarder(
    events: &UnboundedSender<RunEvent>,
    speaker: AgentRole,
    pair: usize,
) -> impl Fn(&str) + Send + Sync + '_ {
    move |text: &str| {
        let _ = events.send(RunEvent::Fragment {
            speaker,
            pair,
            text: text.to_string(),
        });
    }
}

/// 把问答流程的产出写入会话并推送事件
struct SessionSink {
    handle: Arc<SessionHandle>,
    generation: u64,
    events: UnboundedSender<RunEvent>,
}

#[async_trait::async_trait]
impl TurnSink for SessionSink {
    async fn on_turn(&self, draft: TurnDraft) -> AppResult<()> {
        let turn = self
            .handle
            .commit(self.generation, |s| {
                let turn = s
                    .log_mut()
                    .push(draft.role, draft.kind, draft.pair, draft.followup, draft.content)
                    .clone();
                s.touch();
                Ok(turn)
            })
            .await?;
        let _ = self.events.send(RunEvent::TurnAdded { turn });
        Ok(())
    }

    fn on_fragment(&self, role: Role, pair: usize, fragment: &str) {
        let _ = self.events.send(RunEvent::Fragment {
            speaker: role.agent(),
            pair,
            text: fragment.to_string(),
        });
    }
}
