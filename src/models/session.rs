use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppResult, SessionError};
use crate::models::chat::{ChatLog, ChatTurn};
use crate::models::document::{Document, DocumentInfo};
use crate::models::{MAX_FOLLOWUPS, MAX_QA_TURNS, MIN_QA_TURNS};

/// 运行状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Summarizing,
    QaExchanging { turn: usize, total: usize },
    Compiling,
    Done,
    Failed { message: String },
}

impl RunState {
    /// 是否处于运行中
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Summarizing | RunState::QaExchanging { .. } | RunState::Compiling
        )
    }

    /// 状态迁移是否合法（重置除外，重置总是回到 Idle）
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Summarizing) => true,
            (RunState::Summarizing, RunState::QaExchanging { turn: 1, total }) => *total > 0,
            (
                RunState::QaExchanging { turn, total },
                RunState::QaExchanging {
                    turn: next_turn,
                    total: next_total,
                },
            ) => total == next_total && *next_turn == turn + 1 && next_turn <= next_total,
            (RunState::QaExchanging { turn, total }, RunState::Compiling) => turn == total,
            (RunState::Compiling, RunState::Done) => true,
            (current, RunState::Failed { .. }) => current.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Summarizing => write!(f, "Summarizing"),
            RunState::QaExchanging { turn, total } => write!(f, "QaExchanging({}/{})", turn, total),
            RunState::Compiling => write!(f, "Compiling"),
            RunState::Done => write!(f, "Done"),
            RunState::Failed { .. } => write!(f, "Failed"),
        }
    }
}

/// 一次运行的参数
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    /// 主问答轮数 N
    pub pair_count: usize,
    pub enable_followup: bool,
    pub followup_threshold: f32,
    pub max_followups: usize,
    /// 不调用 LLM，直接拼接摘要与问答生成报告
    pub quick_report: bool,
}

impl RunSettings {
    /// 在发出任何 API 请求之前校验
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_QA_TURNS..=MAX_QA_TURNS).contains(&self.pair_count) {
            return Err(SessionError::InvalidPairCount {
                value: self.pair_count,
                min: MIN_QA_TURNS,
                max: MAX_QA_TURNS,
            }
            .into());
        }
        Ok(())
    }

    /// 追问次数截断到上限
    pub fn followup_limit(&self) -> usize {
        if self.enable_followup {
            self.max_followups.min(MAX_FOLLOWUPS)
        } else {
            0
        }
    }
}

/// 会话统计
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub qa_count: usize,
    pub followup_count: usize,
    pub turn_count: usize,
    pub page_count: usize,
    pub total_tokens: usize,
    pub has_summary: bool,
    pub has_report: bool,
    /// 最近一次运行耗时（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

/// 最近一次错误
#[derive(Debug, Clone, Serialize)]
pub struct SessionErrorInfo {
    pub code: String,
    pub message: String,
}

/// 单个浏览器会话的全部状态
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    document: Option<Arc<Document>>,
    log: ChatLog,
    summary: Option<String>,
    report: Option<String>,
    settings: Option<RunSettings>,
    state: RunState,
    last_error: Option<SessionErrorInfo>,
    /// 每次重置或替换文档时递增，用于丢弃已取消任务的迟到写入
    generation: u64,
    pub created_at: DateTime<Local>,
    pub last_active: DateTime<Local>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
}

/// 会话快照（前端渲染用）
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    #[serde(flatten)]
    pub state: RunState,
    pub document: Option<DocumentInfo>,
    pub turns: Vec<ChatTurn>,
    pub summary: Option<String>,
    pub report: Option<String>,
    pub settings: Option<RunSettings>,
    pub last_error: Option<SessionErrorInfo>,
    pub stats: SessionStats,
    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        let now = Local::now();
        Self {
            id,
            document: None,
            log: ChatLog::new(),
            summary: None,
            report: None,
            settings: None,
            state: RunState::Idle,
            last_error: None,
            generation: 0,
            created_at: now,
            last_active: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn document(&self) -> Option<&Arc<Document>> {
        self.document.as_ref()
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn settings(&self) -> Option<&RunSettings> {
        self.settings.as_ref()
    }

    pub fn touch(&mut self) {
        self.last_active = Local::now();
    }

    /// 状态迁移，不合法时返回错误
    pub fn transition(&mut self, next: RunState) -> AppResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            }
            .into());
        }

        tracing::debug!("会话 {} 状态: {} → {}", self.id, self.state, next);
        if matches!(next, RunState::Done | RunState::Failed { .. }) {
            self.finished_at = Some(Local::now());
        }
        self.state = next;
        self.touch();
        Ok(())
    }

    /// 开始新一轮运行：要求已有文档且没有任务在运行
    ///
    /// 已结束（Done / Failed）的会话先回到 Idle，保留文档。
    pub fn begin(&mut self, settings: RunSettings) -> AppResult<Arc<Document>> {
        settings.validate()?;

        if self.state.is_active() {
            return Err(SessionError::RunInProgress.into());
        }
        let document = self.document.clone().ok_or(SessionError::NoDocument)?;

        if self.state != RunState::Idle {
            self.clear_run();
        }
        self.clear_artifacts();
        self.settings = Some(settings);
        self.started_at = Some(Local::now());
        self.finished_at = None;
        self.transition(RunState::Summarizing)?;
        Ok(document)
    }

    /// 替换文档；运行中不允许，已结束的会话回到 Idle
    pub fn set_document(&mut self, document: Document) -> AppResult<()> {
        if self.state.is_active() {
            return Err(SessionError::RunInProgress.into());
        }
        self.clear_run();
        self.document = Some(Arc::new(document));
        Ok(())
    }

    /// 重置会话：清空文档、对话、摘要与报告，回到 Idle
    pub fn reset(&mut self) {
        self.clear_run();
        self.document = None;
        self.settings = None;
    }

    fn clear_run(&mut self) {
        self.clear_artifacts();
        self.state = RunState::Idle;
        self.generation += 1;
        self.started_at = None;
        self.finished_at = None;
        self.touch();
    }

    fn clear_artifacts(&mut self) {
        self.log.clear();
        self.summary = None;
        self.report = None;
        self.last_error = None;
    }

    pub fn log_mut(&mut self) -> &mut ChatLog {
        &mut self.log
    }

    pub fn set_summary(&mut self, summary: String) {
        self.summary = Some(summary);
        self.touch();
    }

    pub fn set_report(&mut self, report: String) {
        self.report = Some(report);
        self.touch();
    }

    /// 记录失败：运行中则切到 Failed
    pub fn fail(&mut self, code: &str, message: String) {
        self.last_error = Some(SessionErrorInfo {
            code: code.to_string(),
            message: message.clone(),
        });
        if self.state.is_active() {
            self.state = RunState::Failed { message };
            self.finished_at = Some(Local::now());
        }
        self.touch();
    }

    pub fn last_error(&self) -> Option<&SessionErrorInfo> {
        self.last_error.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        let duration_secs = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            (Some(start), None) => Some((Local::now() - start).num_seconds()),
            _ => None,
        };

        SessionStats {
            qa_count: self.log.main_pair_count(),
            followup_count: self.log.followup_count(),
            turn_count: self.log.len(),
            page_count: self.document.as_ref().map_or(0, |d| d.page_count),
            total_tokens: self.document.as_ref().map_or(0, |d| d.total_tokens),
            has_summary: self.summary.is_some(),
            has_report: self.report.is_some(),
            duration_secs,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state.clone(),
            document: self.document.as_ref().map(|d| d.info()),
            turns: self.log.turns().to_vec(),
            summary: self.summary.clone(),
            report: self.report.clone(),
            settings: self.settings.clone(),
            last_error: self.last_error.clone(),
            stats: self.stats(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::chat::{Role, TurnKind};
    use crate::models::document::DocumentSource;

    fn settings(pair_count: usize) -> RunSettings {
        RunSettings {
            pair_count,
            enable_followup: false,
            followup_threshold: 0.6,
            max_followups: 3,
            quick_report: false,
        }
    }

    fn document() -> Document {
        Document {
            file_name: "a.pdf".to_string(),
            source: DocumentSource::Pdf,
            text: "text".to_string(),
            total_tokens: 1,
            page_count: 1,
            chunks: vec!["text".to_string()],
            images: Vec::new(),
            loaded_at: Local::now(),
        }
    }

    #[test]
    fn test_pair_count_bounds() {
        assert!(settings(5).validate().is_ok());
        assert!(settings(20).validate().is_ok());
        assert!(settings(4).validate().is_err());
        assert!(settings(21).validate().is_err());
    }

    #[test]
    fn test_followup_limit() {
        let mut s = settings(5);
        assert_eq!(s.followup_limit(), 0);
        s.enable_followup = true;
        s.max_followups = 10;
        assert_eq!(s.followup_limit(), MAX_FOLLOWUPS);
    }

    #[test]
    fn test_full_state_sequence() {
        let mut session = Session::new(Uuid::new_v4());
        session.set_document(document()).unwrap();
        session.begin(settings(5)).unwrap();
        assert_eq!(session.state(), &RunState::Summarizing);

        for turn in 1..=5 {
            session
                .transition(RunState::QaExchanging { turn, total: 5 })
                .unwrap();
        }
        session.transition(RunState::Compiling).unwrap();
        session.transition(RunState::Done).unwrap();
        assert_eq!(session.state(), &RunState::Done);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = Session::new(Uuid::new_v4());
        let err = session.transition(RunState::Compiling).unwrap_err();
        assert!(matches!(
            err,
            AppError::Session(SessionError::InvalidTransition { .. })
        ));

        session.set_document(document()).unwrap();
        session.begin(settings(5)).unwrap();
        session
            .transition(RunState::QaExchanging { turn: 1, total: 5 })
            .unwrap();
        // 不能跳过轮次
        assert!(session
            .transition(RunState::QaExchanging { turn: 3, total: 5 })
            .is_err());
        // 未完成全部轮次不能进入汇总
        assert!(session.transition(RunState::Compiling).is_err());
        // Idle 不能直接 Failed
        let idle = RunState::Idle;
        assert!(!idle.can_transition_to(&RunState::Failed {
            message: "x".to_string()
        }));
    }

    #[test]
    fn test_begin_requires_document_and_idle() {
        let mut session = Session::new(Uuid::new_v4());
        let err = session.begin(settings(5)).unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::NoDocument)));

        session.set_document(document()).unwrap();
        let err = session.begin(settings(2)).unwrap_err();
        assert!(matches!(
            err,
            AppError::Session(SessionError::InvalidPairCount { .. })
        ));
        assert_eq!(session.state(), &RunState::Idle);

        session.begin(settings(5)).unwrap();
        let err = session.begin(settings(5)).unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::RunInProgress)));
        assert!(session.set_document(document()).is_err());
    }

    #[test]
    fn test_rerun_after_done_keeps_document() {
        let mut session = Session::new(Uuid::new_v4());
        session.set_document(document()).unwrap();
        session.begin(settings(5)).unwrap();
        session.fail("X", "boom".to_string());
        let generation = session.generation();

        session.begin(settings(6)).unwrap();
        assert_eq!(session.state(), &RunState::Summarizing);
        assert!(session.document().is_some());
        assert!(session.last_error().is_none());
        assert!(session.generation() > generation);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = Session::new(Uuid::new_v4());
        session.set_document(document()).unwrap();
        session.begin(settings(5)).unwrap();
        session.set_summary("摘要".to_string());
        session
            .log_mut()
            .push(Role::Student, TurnKind::Main, 1, None, "Q1");
        let generation = session.generation();

        session.reset();
        assert_eq!(session.state(), &RunState::Idle);
        assert!(session.document().is_none());
        assert!(session.summary().is_none());
        assert!(session.report().is_none());
        assert!(session.log().is_empty());
        assert!(session.generation() > generation);
    }

    #[test]
    fn test_fail_records_error() {
        let mut session = Session::new(Uuid::new_v4());
        session.set_document(document()).unwrap();
        session.begin(settings(5)).unwrap();
        session.fail("UPSTREAM_API_ERROR", "超时".to_string());

        assert!(matches!(session.state(), RunState::Failed { .. }));
        assert_eq!(session.last_error().unwrap().code, "UPSTREAM_API_ERROR");

        // 结束后上传新文档回到 Idle
        session.set_document(document()).unwrap();
        assert_eq!(session.state(), &RunState::Idle);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_snapshot_serializes_state_tag() {
        let session = Session::new(Uuid::new_v4());
        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["stats"]["qa_count"], 0);
    }
}
