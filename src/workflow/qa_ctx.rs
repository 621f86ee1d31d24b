//! 问答轮次上下文
//!
//! 封装"我正在处理哪个会话的第几轮"这一信息

use std::fmt::Display;
use std::sync::Arc;

use uuid::Uuid;

/// 单轮问答的上下文
#[derive(Debug, Clone)]
pub struct QaCtx {
    /// 会话 ID
    pub session_id: Uuid,

    /// 当前轮次（从1开始）
    pub turn: usize,

    /// 总轮数 N
    pub total: usize,

    /// 本轮对应的文档章节
    pub section: String,

    /// 老师回答时参考的文档（未分段时为全文）
    pub reference: Arc<str>,

    /// 文档摘要
    pub summary: Arc<str>,
}

impl QaCtx {
    pub fn new(
        session_id: Uuid,
        turn: usize,
        total: usize,
        section: String,
        reference: Arc<str>,
        summary: Arc<str>,
    ) -> Self {
        Self {
            session_id,
            turn,
            total,
            section,
            reference,
            summary,
        }
    }
}

impl Display for QaCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.session_id.to_string();
        write!(f, "[会话 {} 第 {}/{} 轮]", &id[..8], self.turn, self.total)
    }
}
