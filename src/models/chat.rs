use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::prompt::AgentRole;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    /// 对应的智能体角色
    pub fn agent(&self) -> AgentRole {
        match self {
            Role::Student => AgentRole::Student,
            Role::Teacher => AgentRole::Teacher,
        }
    }
}

/// 主问答还是追问
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Main,
    FollowUp,
}

/// 一条生成的问题或回答
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    /// 生成顺序，从 0 开始严格递增
    pub index: usize,
    pub role: Role,
    pub kind: TurnKind,
    /// 所属问答轮次（从 1 开始）
    pub pair: usize,
    /// 追问序号（从 1 开始），主问答为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followup: Option<usize>,
    pub content: String,
    pub created_at: DateTime<Local>,
}

/// 由相邻的学生/老师发言组成的一组问答
#[derive(Debug, Clone, Serialize)]
pub struct QaPair {
    pub pair: usize,
    pub kind: TurnKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followup: Option<usize>,
    pub question: String,
    pub answer: String,
}

impl QaPair {
    /// 展示用标签，如 `Q3` 或 `Q3-1`
    pub fn label(&self) -> String {
        match self.followup {
            Some(n) => format!("{}-{}", self.pair, n),
            None => self.pair.to_string(),
        }
    }
}

/// 只追加的对话记录
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    turns: Vec<ChatTurn>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条发言并返回它
    pub fn push(
        &mut self,
        role: Role,
        kind: TurnKind,
        pair: usize,
        followup: Option<usize>,
        content: impl Into<String>,
    ) -> &ChatTurn {
        let turn = ChatTurn {
            index: self.turns.len(),
            role,
            kind,
            pair,
            followup,
            content: content.into(),
            created_at: Local::now(),
        };
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 把学生提问与紧随其后的老师回答配成问答对
    pub fn qa_pairs(&self) -> Vec<QaPair> {
        let mut pairs = Vec::new();
        let mut pending: Option<&ChatTurn> = None;

        for turn in &self.turns {
            match turn.role {
                Role::Student => pending = Some(turn),
                Role::Teacher => {
                    if let Some(question) = pending.take() {
                        pairs.push(QaPair {
                            pair: question.pair,
                            kind: question.kind,
                            followup: question.followup,
                            question: question.content.clone(),
                            answer: turn.content.clone(),
                        });
                    }
                }
            }
        }

        pairs
    }

    /// 已完成的主问答数量
    pub fn main_pair_count(&self) -> usize {
        self.qa_pairs()
            .iter()
            .filter(|p| p.kind == TurnKind::Main)
            .count()
    }

    /// 已完成的追问数量
    pub fn followup_count(&self) -> usize {
        self.qa_pairs()
            .iter()
            .filter(|p| p.kind == TurnKind::FollowUp)
            .count()
    }
}
