pub mod chat;
pub mod document;
pub mod loaders;
pub mod prompt;
pub mod session;

pub use chat::{ChatLog, ChatTurn, QaPair, Role, TurnKind};
pub use document::{Document, DocumentImage, DocumentInfo, DocumentSource};
pub use loaders::load_prompt_store;
pub use prompt::{AgentRole, PromptStore, PromptTemplate, PromptVars, TemplateId};
pub use session::{
    RunSettings, RunState, Session, SessionErrorInfo, SessionSnapshot, SessionStats,
};

/// 问答轮数下限
pub const MIN_QA_TURNS: usize = 5;
/// 问答轮数上限
pub const MAX_QA_TURNS: usize = 20;
/// 每轮追问次数上限
pub const MAX_FOLLOWUPS: usize = 3;
