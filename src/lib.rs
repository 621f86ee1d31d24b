//! # PDF QA Report
//!
//! 上传 PDF，由"学生"和"老师"两个智能体围绕文档进行 N 轮问答，
//! 最后由"摘要"智能体生成 Markdown 学习报告的 Web 应用
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流程
//! - `DocumentLoader` - PDF / 文本加载、token 估算与分段
//! - `LlmService` - 一次 chat completion 调用（整段或流式）
//! - `report_builder` - 问答格式化与报告结构保证
//!
//! ### ② 流程层（Workflow）
//! - `workflow/` - 定义"一轮问答"的完整处理流程
//! - `Agent` - 学生 / 老师 / 摘要三种角色共用的请求构建器
//! - `QaCtx` - 上下文封装（会话 + 轮次 + 章节）
//! - `QaFlow` - 流程编排（提问 → 回答 → 追问）
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/session_store` - 会话存储，运行前校验，重置取消
//! - `orchestrator/run_processor` - 单次运行的状态机：摘要 → 问答 → 报告
//!
//! ### ④ 接口层（Web）
//! - `web/` - axum 路由、SSE 进度推送、内嵌页面
//!
//! ## 模块结构

pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod web;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Document, RunSettings, RunState, SessionSnapshot};
pub use orchestrator::{RunEvent, RunProcessor, SessionStore};
pub use services::{ChatModel, ChatRequest, DocumentLoader, LlmService};
pub use workflow::{Agent, AgentCall, QaFlow};
