//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话管理和运行调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `session_store` - 会话存储
//! - 管理全部会话（DashMap<Uuid, SessionHandle>）
//! - 运行前校验（问答轮数、文档、状态）
//! - 重置 / 删除时取消运行中的任务
//! - 回收长时间不活跃的会话
//!
//! ### `run_processor` - 单次运行处理器
//! - 驱动状态机：摘要 → N 轮问答 → 汇总报告
//! - 创建并复用 QaFlow
//! - 把进度写入会话，并以事件形式推送给前端
//! - 输出单次运行的统计信息
//!
//! ## 层次关系
//!
//! ```text
//! web (HTTP / SSE)
//!     ↓
//! session_store (管理 Session) + run_processor (驱动一次运行)
//!     ↓
//! workflow::QaFlow (处理单轮问答)
//!     ↓
//! services (能力层：文档加载 / llm / 报告)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：session_store 管状态，run_processor 管流程
//! 2. **短锁**：会话锁只在状态更新时持有，不跨越 API 调用
//! 3. **向下依赖**：编排层 → workflow → services
//! 4. **无业务逻辑**：只做调度和统计，不拼提示词

pub mod run_processor;
pub mod session_store;

// 重新导出主要类型
pub use run_processor::{RunEvent, RunProcessor};
pub use session_store::{RunTicket, SessionHandle, SessionStore};
