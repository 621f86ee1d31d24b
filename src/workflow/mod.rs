pub mod agent;
pub mod qa_ctx;
pub mod qa_flow;

pub use agent::{Agent, AgentCall};
pub use qa_ctx::QaCtx;
pub use qa_flow::{answer_complexity, QaFlow, TurnDraft, TurnOutcome, TurnSink};
