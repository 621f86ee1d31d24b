//! 接口层（Web）
//!
//! - `routes` - 路由表
//! - `handlers` - 请求处理，运行进度通过 SSE 推送
//! - `state` - 共享状态（配置、会话存储、文档加载器、运行处理器）
//! - `server` - 启动、空闲会话回收与优雅退出

pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
