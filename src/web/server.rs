//! 服务启动与生命周期

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{AppResult, ConfigError};
use crate::models::loaders::load_prompt_store;
use crate::services::llm_service::{ChatModel, LlmService};
use crate::utils::logging::log_startup;
use crate::web::routes::create_router;
use crate::web::state::AppState;

/// 空闲会话检查间隔
const EVICTION_INTERVAL_SECS: u64 = 60;

/// 加载提示词、创建 LLM 客户端并启动 HTTP 服务，直到收到退出信号
pub async fn run(config: Config) -> AppResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ConfigError::Invalid {
            field: "host".to_string(),
            reason: format!("无效的监听地址: {}", e),
        })?;

    let prompts = Arc::new(load_prompt_store(&config).await?);
    let model: Arc<dyn ChatModel> = Arc::new(LlmService::new(&config));
    let state = Arc::new(AppState::new(config, model, prompts));

    let evictor = tokio::spawn(evict_loop(state.clone()));
    let router = create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    log_startup(&state.config, &addr.to_string());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    evictor.abort();
    info!("👋 服务已停止");
    Ok(())
}

/// 定期回收空闲会话
async fn evict_loop(state: Arc<AppState>) {
    let ttl = chrono::Duration::minutes(state.config.session_ttl_minutes as i64);
    let mut ticker = tokio::time::interval(Duration::from_secs(EVICTION_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        state.store.evict_idle(ttl).await;
    }
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ 无法监听 Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ 无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("收到 Ctrl+C，正在关闭..."),
        () = terminate => info!("收到退出信号，正在关闭..."),
    }
}
