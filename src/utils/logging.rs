/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化 tracing 日志
///
/// 默认级别为 info，可通过 `RUST_LOG` 覆盖。重复调用不会报错。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, addr: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - PDF 问答报告服务");
    info!("🌐 监听地址: http://{}", addr);
    info!("🤖 模型: {} ({})", config.llm_model_name, config.llm_api_base_url);
    info!(
        "📏 Token 上限: {}，文件上限: {} MB",
        config.max_tokens, config.max_file_size_mb
    );
    info!(
        "🔐 访问密码: {}",
        if config.password_required() {
            "已启用"
        } else {
            "未启用"
        }
    );
    info!("{}", "=".repeat(60));
}

/// 记录一次运行开始
pub fn log_run_start(session_id: &str, file_name: &str, pair_count: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 会话 {} 开始运行", session_id);
    info!("📄 文档: {}，问答轮数: {}", file_name, pair_count);
    info!("{}", "=".repeat(60));
}

/// 记录单轮问答完成
pub fn log_turn_complete(turn: usize, total: usize, followups: usize) {
    if followups > 0 {
        info!("✓ 第 {}/{} 轮问答完成（追问 {} 次）", turn, total, followups);
    } else {
        info!("✓ 第 {}/{} 轮问答完成", turn, total);
    }
}

/// 打印运行结束统计
pub fn print_final_stats(session_id: &str, qa_count: usize, followups: usize, secs: i64) {
    info!("\n{}", "─".repeat(60));
    info!("📊 会话 {} 运行完成", session_id);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("✅ 问答: {} 组，追问: {} 组，耗时 {} 秒", qa_count, followups, secs);
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("你好世界", 2), "你好...");
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
    }
}
