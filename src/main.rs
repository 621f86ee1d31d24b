use std::path::PathBuf;

use anyhow::Result;
use pdf_qa_report::{utils::logging, web, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置：唯一的可选参数是配置文件路径
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&config_path)?;

    // 启动服务
    web::server::run(config).await?;

    Ok(())
}
