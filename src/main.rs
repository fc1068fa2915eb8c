use std::path::Path;

use anyhow::Result;
use manifest_portal_submit::utils::logging;
use manifest_portal_submit::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 配置文件路径可以通过第一个参数指定
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    // 加载配置
    let config = Config::load(Some(Path::new(&config_path)))?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let stats = App::initialize(config).await?.run().await?;

    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
