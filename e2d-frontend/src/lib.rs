pub mod cli;
pub mod errors;
pub mod loader;

use std::path::Path;

use e2d_config::AppConfig;
use errors::FrontendError;
use tracing::info;

/// 启动文本前端：加载关卡（或内置示例）、打印概览，按需进入命令循环。
pub fn run_cli(config: &AppConfig, level: Option<&Path>, repl: bool) -> Result<(), FrontendError> {
    info!(repl, "启动文本前端");
    let loaded = loader::load_document(config, level)?;
    cli::run(loaded, repl)?;
    Ok(())
}
