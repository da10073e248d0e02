use std::path::PathBuf;

use clap::Parser;
use e2d_config::{AppConfig, ConfigError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about = "网格关卡编辑器（文本前端）")]
struct Cli {
    #[arg(long, help = "配置文件路径，缺省时读取 E2D_CONFIG 或 ./config/default.toml")]
    config: Option<PathBuf>,

    #[arg(long, help = "启动时加载的 .lvl 关卡")]
    level: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "从标准输入逐行读取命令")]
    repl: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = load_configuration(cli.config);
    init_logging(&config);
    info!("启动 e2d 编辑器");

    if let Err(err) = e2d_frontend::run_cli(&config, cli.level.as_deref(), cli.repl) {
        error!(error = %err, "文本前端运行失败");
        std::process::exit(1);
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. }
                    | ConfigError::Parse { path, .. }
                    | ConfigError::Invalid { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
