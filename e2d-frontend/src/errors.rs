use e2d_core::errors::TemplateError;
use e2d_engine::errors::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("调色板配置无效: {0}")]
    Palette(#[from] TemplateError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("终端读写失败: {0}")]
    Terminal(#[from] std::io::Error),
}
