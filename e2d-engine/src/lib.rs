pub mod command;
pub mod document;
pub mod host;

pub use command::{Command, CommandBus, CommandContext, CommandRequest, CommandResponse, Direction};
pub use document::{
    AdoptReport, CommandOutcome, Document, DocumentSettings, LayerSorting, LevelMetadata, Mode,
    ViewportState,
};
pub use host::{EntityHost, HostEntity, MemoryHost, SceneObject};

pub mod errors {
    use e2d_core::errors::{GridError, TemplateError, UndoError};
    use e2d_io::IoError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error(transparent)]
        Grid(#[from] GridError),
        #[error(transparent)]
        Undo(#[from] UndoError),
        #[error(transparent)]
        Template(#[from] TemplateError),
        #[error(transparent)]
        Io(#[from] IoError),
        #[error("level of {width}x{height} cells and {layers} layers does not fit the file header")]
        LevelTooLarge {
            width: u32,
            height: u32,
            layers: usize,
        },
        #[error("unknown command: {0}")]
        UnknownCommand(String),
        #[error("command {command} expects {expected}")]
        InvalidArgument {
            command: &'static str,
            expected: &'static str,
        },
    }
}
