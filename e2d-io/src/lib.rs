use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use e2d_core::geometry::GridIndex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod reader;
pub mod records;
pub mod writer;

pub use reader::LvlReader;
pub use records::{LvlCamera, LvlEntity, LvlHeader, LvlLayer, RotationCode};
pub use writer::{LvlWriter, WriterState};

/// 编解码层面的错误，与具体文件无关。
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("incompatible level signature {found:#010X} (expected {expected:#010X})")]
    FormatMismatch { found: u32, expected: u32 },
    #[error("writer expected {expected:?} record but received {received:?}")]
    OrderViolation {
        expected: WriterState,
        received: WriterState,
    },
    #[error("palette index {0} does not fit the 12-bit cell record")]
    InvalidPaletteIndex(usize),
    #[error("header declares {declared} layers but {actual} were supplied")]
    LayerCountMismatch { declared: usize, actual: usize },
    #[error("invalid string in level stream: {0}")]
    InvalidString(String),
    #[error("level stream i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid level file {path:?}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

pub trait LevelLoader {
    fn load(&self, path: &Path) -> Result<LevelSnapshot, IoError>;
}

pub trait LevelSaver {
    fn save(&self, level: &LevelSnapshot, path: &Path) -> Result<(), IoError>;
}

/// 单个图层的稀疏内容：图层记录 + 非空格子。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub layer: LvlLayer,
    pub cells: Vec<(GridIndex, LvlEntity)>,
}

impl LayerSnapshot {
    pub fn new(layer: LvlLayer) -> Self {
        Self {
            layer,
            cells: Vec::new(),
        }
    }
}

/// 完整的关卡内容，独立于编辑器状态，可直接编码/解码。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub header: LvlHeader,
    pub layers: Vec<LayerSnapshot>,
}

impl LevelSnapshot {
    pub fn cell(&self, layer: usize, index: GridIndex) -> Option<&LvlEntity> {
        self.layers
            .get(layer)?
            .cells
            .iter()
            .find(|(cell, _)| *cell == index)
            .map(|(_, entity)| entity)
    }

    pub fn entity_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.cells.len()).sum()
    }

    pub fn encode<W: Write>(&self, out: W) -> Result<(), CodecError> {
        let declared = self.header.layers as usize;
        if declared != self.layers.len() {
            return Err(CodecError::LayerCountMismatch {
                declared,
                actual: self.layers.len(),
            });
        }

        let lookup: Vec<HashMap<GridIndex, LvlEntity>> = self
            .layers
            .iter()
            .map(|layer| layer.cells.iter().copied().collect())
            .collect();

        let mut writer = LvlWriter::new(out);
        writer.write_all(
            &self.header,
            |layer| {
                self.layers
                    .get(layer)
                    .map(|snapshot| snapshot.layer)
                    .ok_or(CodecError::LayerCountMismatch {
                        declared,
                        actual: self.layers.len(),
                    })
            },
            |layer, index| lookup.get(layer).and_then(|cells| cells.get(&index)).copied(),
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes)?;
        Ok(bytes)
    }

    pub fn decode<R: Read>(input: R) -> Result<Self, CodecError> {
        let mut layers: Vec<LayerSnapshot> = Vec::new();
        let mut reader = LvlReader::new(input);
        let mut cells: Vec<(usize, GridIndex, LvlEntity)> = Vec::new();
        let header = reader.read_all(
            |_, layer| layers.push(LayerSnapshot::new(layer)),
            |layer, index, entity| cells.push((layer, index, entity)),
        )?;
        for (layer, index, entity) in cells {
            if let Some(snapshot) = layers.get_mut(layer) {
                snapshot.cells.push((index, entity));
            }
        }
        Ok(Self { header, layers })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode(bytes)
    }
}

/// `.lvl` 文件门面。保存时先完整编码到内存，再写入同目录临时文件并原子替换，
/// 失败时目标文件保持原样。
#[derive(Debug, Clone, Copy, Default)]
pub struct LvlFacade;

impl LvlFacade {
    pub fn new() -> Self {
        Self
    }
}

impl LevelLoader for LvlFacade {
    fn load(&self, path: &Path) -> Result<LevelSnapshot, IoError> {
        let data = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let level = LevelSnapshot::from_bytes(&data).map_err(|source| IoError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            layers = level.layers.len(),
            entities = level.entity_count(),
            "已读取关卡"
        );
        Ok(level)
    }
}

impl LevelSaver for LvlFacade {
    fn save(&self, level: &LevelSnapshot, path: &Path) -> Result<(), IoError> {
        let bytes = level.to_bytes().map_err(|source| IoError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
        let write_error = |source: std::io::Error| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staging = tempfile::NamedTempFile::new_in(parent).map_err(write_error)?;
        staging.write_all(&bytes).map_err(write_error)?;
        staging.flush().map_err(write_error)?;
        staging
            .persist(path)
            .map_err(|err| write_error(err.error))?;

        debug!(path = %path.display(), bytes = bytes.len(), "已写入关卡");
        Ok(())
    }
}
