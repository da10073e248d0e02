use std::env;
use std::path::{Path, PathBuf};

use e2d_config::{AppConfig, LayerSorting as SortingConfig};
use e2d_core::entity::TemplateRegistry;
use e2d_core::errors::TemplateError;
use e2d_core::geometry::{Point3, Rect};
use e2d_engine::{Command, Document, DocumentSettings, LayerSorting, LevelMetadata, MemoryHost};
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 关卡来源，便于前端呈现加载信息。
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    Level(PathBuf),
    Demo,
}

/// 统一封装加载后的文档与来源。
pub struct LoadedDocument {
    pub document: Document<MemoryHost>,
    pub source: DocumentSource,
}

pub fn template_registry(config: &AppConfig) -> Result<TemplateRegistry, TemplateError> {
    TemplateRegistry::from_names(config.palette_names())
}

pub fn document_settings(config: &AppConfig) -> DocumentSettings {
    let editor = &config.editor;
    DocumentSettings {
        cell_scale: editor.cell_scale,
        bounds: Rect::new(
            editor.origin[0],
            editor.origin[1],
            editor.size[0],
            editor.size[1],
        ),
        max_area: Rect::new(
            editor.max_area[0],
            editor.max_area[1],
            editor.max_area[2],
            editor.max_area[3],
        ),
        sorting: match editor.sorting {
            SortingConfig::ZDepth => LayerSorting::ZDepth,
            SortingConfig::SortOrder => LayerSorting::SortOrder,
        },
        layers: editor.layers,
        undo_capacity: editor.undo_capacity,
        metadata: LevelMetadata {
            name: config.level.name.clone(),
            author: config.level.author.clone(),
            background: config.level.background,
            set_color: false,
            apply_camera_color: config.level.apply_camera_color,
        },
    }
}

/// 关卡路径优先级：显式参数 > 环境变量 `E2D_LEVEL` > 配置 `[level] path`。
pub fn resolve_level_path(config: &AppConfig, explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os("E2D_LEVEL").map(PathBuf::from))
        .or_else(|| config.level.path.clone())
}

/// 加载关卡；没有指定关卡或加载失败时回退到内置示例。
pub fn load_document(
    config: &AppConfig,
    explicit: Option<&Path>,
) -> Result<LoadedDocument, FrontendError> {
    let templates = template_registry(config)?;
    let mut document = Document::new(MemoryHost::new(), templates, document_settings(config));

    if let Some(path) = resolve_level_path(config, explicit) {
        match document.load(&path) {
            Ok(_) => {
                info!(path = %path.display(), "从 lvl 加载关卡成功");
                return Ok(LoadedDocument {
                    document,
                    source: DocumentSource::Level(path),
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "加载关卡失败，回退到内置示例");
            }
        }
    }

    populate_demo(&mut document)?;
    Ok(LoadedDocument {
        document,
        source: DocumentSource::Demo,
    })
}

/// 在网格左下角铺一小段示例：一排 0 号模板，其上方放一个 1 号模板。
pub fn populate_demo(document: &mut Document<MemoryHost>) -> Result<(), FrontendError> {
    if document.templates().is_empty() {
        return Ok(());
    }
    let origin = document.grid().bounds().origin();
    let step = document.grid().cell_scale();
    let width = document.grid().scaled_bounds().width.min(4);
    let home = document.cursors().last().map(|cursor| cursor.position);

    let cell = |x: u32, y: u32| Point3::new(origin.x + x as f32 * step, origin.y + y as f32 * step, 0.0);
    document.apply(Command::SelectTemplate(0))?;
    for x in 0..width {
        if document.place_cursor(cell(x, 0)).is_ok() {
            document.apply(Command::Create)?;
        }
    }
    if document.templates().len() > 1 && document.place_cursor(cell(1, 1)).is_ok() {
        document.apply(Command::SelectTemplate(1))?;
        document.apply(Command::Create)?;
        document.apply(Command::SelectTemplate(0))?;
    }

    if let Some(home) = home {
        let _ = document.place_cursor(home);
    }
    document.clear_history();
    info!(entities = document.alive_count(), "已构建内置示例关卡");
    Ok(())
}
