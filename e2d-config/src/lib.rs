use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    /// 有序模板表，数组下标即调色板下标。
    #[serde(default = "default_palette")]
    pub palette: Vec<PaletteEntry>,
    #[serde(default)]
    pub level: LevelConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            editor: EditorConfig::default(),
            palette: default_palette(),
            level: LevelConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `E2D_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("E2D_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let relative = Path::new("config").join("default.toml");
        let default_path = env::current_dir()
            .map(|dir| dir.join(&relative))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                path: relative.clone(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn palette_names(&self) -> impl Iterator<Item = &str> {
        self.palette.iter().map(|entry| entry.name.as_str())
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if !(self.editor.cell_scale > 0.0) {
            return Err(invalid("editor.cell_scale 必须为正数"));
        }
        if self.editor.size.iter().any(|extent| !(*extent > 0.0)) {
            return Err(invalid("editor.size 必须为正数"));
        }
        if self.editor.layers == 0 {
            return Err(invalid("editor.layers 至少为 1"));
        }
        if self.editor.max_area[2..].iter().any(|extent| !(*extent > 0.0)) {
            return Err(invalid("editor.max_area 的宽高必须为正数"));
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 接管已有场景对象时的分层依据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSorting {
    /// 按 z 坐标截断后的整数分层。
    #[default]
    ZDepth,
    /// 按宿主提供的排序值分层。
    SortOrder,
}

/// 文档网格参数。`origin`/`size` 为世界坐标，同时是接管场景时的最小范围；
/// `max_area` 为 `[x, y, width, height]`，之外的对象不会被接管。
#[derive(Debug, Clone, Deserialize)]
pub struct EditorConfig {
    #[serde(default = "EditorConfig::default_cell_scale")]
    pub cell_scale: f32,
    #[serde(default = "EditorConfig::default_origin")]
    pub origin: [f32; 2],
    #[serde(default = "EditorConfig::default_size")]
    pub size: [f32; 2],
    #[serde(default = "EditorConfig::default_layers")]
    pub layers: usize,
    #[serde(default = "EditorConfig::default_undo_capacity")]
    pub undo_capacity: usize,
    #[serde(default = "EditorConfig::default_max_area")]
    pub max_area: [f32; 4],
    #[serde(default)]
    pub sorting: LayerSorting,
}

impl EditorConfig {
    fn default_cell_scale() -> f32 {
        1.0
    }

    fn default_origin() -> [f32; 2] {
        [-8.0, -8.0]
    }

    fn default_size() -> [f32; 2] {
        [16.0, 16.0]
    }

    fn default_layers() -> usize {
        1
    }

    fn default_undo_capacity() -> usize {
        1024
    }

    fn default_max_area() -> [f32; 4] {
        [-256.0, -256.0, 512.0, 512.0]
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            cell_scale: Self::default_cell_scale(),
            origin: Self::default_origin(),
            size: Self::default_size(),
            layers: Self::default_layers(),
            undo_capacity: Self::default_undo_capacity(),
            max_area: Self::default_max_area(),
            sorting: LayerSorting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaletteEntry {
    pub name: String,
}

fn default_palette() -> Vec<PaletteEntry> {
    ["grass", "stone", "water", "sand"]
        .into_iter()
        .map(|name| PaletteEntry {
            name: name.to_string(),
        })
        .collect()
}

/// 启动时加载的关卡及其元数据默认值。
#[derive(Debug, Clone, Deserialize)]
pub struct LevelConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "LevelConfig::default_name")]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default = "LevelConfig::default_apply_camera_color")]
    pub apply_camera_color: bool,
    #[serde(default)]
    pub background: [u8; 3],
}

impl LevelConfig {
    fn default_name() -> String {
        "untitled".to_string()
    }

    fn default_apply_camera_color() -> bool {
        true
    }
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: Self::default_name(),
            author: String::new(),
            apply_camera_color: Self::default_apply_camera_color(),
            background: [0, 0, 0],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置文件 {path:?} 无效: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("{message} ({path:?})")]
    Context {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.editor.cell_scale, 1.0);
        assert_eq!(cfg.editor.size, [16.0, 16.0]);
        assert_eq!(cfg.editor.undo_capacity, 1024);
        assert_eq!(cfg.editor.max_area, [-256.0, -256.0, 512.0, 512.0]);
        assert_eq!(cfg.editor.sorting, LayerSorting::ZDepth);
        assert!(cfg.level.path.is_none());
        assert!(cfg.level.apply_camera_color);
    }

    #[test]
    fn default_palette_is_not_empty() {
        let cfg = AppConfig::default();
        let names: Vec<&str> = cfg.palette_names().collect();
        assert_eq!(names, vec!["grass", "stone", "water", "sand"]);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [editor]
            cell_scale = 0.5
            origin = [0.0, 0.0]
            size = [4.0, 2.0]
            layers = 2
            max_area = [-32.0, -32.0, 64.0, 64.0]
            sorting = "sort_order"

            [[palette]]
            name = "wall"

            [[palette]]
            name = "floor"

            [level]
            path = "levels/intro.lvl"
            name = "Intro"
            author = "me"
            apply_camera_color = false
            background = [10, 20, 30]
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.editor.cell_scale, 0.5);
        assert_eq!(cfg.editor.origin, [0.0, 0.0]);
        assert_eq!(cfg.editor.layers, 2);
        assert_eq!(cfg.editor.undo_capacity, 1024);
        assert_eq!(cfg.editor.max_area, [-32.0, -32.0, 64.0, 64.0]);
        assert_eq!(cfg.editor.sorting, LayerSorting::SortOrder);
        assert_eq!(cfg.palette_names().collect::<Vec<_>>(), vec!["wall", "floor"]);
        assert_eq!(
            cfg.level.path.as_deref(),
            Some(Path::new("levels/intro.lvl"))
        );
        assert_eq!(cfg.level.name, "Intro");
        assert!(!cfg.level.apply_camera_color);
        assert_eq!(cfg.level.background, [10, 20, 30]);
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[editor]\ncell_scale = \"big\"").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("期望解析错误，实际为 {other:?}"),
        }
    }

    #[test]
    fn non_positive_cell_scale_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[editor]\ncell_scale = 0.0").unwrap();

        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = AppConfig::from_file("/nonexistent/e2d.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
