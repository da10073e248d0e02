use std::fs;
use std::path::PathBuf;

use e2d_io::LevelSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoldenLevel {
    name: String,
    author: String,
    palette: u16,
    width: u16,
    height: u16,
    layers: Vec<GoldenLayer>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenLayer {
    id: i32,
    z_depth: f32,
    cells: Vec<GoldenCell>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct GoldenCell {
    x: i32,
    y: i32,
    palette_index: u16,
    rotation: f32,
    #[serde(default)]
    flip_x: bool,
    #[serde(default)]
    flip_y: bool,
}

pub fn assert_golden(name: &str, level: &LevelSnapshot) {
    let snapshot = GoldenLevel::from_level(level);
    let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/golden");
    if let Err(err) = fs::create_dir_all(&base_dir) {
        panic!("无法创建黄金数据目录 {}: {err}", base_dir.display());
    }
    let golden_path = base_dir.join(format!("{name}.json"));
    let serialized = serde_json::to_string_pretty(&snapshot).expect("序列化黄金快照失败");

    if !golden_path.exists() {
        fs::write(&golden_path, &serialized)
            .unwrap_or_else(|err| panic!("写入黄金文件 {} 失败: {err}", golden_path.display()));
        panic!(
            "黄金文件 {} 不存在，已自动生成。请确认内容后重新运行测试。",
            golden_path.display()
        );
    }

    let expected_str = fs::read_to_string(&golden_path)
        .unwrap_or_else(|err| panic!("读取黄金文件 {} 失败: {err}", golden_path.display()));
    let expected: GoldenLevel = serde_json::from_str(&expected_str)
        .unwrap_or_else(|err| panic!("解析黄金文件 {} 失败: {err}", golden_path.display()));

    if expected != snapshot {
        let diff_path = base_dir.join(format!("{name}.actual.json"));
        fs::write(&diff_path, &serialized).expect("写入差异文件失败");
        panic!(
            "黄金文件 {} 与当前解码结果不一致。已生成对照输出 {}。",
            golden_path.display(),
            diff_path.display()
        );
    }
}

impl GoldenLevel {
    fn from_level(level: &LevelSnapshot) -> Self {
        let layers = level
            .layers
            .iter()
            .map(|layer| {
                let mut cells: Vec<GoldenCell> = layer
                    .cells
                    .iter()
                    .map(|(index, entity)| GoldenCell {
                        x: index.x,
                        y: index.y,
                        palette_index: entity.palette_index,
                        rotation: entity.rotation.degrees(),
                        flip_x: entity.flip_x,
                        flip_y: entity.flip_y,
                    })
                    .collect();
                cells.sort_by_key(|cell| (cell.x, cell.y));
                GoldenLayer {
                    id: layer.layer.layer_id,
                    z_depth: layer.layer.z_depth,
                    cells,
                }
            })
            .collect();

        Self {
            name: level.header.name.clone(),
            author: level.header.author.clone(),
            palette: level.header.palette,
            width: level.header.width,
            height: level.header.height,
            layers,
        }
    }
}
