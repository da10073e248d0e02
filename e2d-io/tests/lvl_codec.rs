mod golden;

use std::fs;

use e2d_core::geometry::GridIndex;
use e2d_io::{
    CodecError, IoError, LayerSnapshot, LevelLoader, LevelSaver, LevelSnapshot, LvlCamera,
    LvlEntity, LvlFacade, LvlHeader, LvlLayer, LvlReader, RotationCode,
};
use golden::assert_golden;

fn scenario_4x4() -> LevelSnapshot {
    LevelSnapshot {
        header: LvlHeader {
            layers: 1,
            palette: 3,
            width: 4,
            height: 4,
            camera: LvlCamera::default(),
            name: "scenario".into(),
            author: "e2d".into(),
        },
        layers: vec![LayerSnapshot {
            layer: LvlLayer {
                layer_id: 0,
                z_depth: 0.0,
            },
            cells: vec![
                (GridIndex::new(1, 1), LvlEntity::new(2)),
                (GridIndex::new(2, 2), LvlEntity::new(2)),
            ],
        }],
    }
}

fn two_layers() -> LevelSnapshot {
    LevelSnapshot {
        header: LvlHeader {
            layers: 2,
            palette: 8,
            width: 3,
            height: 2,
            camera: LvlCamera {
                x: 1.5,
                y: 1.0,
                z: -10.0,
                ortho_size: 5.0,
                color: [12, 34, 56],
                set_color: true,
            },
            name: "two layers".into(),
            author: "e2d".into(),
        },
        layers: vec![
            LayerSnapshot {
                layer: LvlLayer {
                    layer_id: 0,
                    z_depth: 0.0,
                },
                cells: vec![(
                    GridIndex::new(0, 0),
                    LvlEntity {
                        palette_index: 7,
                        rotation: RotationCode::Deg90,
                        flip_x: true,
                        flip_y: false,
                    },
                )],
            },
            LayerSnapshot {
                layer: LvlLayer {
                    layer_id: 1,
                    z_depth: 1.0,
                },
                cells: vec![(
                    GridIndex::new(2, 1),
                    LvlEntity {
                        palette_index: 0,
                        rotation: RotationCode::Deg180,
                        flip_x: false,
                        flip_y: true,
                    },
                )],
            },
        ],
    }
}

#[test]
fn sparse_grid_only_reports_occupied_cells() {
    let bytes = scenario_4x4().to_bytes().expect("编码失败");
    // 头部 45 字节 + 图层 8 字节 + 16 个单元格
    assert_eq!(bytes.len(), 45 + 8 + 16 * 2);

    let mut layers = 0;
    let mut visited = Vec::new();
    let header = LvlReader::new(bytes.as_slice())
        .read_all(
            |_, _| layers += 1,
            |layer, index, entity| visited.push((layer, index, entity)),
        )
        .expect("解码失败");

    assert_eq!((header.width, header.height), (4, 4));
    assert_eq!(layers, 1);
    assert_eq!(
        visited,
        vec![
            (0, GridIndex::new(1, 1), LvlEntity::new(2)),
            (0, GridIndex::new(2, 2), LvlEntity::new(2)),
        ]
    );

    let decoded = LevelSnapshot::from_bytes(&bytes).expect("解码失败");
    assert_golden("scenario_4x4", &decoded);
}

#[test]
fn facade_round_trips_through_disk() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("two_layers.lvl");
    let level = two_layers();

    let facade = LvlFacade::new();
    facade.save(&level, &path).expect("保存失败");
    let loaded = facade.load(&path).expect("读取失败");

    assert_eq!(loaded, level);
    assert_eq!(loaded.header.camera.color, [12, 34, 56]);
    assert!(loaded.header.camera.set_color);
    assert_golden("two_layers", &loaded);
}

#[test]
fn foreign_signature_is_rejected() {
    let mut bytes = scenario_4x4().to_bytes().expect("编码失败");
    bytes[3] = 2;
    assert!(matches!(
        LevelSnapshot::from_bytes(&bytes),
        Err(CodecError::FormatMismatch {
            found: 0x024C_564C,
            expected: 0x014C_564C
        })
    ));

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("future.lvl");
    fs::write(&path, &bytes).expect("写入失败");
    assert!(matches!(
        LvlFacade::new().load(&path),
        Err(IoError::Codec {
            source: CodecError::FormatMismatch { .. },
            ..
        })
    ));
}

#[test]
fn failed_save_keeps_existing_file() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("keep.lvl");
    fs::write(&path, b"previous contents").expect("写入失败");

    let mut level = scenario_4x4();
    level.layers[0].cells.push((GridIndex::new(3, 3), LvlEntity::new(4095)));

    let result = LvlFacade::new().save(&level, &path);
    assert!(matches!(
        result,
        Err(IoError::Codec {
            source: CodecError::InvalidPaletteIndex(4095),
            ..
        })
    ));
    assert_eq!(fs::read(&path).expect("读取失败"), b"previous contents");
}

#[test]
fn layer_count_must_match_header() {
    let mut level = scenario_4x4();
    level.header.layers = 2;
    assert!(matches!(
        level.to_bytes(),
        Err(CodecError::LayerCountMismatch {
            declared: 2,
            actual: 1
        })
    ));
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("absent.lvl");
    match LvlFacade::new().load(&path) {
        Err(IoError::ReadError { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("unexpected result: {other:?}"),
    }
}
