use std::collections::HashSet;
use std::path::Path;

use e2d_core::cursor::{Cursor, CursorSet};
use e2d_core::entity::{
    EntityId, EntityRecord, EntityStore, Lifecycle, TemplateId, TemplateRegistry, Transform,
};
use e2d_core::errors::{GridError, OutOfBounds, TemplateError};
use e2d_core::geometry::{GridIndex, Point3, Rect, Vector2};
use e2d_core::grid::{Placement, SpatialGrid};
use e2d_core::undo::{DEFAULT_UNDO_CAPACITY, UndoFrame, UndoLog, UndoState};
use e2d_io::{
    LayerSnapshot, LevelLoader, LevelSaver, LevelSnapshot, LvlCamera, LvlEntity, LvlFacade,
    LvlHeader, LvlLayer, RotationCode,
};
use tracing::{debug, info, warn};

use crate::command::{Command, Direction};
use crate::errors::EngineError;
use crate::host::{EntityHost, SceneObject};

const DEFAULT_ORTHO_SIZE: f32 = 5.0;
const DEFAULT_ASPECT: f32 = 16.0 / 9.0;
const DEFAULT_CAMERA_Z: f32 = -10.0;

/// 编辑模式。再次切换到当前模式即退出回 `Normal`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Grab,
    Scale,
    Box,
    Line,
    Palette,
}

/// 命令的正常结果。空选择与历史耗尽都属于正常结果，不是错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// 光标下没有可操作的实体；命令若已压入撤销帧则随之弹出。
    EmptySelection,
    HistoryExhausted,
    Reverted { changes: usize },
    /// 移动会让光标离开网格，整次移动被拒绝。
    Blocked,
}

/// 记录视口状态（相机位置与正交尺寸）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub center: Point3,
    pub ortho_size: f32,
    pub aspect: f32,
}

impl ViewportState {
    /// 区域 `[min, max]` 是否完全处于可见范围内。
    pub fn shows(&self, min: Point3, max: Point3) -> bool {
        let half_height = self.ortho_size;
        let half_width = self.ortho_size * self.aspect;
        min.x() >= self.center.x() - half_width
            && max.x() <= self.center.x() + half_width
            && min.y() >= self.center.y() - half_height
            && max.y() <= self.center.y() + half_height
    }
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            center: Point3::new(0.0, 0.0, DEFAULT_CAMERA_Z),
            ortho_size: DEFAULT_ORTHO_SIZE,
            aspect: DEFAULT_ASPECT,
        }
    }
}

/// 关卡元数据，随文件头保存。
#[derive(Debug, Clone, PartialEq)]
pub struct LevelMetadata {
    pub name: String,
    pub author: String,
    pub background: [u8; 3],
    /// 写入文件头的“加载时应用背景色”标志。
    pub set_color: bool,
    /// 读取时是否接受文件中的背景色。
    pub apply_camera_color: bool,
}

impl Default for LevelMetadata {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            author: String::new(),
            background: [0, 0, 0],
            set_color: false,
            apply_camera_color: true,
        }
    }
}

/// 接管场景对象时的分层依据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerSorting {
    /// z 坐标截断为整数，`1.1` 与 `1.0` 同层。
    #[default]
    ZDepth,
    SortOrder,
}

/// `Document::adopt` 的统计结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdoptReport {
    pub adopted: usize,
    /// 同一格子中被后来者挤掉的对象。
    pub replaced: usize,
    /// 位于 `max_area` 之外、保持原样的对象。
    pub outside: usize,
    /// 模板不在模板表中的对象。
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub cell_scale: f32,
    /// 初始边界，也是接管场景时的最小范围。
    pub bounds: Rect,
    pub max_area: Rect,
    pub sorting: LayerSorting,
    pub layers: usize,
    pub undo_capacity: usize,
    pub metadata: LevelMetadata,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            cell_scale: 1.0,
            bounds: Rect::new(-8.0, -8.0, 16.0, 16.0),
            max_area: Rect::new(-256.0, -256.0, 512.0, 512.0),
            sorting: LayerSorting::ZDepth,
            layers: 1,
            undo_capacity: DEFAULT_UNDO_CAPACITY,
            metadata: LevelMetadata::default(),
        }
    }
}

/// 编辑文档：组合网格、实体表、光标与撤销历史，逐条执行命令。
pub struct Document<H: EntityHost> {
    host: H,
    templates: TemplateRegistry,
    grid: SpatialGrid,
    store: EntityStore,
    undo: UndoLog,
    cursors: CursorSet,
    selection: Vec<Option<EntityId>>,
    anchor: Option<Point3>,
    mode: Mode,
    layer: usize,
    palette_index: usize,
    viewport: ViewportState,
    metadata: LevelMetadata,
    status: String,
    min_area: Rect,
    max_area: Rect,
    sorting: LayerSorting,
}

impl<H: EntityHost> Document<H> {
    pub fn new(host: H, templates: TemplateRegistry, settings: DocumentSettings) -> Self {
        let mut grid = SpatialGrid::new(settings.cell_scale, settings.bounds);
        for index in 0..settings.layers.max(1) {
            grid.add_layer(index as f32);
        }
        let cursors = CursorSet::single(grid.mapping(), home_position(&grid));
        let origin = settings.bounds.origin() + settings.bounds.size() * 0.5;

        Self {
            host,
            templates,
            grid,
            store: EntityStore::new(),
            undo: UndoLog::new(settings.undo_capacity),
            cursors,
            selection: Vec::new(),
            anchor: None,
            mode: Mode::Normal,
            layer: 0,
            palette_index: 0,
            viewport: ViewportState {
                center: Point3::new(origin.x, origin.y, DEFAULT_CAMERA_Z),
                ..ViewportState::default()
            },
            metadata: settings.metadata,
            status: String::new(),
            min_area: settings.bounds,
            max_area: settings.max_area,
            sorting: settings.sorting,
        }
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[inline]
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    #[inline]
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    #[inline]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[inline]
    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    #[inline]
    pub fn cursors(&self) -> &CursorSet {
        &self.cursors
    }

    /// 与光标下标对齐的选中实体（仅在 Grab/Scale 模式下非空）。
    #[inline]
    pub fn selection(&self) -> &[Option<EntityId>] {
        &self.selection
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn layer(&self) -> usize {
        self.layer
    }

    #[inline]
    pub fn palette_index(&self) -> usize {
        self.palette_index
    }

    #[inline]
    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    #[inline]
    pub fn metadata(&self) -> &LevelMetadata {
        &self.metadata
    }

    #[inline]
    pub fn metadata_mut(&mut self) -> &mut LevelMetadata {
        &mut self.metadata
    }

    /// 最近一条命令留下的状态说明。
    #[inline]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// 实体变换，优先询问宿主。
    pub fn get_transform(&self, entity: EntityId) -> Option<Transform> {
        self.host
            .get_transform(entity)
            .or_else(|| self.store.transform(entity).copied())
    }

    pub fn find_template(&self, entity: EntityId) -> Option<TemplateId> {
        template_of(&self.host, &self.store, entity)
    }

    /// 当前图层某格子中的存活实体。
    pub fn entity_at(&self, index: GridIndex) -> Option<EntityId> {
        self.grid.select(self.layer, index, &self.store)
    }

    pub fn alive_count(&self) -> usize {
        self.store.alive_count()
    }

    /// 把最后一个光标移到指定位置（吸附到格子角点）。
    pub fn place_cursor(&mut self, position: Point3) -> Result<(), OutOfBounds> {
        let index = self.grid.map_coordinate(position)?;
        let snapped = self.grid.grid_to_world(index, position.z());
        match self.cursors.len().checked_sub(1) {
            Some(tail) => {
                let pinned = self.cursors.get(tail).is_some_and(|cursor| cursor.pinned);
                self.cursors.set(
                    tail,
                    Cursor {
                        position: snapped,
                        pinned,
                    },
                );
            }
            None => {
                self.cursors.add(Cursor::new(snapped));
            }
        }
        Ok(())
    }

    /// 执行一条命令。
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome, EngineError> {
        debug!(command = command.name(), mode = ?self.mode, layer = self.layer, "执行命令");
        self.status.clear();
        let outcome = match &command {
            Command::Transform(direction) => Ok(self.transform(*direction)),
            Command::NextTemplate => Ok(self.cycle_template(true)),
            Command::PreviousTemplate => Ok(self.cycle_template(false)),
            Command::SelectTemplate(index) => self.select_template(*index),
            Command::NextLayer => {
                let count = self.grid.layer_count();
                self.switch_layer((self.layer + 1) % count)
            }
            Command::PreviousLayer => {
                let count = self.grid.layer_count();
                self.switch_layer((self.layer + count - 1) % count)
            }
            Command::SetLayer(index) => self.switch_layer(*index),
            Command::NewLayer => self.new_layer(),
            Command::NormalMode => self.normal_mode().map(|_| CommandOutcome::Applied),
            Command::ToggleGrab => self.toggle_grab(),
            Command::ToggleScale => self.toggle_scale(),
            Command::ToggleBox => self.toggle_anchor_mode(Mode::Box),
            Command::ToggleLine => self.toggle_anchor_mode(Mode::Line),
            Command::TogglePalette => self.toggle_palette(),
            Command::Create => self.create(),
            Command::Erase => self.erase(),
            Command::Clone => self.clone_at_cursors(),
            Command::Rotate => self.modify_at_cursors(|transform| {
                transform.rotation = (transform.rotation + 90.0).rem_euclid(360.0);
            }),
            Command::FlipX => self.modify_at_cursors(|transform| {
                transform.flip_x = !transform.flip_x;
            }),
            Command::FlipY => self.modify_at_cursors(|transform| {
                transform.flip_y = !transform.flip_y;
            }),
            Command::SelectSimilar => Ok(self.select_similar()),
            Command::SelectAllInLayer => Ok(self.select_all_in_layer()),
            Command::PinCursor => self.pin_cursor(),
            Command::DeselectAll => {
                self.cursors.retain_last();
                Ok(CommandOutcome::Applied)
            }
            Command::ToggleAll => {
                if self.cursors.len() == 1 {
                    Ok(self.select_all_in_layer())
                } else {
                    self.cursors.retain_last();
                    Ok(CommandOutcome::Applied)
                }
            }
            Command::ToggleHideLayer => Ok(self.toggle_hide_layer()),
            Command::ToggleHideOtherLayers => Ok(self.toggle_hide_other_layers()),
            Command::Undo => self.undo(),
            Command::FocusView => Ok(self.focus_view()),
            Command::Flush => {
                let destroyed = self.flush();
                self.status = format!("destroyed {destroyed} entities");
                Ok(CommandOutcome::Applied)
            }
            Command::Write(path) => self.save(path),
            Command::Load(path) => self.load(path),
        }?;

        if self.status.is_empty() {
            self.status = match outcome {
                CommandOutcome::EmptySelection => "nothing selected".to_string(),
                CommandOutcome::Blocked => "cursor would leave the grid".to_string(),
                _ => command.name().to_string(),
            };
        }
        Ok(outcome)
    }

    /// 销毁全部软删除实体。软删除之后、flush 之前的实体仍可被撤销复活。
    pub fn flush(&mut self) -> usize {
        let drained = self.store.drain_pending();
        for entity in &drained {
            self.host.destroy(*entity);
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "已销毁待删除实体");
        }
        drained.len()
    }

    /// 丢弃全部撤销历史（例如构建初始内容之后）。
    pub fn clear_history(&mut self) {
        self.undo.clear();
    }

    /// 修改文档边界。落到新边界之外的实体被软删除，返回其数量。
    pub fn set_bounds(&mut self, bounds: Rect) -> Result<usize, EngineError> {
        self.settle()?;
        let displaced = self.grid.set_bounds(bounds, &self.store);
        for (layer, entity) in &displaced {
            warn!(layer, entity = entity.get(), "实体位于新边界之外，已删除");
            self.kill(*entity);
        }
        self.cursors.set_mapping(self.grid.mapping());
        let last_outside = self
            .cursors
            .last()
            .map_or(true, |cursor| self.grid.map_coordinate(cursor.position).is_err());
        if last_outside {
            self.cursors = CursorSet::single(self.grid.mapping(), home_position(&self.grid));
        }
        Ok(displaced.len())
    }

    pub fn save(&mut self, path: &Path) -> Result<CommandOutcome, EngineError> {
        self.settle()?;
        let level = self.snapshot()?;
        LvlFacade::new().save(&level, path)?;
        info!(
            path = %path.display(),
            entities = level.entity_count(),
            "关卡已保存"
        );
        self.status = format!("wrote {}", path.display());
        Ok(CommandOutcome::Applied)
    }

    /// 读取并替换当前文档。文件完整解码成功之后才会拆除现有内容。
    pub fn load(&mut self, path: &Path) -> Result<CommandOutcome, EngineError> {
        let level = LvlFacade::new().load(path)?;
        self.apply_snapshot(&level);
        info!(
            path = %path.display(),
            layers = level.layers.len(),
            entities = level.entity_count(),
            "关卡已加载"
        );
        self.status = format!("loaded {}", path.display());
        Ok(CommandOutcome::Applied)
    }

    /// 以文件记录的形式导出当前网格（只包含主网格中的存活实体）。
    pub fn snapshot(&self) -> Result<LevelSnapshot, EngineError> {
        let size = self.grid.scaled_bounds();
        let layer_count = self.grid.layer_count();
        let too_large = || EngineError::LevelTooLarge {
            width: size.width,
            height: size.height,
            layers: layer_count,
        };
        let width = u16::try_from(size.width).map_err(|_| too_large())?;
        let height = u16::try_from(size.height).map_err(|_| too_large())?;
        let layers = u16::try_from(layer_count).map_err(|_| too_large())?;

        let header = LvlHeader {
            layers,
            palette: self.templates.len() as u16,
            width,
            height,
            camera: LvlCamera {
                x: self.viewport.center.x(),
                y: self.viewport.center.y(),
                z: self.viewport.center.z(),
                ortho_size: self.viewport.ortho_size,
                color: self.metadata.background,
                set_color: self.metadata.set_color,
            },
            name: self.metadata.name.clone(),
            author: self.metadata.author.clone(),
        };

        let layers = self
            .grid
            .layers()
            .enumerate()
            .map(|(index, layer)| {
                let cells = layer
                    .occupied_cells()
                    .filter_map(|(cell, entity)| {
                        let record = self.store.get(entity).filter(|record| record.is_alive())?;
                        let transform = record.transform;
                        Some((
                            cell,
                            LvlEntity {
                                palette_index: record.template.index() as u16,
                                rotation: RotationCode::from_degrees(transform.rotation),
                                flip_x: transform.flip_x,
                                flip_y: transform.flip_y,
                            },
                        ))
                    })
                    .collect();
                LayerSnapshot {
                    layer: LvlLayer {
                        layer_id: index as i32,
                        z_depth: layer.z_depth,
                    },
                    cells,
                }
            })
            .collect();

        Ok(LevelSnapshot { header, layers })
    }

    /// 用关卡内容替换当前文档：销毁全部实体，清空历史，按文件尺寸重建网格。
    pub fn apply_snapshot(&mut self, level: &LevelSnapshot) {
        let existing: Vec<EntityId> = self
            .store
            .iter()
            .filter(|(_, record)| record.lifecycle != Lifecycle::Destroyed)
            .map(|(entity, _)| entity)
            .collect();
        for entity in existing {
            self.host.destroy(entity);
        }
        self.store.clear();
        self.undo.clear();
        self.selection.clear();
        self.anchor = None;
        self.mode = Mode::Normal;
        self.layer = 0;

        let header = &level.header;
        if header.palette as usize != self.templates.len() {
            warn!(
                file = header.palette,
                registry = self.templates.len(),
                "文件调色板大小与模板表不一致"
            );
        }

        let cell_scale = self.grid.cell_scale();
        let origin = self.grid.bounds().origin();
        let bounds = Rect::new(
            origin.x,
            origin.y,
            header.width as f32 * cell_scale,
            header.height as f32 * cell_scale,
        );
        self.grid = SpatialGrid::new(cell_scale, bounds);

        for (ordinal, layer) in level.layers.iter().enumerate() {
            if layer.layer.layer_id != ordinal as i32 {
                warn!(
                    layer_id = layer.layer.layer_id,
                    ordinal, "图层编号不连续，按文件顺序加载"
                );
            }
            let index = self.grid.add_layer(layer.layer.z_depth);
            for (cell, entity) in &layer.cells {
                let template = match self.templates.resolve(entity.palette_index as usize) {
                    Ok(template) => template,
                    Err(err) => {
                        warn!(layer = index, x = cell.x, y = cell.y, %err, "跳过未知模板");
                        continue;
                    }
                };
                let transform = Transform {
                    position: self.grid.grid_to_world(*cell, layer.layer.z_depth),
                    rotation: entity.rotation.degrees(),
                    flip_x: entity.flip_x,
                    flip_y: entity.flip_y,
                    ..Transform::default()
                };
                if let Err(err) = self.instantiate(template, index, transform) {
                    warn!(layer = index, x = cell.x, y = cell.y, %err, "无法放置实体");
                }
            }
        }
        if self.grid.layer_count() == 0 {
            self.grid.add_layer(0.0);
        }

        self.cursors = CursorSet::single(self.grid.mapping(), home_position(&self.grid));

        let camera = &header.camera;
        self.viewport.center = Point3::new(camera.x, camera.y, camera.z);
        if camera.ortho_size > 0.0 {
            self.viewport.ortho_size = camera.ortho_size;
        }
        if camera.set_color && self.metadata.apply_camera_color {
            self.metadata.background = camera.color;
        }
        self.metadata.set_color = camera.set_color;
        self.metadata.name = header.name.clone();
        self.metadata.author = header.author.clone();
    }

    /// 接管宿主场景中已有的对象，替换当前文档内容并清空历史。
    ///
    /// 边界为各对象所占格子的外包矩形与最小范围的并集；`max_area` 之外的对象
    /// 不参与计算也不被接管。分层值减去最小值后作为图层序号。同一格子出现多个
    /// 对象时后来者生效，先前的对象被软删除。
    pub fn adopt<I>(&mut self, objects: I) -> AdoptReport
    where
        I: IntoIterator<Item = SceneObject>,
    {
        let mut report = AdoptReport::default();
        let (lo, hi) = (self.max_area.origin(), self.max_area.max());
        let mut candidates = Vec::new();
        for object in objects {
            let p = object.transform.position.xy();
            if p.x < lo.x || p.x > hi.x || p.y < lo.y || p.y > hi.y {
                report.outside += 1;
                continue;
            }
            if self.templates.get(object.template).is_none() {
                warn!(entity = object.entity.get(), template = object.template.index(), "对象模板未知，跳过");
                report.skipped += 1;
                continue;
            }
            candidates.push(object);
        }

        let cell_scale = self.grid.cell_scale();
        let (mut min, mut max) = (self.min_area.origin(), self.min_area.max());
        for object in &candidates {
            let p = object.transform.position.xy();
            min = min.min(p);
            max = max.max(p + cell_scale);
        }
        let bounds = Rect::new(min.x, min.y, max.x - min.x, max.y - min.y);

        let sorting = self.sorting;
        let key = |object: &SceneObject| -> i64 {
            match sorting {
                LayerSorting::ZDepth => object.transform.position.z() as i64,
                LayerSorting::SortOrder => i64::from(object.sort_order),
            }
        };
        let lowest = candidates.iter().map(key).min().unwrap_or(0);
        let layer_count = candidates
            .iter()
            .map(|object| (key(object) - lowest) as usize + 1)
            .max()
            .unwrap_or(1);

        let adopted: HashSet<EntityId> =
            candidates.iter().map(|object| object.entity).collect();
        let existing: Vec<EntityId> = self
            .store
            .iter()
            .filter(|(entity, record)| {
                record.lifecycle != Lifecycle::Destroyed && !adopted.contains(entity)
            })
            .map(|(entity, _)| entity)
            .collect();
        for entity in existing {
            self.host.destroy(entity);
        }
        self.store.clear();
        self.undo.clear();
        self.selection.clear();
        self.anchor = None;
        self.mode = Mode::Normal;
        self.layer = 0;

        self.grid = SpatialGrid::new(cell_scale, bounds);
        for index in 0..layer_count {
            let z_depth = match sorting {
                LayerSorting::ZDepth => (lowest + index as i64) as f32,
                LayerSorting::SortOrder => index as f32,
            };
            self.grid.add_layer(z_depth);
        }

        for object in &candidates {
            let layer = (key(object) - lowest) as usize;
            let position = object.transform.position;
            match self.insert_record(object.entity, object.template, layer, object.transform) {
                Ok(Placement::Grid) => report.adopted += 1,
                Ok(Placement::Overflow) => {
                    report.adopted += 1;
                    if let Ok(Some(evicted)) = self.grid.restore(layer, position) {
                        debug!(layer, entity = evicted.get(), "同一格子已有对象，保留后来者");
                        self.kill(evicted);
                        report.adopted -= 1;
                        report.replaced += 1;
                    }
                }
                Err(err) => {
                    warn!(entity = object.entity.get(), %err, "对象无法放入网格");
                    report.skipped += 1;
                }
            }
        }

        self.cursors = CursorSet::single(self.grid.mapping(), home_position(&self.grid));
        let center = bounds.origin() + bounds.size() * 0.5;
        self.viewport.center = Point3::new(center.x, center.y, self.viewport.center.z());
        info!(
            adopted = report.adopted,
            replaced = report.replaced,
            outside = report.outside,
            layers = layer_count,
            "已接管场景对象"
        );
        self.status = format!("adopted {}", report.adopted);
        report
    }

    /// 回退一个撤销帧。
    ///
    /// 逐条比较实体当前与快照中的存活状态：存活但快照为死亡则软删除；死亡但
    /// 快照为存活则复活（并挤掉占据其格子的实体）；状态不变则放回快照位置并恢复
    /// 变换。最后对涉及的格子做一次 restore。
    fn revert(&mut self, frame: &UndoFrame) -> Result<(), EngineError> {
        self.mode = Mode::Normal;
        self.selection.clear();
        self.anchor = None;

        let mut touched: Vec<(usize, Point3)> = Vec::with_capacity(frame.len());
        for state in frame.states() {
            let Some(record) = self.store.get(state.entity) else {
                warn!(entity = state.entity.get(), "撤销记录引用了未知实体");
                continue;
            };
            let layer = record.layer;
            match (record.lifecycle, state.alive) {
                (Lifecycle::Destroyed, _) => {
                    warn!(entity = state.entity.get(), "实体已被销毁，无法撤销");
                    continue;
                }
                (Lifecycle::Active, false) => {
                    self.kill(state.entity);
                    self.sync_transform(state.entity, state.transform);
                }
                (Lifecycle::SoftDeleted, true) => self.revive(state.entity, state.transform),
                (Lifecycle::Active, true) => {
                    if let Err(err) = self.place(state.entity, layer, state.transform) {
                        warn!(entity = state.entity.get(), %err, "无法放回撤销位置");
                    }
                }
                (Lifecycle::SoftDeleted, false) => {
                    self.sync_transform(state.entity, state.transform);
                }
            }
            touched.push((layer, state.transform.position));
        }

        for (layer, position) in touched {
            if let Ok(Some(evicted)) = self.grid.restore(layer, position) {
                warn!(layer, entity = evicted.get(), "撤销后格子冲突，已删除原占用实体");
                self.kill(evicted);
            }
        }

        self.layer = frame.layer().min(self.grid.layer_count().saturating_sub(1));
        self.status = frame.summary();
        Ok(())
    }

    fn undo(&mut self) -> Result<CommandOutcome, EngineError> {
        self.settle()?;
        let Some(frame) = self.undo.pop_frame() else {
            info!("没有更多可撤销的历史");
            self.status = "no more history".to_string();
            return Ok(CommandOutcome::HistoryExhausted);
        };
        let changes = frame.len();
        self.revert(&frame)?;
        debug!(frame = frame.id().get(), changes, "已撤销");
        Ok(CommandOutcome::Reverted { changes })
    }

    fn transform(&mut self, direction: Direction) -> CommandOutcome {
        let offset = direction.offset(self.grid.cell_scale());

        if self.mode == Mode::Scale {
            let delta = direction.offset(1.0);
            for entity in self.selection.clone().into_iter().flatten() {
                self.scale_entity(entity, delta);
            }
            return CommandOutcome::Applied;
        }

        let count = self.cursors.len();
        let mapping = self.grid.mapping();
        let last_only = matches!(self.mode, Mode::Box | Mode::Line);
        let moves_pinned = self.mode != Mode::Normal;
        let moving: Vec<(usize, Cursor)> = self
            .cursors
            .iter()
            .enumerate()
            .filter(|(index, cursor)| {
                if last_only {
                    index + 1 == count
                } else {
                    moves_pinned || !cursor.pinned
                }
            })
            .map(|(index, cursor)| {
                (
                    index,
                    Cursor {
                        position: mapping.snap(cursor.position.translate(offset)),
                        pinned: cursor.pinned,
                    },
                )
            })
            .collect();

        if moving
            .iter()
            .any(|(_, cursor)| self.grid.map_coordinate(cursor.position).is_err())
        {
            debug!(?direction, "光标将越界，忽略本次移动");
            return CommandOutcome::Blocked;
        }

        self.scroll_view(&moving, offset);
        for (index, cursor) in &moving {
            self.cursors.set_unchecked(*index, *cursor);
        }
        self.cursors.sync();

        if self.mode == Mode::Grab {
            for entity in self.selection.clone().into_iter().flatten() {
                self.move_entity(entity, offset);
            }
        }
        CommandOutcome::Applied
    }

    fn scroll_view(&mut self, moving: &[(usize, Cursor)], offset: Vector2) {
        let Some(first) = moving.first().map(|(_, cursor)| cursor.position) else {
            return;
        };
        let (min, max) = moving.iter().fold((first, first), |(min, max), (_, cursor)| {
            let p = cursor.position;
            (
                Point3::new(min.x().min(p.x()), min.y().min(p.y()), min.z()),
                Point3::new(max.x().max(p.x()), max.y().max(p.y()), max.z()),
            )
        });
        if !self.viewport.shows(min, max) {
            self.viewport.center = self.viewport.center.translate(offset);
        }
    }

    fn move_entity(&mut self, entity: EntityId, offset: Vector2) {
        let Some(record) = self.store.get(entity) else {
            return;
        };
        let layer = record.layer;
        let mut transform = record.transform;
        transform.position = self.grid.mapping().snap(transform.position.translate(offset));
        if let Err(err) = self.place(entity, layer, transform) {
            warn!(entity = entity.get(), %err, "实体无法移动到目标格子");
        }
    }

    fn scale_entity(&mut self, entity: EntityId, delta: Vector2) {
        let Some(mut transform) = self.store.transform(entity).copied() else {
            return;
        };
        let scale = transform.scale.as_vec2() + delta.as_vec2();
        if scale.x == 0.0 || scale.y == 0.0 {
            debug!(entity = entity.get(), "缩放不能为 0，已忽略");
            return;
        }
        transform.scale = Vector2::from(scale);
        self.sync_transform(entity, transform);
    }

    fn cycle_template(&mut self, forward: bool) -> CommandOutcome {
        let count = self.templates.len();
        if count == 0 {
            self.status = "palette is empty".to_string();
            return CommandOutcome::Applied;
        }
        self.palette_index = if forward {
            (self.palette_index + 1) % count
        } else {
            (self.palette_index + count - 1) % count
        };
        self.describe_template();
        CommandOutcome::Applied
    }

    fn select_template(&mut self, index: usize) -> Result<CommandOutcome, EngineError> {
        self.templates.resolve(index)?;
        self.palette_index = index;
        self.describe_template();
        Ok(CommandOutcome::Applied)
    }

    fn describe_template(&mut self) {
        if let Some(template) = self
            .templates
            .resolve(self.palette_index)
            .ok()
            .and_then(|id| self.templates.get(id))
        {
            self.status = format!("template {}: {}", self.palette_index, template.name);
        }
    }

    fn switch_layer(&mut self, target: usize) -> Result<CommandOutcome, EngineError> {
        if target >= self.grid.layer_count() {
            return Err(GridError::NoSuchLayer(target).into());
        }
        self.settle()?;
        self.layer = target;
        self.status = format!("layer {target}");
        Ok(CommandOutcome::Applied)
    }

    fn new_layer(&mut self) -> Result<CommandOutcome, EngineError> {
        self.settle()?;
        let index = self.grid.layer_count();
        self.grid.add_layer(index as f32);
        self.layer = index;
        self.status = format!("layer {index}");
        Ok(CommandOutcome::Applied)
    }

    fn toggle_hide_layer(&mut self) -> CommandOutcome {
        if let Some(layer) = self.grid.layer_mut(self.layer) {
            layer.visible = !layer.visible;
        }
        CommandOutcome::Applied
    }

    /// 其他图层只要有一个可见就全部隐藏，否则全部显示。
    fn toggle_hide_other_layers(&mut self) -> CommandOutcome {
        let current = self.layer;
        let any_visible = self
            .grid
            .layers()
            .enumerate()
            .any(|(index, layer)| index != current && layer.visible);
        for index in (0..self.grid.layer_count()).filter(|index| *index != current) {
            if let Some(layer) = self.grid.layer_mut(index) {
                layer.visible = !any_visible;
            }
        }
        CommandOutcome::Applied
    }

    /// 结束当前的临时模式（Grab 会先做 restore），回到 Normal。
    fn settle(&mut self) -> Result<(), EngineError> {
        match self.mode {
            Mode::Normal => {}
            Mode::Grab => self.finish_grab()?,
            Mode::Scale | Mode::Palette => {
                self.mode = Mode::Normal;
                self.selection.clear();
            }
            Mode::Box | Mode::Line => {
                self.mode = Mode::Normal;
                self.anchor = None;
            }
        }
        Ok(())
    }

    fn normal_mode(&mut self) -> Result<(), EngineError> {
        self.settle()?;
        self.cursors.retain_last();
        Ok(())
    }

    fn toggle_grab(&mut self) -> Result<CommandOutcome, EngineError> {
        if self.mode == Mode::Grab {
            self.finish_grab()?;
            return Ok(CommandOutcome::Applied);
        }
        self.settle()?;
        self.begin_selection(Mode::Grab)
    }

    fn toggle_scale(&mut self) -> Result<CommandOutcome, EngineError> {
        if self.mode == Mode::Scale {
            self.settle()?;
            return Ok(CommandOutcome::Applied);
        }
        self.settle()?;
        self.begin_selection(Mode::Scale)
    }

    fn toggle_palette(&mut self) -> Result<CommandOutcome, EngineError> {
        if self.mode == Mode::Palette {
            self.mode = Mode::Normal;
        } else {
            self.settle()?;
            self.mode = Mode::Palette;
        }
        Ok(CommandOutcome::Applied)
    }

    /// Box/Line：进入时以最后一个光标为锚点，再次切换时从锚点到当前光标生成选区。
    fn toggle_anchor_mode(&mut self, mode: Mode) -> Result<CommandOutcome, EngineError> {
        if self.mode != mode {
            self.settle()?;
            self.anchor = self.cursors.last().map(|cursor| cursor.position);
            self.mode = mode;
            return Ok(CommandOutcome::Applied);
        }

        self.mode = Mode::Normal;
        let (Some(anchor), Some(last)) = (self.anchor.take(), self.cursors.last().copied()) else {
            return Ok(CommandOutcome::Applied);
        };
        let added = match mode {
            Mode::Box => {
                self.cursors.remove(self.cursors.len() - 1);
                let added = self.cursors.select_in_rect(anchor, last.position);
                self.cursors.dedup();
                added
            }
            _ => self.cursors.select_line(anchor, last.position),
        };
        self.status = format!("{} cursors", self.cursors.len());
        debug!(added, total = self.cursors.len(), "已生成选区");
        Ok(CommandOutcome::Applied)
    }

    /// 压入撤销帧并选中光标下的实体，选不到任何实体时回滚该帧。
    fn begin_selection(&mut self, mode: Mode) -> Result<CommandOutcome, EngineError> {
        let frame = self.undo.push_frame(self.layer);
        if !self.select_at_cursors()? {
            self.undo.discard_frame(frame);
            self.selection.clear();
            return Ok(CommandOutcome::EmptySelection);
        }
        self.mode = mode;
        Ok(CommandOutcome::Applied)
    }

    fn finish_grab(&mut self) -> Result<(), EngineError> {
        self.mode = Mode::Normal;
        self.restore_at_cursors()?;
        self.selection.clear();
        Ok(())
    }

    /// 合并重叠光标后逐个选取，并把选中实体登记到当前撤销帧。
    fn select_at_cursors(&mut self) -> Result<bool, EngineError> {
        self.cursors.dedup();
        self.selection.clear();
        let mut found = false;
        for position in self.cursors.positions() {
            let entity = self.grid.select_at(self.layer, position, &self.store);
            if let Some(entity) = entity {
                self.undo.register(entity, &self.store)?;
                found = true;
            }
            self.selection.push(entity);
        }
        Ok(found)
    }

    /// 对每个光标所在格子执行 restore，被挤出的实体先登记撤销再软删除。
    fn restore_at_cursors(&mut self) -> Result<(), EngineError> {
        for position in self.cursors.positions() {
            match self.grid.restore(self.layer, position) {
                Ok(Some(evicted)) => {
                    self.undo.register(evicted, &self.store)?;
                    self.kill(evicted);
                }
                Ok(None) | Err(GridError::IndexOutOfBounds { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn create(&mut self) -> Result<CommandOutcome, EngineError> {
        let template = self.templates.resolve(self.palette_index)?;
        self.settle()?;
        let frame = self.undo.push_frame(self.layer);
        self.cursors.dedup();

        let z = self.layer_depth();
        let mut created = 0usize;
        for position in self.cursors.positions() {
            let Ok(index) = self.grid.map_coordinate(position) else {
                continue;
            };
            let transform = Transform::at(self.grid.grid_to_world(index, z));
            self.spawn(template, transform)?;
            created += 1;
        }
        self.restore_at_cursors()?;

        if created == 0 {
            self.undo.discard_frame(frame);
            return Ok(CommandOutcome::EmptySelection);
        }
        self.status = format!("created {created}");
        Ok(CommandOutcome::Applied)
    }

    fn erase(&mut self) -> Result<CommandOutcome, EngineError> {
        self.settle()?;
        let frame = self.undo.push_frame(self.layer);
        let mut erased = 0usize;
        for position in self.cursors.positions() {
            let Some(entity) = self.grid.select_at(self.layer, position, &self.store) else {
                continue;
            };
            self.undo.register(entity, &self.store)?;
            self.kill(entity);
            erased += 1;
        }
        if erased == 0 {
            self.undo.discard_frame(frame);
            return Ok(CommandOutcome::EmptySelection);
        }
        self.status = format!("erased {erased}");
        Ok(CommandOutcome::Applied)
    }

    /// 复制光标下的实体（副本进入 overflow），随后进入 Grab 模式拖动副本。
    fn clone_at_cursors(&mut self) -> Result<CommandOutcome, EngineError> {
        self.settle()?;
        let frame = self.undo.push_frame(self.layer);
        self.cursors.dedup();
        self.selection.clear();

        let mut cloned = 0usize;
        for position in self.cursors.positions() {
            let source = self
                .grid
                .select_at(self.layer, position, &self.store)
                .and_then(|entity| Some((self.find_template(entity)?, self.get_transform(entity)?)));
            let copy = match source {
                Some((template, transform)) => {
                    cloned += 1;
                    Some(self.spawn(template, transform)?)
                }
                None => None,
            };
            self.selection.push(copy);
        }

        if cloned == 0 {
            self.undo.discard_frame(frame);
            self.selection.clear();
            return Ok(CommandOutcome::EmptySelection);
        }
        self.mode = Mode::Grab;
        self.status = format!("cloned {cloned}");
        Ok(CommandOutcome::Applied)
    }

    fn modify_at_cursors<F>(&mut self, edit: F) -> Result<CommandOutcome, EngineError>
    where
        F: Fn(&mut Transform),
    {
        self.settle()?;
        let frame = self.undo.push_frame(self.layer);
        if !self.select_at_cursors()? {
            self.undo.discard_frame(frame);
            self.selection.clear();
            return Ok(CommandOutcome::EmptySelection);
        }
        let targets: Vec<EntityId> = self.selection.drain(..).flatten().collect();
        for entity in targets {
            let Some(mut transform) = self.store.transform(entity).copied() else {
                continue;
            };
            edit(&mut transform);
            self.sync_transform(entity, transform);
        }
        Ok(CommandOutcome::Applied)
    }

    /// 从最后一个光标出发泛洪选取相同模板的相邻实体。
    fn select_similar(&mut self) -> CommandOutcome {
        let Some(anchor) = self.cursors.last().map(|cursor| cursor.position) else {
            return CommandOutcome::EmptySelection;
        };
        let Some(template) = self
            .grid
            .select_at(self.layer, anchor, &self.store)
            .and_then(|entity| self.find_template(entity))
        else {
            return CommandOutcome::EmptySelection;
        };

        let (host, grid, store, layer) = (&self.host, &self.grid, &self.store, self.layer);
        let added = self.cursors.flood_fill(anchor, |index| {
            grid.select(layer, index, store)
                .and_then(|entity| template_of(host, store, entity))
                == Some(template)
        });
        self.status = format!("selected {} similar", added + 1);
        CommandOutcome::Applied
    }

    fn select_all_in_layer(&mut self) -> CommandOutcome {
        let Some(layer) = self.grid.layer(self.layer) else {
            return CommandOutcome::EmptySelection;
        };
        let positions: Vec<Point3> = layer
            .occupied_cells()
            .filter(|(_, entity)| self.store.is_alive(*entity))
            .map(|(index, _)| self.grid.grid_to_world(index, 0.0))
            .collect();
        if positions.is_empty() {
            return CommandOutcome::EmptySelection;
        }

        self.cursors.clear();
        self.cursors.reserve(positions.len());
        for position in positions {
            self.cursors.add_unchecked(Cursor::new(position));
        }
        self.cursors.sync();
        self.status = format!("selected {}", self.cursors.len());
        CommandOutcome::Applied
    }

    /// 在最后一个光标处留下一个固定光标；该格子已有其他光标时不做任何事。
    fn pin_cursor(&mut self) -> Result<CommandOutcome, EngineError> {
        if self.mode != Mode::Normal {
            self.normal_mode()?;
        }
        let Some(last) = self.cursors.last().copied() else {
            return Ok(CommandOutcome::EmptySelection);
        };
        if self.cursors.is_duplicate(last.position) {
            return Ok(CommandOutcome::Applied);
        }
        let tail = self.cursors.len() - 1;
        self.cursors.set(tail, Cursor::pinned(last.position));
        self.cursors.add(Cursor::new(last.position));
        Ok(CommandOutcome::Applied)
    }

    /// 视口中心移到全部光标包围盒的中点。
    fn focus_view(&mut self) -> CommandOutcome {
        let Some(first) = self.cursors.last().map(|cursor| cursor.position) else {
            return CommandOutcome::Applied;
        };
        let (min, max) = self.cursors.iter().fold(
            (first.xy(), first.xy()),
            |(min, max), cursor| {
                let p = cursor.position.xy();
                (min.min(p), max.max(p))
            },
        );
        let mid = (min + max) * 0.5;
        self.viewport.center = Point3::new(mid.x, mid.y, self.viewport.center.z());
        CommandOutcome::Applied
    }

    fn layer_depth(&self) -> f32 {
        self.grid
            .layer(self.layer)
            .map_or(self.layer as f32, |layer| layer.z_depth)
    }

    /// 创建实体：登记“此前不存在”的快照后放入网格。
    fn spawn(&mut self, template: TemplateId, transform: Transform) -> Result<EntityId, EngineError> {
        let Some(descriptor) = self.templates.get(template) else {
            return Err(TemplateError::InvalidPaletteIndex(template.index()).into());
        };
        let entity = self.host.instantiate(template, descriptor, &transform);
        self.undo.register_state(UndoState {
            entity,
            transform,
            alive: false,
        })?;
        self.insert_record(entity, template, self.layer, transform)?;
        Ok(entity)
    }

    /// 加载路径使用：不登记撤销。
    fn instantiate(
        &mut self,
        template: TemplateId,
        layer: usize,
        transform: Transform,
    ) -> Result<EntityId, EngineError> {
        let Some(descriptor) = self.templates.get(template) else {
            return Err(TemplateError::InvalidPaletteIndex(template.index()).into());
        };
        let entity = self.host.instantiate(template, descriptor, &transform);
        self.insert_record(entity, template, layer, transform)?;
        Ok(entity)
    }

    fn insert_record(
        &mut self,
        entity: EntityId,
        template: TemplateId,
        layer: usize,
        transform: Transform,
    ) -> Result<Placement, EngineError> {
        self.store.insert(
            entity,
            EntityRecord {
                template,
                layer,
                transform,
                lifecycle: Lifecycle::Active,
            },
        );
        Ok(self
            .grid
            .assign(layer, entity, transform.position, &self.store)?)
    }

    /// 放到 `transform.position` 所在格子并同步变换。网格位置以实体当前记录为
    /// 旧位置，因此必须先赋值再写入新变换。
    fn place(
        &mut self,
        entity: EntityId,
        layer: usize,
        transform: Transform,
    ) -> Result<Placement, GridError> {
        let placed = self
            .grid
            .assign(layer, entity, transform.position, &self.store);
        self.sync_transform(entity, transform);
        placed
    }

    fn sync_transform(&mut self, entity: EntityId, transform: Transform) {
        if self.store.set_transform(entity, transform) {
            self.host.set_transform(entity, &transform);
        }
    }

    /// 软删除：移出网格、失活并进入待销毁队列。
    fn kill(&mut self, entity: EntityId) {
        let Some(layer) = self
            .store
            .get(entity)
            .filter(|record| record.is_alive())
            .map(|record| record.layer)
        else {
            return;
        };
        self.grid.unassign(layer, entity, &self.store);
        self.store.kill(entity);
        self.host.set_active(entity, false);
    }

    /// 复活并放回快照位置。格子里若有其他存活实体，该实体被软删除。
    fn revive(&mut self, entity: EntityId, transform: Transform) {
        let Some(layer) = self.store.get(entity).map(|record| record.layer) else {
            return;
        };
        if let Some(other) = self.grid.select_at(layer, transform.position, &self.store) {
            if other != entity {
                debug!(entity = entity.get(), other = other.get(), "复活实体挤掉当前占用者");
                self.kill(other);
            }
        }
        self.store.revive(entity);
        self.host.set_active(entity, true);
        if let Err(err) = self.place(entity, layer, transform) {
            warn!(entity = entity.get(), %err, "复活的实体无法放回网格");
        }
    }
}

fn template_of<H: EntityHost>(host: &H, store: &EntityStore, entity: EntityId) -> Option<TemplateId> {
    host.find_template(entity)
        .or_else(|| store.template_of(entity))
}

/// 网格中心格子的角点。
fn home_position(grid: &SpatialGrid) -> Point3 {
    let size = grid.scaled_bounds();
    let index = GridIndex::new((size.width / 2) as i32, (size.height / 2) as i32);
    grid.grid_to_world(index, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn document() -> Document<MemoryHost> {
        let templates = TemplateRegistry::from_names(["grass", "stone", "water"]).unwrap();
        let settings = DocumentSettings {
            bounds: Rect::new(0.0, 0.0, 4.0, 4.0),
            ..DocumentSettings::default()
        };
        Document::new(MemoryHost::new(), templates, settings)
    }

    fn p(x: f32, y: f32) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    #[test]
    fn new_document_starts_centered() {
        let doc = document();
        assert_eq!(doc.cursors().len(), 1);
        assert_eq!(doc.cursors().last().unwrap().position, p(2.0, 2.0));
        assert_eq!(doc.mode(), Mode::Normal);
        assert_eq!(doc.grid().layer_count(), 1);
        assert_eq!(doc.viewport().center.x(), 2.0);
    }

    #[test]
    fn create_then_undo_soft_deletes() {
        let mut doc = document();
        doc.place_cursor(p(0.0, 0.0)).unwrap();
        assert_eq!(doc.apply(Command::Create).unwrap(), CommandOutcome::Applied);
        let entity = doc.entity_at(GridIndex::new(0, 0)).unwrap();

        let outcome = doc.apply(Command::Undo).unwrap();
        assert_eq!(outcome, CommandOutcome::Reverted { changes: 1 });
        assert_eq!(doc.store().get(entity).unwrap().lifecycle, Lifecycle::SoftDeleted);
        assert_eq!(doc.store().pending_destroy(), &[entity]);
        assert_eq!(doc.grid().occupant(0, GridIndex::new(0, 0)), Ok(None));
        assert!(!doc.host().get(entity).unwrap().active);
        assert!(doc.status().starts_with("1 change; "));

        assert_eq!(doc.flush(), 1);
        assert!(doc.host().get(entity).is_none());
        assert_eq!(doc.store().get(entity).unwrap().lifecycle, Lifecycle::Destroyed);
    }

    #[test]
    fn invalid_template_pushes_no_frame() {
        let mut doc = document();
        doc.palette_index = 7;
        let err = doc.apply(Command::Create).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Template(TemplateError::InvalidPaletteIndex(7))
        ));
        assert!(doc.undo_log().is_empty());
    }

    #[test]
    fn empty_grab_rolls_back_frame() {
        let mut doc = document();
        let outcome = doc.apply(Command::ToggleGrab).unwrap();
        assert_eq!(outcome, CommandOutcome::EmptySelection);
        assert_eq!(doc.mode(), Mode::Normal);
        assert!(doc.undo_log().is_empty());
        assert_eq!(doc.status(), "nothing selected");
    }

    #[test]
    fn undo_on_empty_history_is_reported() {
        let mut doc = document();
        assert_eq!(
            doc.apply(Command::Undo).unwrap(),
            CommandOutcome::HistoryExhausted
        );
        assert_eq!(doc.status(), "no more history");
    }

    #[test]
    fn transform_is_rejected_at_the_edge() {
        let mut doc = document();
        doc.place_cursor(p(3.0, 0.0)).unwrap();
        assert_eq!(
            doc.apply(Command::Transform(Direction::Right)).unwrap(),
            CommandOutcome::Blocked
        );
        assert_eq!(doc.cursors().last().unwrap().position, p(3.0, 0.0));
        assert_eq!(
            doc.apply(Command::Transform(Direction::Up)).unwrap(),
            CommandOutcome::Applied
        );
        assert_eq!(doc.cursors().last().unwrap().position, p(3.0, 1.0));
    }

    #[test]
    fn pinned_cursor_stays_in_normal_mode() {
        let mut doc = document();
        doc.place_cursor(p(1.0, 1.0)).unwrap();
        doc.apply(Command::PinCursor).unwrap();
        assert_eq!(doc.cursors().len(), 2);
        // 同一格子不会重复固定
        doc.apply(Command::PinCursor).unwrap();
        assert_eq!(doc.cursors().len(), 2);

        doc.apply(Command::Transform(Direction::Right)).unwrap();
        let cursors = doc.cursors().as_slice();
        assert!(cursors[0].pinned);
        assert_eq!(cursors[0].position, p(1.0, 1.0));
        assert_eq!(cursors[1].position, p(2.0, 1.0));

        doc.apply(Command::DeselectAll).unwrap();
        assert_eq!(doc.cursors().len(), 1);
        assert_eq!(doc.cursors().last().unwrap().position, p(2.0, 1.0));
    }

    #[test]
    fn layers_wrap_and_track_visibility() {
        let mut doc = document();
        doc.apply(Command::NewLayer).unwrap();
        doc.apply(Command::NewLayer).unwrap();
        assert_eq!(doc.layer(), 2);
        assert_eq!(doc.grid().layer(2).unwrap().z_depth, 2.0);

        doc.apply(Command::NextLayer).unwrap();
        assert_eq!(doc.layer(), 0);
        doc.apply(Command::PreviousLayer).unwrap();
        assert_eq!(doc.layer(), 2);

        doc.apply(Command::ToggleHideOtherLayers).unwrap();
        assert!(!doc.grid().layer(0).unwrap().visible);
        assert!(!doc.grid().layer(1).unwrap().visible);
        assert!(doc.grid().layer(2).unwrap().visible);
        doc.apply(Command::ToggleHideOtherLayers).unwrap();
        assert!(doc.grid().layers().all(|layer| layer.visible));

        doc.apply(Command::ToggleHideLayer).unwrap();
        assert!(!doc.grid().layer(2).unwrap().visible);

        assert!(matches!(
            doc.apply(Command::SetLayer(5)),
            Err(EngineError::Grid(GridError::NoSuchLayer(5)))
        ));
    }

    #[test]
    fn palette_navigation_wraps() {
        let mut doc = document();
        doc.apply(Command::PreviousTemplate).unwrap();
        assert_eq!(doc.palette_index(), 2);
        assert_eq!(doc.status(), "template 2: water");
        doc.apply(Command::NextTemplate).unwrap();
        assert_eq!(doc.palette_index(), 0);
        doc.apply(Command::SelectTemplate(1)).unwrap();
        assert_eq!(doc.palette_index(), 1);
        assert!(doc.apply(Command::SelectTemplate(3)).is_err());
        assert_eq!(doc.palette_index(), 1);
    }

    #[test]
    fn palette_mode_toggles() {
        let mut doc = document();
        doc.apply(Command::TogglePalette).unwrap();
        assert_eq!(doc.mode(), Mode::Palette);
        doc.apply(Command::TogglePalette).unwrap();
        assert_eq!(doc.mode(), Mode::Normal);
    }

    #[test]
    fn focus_view_uses_cursor_midpoint() {
        let mut doc = document();
        doc.place_cursor(p(0.0, 0.0)).unwrap();
        doc.apply(Command::PinCursor).unwrap();
        doc.place_cursor(p(3.0, 1.0)).unwrap();
        doc.apply(Command::FocusView).unwrap();
        let center = doc.viewport().center;
        assert_eq!((center.x(), center.y()), (1.5, 0.5));
        assert_eq!(center.z(), DEFAULT_CAMERA_Z);
    }
}
