pub mod cursor;
pub mod grid;
pub mod undo;

pub mod geometry {
    use glam::{Vec2, Vec3};
    use serde::{Deserialize, Serialize};

    /// 量化时允许的舍入误差，以参与运算的坐标量级的 ULP 计。
    /// `origin + i * cell_scale` 换算回格子单位时只会偏离整数几个 ULP。
    pub const SNAP_ULPS: f32 = 8.0;

    /// 与 `v` 同量级的舍入误差上限（格子单位）。
    #[inline]
    fn snap_tolerance(magnitude: f32) -> f32 {
        SNAP_ULPS * f32::EPSILON * (magnitude + 1.0)
    }

    /// `floor(v)`，但只差舍入误差就到达的上方整数按该整数计。
    #[inline]
    fn snapped_floor(v: f32, magnitude: f32) -> i32 {
        let nearest = v.round();
        if nearest > v && nearest - v <= snap_tolerance(magnitude) {
            nearest as i32
        } else {
            v.floor() as i32
        }
    }

    /// `ceil(v)`，但只比整数多出舍入误差时按该整数计。
    #[inline]
    fn snapped_ceil(v: f32) -> f32 {
        let nearest = v.round();
        if nearest < v && v - nearest <= snap_tolerance(v.abs()) {
            nearest
        } else {
            v.ceil()
        }
    }

    /// 世界坐标中的点，z 仅作为图层深度标记使用。
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Point3(pub Vec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f32, y: f32, z: f32) -> Self {
            Self(Vec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f32 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f32 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f32 {
            self.0.z
        }

        /// 平移 xy 分量，z 保持不变。
        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0.extend(0.0))
        }

        #[inline]
        pub fn with_z(self, z: f32) -> Self {
            Self(Vec3::new(self.0.x, self.0.y, z))
        }

        #[inline]
        pub fn xy(self) -> Vec2 {
            self.0.truncate()
        }

        #[inline]
        pub fn as_vec3(self) -> Vec3 {
            self.0
        }
    }

    impl From<Vec3> for Point3 {
        fn from(value: Vec3) -> Self {
            Self(value)
        }
    }

    /// 二维向量，用于光标位移与缩放。
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Vector2(pub Vec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f32, y: f32) -> Self {
            Self(Vec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f32 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f32 {
            self.0.y
        }

        #[inline]
        pub fn scaled(self, factor: f32) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn as_vec2(self) -> Vec2 {
            self.0
        }
    }

    impl From<Vec2> for Vector2 {
        fn from(value: Vec2) -> Self {
            Self(value)
        }
    }

    /// 世界坐标下的矩形区域（左下角 + 尺寸）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Rect {
        origin: Vec2,
        size: Vec2,
    }

    impl Rect {
        #[inline]
        pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
            Self {
                origin: Vec2::new(x, y),
                size: Vec2::new(width.abs(), height.abs()),
            }
        }

        #[inline]
        pub fn origin(&self) -> Vec2 {
            self.origin
        }

        #[inline]
        pub fn size(&self) -> Vec2 {
            self.size
        }

        #[inline]
        pub fn max(&self) -> Vec2 {
            self.origin + self.size
        }
    }

    /// 网格索引。允许为负，以便在越界检查前表达映射结果。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GridIndex {
        pub x: i32,
        pub y: i32,
    }

    impl GridIndex {
        #[inline]
        pub fn new(x: i32, y: i32) -> Self {
            Self { x, y }
        }

        /// 四邻域，顺序固定为 上、右、下、左。
        #[inline]
        pub fn neighbors(self) -> [GridIndex; 4] {
            [
                GridIndex::new(self.x, self.y + 1),
                GridIndex::new(self.x + 1, self.y),
                GridIndex::new(self.x, self.y - 1),
                GridIndex::new(self.x - 1, self.y),
            ]
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct GridSize {
        pub width: u32,
        pub height: u32,
    }

    impl GridSize {
        #[inline]
        pub fn new(width: u32, height: u32) -> Self {
            Self { width, height }
        }

        #[inline]
        pub fn cell_count(self) -> usize {
            self.width as usize * self.height as usize
        }

        #[inline]
        pub fn contains(self, index: GridIndex) -> bool {
            index.x >= 0
                && index.y >= 0
                && (index.x as u32) < self.width
                && (index.y as u32) < self.height
        }

        /// 由世界尺寸与格子大小推导整数网格尺寸：`ceil(size / cell_scale)`。
        pub fn from_bounds(bounds: &Rect, cell_scale: f32) -> Self {
            let scaled = bounds.size() / cell_scale;
            Self {
                width: snapped_ceil(scaled.x).max(0.0) as u32,
                height: snapped_ceil(scaled.y).max(0.0) as u32,
            }
        }
    }

    /// 世界坐标与网格索引之间的映射，只依赖原点与格子大小。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct GridMapping {
        origin: Vec2,
        cell_scale: f32,
    }

    impl GridMapping {
        pub fn new(origin: Vec2, cell_scale: f32) -> Self {
            debug_assert!(cell_scale > 0.0, "cell_scale must be positive");
            Self {
                origin,
                cell_scale: cell_scale.max(f32::EPSILON),
            }
        }

        #[inline]
        pub fn origin(&self) -> Vec2 {
            self.origin
        }

        #[inline]
        pub fn cell_scale(&self) -> f32 {
            self.cell_scale
        }

        /// `floor((pos - origin) / cell_scale)`，不做越界检查。
        ///
        /// 只吸收与坐标量级相称的舍入误差，`3.99995` 仍然落在第 3 格。
        #[inline]
        pub fn quantize(&self, position: Point3) -> GridIndex {
            let xy = position.xy();
            let scaled = (xy - self.origin) / self.cell_scale;
            let magnitude = (xy.abs() + self.origin.abs()) / self.cell_scale;
            GridIndex::new(
                snapped_floor(scaled.x, magnitude.x),
                snapped_floor(scaled.y, magnitude.y),
            )
        }

        /// 吸附到所在格子的左下角。
        #[inline]
        pub fn snap(&self, position: Point3) -> Point3 {
            self.to_world(self.quantize(position), position.z())
        }

        /// 网格索引对应格子的左下角世界坐标。
        #[inline]
        pub fn to_world(&self, index: GridIndex, z: f32) -> Point3 {
            Point3::new(
                self.origin.x + index.x as f32 * self.cell_scale,
                self.origin.y + index.y as f32 * self.cell_scale,
                z,
            )
        }

        /// 有损的 64 位格子键：`x | (y << 32)`，忽略 z。
        /// 仅用于判断两个位置是否落在同一格子，不能作为世界坐标相等的判据。
        #[inline]
        pub fn encode(&self, position: Point3) -> u64 {
            let index = self.quantize(position);
            (index.x as u32 as u64) | ((index.y as u32 as u64) << 32)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn quantize_floors_values_just_below_a_cell_edge() {
            let mapping = GridMapping::new(Vec2::ZERO, 1.0);
            assert_eq!(
                mapping.quantize(Point3::new(3.99995, 0.5, 0.0)),
                GridIndex::new(3, 0)
            );
            assert_eq!(
                mapping.quantize(Point3::new(-0.00005, 0.0, 0.0)),
                GridIndex::new(-1, 0)
            );
        }

        #[test]
        fn quantize_absorbs_accumulated_rounding() {
            let mapping = GridMapping::new(Vec2::new(-8.0, 0.0), 0.1);
            let mut x = -8.0f32;
            for step in 0..40 {
                assert_eq!(mapping.quantize(Point3::new(x, 0.0, 0.0)).x, step);
                x = mapping.snap(Point3::new(x + 0.1, 0.0, 0.0)).x();
            }
        }

        #[test]
        fn grid_size_rounds_partial_cells_up() {
            let size = GridSize::from_bounds(&Rect::new(0.0, 0.0, 4.00005, 1.6), 1.0);
            assert_eq!(size.width, 5);
            let size = GridSize::from_bounds(&Rect::new(0.0, 0.0, 0.3, 1.6), 0.1);
            assert_eq!(size, GridSize::new(3, 16));
        }
    }
}

pub mod errors {
    use thiserror::Error;

    /// 坐标映射到文档网格之外。调用方应视为“跳过该光标/格子”。
    #[derive(Debug, Clone, Copy, PartialEq, Error)]
    #[error("position ({x}, {y}) is outside the grid bounds")]
    pub struct OutOfBounds {
        pub x: f32,
        pub y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    pub enum GridError {
        #[error("layer {0} does not exist")]
        NoSuchLayer(usize),
        #[error("grid index ({x}, {y}) is outside the grid bounds")]
        IndexOutOfBounds { x: i32, y: i32 },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum UndoError {
        #[error("cannot register state: missing undo frame")]
        MissingFrame,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum TemplateError {
        #[error("no template at palette index {0}")]
        InvalidPaletteIndex(usize),
    }
}

pub mod entity {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    use crate::errors::TemplateError;
    use crate::geometry::{Point3, Vector2};

    /// 调色板可容纳的最大模板数量（二进制格式中 12 位、保留 0 表示空格子）。
    pub const MAX_TEMPLATES: usize = 0xFFF;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 模板（调色板条目）标识，即调色板下标。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct TemplateId(u16);

    impl TemplateId {
        #[inline]
        pub fn new(index: u16) -> Self {
            Self(index)
        }

        #[inline]
        pub fn index(self) -> usize {
            self.0 as usize
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Template {
        pub name: String,
    }

    impl Template {
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into() }
        }
    }

    /// 静态模板表，加载时一次性建立，之后只按下标查询。
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct TemplateRegistry {
        templates: Vec<Template>,
    }

    impl TemplateRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// 按顺序注册模板名称，超过 `MAX_TEMPLATES` 的部分被拒绝。
        pub fn from_names<I, S>(names: I) -> Result<Self, TemplateError>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let mut registry = Self::new();
            for name in names {
                registry.register(Template::new(name))?;
            }
            Ok(registry)
        }

        pub fn register(&mut self, template: Template) -> Result<TemplateId, TemplateError> {
            let index = self.templates.len();
            if index >= MAX_TEMPLATES {
                return Err(TemplateError::InvalidPaletteIndex(index));
            }
            self.templates.push(template);
            Ok(TemplateId(index as u16))
        }

        /// 校验调色板下标并返回模板标识。
        pub fn resolve(&self, index: usize) -> Result<TemplateId, TemplateError> {
            if index < self.templates.len() {
                Ok(TemplateId(index as u16))
            } else {
                Err(TemplateError::InvalidPaletteIndex(index))
            }
        }

        #[inline]
        pub fn get(&self, id: TemplateId) -> Option<&Template> {
            self.templates.get(id.index())
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.templates.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.templates.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = (TemplateId, &Template)> {
            self.templates
                .iter()
                .enumerate()
                .map(|(index, template)| (TemplateId(index as u16), template))
        }
    }

    /// 实体变换。`rotation` 以度为单位，绕 z 轴逆时针。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Transform {
        pub position: Point3,
        pub scale: Vector2,
        pub rotation: f32,
        pub flip_x: bool,
        pub flip_y: bool,
    }

    impl Transform {
        #[inline]
        pub fn at(position: Point3) -> Self {
            Self {
                position,
                ..Self::default()
            }
        }
    }

    impl Default for Transform {
        fn default() -> Self {
            Self {
                position: Point3::default(),
                scale: Vector2::new(1.0, 1.0),
                rotation: 0.0,
                flip_x: false,
                flip_y: false,
            }
        }
    }

    /// 实体生命周期：软删除的实体仍可由撤销复活，`Destroyed` 之后不可恢复。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Lifecycle {
        Active,
        SoftDeleted,
        Destroyed,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EntityRecord {
        pub template: TemplateId,
        pub layer: usize,
        pub transform: Transform,
        pub lifecycle: Lifecycle,
    }

    impl EntityRecord {
        #[inline]
        pub fn is_alive(&self) -> bool {
            self.lifecycle == Lifecycle::Active
        }
    }

    /// 核心侧的实体表。渲染层持有真实对象，这里保存核心需要的全部属性，
    /// 并维护待销毁队列。
    #[derive(Debug, Default, Clone)]
    pub struct EntityStore {
        records: HashMap<EntityId, EntityRecord>,
        pending_destroy: Vec<EntityId>,
    }

    impl EntityStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, id: EntityId, record: EntityRecord) {
            if record.lifecycle == Lifecycle::SoftDeleted {
                self.pending_destroy.push(id);
            }
            self.records.insert(id, record);
        }

        #[inline]
        pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
            self.records.get(&id)
        }

        #[inline]
        pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
            self.records.get_mut(&id)
        }

        #[inline]
        pub fn is_alive(&self, id: EntityId) -> bool {
            self.records.get(&id).is_some_and(EntityRecord::is_alive)
        }

        #[inline]
        pub fn transform(&self, id: EntityId) -> Option<&Transform> {
            self.records.get(&id).map(|record| &record.transform)
        }

        #[inline]
        pub fn template_of(&self, id: EntityId) -> Option<TemplateId> {
            self.records.get(&id).map(|record| record.template)
        }

        pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> bool {
            match self.records.get_mut(&id) {
                Some(record) => {
                    record.transform = transform;
                    true
                }
                None => false,
            }
        }

        /// 软删除：`Active -> SoftDeleted` 并加入待销毁队列。返回是否发生了状态变化。
        pub fn kill(&mut self, id: EntityId) -> bool {
            match self.records.get_mut(&id) {
                Some(record) if record.lifecycle == Lifecycle::Active => {
                    record.lifecycle = Lifecycle::SoftDeleted;
                    self.pending_destroy.push(id);
                    true
                }
                _ => false,
            }
        }

        /// 复活：`SoftDeleted -> Active` 并移出待销毁队列。
        pub fn revive(&mut self, id: EntityId) -> bool {
            match self.records.get_mut(&id) {
                Some(record) if record.lifecycle == Lifecycle::SoftDeleted => {
                    record.lifecycle = Lifecycle::Active;
                    self.pending_destroy.retain(|pending| *pending != id);
                    true
                }
                _ => false,
            }
        }

        /// 取出全部待销毁实体并标记为 `Destroyed`。
        pub fn drain_pending(&mut self) -> Vec<EntityId> {
            let drained = std::mem::take(&mut self.pending_destroy);
            for id in &drained {
                if let Some(record) = self.records.get_mut(id) {
                    record.lifecycle = Lifecycle::Destroyed;
                }
            }
            drained
        }

        #[inline]
        pub fn pending_destroy(&self) -> &[EntityId] {
            &self.pending_destroy
        }

        pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityRecord)> {
            self.records.iter().map(|(id, record)| (*id, record))
        }

        pub fn alive_count(&self) -> usize {
            self.records.values().filter(|record| record.is_alive()).count()
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.records.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.records.is_empty()
        }

        pub fn clear(&mut self) {
            self.records.clear();
            self.pending_destroy.clear();
        }
    }

}
