use tracing::trace;

use crate::entity::{EntityId, EntityStore};
use crate::errors::{GridError, OutOfBounds};
use crate::geometry::{GridIndex, GridMapping, GridSize, Point3, Rect};

/// 单个图层：主网格 + 冲突暂存（overflow）网格。
///
/// 稳定状态下（一次 restore 之后）overflow 必须为空；只有在赋值与下一次
/// restore 之间，同一格子才可能出现第二个实体。
#[derive(Debug, Clone)]
pub struct Layer {
    pub z_depth: f32,
    pub visible: bool,
    size: GridSize,
    grid: Vec<Option<EntityId>>,
    overflow: Vec<Option<EntityId>>,
}

impl Layer {
    fn new(size: GridSize, z_depth: f32) -> Self {
        Self {
            z_depth,
            visible: true,
            size,
            grid: vec![None; size.cell_count()],
            overflow: vec![None; size.cell_count()],
        }
    }

    #[inline]
    fn slot(&self, index: GridIndex) -> Option<usize> {
        if self.size.contains(index) {
            Some(index.x as usize * self.size.height as usize + index.y as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn occupant(&self, index: GridIndex) -> Option<EntityId> {
        self.slot(index).and_then(|slot| self.grid[slot])
    }

    #[inline]
    pub fn overflow_at(&self, index: GridIndex) -> Option<EntityId> {
        self.slot(index).and_then(|slot| self.overflow[slot])
    }

    /// 是否存在尚未 restore 的冲突格子。
    pub fn has_overflow(&self) -> bool {
        self.overflow.iter().any(Option::is_some)
    }

    /// 按 x 优先（x 外层、y 内层）遍历主网格中的实体。
    pub fn occupied_cells(&self) -> impl Iterator<Item = (GridIndex, EntityId)> + '_ {
        let height = self.size.height.max(1) as usize;
        self.grid.iter().enumerate().filter_map(move |(slot, entity)| {
            entity.map(|id| {
                (
                    GridIndex::new((slot / height) as i32, (slot % height) as i32),
                    id,
                )
            })
        })
    }

    fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.grid.iter().chain(self.overflow.iter()).flatten().copied()
    }
}

/// 赋值结果：实体进入主网格，或因格子被其他实体占用而进入 overflow。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Grid,
    Overflow,
}

/// (图层, 网格 x, 网格 y) -> 实体 的权威映射。
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_scale: f32,
    bounds: Rect,
    size: GridSize,
    layers: Vec<Layer>,
}

impl SpatialGrid {
    pub fn new(cell_scale: f32, bounds: Rect) -> Self {
        let cell_scale = cell_scale.max(f32::EPSILON);
        Self {
            cell_scale,
            bounds,
            size: GridSize::from_bounds(&bounds, cell_scale),
            layers: Vec::new(),
        }
    }

    #[inline]
    pub fn cell_scale(&self) -> f32 {
        self.cell_scale
    }

    #[inline]
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// 整数网格尺寸，随 `set_bounds` 重新计算。
    #[inline]
    pub fn scaled_bounds(&self) -> GridSize {
        self.size
    }

    #[inline]
    pub fn mapping(&self) -> GridMapping {
        GridMapping::new(self.bounds.origin(), self.cell_scale)
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layer(&self, layer: usize) -> Option<&Layer> {
        self.layers.get(layer)
    }

    #[inline]
    pub fn layer_mut(&mut self, layer: usize) -> Option<&mut Layer> {
        self.layers.get_mut(layer)
    }

    #[inline]
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// 追加一个空图层，返回其下标。
    pub fn add_layer(&mut self, z_depth: f32) -> usize {
        self.layers.push(Layer::new(self.size, z_depth));
        self.layers.len() - 1
    }

    /// `index = floor((world_pos - origin) / cell_scale)`，任一轴为负或超出
    /// `scaled_bounds` 时返回 `OutOfBounds`。
    pub fn map_coordinate(&self, position: Point3) -> Result<GridIndex, OutOfBounds> {
        let index = self.mapping().quantize(position);
        if self.size.contains(index) {
            Ok(index)
        } else {
            Err(OutOfBounds {
                x: position.x(),
                y: position.y(),
            })
        }
    }

    #[inline]
    pub fn grid_to_world(&self, index: GridIndex, z: f32) -> Point3 {
        self.mapping().to_world(index, z)
    }

    fn layer_ref(&self, layer: usize) -> Result<&Layer, GridError> {
        self.layers.get(layer).ok_or(GridError::NoSuchLayer(layer))
    }

    /// 将实体放到 `position` 所在格子。
    ///
    /// 旧格子由实体当前记录的位置推导。目标格子被其他实体占用时，实体进入
    /// overflow，等待后续 `restore` 处理。
    pub fn assign(
        &mut self,
        layer: usize,
        entity: EntityId,
        position: Point3,
        store: &EntityStore,
    ) -> Result<Placement, GridError> {
        let new_index = self
            .map_coordinate(position)
            .map_err(|_| self.index_error(self.mapping().quantize(position)))?;
        let old_index = store
            .transform(entity)
            .and_then(|transform| self.map_coordinate(transform.position).ok());

        let target = self
            .layers
            .get_mut(layer)
            .ok_or(GridError::NoSuchLayer(layer))?;

        if let Some(old_slot) = old_index.and_then(|index| target.slot(index)) {
            if target.overflow[old_slot] == Some(entity) {
                target.overflow[old_slot] = None;
            }
            if target.grid[old_slot] == Some(entity) {
                target.grid[old_slot] = None;
            }
        }

        let Some(slot) = target.slot(new_index) else {
            return Err(GridError::IndexOutOfBounds {
                x: new_index.x,
                y: new_index.y,
            });
        };
        match target.grid[slot] {
            Some(occupant) if occupant != entity => {
                trace!(
                    layer,
                    x = new_index.x,
                    y = new_index.y,
                    entity = entity.get(),
                    occupant = occupant.get(),
                    "格子已被占用，实体进入 overflow"
                );
                target.overflow[slot] = Some(entity);
                Ok(Placement::Overflow)
            }
            _ => {
                target.grid[slot] = Some(entity);
                Ok(Placement::Grid)
            }
        }
    }

    /// 从实体当前记录位置对应的格子中移除该实体（主网格与 overflow 均检查）。
    pub fn unassign(&mut self, layer: usize, entity: EntityId, store: &EntityStore) -> bool {
        let Some(index) = store
            .transform(entity)
            .and_then(|transform| self.map_coordinate(transform.position).ok())
        else {
            return false;
        };
        let Some(target) = self.layers.get_mut(layer) else {
            return false;
        };
        let Some(slot) = target.slot(index) else {
            return false;
        };
        let mut removed = false;
        if target.grid[slot] == Some(entity) {
            target.grid[slot] = None;
            removed = true;
        }
        if target.overflow[slot] == Some(entity) {
            target.overflow[slot] = None;
            removed = true;
        }
        removed
    }

    /// 调和单个格子的主网格与 overflow。
    ///
    /// 两者都有实体时，主网格中的实体被挤出（由调用方负责软删除），overflow
    /// 实体提升到主网格；只有 overflow 时直接提升。返回被挤出的实体。
    pub fn restore(
        &mut self,
        layer: usize,
        position: Point3,
    ) -> Result<Option<EntityId>, GridError> {
        let index = self
            .map_coordinate(position)
            .map_err(|_| self.index_error(self.mapping().quantize(position)))?;
        let target = self
            .layers
            .get_mut(layer)
            .ok_or(GridError::NoSuchLayer(layer))?;
        let Some(slot) = target.slot(index) else {
            return Ok(None);
        };

        match (target.grid[slot], target.overflow[slot].take()) {
            (Some(occupant), Some(incoming)) => {
                target.grid[slot] = Some(incoming);
                Ok(Some(occupant))
            }
            (None, Some(incoming)) => {
                target.grid[slot] = Some(incoming);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// 选取格子中的实体：overflow 优先；失活实体一律视为空。
    pub fn select(&self, layer: usize, index: GridIndex, store: &EntityStore) -> Option<EntityId> {
        let layer = self.layers.get(layer)?;
        let candidate = layer.overflow_at(index).or_else(|| layer.occupant(index))?;
        store.is_alive(candidate).then_some(candidate)
    }

    /// 按世界坐标选取，越界时返回 `None`。
    pub fn select_at(&self, layer: usize, position: Point3, store: &EntityStore) -> Option<EntityId> {
        let index = self.map_coordinate(position).ok()?;
        self.select(layer, index, store)
    }

    /// 某格子在主网格中记录的实体（不过滤生命周期）。
    pub fn occupant(&self, layer: usize, index: GridIndex) -> Result<Option<EntityId>, GridError> {
        let layer = self.layer_ref(layer)?;
        if !self.size.contains(index) {
            return Err(self.index_error(index));
        }
        Ok(layer.occupant(index))
    }

    /// 修改世界边界：重新计算 `scaled_bounds`，重新分配全部图层，并把仍在新
    /// 边界内的实体放回。返回落到边界之外的实体。
    pub fn set_bounds(&mut self, bounds: Rect, store: &EntityStore) -> Vec<(usize, EntityId)> {
        let previous: Vec<(usize, Vec<EntityId>)> = self
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| (index, layer.entities().collect()))
            .collect();

        self.bounds = bounds;
        self.size = GridSize::from_bounds(&bounds, self.cell_scale);
        for layer in &mut self.layers {
            *layer = Layer {
                z_depth: layer.z_depth,
                visible: layer.visible,
                ..Layer::new(self.size, layer.z_depth)
            };
        }

        let mut displaced = Vec::new();
        for (layer_index, entities) in previous {
            for entity in entities {
                let placed = store
                    .transform(entity)
                    .map(|transform| transform.position)
                    .and_then(|position| self.map_coordinate(position).ok());
                let Some(index) = placed else {
                    displaced.push((layer_index, entity));
                    continue;
                };
                let target = &mut self.layers[layer_index];
                if let Some(slot) = target.slot(index) {
                    if target.grid[slot].is_none() {
                        target.grid[slot] = Some(entity);
                    } else {
                        target.overflow[slot] = Some(entity);
                    }
                }
            }
        }
        displaced
    }

    #[inline]
    fn index_error(&self, index: GridIndex) -> GridError {
        GridError::IndexOutOfBounds {
            x: index.x,
            y: index.y,
        }
    }
}
