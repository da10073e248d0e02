use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::geometry::{GridIndex, GridMapping, Point3, Vector2};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: Point3,
    pub pinned: bool,
}

impl Cursor {
    #[inline]
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            pinned: false,
        }
    }

    #[inline]
    pub fn pinned(position: Point3) -> Self {
        Self {
            position,
            pinned: true,
        }
    }
}

/// 有序的多光标集合。
///
/// 另维护一张以格子键（见 [`GridMapping::encode`]）为键的占用计数表，使
/// “该格子是否已被选中”成为 O(1) 查询。写入分两种：
///
/// - 检查路径（`add`、`set`、`remove`...）每次写入都同步计数表；
/// - 非检查路径（`add_unchecked`、`set_unchecked`）跳过记账，供框选/画线等
///   批量构建使用，之后必须调用 [`CursorSet::sync`]。
///
/// 失步状态下的只读查询会直接 panic；检查路径的写入会先自动同步。
#[derive(Debug, Clone)]
pub struct CursorSet {
    cursors: Vec<Cursor>,
    occupancy: HashMap<u64, usize>,
    mapping: GridMapping,
    synced: bool,
}

impl CursorSet {
    pub fn new(mapping: GridMapping) -> Self {
        Self {
            cursors: Vec::new(),
            occupancy: HashMap::new(),
            mapping,
            synced: true,
        }
    }

    /// 创建只含一个光标的集合。
    pub fn single(mapping: GridMapping, position: Point3) -> Self {
        let mut set = Self::new(mapping);
        set.add(Cursor::new(position));
        set
    }

    #[inline]
    pub fn mapping(&self) -> GridMapping {
        self.mapping
    }

    /// 更换坐标映射（文档边界或格子大小变化后），并重建计数表。
    pub fn set_mapping(&mut self, mapping: GridMapping) {
        self.mapping = mapping;
        self.synced = false;
        self.sync();
    }

    #[inline]
    pub fn encode(&self, position: Point3) -> u64 {
        self.mapping.encode(position)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    #[inline]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Cursor> {
        self.cursors.get(index)
    }

    #[inline]
    pub fn last(&self) -> Option<&Cursor> {
        self.cursors.last()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Cursor> {
        self.cursors.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Cursor] {
        &self.cursors
    }

    pub fn positions(&self) -> Vec<Point3> {
        self.cursors.iter().map(|cursor| cursor.position).collect()
    }

    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.cursors.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
        self.occupancy.clear();
        self.synced = true;
    }

    /// 完整重建计数表。
    pub fn sync(&mut self) {
        if self.synced {
            return;
        }
        self.occupancy.clear();
        for index in 0..self.cursors.len() {
            let key = self.mapping.encode(self.cursors[index].position);
            *self.occupancy.entry(key).or_insert(0) += 1;
        }
        self.synced = true;
    }

    /// 追加光标，返回该格子此前是否已有光标。
    pub fn add(&mut self, cursor: Cursor) -> bool {
        self.sync();
        self.cursors.push(cursor);
        self.increment(cursor.position)
    }

    /// 追加光标但不记账；之后必须 `sync`。
    #[inline]
    pub fn add_unchecked(&mut self, cursor: Cursor) {
        self.cursors.push(cursor);
        self.synced = false;
    }

    /// 覆盖指定下标的光标并更新计数表。
    pub fn set(&mut self, index: usize, cursor: Cursor) {
        self.sync();
        let Some(slot) = self.cursors.get_mut(index) else {
            return;
        };
        let previous = std::mem::replace(slot, cursor);
        self.decrement(previous.position, 1);
        self.increment(cursor.position);
    }

    #[inline]
    pub fn set_unchecked(&mut self, index: usize, cursor: Cursor) {
        if let Some(slot) = self.cursors.get_mut(index) {
            *slot = cursor;
            self.synced = false;
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Cursor> {
        self.sync();
        if index >= self.cursors.len() {
            return None;
        }
        let removed = self.cursors.remove(index);
        self.decrement(removed.position, 1);
        Some(removed)
    }

    /// 该格子上的光标数量。
    pub fn occupancy(&self, position: Point3) -> usize {
        self.assert_synced();
        self.occupancy
            .get(&self.mapping.encode(position))
            .copied()
            .unwrap_or(0)
    }

    /// 该格子上是否有不止一个光标。
    pub fn is_duplicate(&self, position: Point3) -> bool {
        self.occupancy(position) > 1
    }

    /// 该格子上是否存在光标。
    pub fn contains(&self, position: Point3) -> bool {
        self.occupancy(position) > 0
    }

    /// 删除与 `position` 同格的全部光标，`ignore_index` 指向的那个除外。
    /// 下标以调用前的顺序为准，返回删除数量。
    pub fn remove_duplicate(&mut self, position: Point3, ignore_index: Option<usize>) -> usize {
        self.sync();
        let key = self.mapping.encode(position);
        let mapping = self.mapping;
        let before = self.cursors.len();
        let mut index = 0;
        self.cursors.retain(|cursor| {
            let keep = Some(index) == ignore_index || mapping.encode(cursor.position) != key;
            index += 1;
            keep
        });
        let removed = before - self.cursors.len();
        self.decrement(position, removed);
        removed
    }

    /// 合并重叠光标：同一格子只保留下标最小的一个。返回删除数量。
    pub fn dedup(&mut self) -> usize {
        self.sync();
        let mapping = self.mapping;
        let mut seen = HashSet::with_capacity(self.cursors.len());
        let before = self.cursors.len();
        self.cursors
            .retain(|cursor| seen.insert(mapping.encode(cursor.position)));
        let removed = before - self.cursors.len();
        if removed > 0 {
            self.synced = false;
            self.sync();
        }
        removed
    }

    /// 只保留最后一个光标（并取消固定）。
    pub fn retain_last(&mut self) {
        if let Some(last) = self.cursors.pop() {
            self.clear();
            self.add(Cursor::new(last.position));
        }
    }

    /// 平移光标。`include_pinned` 为 false 时固定光标保持不动。
    pub fn translate(&mut self, offset: Vector2, include_pinned: bool) {
        for cursor in &mut self.cursors {
            if include_pinned || !cursor.pinned {
                cursor.position = cursor.position.translate(offset);
            }
        }
        self.synced = false;
        self.sync();
    }

    /// 只平移最后一个光标。
    pub fn translate_last(&mut self, offset: Vector2) {
        if let Some(index) = self.cursors.len().checked_sub(1) {
            let mut cursor = self.cursors[index];
            cursor.position = cursor.position.translate(offset);
            self.set(index, cursor);
        }
    }

    /// 框选：按格子步长遍历两个角点围成的矩形（两端都包含），追加为光标。
    /// 返回追加数量。
    pub fn select_in_rect(&mut self, a: Point3, b: Point3) -> usize {
        let positions = rect_positions(self.mapping.cell_scale(), a, b);
        self.reserve(positions.len());
        let count = positions.len();
        for position in positions {
            self.add_unchecked(Cursor::new(position));
        }
        self.sync();
        count
    }

    /// 画线选择：从 `a` 到 `b` 光栅化，包含起点、不含终点；终点由单独的光标表示，
    /// 这样后续追加顶点时接缝处不会重复。新光标为固定光标，插在最后一个光标之前。
    pub fn select_line(&mut self, a: Point3, b: Point3) -> usize {
        let positions = rasterize_line(self.mapping.cell_scale(), a, b);
        let count = positions.len();
        let tail = self.cursors.pop();
        self.reserve(count + 1);
        for position in positions {
            self.add_unchecked(Cursor::pinned(position));
        }
        if let Some(tail) = tail {
            self.add_unchecked(tail);
        }
        self.synced = false;
        self.sync();
        count
    }

    /// 四连通泛洪填充（显式栈，非递归）。
    ///
    /// 邻居按 上、右、下、左 的顺序入栈；只有 `accept` 返回 true 且尚未在集合中的
    /// 格子才会加入。集合本身充当 visited 集，因此在有限网格上必然终止。
    /// 返回新增光标数量。
    pub fn flood_fill<F>(&mut self, anchor: Point3, mut accept: F) -> usize
    where
        F: FnMut(GridIndex) -> bool,
    {
        self.sync();
        let z = anchor.z();
        let start = self.mapping.quantize(anchor);
        let mut added = 0;
        if !self.contains(anchor) {
            self.add(Cursor::new(self.mapping.to_world(start, z)));
            added += 1;
        }

        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            for neighbor in index.neighbors() {
                let position = self.mapping.to_world(neighbor, z);
                if self.contains(position) || !accept(neighbor) {
                    continue;
                }
                self.add(Cursor::new(position));
                added += 1;
                stack.push(neighbor);
            }
        }
        added
    }

    fn increment(&mut self, position: Point3) -> bool {
        let count = self
            .occupancy
            .entry(self.mapping.encode(position))
            .or_insert(0);
        *count += 1;
        *count > 1
    }

    fn decrement(&mut self, position: Point3, amount: usize) {
        if amount == 0 {
            return;
        }
        let key = self.mapping.encode(position);
        if let Some(count) = self.occupancy.get_mut(&key) {
            *count = count.saturating_sub(amount);
            if *count == 0 {
                self.occupancy.remove(&key);
            }
        }
    }

    #[inline]
    fn assert_synced(&self) {
        assert!(
            self.synced,
            "CursorSet queried while out of sync; call sync() after unchecked writes"
        );
    }
}

/// 两个角点之间按格子步长展开的全部位置（含两端），以较小角点为起点。
pub fn rect_positions(cell_scale: f32, a: Point3, b: Point3) -> Vec<Point3> {
    let min_x = a.x().min(b.x());
    let min_y = a.y().min(b.y());
    let columns = ((a.x() - b.x()).abs() / cell_scale).round() as usize + 1;
    let rows = ((a.y() - b.y()).abs() / cell_scale).round() as usize + 1;

    let mut positions = Vec::with_capacity(columns * rows);
    for i in 0..columns {
        for j in 0..rows {
            positions.push(Point3::new(
                min_x + i as f32 * cell_scale,
                min_y + j as f32 * cell_scale,
                a.z(),
            ));
        }
    }
    positions
}

/// 整数误差的 Bresenham 光栅化（以格子为单位）。
///
/// 沿主轴逐格前进，副轴误差每步累加 `2 * minor`，超过 `major` 时副轴前进一格并
/// 减去 `2 * major`。包含起点、不含终点，起点与终点重合时返回空。
pub fn rasterize_line(cell_scale: f32, a: Point3, b: Point3) -> Vec<Point3> {
    let dx = ((b.x() - a.x()) / cell_scale).round() as i64;
    let dy = ((b.y() - a.y()) / cell_scale).round() as i64;
    let (major, minor) = (dx.abs().max(dy.abs()), dx.abs().min(dy.abs()));
    let x_major = dx.abs() >= dy.abs();
    let (step_x, step_y) = (dx.signum(), dy.signum());

    let mut positions = Vec::with_capacity(major as usize);
    let (mut x, mut y) = (0i64, 0i64);
    let mut error = 0i64;
    for _ in 0..major {
        positions.push(Point3::new(
            a.x() + x as f32 * cell_scale,
            a.y() + y as f32 * cell_scale,
            a.z(),
        ));
        if x_major {
            x += step_x;
        } else {
            y += step_y;
        }
        error += 2 * minor;
        if error > major {
            if x_major {
                y += step_y;
            } else {
                x += step_x;
            }
            error -= 2 * major;
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn unit_mapping() -> GridMapping {
        GridMapping::new(Vec2::ZERO, 1.0)
    }

    fn p(x: f32, y: f32) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    #[test]
    fn remove_duplicate_keeps_ignored_cursor() {
        let mut set = CursorSet::new(unit_mapping());
        set.add(Cursor::new(p(3.0, 3.0)));
        set.add(Cursor::new(p(3.0, 3.0)));
        assert!(set.is_duplicate(p(3.0, 3.0)));

        let removed = set.remove_duplicate(p(3.0, 3.0), Some(0));
        assert_eq!(removed, 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.occupancy(p(3.0, 3.0)), 1);
        assert!(!set.is_duplicate(p(3.0, 3.0)));
    }

    #[test]
    fn occupancy_ignores_z_and_sub_cell_offsets() {
        let mut set = CursorSet::new(unit_mapping());
        set.add(Cursor::new(Point3::new(1.2, 1.7, 0.0)));
        set.add(Cursor::new(Point3::new(1.0, 1.0, 5.0)));
        assert_eq!(set.occupancy(p(1.5, 1.5)), 2);
        assert!(!set.contains(p(2.0, 1.0)));
    }

    #[test]
    fn sync_rebuilds_counts_after_unchecked_writes() {
        let mut set = CursorSet::new(unit_mapping());
        set.add_unchecked(Cursor::new(p(0.0, 0.0)));
        set.add_unchecked(Cursor::new(p(0.0, 0.0)));
        set.add_unchecked(Cursor::new(p(2.0, 1.0)));
        assert!(!set.is_synced());
        set.sync();
        assert_eq!(set.occupancy(p(0.0, 0.0)), 2);
        assert_eq!(set.occupancy(p(2.0, 1.0)), 1);
        assert_eq!(set.occupancy(p(1.0, 1.0)), 0);
    }

    #[test]
    #[should_panic(expected = "out of sync")]
    fn query_without_sync_panics() {
        let mut set = CursorSet::new(unit_mapping());
        set.add_unchecked(Cursor::new(p(0.0, 0.0)));
        let _ = set.contains(p(0.0, 0.0));
    }

    #[test]
    fn checked_set_moves_occupancy() {
        let mut set = CursorSet::single(unit_mapping(), p(0.0, 0.0));
        set.set(0, Cursor::new(p(1.0, 0.0)));
        assert!(!set.contains(p(0.0, 0.0)));
        assert!(set.contains(p(1.0, 0.0)));
    }

    #[test]
    fn dedup_keeps_lowest_index() {
        let mut set = CursorSet::new(unit_mapping());
        set.add(Cursor::pinned(p(1.0, 1.0)));
        set.add(Cursor::new(p(2.0, 2.0)));
        set.add(Cursor::new(p(1.0, 1.0)));
        assert_eq!(set.dedup(), 1);
        assert_eq!(set.len(), 2);
        assert!(set.get(0).unwrap().pinned);
        assert_eq!(set.occupancy(p(1.0, 1.0)), 1);
    }

    #[test]
    fn rect_selection_is_inclusive_and_normalized() {
        let mut set = CursorSet::new(unit_mapping());
        let added = set.select_in_rect(p(3.0, 2.0), p(1.0, 0.0));
        assert_eq!(added, 9);
        assert!(set.contains(p(1.0, 0.0)));
        assert!(set.contains(p(3.0, 2.0)));
        assert!(!set.contains(p(0.0, 0.0)));
    }

    #[test]
    fn line_stops_one_cell_short() {
        let cells = rasterize_line(1.0, p(0.0, 0.0), p(4.0, 2.0));
        let coords: Vec<(f32, f32)> = cells.iter().map(|c| (c.x(), c.y())).collect();
        assert_eq!(
            coords,
            vec![(0.0, 0.0), (1.0, 0.0), (2.0, 1.0), (3.0, 1.0)]
        );
        assert!(rasterize_line(1.0, p(2.0, 2.0), p(2.0, 2.0)).is_empty());

        let steep = rasterize_line(1.0, p(0.0, 0.0), p(-1.0, -3.0));
        assert_eq!(steep.len(), 3);
        assert_eq!((steep[0].x(), steep[0].y()), (0.0, 0.0));
        assert_eq!((steep[2].x(), steep[2].y()), (-1.0, -2.0));
    }

    #[test]
    fn select_line_keeps_free_cursor_last() {
        let mut set = CursorSet::single(unit_mapping(), p(3.0, 0.0));
        let added = set.select_line(p(0.0, 0.0), p(3.0, 0.0));
        assert_eq!(added, 3);
        assert_eq!(set.len(), 4);
        assert!(!set.last().unwrap().pinned);
        assert_eq!(set.last().unwrap().position, p(3.0, 0.0));
        assert!(!set.is_duplicate(p(3.0, 0.0)));
    }

    #[test]
    fn flood_fill_visits_connected_matches_only() {
        // 3x3 区域内除中心外均匹配，(5, 5) 孤立匹配
        let accept = |index: GridIndex| {
            let inside = (0..3).contains(&index.x) && (0..3).contains(&index.y);
            (inside && index != GridIndex::new(1, 1)) || index == GridIndex::new(5, 5)
        };
        let mut set = CursorSet::single(unit_mapping(), p(0.0, 0.0));
        let added = set.flood_fill(p(0.0, 0.0), accept);
        assert_eq!(added, 7);
        assert_eq!(set.len(), 8);
        assert!(!set.contains(p(1.0, 1.0)));
        assert!(!set.contains(p(5.0, 5.0)));
    }
}
