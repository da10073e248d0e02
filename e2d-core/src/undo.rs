use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityRecord, EntityStore, Transform};
use crate::errors::UndoError;

/// 默认历史容量。超过容量后最旧的帧被覆盖，且不可恢复。
pub const DEFAULT_UNDO_CAPACITY: usize = 1024;

/// 帧序号，随 `push_frame` 单调递增，可用于查询某帧是否仍可取回。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 实体在变更之前的状态快照。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UndoState {
    pub entity: EntityId,
    pub transform: Transform,
    pub alive: bool,
}

impl UndoState {
    pub fn capture(entity: EntityId, record: &EntityRecord) -> Self {
        Self {
            entity,
            transform: record.transform,
            alive: record.is_alive(),
        }
    }
}

/// 一次逻辑操作对应的快照组，撤销时整体回退。
#[derive(Debug, Clone)]
pub struct UndoFrame {
    id: FrameId,
    layer: usize,
    states: Vec<UndoState>,
    registered: HashSet<EntityId>,
    created: Instant,
}

impl UndoFrame {
    fn new(id: FrameId, layer: usize) -> Self {
        Self {
            id,
            layer,
            states: Vec::new(),
            registered: HashSet::new(),
            created: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[inline]
    pub fn layer(&self) -> usize {
        self.layer
    }

    /// 按登记顺序排列的快照。
    #[inline]
    pub fn states(&self) -> &[UndoState] {
        &self.states
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// 形如 `3 changes; 2 seconds ago` 的说明文字。
    pub fn summary(&self) -> String {
        let plural = if self.states.len() == 1 { "" } else { "s" };
        format!(
            "{} change{plural}; {}",
            self.states.len(),
            describe_age(self.age())
        )
    }
}

/// 100 秒以内以秒计，否则以 `HH:MM:SS` 表示经过时间。
pub fn describe_age(age: Duration) -> String {
    let seconds = age.as_secs();
    if seconds < 100 {
        let plural = if seconds == 1 { "" } else { "s" };
        format!("{seconds} second{plural} ago")
    } else {
        format!(
            "{:02}:{:02}:{:02} ago",
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        )
    }
}

/// 固定容量的环形撤销栈。
#[derive(Debug, Clone)]
pub struct UndoLog {
    frames: Vec<Option<UndoFrame>>,
    head: usize,
    depth: usize,
    next_id: u64,
    /// 最近一次压栈所覆盖的槽位内容，供 `discard_frame` 放回。
    displaced: Option<(FrameId, Option<UndoFrame>)>,
}

impl UndoLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: (0..capacity).map(|_| None).collect(),
            head: 0,
            depth: 0,
            next_id: 0,
            displaced: None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// 当前可撤销的帧数。
    #[inline]
    pub fn len(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// 压入一帧。缓冲区写满后覆盖最旧的帧。
    pub fn push_frame(&mut self, layer: usize) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        let replaced = self.frames[self.head].replace(UndoFrame::new(id, layer));
        self.displaced = Some((id, replaced));
        self.head = (self.head + 1) % self.capacity();
        self.depth = (self.depth + 1).min(self.capacity());
        id
    }

    /// 取出最近的帧（LIFO）。为空时返回 `None`。
    pub fn pop_frame(&mut self) -> Option<UndoFrame> {
        if self.depth == 0 {
            return None;
        }
        self.displaced = None;
        self.head = (self.head + self.capacity() - 1) % self.capacity();
        self.depth -= 1;
        self.frames[self.head].take()
    }

    /// 撤回刚压入的帧 `id`，并放回它覆盖掉的旧帧，栈恢复到压栈之前的样子。
    ///
    /// `id` 不是最近一次压入的栈顶帧时不做任何事，返回 `None`。
    pub fn discard_frame(&mut self, id: FrameId) -> Option<UndoFrame> {
        if self.current().map(UndoFrame::id) != Some(id) {
            return None;
        }
        let (pushed, replaced) = self.displaced.take()?;
        if pushed != id {
            return None;
        }
        self.head = (self.head + self.capacity() - 1) % self.capacity();
        let discarded = std::mem::replace(&mut self.frames[self.head], replaced);
        if self.frames[self.head].is_none() {
            self.depth -= 1;
        }
        discarded
    }

    #[inline]
    pub fn current(&self) -> Option<&UndoFrame> {
        if self.depth == 0 {
            return None;
        }
        let top = (self.head + self.capacity() - 1) % self.capacity();
        self.frames[top].as_ref()
    }

    /// 向栈顶帧登记一个快照。同一实体在同一帧内只保留第一次登记的状态。
    /// 返回是否实际追加。
    pub fn register_state(&mut self, state: UndoState) -> Result<bool, UndoError> {
        if self.depth == 0 {
            return Err(UndoError::MissingFrame);
        }
        let top = (self.head + self.capacity() - 1) % self.capacity();
        let Some(frame) = self.frames[top].as_mut() else {
            return Err(UndoError::MissingFrame);
        };
        if !frame.registered.insert(state.entity) {
            return Ok(false);
        }
        frame.states.push(state);
        Ok(true)
    }

    /// 从实体表读取当前状态并登记；未知实体直接忽略。
    pub fn register(&mut self, entity: EntityId, store: &EntityStore) -> Result<bool, UndoError> {
        if self.depth == 0 {
            return Err(UndoError::MissingFrame);
        }
        match store.get(entity) {
            Some(record) => self.register_state(UndoState::capture(entity, record)),
            None => Ok(false),
        }
    }

    /// 指定帧是否仍在栈中（既未被弹出，也未被环绕覆盖）。
    pub fn is_retrievable(&self, id: FrameId) -> bool {
        (1..=self.depth).any(|offset| {
            let index = (self.head + self.capacity() - offset) % self.capacity();
            self.frames[index]
                .as_ref()
                .is_some_and(|frame| frame.id == id)
        })
    }

    pub fn clear(&mut self) {
        for frame in &mut self.frames {
            *frame = None;
        }
        self.head = 0;
        self.depth = 0;
        self.displaced = None;
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Lifecycle, TemplateId};
    use crate::geometry::Point3;

    fn store_with(id: EntityId, x: f32) -> EntityStore {
        let mut store = EntityStore::new();
        store.insert(
            id,
            EntityRecord {
                template: TemplateId::new(0),
                layer: 0,
                transform: Transform::at(Point3::new(x, 0.0, 0.0)),
                lifecycle: Lifecycle::Active,
            },
        );
        store
    }

    #[test]
    fn register_without_frame_is_an_error() {
        let mut log = UndoLog::new(4);
        let id = EntityId::new(1);
        let store = store_with(id, 0.0);
        assert_eq!(log.register(id, &store), Err(UndoError::MissingFrame));
    }

    #[test]
    fn frames_pop_in_lifo_order() {
        let mut log = UndoLog::new(4);
        let first = log.push_frame(0);
        let second = log.push_frame(1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.pop_frame().map(|f| f.id()), Some(second));
        assert_eq!(log.pop_frame().map(|f| (f.id(), f.layer())), Some((first, 0)));
        assert!(log.pop_frame().is_none());
    }

    #[test]
    fn wraparound_evicts_oldest_frames() {
        let mut log = UndoLog::new(3);
        let ids: Vec<FrameId> = (0..5).map(|layer| log.push_frame(layer)).collect();
        assert_eq!(log.len(), 3);
        assert!(!log.is_retrievable(ids[0]));
        assert!(!log.is_retrievable(ids[1]));
        assert!(log.is_retrievable(ids[2]));
        assert!(log.is_retrievable(ids[4]));

        let popped: Vec<usize> = std::iter::from_fn(|| log.pop_frame().map(|f| f.layer())).collect();
        assert_eq!(popped, vec![4, 3, 2]);
        assert!(!log.is_retrievable(ids[4]));
    }

    #[test]
    fn discarding_on_a_full_ring_restores_the_evicted_frame() {
        let mut log = UndoLog::new(2);
        let first = log.push_frame(0);
        let second = log.push_frame(1);
        let speculative = log.push_frame(2);
        assert!(!log.is_retrievable(first));

        let discarded = log.discard_frame(speculative).unwrap();
        assert_eq!(discarded.id(), speculative);
        assert_eq!(log.len(), 2);
        assert!(log.is_retrievable(first));
        assert!(log.is_retrievable(second));

        let popped: Vec<FrameId> = std::iter::from_fn(|| log.pop_frame().map(|f| f.id())).collect();
        assert_eq!(popped, vec![second, first]);
    }

    #[test]
    fn discarding_below_capacity_shrinks_the_log() {
        let mut log = UndoLog::new(4);
        let first = log.push_frame(0);
        let speculative = log.push_frame(0);
        assert!(log.discard_frame(first).is_none());
        assert!(log.discard_frame(speculative).is_some());
        assert_eq!(log.len(), 1);
        assert!(log.discard_frame(speculative).is_none());
        assert_eq!(log.current().map(|f| f.id()), Some(first));
    }

    #[test]
    fn only_first_registration_per_frame_is_kept() {
        let mut log = UndoLog::default();
        let id = EntityId::new(3);
        let mut store = store_with(id, 1.0);
        log.push_frame(0);
        assert_eq!(log.register(id, &store), Ok(true));
        store.set_transform(id, Transform::at(Point3::new(2.0, 0.0, 0.0)));
        assert_eq!(log.register(id, &store), Ok(false));

        let frame = log.pop_frame().unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.states()[0].transform.position.x(), 1.0);
        assert!(frame.states()[0].alive);
    }

    #[test]
    fn age_description_switches_to_clock_format() {
        assert_eq!(describe_age(Duration::from_secs(1)), "1 second ago");
        assert_eq!(describe_age(Duration::from_secs(42)), "42 seconds ago");
        assert_eq!(describe_age(Duration::from_secs(3725)), "01:02:05 ago");
    }
}
