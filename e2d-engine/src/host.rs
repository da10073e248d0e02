use std::collections::HashMap;

use e2d_core::entity::{EntityId, Template, TemplateId, Transform};
use tracing::trace;

/// 渲染/场景层需要提供的实体生命周期接口。
///
/// 核心在 `EntityStore` 中保留一份变换与模板，用于网格簿记；复制与按模板选取
/// 以宿主的回答为准，宿主不认识的实体才回落到核心记录。
pub trait EntityHost {
    fn instantiate(
        &mut self,
        template: TemplateId,
        descriptor: &Template,
        transform: &Transform,
    ) -> EntityId;
    fn destroy(&mut self, entity: EntityId);
    fn set_active(&mut self, entity: EntityId, active: bool);
    fn set_transform(&mut self, entity: EntityId, transform: &Transform);
    fn get_transform(&self, entity: EntityId) -> Option<Transform>;
    fn find_template(&self, entity: EntityId) -> Option<TemplateId>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostEntity {
    pub template: TemplateId,
    pub name: String,
    pub transform: Transform,
    pub active: bool,
    /// 宿主自己的绘制顺序，接管场景时可用作分层依据。
    pub sort_order: i32,
}

/// 宿主场景中已经存在、可被文档接管的对象。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    pub entity: EntityId,
    pub template: TemplateId,
    pub transform: Transform,
    pub sort_order: i32,
}

/// 纯内存宿主，供测试与命令行前端使用。
#[derive(Debug, Default)]
pub struct MemoryHost {
    next_id: u64,
    entities: HashMap<EntityId, HostEntity>,
    destroyed: Vec<EntityId>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityId) -> Option<&HostEntity> {
        self.entities.get(&entity)
    }

    /// 尚未销毁的实体数量（含失活实体）。
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entities.values().filter(|entity| entity.active).count()
    }

    pub fn destroyed(&self) -> &[EntityId] {
        &self.destroyed
    }

    /// 绕过文档直接在场景里放一个对象，模拟编辑器启动前已存在的内容。
    pub fn spawn_scene_object(
        &mut self,
        template: TemplateId,
        name: impl Into<String>,
        transform: Transform,
        sort_order: i32,
    ) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        self.entities.insert(
            id,
            HostEntity {
                template,
                name: name.into(),
                transform,
                active: true,
                sort_order,
            },
        );
        id
    }

    /// 场景中全部激活对象，按实体编号排序。
    pub fn scene_objects(&self) -> Vec<SceneObject> {
        let mut objects: Vec<SceneObject> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.active)
            .map(|(id, entity)| SceneObject {
                entity: *id,
                template: entity.template,
                transform: entity.transform,
                sort_order: entity.sort_order,
            })
            .collect();
        objects.sort_by_key(|object| object.entity);
        objects
    }
}

impl EntityHost for MemoryHost {
    fn instantiate(
        &mut self,
        template: TemplateId,
        descriptor: &Template,
        transform: &Transform,
    ) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        let name = format!("{}_{:03X}", descriptor.name, id.get());
        trace!(entity = id.get(), name = %name, "宿主创建实体");
        self.entities.insert(
            id,
            HostEntity {
                template,
                name,
                transform: *transform,
                active: true,
                sort_order: 0,
            },
        );
        id
    }

    fn destroy(&mut self, entity: EntityId) {
        if self.entities.remove(&entity).is_some() {
            self.destroyed.push(entity);
        }
    }

    fn set_active(&mut self, entity: EntityId, active: bool) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.active = active;
        }
    }

    fn set_transform(&mut self, entity: EntityId, transform: &Transform) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.transform = *transform;
        }
    }

    fn get_transform(&self, entity: EntityId) -> Option<Transform> {
        self.entities.get(&entity).map(|record| record.transform)
    }

    fn find_template(&self, entity: EntityId) -> Option<TemplateId> {
        self.entities.get(&entity).map(|record| record.template)
    }
}
