use std::sync::Arc;

/// A class, module or plain object known to the object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The slice of the object model the scope chain depends on.
pub trait ObjectModel {
    /// The class used for lookups on `entity`: its singleton class when one
    /// exists, the shared class otherwise.
    fn class_of(&self, entity: EntityId) -> EntityId;

    /// The singleton class of `entity`, created on first request.
    fn singleton_class(&mut self, entity: EntityId) -> EntityId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Class,
    Module,
    Object,
    Singleton { attached: EntityId },
}

#[derive(Debug, Clone)]
struct Entity {
    name: Arc<str>,
    kind: EntityKind,
    class: EntityId,
    singleton: Option<EntityId>,
}

/// Minimal class table: enough object model to drive scope resolution from
/// the demo binary and the tests.
#[derive(Debug, Clone)]
pub struct EntityTable {
    entities: Vec<Entity>,
}

impl EntityTable {
    pub const OBJECT: EntityId = EntityId(0);
    pub const MODULE: EntityId = EntityId(1);
    pub const CLASS: EntityId = EntityId(2);

    pub fn new() -> Self {
        let bootstrap = |name: &str| Entity {
            name: Arc::from(name),
            kind: EntityKind::Class,
            class: Self::CLASS,
            singleton: None,
        };
        Self {
            entities: vec![
                bootstrap("Object"),
                bootstrap("Module"),
                bootstrap("Class"),
            ],
        }
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(entity);
        id
    }

    pub fn define_class(&mut self, name: &str) -> EntityId {
        self.insert(Entity {
            name: Arc::from(name),
            kind: EntityKind::Class,
            class: Self::CLASS,
            singleton: None,
        })
    }

    pub fn define_module(&mut self, name: &str) -> EntityId {
        self.insert(Entity {
            name: Arc::from(name),
            kind: EntityKind::Module,
            class: Self::MODULE,
            singleton: None,
        })
    }

    pub fn new_object(&mut self, class: EntityId) -> EntityId {
        let name = format!("#<{}>", self.name(class));
        self.insert(Entity {
            name: Arc::from(name),
            kind: EntityKind::Object,
            class,
            singleton: None,
        })
    }

    pub fn name(&self, id: EntityId) -> &str {
        &self.entities[id.index()].name
    }

    pub fn kind(&self, id: EntityId) -> EntityKind {
        self.entities[id.index()].kind
    }

    pub fn singleton_of(&self, id: EntityId) -> Option<EntityId> {
        self.entities[id.index()].singleton
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectModel for EntityTable {
    fn class_of(&self, entity: EntityId) -> EntityId {
        let entry = &self.entities[entity.index()];
        entry.singleton.unwrap_or(entry.class)
    }

    fn singleton_class(&mut self, entity: EntityId) -> EntityId {
        if let Some(singleton) = self.singleton_of(entity) {
            return singleton;
        }
        let name = format!("#<Class:{}>", self.name(entity));
        let singleton = self.insert(Entity {
            name: Arc::from(name),
            kind: EntityKind::Singleton { attached: entity },
            class: Self::CLASS,
            singleton: None,
        });
        self.entities[entity.index()].singleton = Some(singleton);
        singleton
    }
}
