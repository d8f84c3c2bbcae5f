use std::{cell::RefCell, rc::Rc};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::store::{Core, EntityId, EntityMask, NULL_ENTITY};

/// Raised when an entity handle is used after the entity was destroyed.
#[derive(Debug, Error)]
#[error("entity has been destroyed")]
pub struct EntityDestroyed;

/// Per-entity record: identity, mask, and the insertion-ordered component handles.
///
/// `wish_destroy` is set only during the teardown window so that matchers see a
/// destroyed-but-still-reachable entity as non-matching.  Graphs are pooled; a graph returned to
/// the pool is fully reset before reuse.
pub struct EntityGraph {
    id: EntityId,
    mask: EntityMask,
    components: Vec<Rc<Core>>,
    wish_destroy: bool,
}

impl EntityGraph {
    fn new() -> Self {
        EntityGraph {
            id: NULL_ENTITY,
            mask: 0,
            components: Vec::new(),
            wish_destroy: false,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn mask(&self) -> EntityMask {
        self.mask
    }

    pub fn wish_destroy(&self) -> bool {
        self.wish_destroy
    }

    /// The held component cores in insertion order.
    pub fn components(&self) -> &[Rc<Core>] {
        &self.components
    }

    fn reset(&mut self) {
        self.id = NULL_ENTITY;
        self.mask = 0;
        self.components.clear();
        self.wish_destroy = false;
    }
}

/// Free-list of graph objects.  `get` resets the returned graph, `release` does not.
struct GraphPool {
    free: Vec<Rc<RefCell<EntityGraph>>>,
}

impl GraphPool {
    fn new() -> Self {
        GraphPool { free: Vec::new() }
    }

    fn get(&mut self) -> Rc<RefCell<EntityGraph>> {
        match self.free.pop() {
            Some(graph) => {
                graph.borrow_mut().reset();
                graph
            }
            None => Rc::new(RefCell::new(EntityGraph::new())),
        }
    }

    fn release(&mut self, graph: Rc<RefCell<EntityGraph>>) {
        self.free.push(graph);
    }

    fn clear(&mut self) {
        self.free.clear();
    }
}

/// The entity registry: monotonic id allocation and the id -> graph index.
///
/// Destruction is orchestrated by the world (components must be destroyed through the component
/// registry so their `deinit` hooks and removal signals fire); this type provides the two halves
/// of that protocol, `begin_destroy` and `finish_destroy`.
pub struct Entities {
    counter: EntityId,
    index: FxHashMap<EntityId, Rc<RefCell<EntityGraph>>>,
    pool: GraphPool,
    preserved: FxHashSet<EntityId>,
    release_set: Vec<EntityId>,
}

impl Entities {
    pub fn new() -> Self {
        Entities {
            counter: NULL_ENTITY,
            index: FxHashMap::default(),
            pool: GraphPool::new(),
            preserved: FxHashSet::default(),
            release_set: Vec::new(),
        }
    }

    /// Allocate a fresh entity with the given mask.
    ///
    /// # Panics
    /// Panics if the id counter is exhausted.
    pub fn create(&mut self, mask: EntityMask) -> Rc<RefCell<EntityGraph>> {
        self.counter = self
            .counter
            .checked_add(1)
            .expect("no entity id left to allocate");
        let id = self.counter;

        let graph = self.pool.get();
        {
            let mut g = graph.borrow_mut();
            g.id = id;
            g.mask = mask;
        }
        self.index.insert(id, graph.clone());
        graph
    }

    pub fn get(&self, id: EntityId) -> Option<Rc<RefCell<EntityGraph>>> {
        self.index.get(&id).cloned()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<RefCell<EntityGraph>>> {
        self.index.values()
    }

    /// First half of destruction: unindex the graph and flag it so matchers reject it.
    pub(crate) fn begin_destroy(&mut self, id: EntityId) -> Option<Rc<RefCell<EntityGraph>>> {
        let graph = self.index.remove(&id)?;
        graph.borrow_mut().wish_destroy = true;
        self.preserved.remove(&id);
        Some(graph)
    }

    /// Second half of destruction: return the graph to the pool.
    pub(crate) fn finish_destroy(&mut self, graph: Rc<RefCell<EntityGraph>>) {
        self.pool.release(graph);
    }

    /// Component-add hook: append the core to the owning graph, returning it for the
    /// got-component signal.  Returns `None` for an unindexed entity.
    pub(crate) fn attach(
        &mut self,
        entity: EntityId,
        core: Rc<Core>,
    ) -> Option<Rc<RefCell<EntityGraph>>> {
        let graph = self.index.get(&entity)?.clone();
        graph.borrow_mut().components.push(core);
        Some(graph)
    }

    /// Component-remove hook: drop the core from the owning graph, returning it for the
    /// lost-component signal.  A graph left componentless and not preserved is scheduled for the
    /// release sweep.  Returns `None` for an unindexed entity (the teardown window).
    pub(crate) fn detach(
        &mut self,
        entity: EntityId,
        core: &Rc<Core>,
    ) -> Option<Rc<RefCell<EntityGraph>>> {
        let graph = self.index.get(&entity)?.clone();
        let emptied = {
            let mut g = graph.borrow_mut();
            g.components.retain(|held| !Rc::ptr_eq(held, core));
            g.components.is_empty()
        };
        if emptied && !self.preserved.contains(&entity) && !self.release_set.contains(&entity) {
            self.release_set.push(entity);
        }
        Some(graph)
    }

    /// Toggle preservation: a preserved entity is never auto-collected when its last component is
    /// removed.
    pub fn set_preserved(&mut self, id: EntityId, preserved: bool) {
        if preserved {
            self.preserved.insert(id);
        } else {
            self.preserved.remove(&id);
        }
    }

    pub fn is_preserved(&self, id: EntityId) -> bool {
        self.preserved.contains(&id)
    }

    /// Drain the ids scheduled for the componentless sweep.  The caller gets its own copy, so
    /// handlers running during the sweep may schedule further releases.
    pub(crate) fn take_release_set(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.release_set)
    }

    /// Drop all pooled graphs and the index.  Used by world shutdown.
    pub(crate) fn release_all(&mut self) {
        self.index.clear();
        self.preserved.clear();
        self.release_set.clear();
        self.pool.clear();
    }
}

impl Default for Entities {
    fn default() -> Self {
        Self::new()
    }
}
