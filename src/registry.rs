use std::{
    any::{type_name, TypeId},
    cell::RefCell,
    rc::Rc,
};

use anymap::{any::Any, Map};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::store::{self, Component, Core, EntityId, ErasedStore, StoreCell};

/// Raised on typed access to a component whose stored type disagrees.
#[derive(Debug, Error)]
#[error("reference does not point to a live component of the requested type")]
pub struct TypeMismatch;

/// A stable, per-type small integer identifying a component type.
///
/// Tags are assigned sequentially by the `TagRegistry`, which makes them usable as `hibitset`
/// indexes in matchers.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ComponentTag(u32);

impl ComponentTag {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Assigns and resolves `ComponentTag`s for component types.
///
/// Shared between the component registry (stores advertise their tag) and matcher builders
/// (matchers hold sets of tags).
#[derive(Default)]
pub struct TagRegistry {
    tags: FxHashMap<TypeId, ComponentTag>,
    names: Vec<&'static str>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tag for `C`, assigning the next sequential tag on first use.
    pub fn tag_of<C: 'static>(&mut self) -> ComponentTag {
        let names = &mut self.names;
        *self.tags.entry(TypeId::of::<C>()).or_insert_with(|| {
            let tag = ComponentTag(names.len() as u32);
            names.push(type_name::<C>());
            tag
        })
    }

    /// The tag for `C`, if one has been assigned.
    pub fn get<C: 'static>(&self) -> Option<ComponentTag> {
        self.tags.get(&TypeId::of::<C>()).copied()
    }

    pub fn name(&self, tag: ComponentTag) -> &'static str {
        self.names.get(tag.0 as usize).copied().unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The component registry: a mapping from component type tag to that type's store.
///
/// Stores are owned here exclusively; everything else holds non-owning handles.  The registry
/// performs no signaling itself; creation and removal signals are emitted by the world after the
/// structural mutation completes, so that handlers may freely re-enter the registry.
pub struct Components {
    tags: Rc<RefCell<TagRegistry>>,
    erased: FxHashMap<ComponentTag, Rc<dyn ErasedStore>>,
    typed: Map<dyn Any>,
}

impl Components {
    pub fn new(tags: Rc<RefCell<TagRegistry>>) -> Self {
        Components {
            tags,
            erased: FxHashMap::default(),
            typed: Map::new(),
        }
    }

    /// The store for `C`, creating it when `create_if_absent` is set.
    pub fn store<C: Component>(&mut self, create_if_absent: bool) -> Option<Rc<StoreCell<C>>> {
        if let Some(cell) = self.typed.get::<Rc<StoreCell<C>>>() {
            return Some(cell.clone());
        }
        if !create_if_absent {
            return None;
        }
        let tag = self.tags.borrow_mut().tag_of::<C>();
        let cell = StoreCell::<C>::new(tag);
        self.erased.insert(tag, cell.clone() as Rc<dyn ErasedStore>);
        self.typed.insert::<Rc<StoreCell<C>>>(cell.clone());
        Some(cell)
    }

    /// The store for `C`, if it exists.
    pub fn get_store<C: Component>(&self) -> Option<Rc<StoreCell<C>>> {
        self.typed.get::<Rc<StoreCell<C>>>().cloned()
    }

    pub fn store_by_tag(&self, tag: ComponentTag) -> Option<Rc<dyn ErasedStore>> {
        self.erased.get(&tag).cloned()
    }

    pub fn all_stores(&self) -> impl Iterator<Item = &Rc<dyn ErasedStore>> {
        self.erased.values()
    }

    /// Allocate a component of type `C` for `entity`, returning the new core.
    pub fn create<C: Component>(&mut self, entity: EntityId) -> Rc<Core> {
        let cell = self.store::<C>(true).unwrap();
        cell.allocate(entity)
    }

    /// Destroy the component a core points at, forwarding to its owning store's `free`.
    ///
    /// Runs the value's `deinit` hook and compacts the store.  Returns the owning entity on
    /// success, or `None` for a tombstoned or otherwise dead core.
    pub fn destroy(&self, core: &Core) -> Option<EntityId> {
        store::free_core(core)
    }

    /// Like `destroy`, but additionally enforces that the core belongs to `C`'s store.
    pub fn destroy_typed<C: Component>(&self, core: &Core) -> Result<Option<EntityId>, TypeMismatch> {
        match core.locator() {
            Some(store) if store.as_any().downcast_ref::<StoreCell<C>>().is_some() => {
                Ok(store::free_core(core))
            }
            _ => Err(TypeMismatch),
        }
    }

    pub fn tag_registry(&self) -> &Rc<RefCell<TagRegistry>> {
        &self.tags
    }
}
