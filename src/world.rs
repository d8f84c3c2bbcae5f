use std::{
    any::type_name,
    cell::{Cell, RefCell},
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};

use anymap::{any::Any, Map};
use thiserror::Error;

use crate::{
    collector::{CollectFlags, Collector, CollectorEngine},
    entity::{Entities, EntityDestroyed, EntityGraph},
    matcher::{Matcher, MatcherBuilder},
    reference::{RawRef, Ref, ReferenceCut},
    registry::{Components, TagRegistry},
    signal::Signal,
    store::{self, Component, Core, EntityId, EntityMask},
    system::{System, SystemRegistrationError, SystemRegistry},
};

/// The world's lifecycle phase.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Phase {
    Created,
    Ready,
    Ticking,
    Destroyed,
}

/// Raised when a world operation is attempted from the wrong phase.
#[derive(Debug, Error)]
#[error("world is {actual:?} but the operation requires {required:?}")]
pub struct InvalidState {
    pub required: Phase,
    pub actual: Phase,
}

/// Raised when destroying a component through a sibling entity's handle.
#[derive(Debug, Error)]
#[error("component does not belong to this entity")]
pub struct ForeignComponent;

/// Failure modes of destroying a component through an entity handle.
#[derive(Debug, Error)]
pub enum DestroyError {
    #[error(transparent)]
    EntityDestroyed(#[from] EntityDestroyed),
    #[error(transparent)]
    ForeignComponent(#[from] ForeignComponent),
    #[error(transparent)]
    ReferenceCut(#[from] ReferenceCut),
}

/// Payload of the component-created and component-removed signals.
pub struct ComponentEvent {
    pub core: Rc<Core>,
    pub entity: EntityId,
}

/// Payload of the entity got-component and lost-component signals.
pub struct EntityEvent {
    pub graph: Rc<RefCell<EntityGraph>>,
}

/// Payload of the system-begin and system-end signals.
pub struct SystemEvent {
    pub name: &'static str,
}

/// Plugin lifecycle, for user managers installed into the world before startup.
pub trait Manager: 'static {
    fn on_manager_created(&mut self, _world: &World) {}
    fn on_world_started(&mut self, _world: &World) {}
    fn on_world_ended(&mut self, _world: &World) {}
    fn on_manager_destroyed(&mut self, _world: &World) {}
}

struct ManagerSet {
    typed: Map<dyn Any>,
    ordered: Vec<Rc<RefCell<dyn Manager>>>,
}

impl ManagerSet {
    fn new() -> Self {
        ManagerSet {
            typed: Map::new(),
            ordered: Vec::new(),
        }
    }

    fn insert<M: Manager>(&mut self, manager: M) {
        let cell = Rc::new(RefCell::new(manager));
        self.typed.insert::<Rc<RefCell<M>>>(cell.clone());
        self.ordered.push(cell);
    }

    fn get<M: Manager>(&self) -> Option<Rc<RefCell<M>>> {
        self.typed.get::<Rc<RefCell<M>>>().cloned()
    }

    fn snapshot(&self) -> Vec<Rc<RefCell<dyn Manager>>> {
        self.ordered.clone()
    }
}

/// The composition root: entity registry, component registry, collector engine, and system
/// scheduler, wired together with an explicit signal topology.
///
/// All subsystems use interior mutability, so the whole public surface works through `&World`;
/// the world itself is single-threaded.
///
/// The tick phase machine is `Created -> Ready <-> Ticking -> Destroyed`; operations invoked
/// from the wrong phase fail with `InvalidState`.
pub struct World {
    tags: Rc<RefCell<TagRegistry>>,
    components: Rc<RefCell<Components>>,
    entities: Rc<RefCell<Entities>>,
    collectors: Rc<RefCell<CollectorEngine>>,
    systems: RefCell<SystemRegistry>,
    managers: RefCell<ManagerSet>,
    phase: Cell<Phase>,
    tick_count: Cell<u64>,

    component_created: Rc<Signal<ComponentEvent>>,
    component_removed: Rc<Signal<ComponentEvent>>,
    entity_got_component: Rc<Signal<EntityEvent>>,
    entity_lost_component: Rc<Signal<EntityEvent>>,
    system_begin: Rc<Signal<SystemEvent>>,
    system_end: Rc<Signal<SystemEvent>>,
}

impl World {
    pub fn new() -> Self {
        let tags = Rc::new(RefCell::new(TagRegistry::new()));
        World {
            components: Rc::new(RefCell::new(Components::new(tags.clone()))),
            tags,
            entities: Rc::new(RefCell::new(Entities::new())),
            collectors: Rc::new(RefCell::new(CollectorEngine::new())),
            systems: RefCell::new(SystemRegistry::new()),
            managers: RefCell::new(ManagerSet::new()),
            phase: Cell::new(Phase::Created),
            tick_count: Cell::new(0),

            component_created: Rc::new(Signal::new("component-created")),
            component_removed: Rc::new(Signal::new("component-removed")),
            entity_got_component: Rc::new(Signal::new("entity-got-component")),
            entity_lost_component: Rc::new(Signal::new("entity-lost-component")),
            system_begin: Rc::new(Signal::new("system-begin")),
            system_end: Rc::new(Signal::new("system-end")),
        }
    }

    fn guard(&self, required: Phase) -> Result<(), InvalidState> {
        let actual = self.phase.get();
        if actual == required {
            Ok(())
        } else {
            Err(InvalidState { required, actual })
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn ready(&self) -> bool {
        self.phase.get() == Phase::Ready
    }

    pub fn ticking(&self) -> bool {
        self.phase.get() == Phase::Ticking
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.get()
    }

    /// Wire the signal topology, boot the managers, and enter `Ready`.
    ///
    /// Only valid from `Created`.
    pub fn startup(&self) -> Result<(), InvalidState> {
        self.guard(Phase::Created)?;

        // component-created feeds the entity registry, which forwards as got-component.
        let entities = self.entities.clone();
        let got = self.entity_got_component.clone();
        self.component_created.add(move |event: &ComponentEvent| {
            let graph = entities.borrow_mut().attach(event.entity, event.core.clone());
            if let Some(graph) = graph {
                got.emit(&EntityEvent { graph });
            }
        });

        // component-removed feeds the entity registry, which forwards as lost-component.
        let entities = self.entities.clone();
        let lost = self.entity_lost_component.clone();
        self.component_removed.add(move |event: &ComponentEvent| {
            let graph = entities.borrow_mut().detach(event.entity, &event.core);
            if let Some(graph) = graph {
                lost.emit(&EntityEvent { graph });
            }
        });

        // got/lost-component feed the collector engine.
        let collectors = self.collectors.clone();
        self.entity_got_component.add(move |event: &EntityEvent| {
            collectors.borrow_mut().entity_changed(&event.graph);
        });
        let collectors = self.collectors.clone();
        self.entity_lost_component.add(move |event: &EntityEvent| {
            collectors.borrow_mut().entity_changed(&event.graph);
        });

        let managers = self.managers.borrow().snapshot();
        for manager in &managers {
            manager.borrow_mut().on_manager_created(self);
        }
        for manager in &managers {
            manager.borrow_mut().on_world_started(self);
        }

        self.phase.set(Phase::Ready);
        Ok(())
    }

    /// Tear the world down.  Only valid from `Ready`; shutting down mid-tick is forbidden.
    pub fn shutdown(&self) -> Result<(), InvalidState> {
        self.guard(Phase::Ready)?;

        let removed = self.systems.borrow_mut().drain();
        for cell in removed {
            cell.borrow_mut().on_destroy(self);
        }

        let managers = self.managers.borrow().snapshot();
        for manager in &managers {
            manager.borrow_mut().on_world_ended(self);
        }
        for manager in &managers {
            manager.borrow_mut().on_manager_destroyed(self);
        }

        self.entities.borrow_mut().release_all();
        self.phase.set(Phase::Destroyed);
        Ok(())
    }

    /// Open a tick window: bump the tick counter and flush system registrations queued during
    /// the previous tick.  Only valid from `Ready`.
    pub fn begin_tick(&self) -> Result<(), InvalidState> {
        self.guard(Phase::Ready)?;
        self.tick_count.set(self.tick_count.get() + 1);
        self.phase.set(Phase::Ticking);

        let created = self.systems.borrow_mut().freeze();
        for cell in created {
            cell.borrow_mut().on_create(self);
        }
        Ok(())
    }

    /// Run every system whose tick group intersects `mask`, in registration order.
    ///
    /// May be called several times per tick window.  A panicking system is reported and the
    /// remaining systems still run.
    pub fn tick(&self, mask: u64) -> Result<(), InvalidState> {
        self.guard(Phase::Ticking)?;

        let systems = self.systems.borrow().snapshot();
        for (name, cell) in systems {
            let gated = cell.borrow().tick_group() & mask != 0;
            if !gated {
                continue;
            }
            self.system_begin.emit(&SystemEvent { name });
            if catch_unwind(AssertUnwindSafe(|| cell.borrow_mut().on_tick(self))).is_err() {
                log::error!("system {} panicked during on_tick, continuing", name);
            }
            self.system_end.emit(&SystemEvent { name });
        }
        Ok(())
    }

    /// Close the tick window: apply queued system removals and sweep componentless entities.
    /// Only valid from `Ticking`.
    pub fn end_tick(&self) -> Result<(), InvalidState> {
        self.guard(Phase::Ticking)?;

        let removed = self.systems.borrow_mut().unfreeze();
        for cell in removed {
            cell.borrow_mut().on_destroy(self);
        }

        let release = self.entities.borrow_mut().take_release_set();
        for id in release {
            let collectable = {
                let entities = self.entities.borrow();
                match entities.get(id) {
                    Some(graph) => {
                        graph.borrow().components().is_empty() && !entities.is_preserved(id)
                    }
                    None => false,
                }
            };
            if collectable {
                let _ = self.destroy_entity(id);
            }
        }

        self.phase.set(Phase::Ready);
        Ok(())
    }

    /// Run one full `begin_tick -> tick(mask) -> end_tick` cycle.
    pub fn tick_cycle(&self, mask: u64) -> Result<(), InvalidState> {
        self.begin_tick()?;
        self.tick(mask)?;
        self.end_tick()
    }

    fn assert_started(&self) {
        let phase = self.phase.get();
        assert!(
            phase == Phase::Ready || phase == Phase::Ticking,
            "world has not been started"
        );
    }

    /// Create an entity with the given mask.
    ///
    /// # Panics
    /// Panics if the world has not been started or the entity id space is exhausted.
    pub fn create_entity(&self, mask: EntityMask) -> Entity {
        self.assert_started();
        let graph = self.entities.borrow_mut().create(mask);
        let id = graph.borrow().id();
        Entity { world: self, id }
    }

    pub fn get_entity(&self, id: EntityId) -> Option<Entity> {
        if self.entities.borrow().contains(id) {
            Some(Entity { world: self, id })
        } else {
            None
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.borrow().len()
    }

    /// Destroy an entity: each held component is destroyed through the component registry (so
    /// per-component `deinit` hooks and removal signals fire), then a single lost-component
    /// event is emitted and the graph returns to its pool.
    pub fn destroy_entity(&self, id: EntityId) -> Result<(), EntityDestroyed> {
        let graph = self
            .entities
            .borrow_mut()
            .begin_destroy(id)
            .ok_or(EntityDestroyed)?;

        let cores: Vec<Rc<Core>> = graph.borrow().components().to_vec();
        for core in &cores {
            if let Some(entity) = store::free_core(core) {
                self.component_removed.emit(&ComponentEvent {
                    core: core.clone(),
                    entity,
                });
            }
        }

        self.entity_lost_component.emit(&EntityEvent {
            graph: graph.clone(),
        });
        self.entities.borrow_mut().finish_destroy(graph);
        Ok(())
    }

    /// A preserved entity survives the componentless sweep at `end_tick`.
    pub fn set_preserved(&self, id: EntityId, preserved: bool) {
        self.entities.borrow_mut().set_preserved(id, preserved);
    }

    /// A matcher builder with no mask prefilter.
    pub fn matcher(&self) -> MatcherBuilder {
        MatcherBuilder::new(self.tags.clone(), 0)
    }

    /// A matcher builder prefiltering on the given entity mask.
    pub fn matcher_with_mask(&self, mask: EntityMask) -> MatcherBuilder {
        MatcherBuilder::new(self.tags.clone(), mask)
    }

    /// Create a collector for the matcher, seeded from the existing entities.
    pub fn create_collector(&self, matcher: Matcher, flags: CollectFlags) -> Collector {
        let entities = self.entities.borrow();
        let state = self
            .collectors
            .borrow_mut()
            .register(matcher, flags, entities.iter());
        Collector::new(state, Rc::downgrade(&self.collectors))
    }

    /// Register the system type `S`; it is instantiated through `Default`.
    ///
    /// During a tick the registration is queued and becomes visible at the next `begin_tick`.
    pub fn register_system<S: System + Default>(&self) -> Result<(), SystemRegistrationError> {
        let created = self.systems.borrow_mut().register::<S>()?;
        if let Some(cell) = created {
            cell.borrow_mut().on_create(self);
        }
        Ok(())
    }

    /// Unregister the system type `S`.  During a tick the removal is queued and applies at
    /// `end_tick`.
    pub fn unregister_system<S: System>(&self) -> Result<(), SystemRegistrationError> {
        let removed = self.systems.borrow_mut().unregister::<S>()?;
        if let Some(cell) = removed {
            cell.borrow_mut().on_destroy(self);
        }
        Ok(())
    }

    pub fn find_system<S: System>(&self) -> Option<Rc<RefCell<S>>> {
        self.systems.borrow().find::<S>()
    }

    /// Install a user manager.  Only valid before startup.
    pub fn insert_manager<M: Manager>(&self, manager: M) -> Result<(), InvalidState> {
        self.guard(Phase::Created)?;
        self.managers.borrow_mut().insert(manager);
        Ok(())
    }

    /// Fetch an installed manager.
    ///
    /// # Panics
    /// Panics if no manager of type `M` was installed.
    pub fn manager<M: Manager>(&self) -> Rc<RefCell<M>> {
        match self.managers.borrow().get::<M>() {
            Some(manager) => manager,
            None => panic!("no such manager {:?}", type_name::<M>()),
        }
    }

    pub fn on_component_created(&self) -> &Signal<ComponentEvent> {
        &self.component_created
    }

    pub fn on_component_removed(&self) -> &Signal<ComponentEvent> {
        &self.component_removed
    }

    pub fn on_entity_got_component(&self) -> &Signal<EntityEvent> {
        &self.entity_got_component
    }

    pub fn on_entity_lost_component(&self) -> &Signal<EntityEvent> {
        &self.entity_lost_component
    }

    pub fn on_system_begin(&self) -> &Signal<SystemEvent> {
        &self.system_begin
    }

    pub fn on_system_end(&self) -> &Signal<SystemEvent> {
        &self.system_end
    }

    fn create_component_on<C: Component>(&self, entity: EntityId) -> Rc<Core> {
        // Take the store handle first so no registry borrow is held while the component-created
        // handlers run.
        let cell = {
            let mut components = self.components.borrow_mut();
            components.store::<C>(true).unwrap()
        };
        let core = cell.allocate(entity);
        self.component_created.emit(&ComponentEvent {
            core: core.clone(),
            entity,
        });
        core
    }

    /// Destroy the component a core points at and emit the removal signal.
    pub fn destroy_component_core(&self, core: &Rc<Core>) -> bool {
        match store::free_core(core) {
            Some(entity) => {
                self.component_removed.emit(&ComponentEvent {
                    core: core.clone(),
                    entity,
                });
                true
            }
            None => false,
        }
    }

    /// Destroy the component behind a typeless reference.
    pub fn destroy_component_raw(&self, reference: &RawRef) -> bool {
        self.destroy_component_core(reference.core())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// A lightweight handle to an entity: the world plus the entity id.
///
/// Handles stay copyable after the entity dies; every operation re-validates and fails with
/// `EntityDestroyed` on a stale handle.
#[derive(Copy, Clone)]
pub struct Entity<'w> {
    world: &'w World,
    id: EntityId,
}

impl<'w> Entity<'w> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn world(&self) -> &'w World {
        self.world
    }

    pub fn is_valid(&self) -> bool {
        self.world.entities.borrow().contains(self.id)
    }

    pub fn mask(&self) -> Result<EntityMask, EntityDestroyed> {
        let graph = self.graph()?;
        let mask = graph.borrow().mask();
        Ok(mask)
    }

    /// Create a component of type `C` on this entity, returning a typed reference to it.
    pub fn create_component<C: Component>(&self) -> Result<Ref<C>, EntityDestroyed> {
        if !self.is_valid() {
            return Err(EntityDestroyed);
        }
        let core = self.world.create_component_on::<C>(self.id);
        Ok(Ref::from_core(core))
    }

    /// The first component of type `C` on this entity, if any.
    pub fn get_component<C: Component>(&self) -> Result<Option<Ref<C>>, EntityDestroyed> {
        let graph = self.graph()?;
        let tag = match self.world.tags.borrow().get::<C>() {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let core = graph
            .borrow()
            .components()
            .iter()
            .find(|core| core.tag() == tag)
            .cloned();
        Ok(core.map(Ref::from_core))
    }

    /// Every component of type `C` on this entity, in insertion order.
    pub fn get_components<C: Component>(&self) -> Result<Vec<Ref<C>>, EntityDestroyed> {
        let graph = self.graph()?;
        let tag = match self.world.tags.borrow().get::<C>() {
            Some(tag) => tag,
            None => return Ok(Vec::new()),
        };
        let refs = graph
            .borrow()
            .components()
            .iter()
            .filter(|core| core.tag() == tag)
            .cloned()
            .map(Ref::from_core)
            .collect();
        Ok(refs)
    }

    pub fn has_component<C: Component>(&self) -> bool {
        match self.get_component::<C>() {
            Ok(found) => found.is_some(),
            Err(_) => false,
        }
    }

    pub fn component_count(&self) -> Result<usize, EntityDestroyed> {
        let graph = self.graph()?;
        let count = graph.borrow().components().len();
        Ok(count)
    }

    /// Destroy the referenced component, which must belong to this entity.
    pub fn destroy_component<C: Component>(&self, reference: &Ref<C>) -> Result<(), DestroyError> {
        if !self.is_valid() {
            return Err(EntityDestroyed.into());
        }
        let owner = reference.entity()?;
        if owner != self.id {
            return Err(ForeignComponent.into());
        }
        if self.world.destroy_component_core(reference.core()) {
            Ok(())
        } else {
            Err(ReferenceCut.into())
        }
    }

    /// Destroy the first component of type `C` on this entity, returning whether one existed.
    pub fn destroy_component_of<C: Component>(&self) -> Result<bool, EntityDestroyed> {
        match self.get_component::<C>()? {
            Some(reference) => Ok(self.world.destroy_component_core(reference.core())),
            None => Ok(false),
        }
    }

    /// Destroy this entity.
    pub fn destroy(&self) -> Result<(), EntityDestroyed> {
        self.world.destroy_entity(self.id)
    }

    fn graph(&self) -> Result<Rc<RefCell<EntityGraph>>, EntityDestroyed> {
        self.world.entities.borrow().get(self.id).ok_or(EntityDestroyed)
    }
}
