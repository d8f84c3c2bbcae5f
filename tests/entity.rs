use std::{cell::RefCell, rc::Rc};

use sprocket::{Component, Entities, EntityId, World};

#[derive(Default)]
struct CA(i32);

impl Component for CA {}

#[derive(Default)]
struct CB(i32);

impl Component for CB {}

#[test]
fn ids_are_monotonic_from_one() {
    let mut entities = Entities::new();
    for expected in 1..=5u64 {
        let graph = entities.create(!0);
        assert_eq!(graph.borrow().id(), expected);
    }
    assert_eq!(entities.len(), 5);
}

#[test]
fn masks_are_assigned_at_creation() {
    let mut entities = Entities::new();
    let graph = entities.create(0b1010);
    assert_eq!(graph.borrow().mask(), 0b1010);
    assert!(!graph.borrow().wish_destroy());
    assert!(graph.borrow().components().is_empty());
}

#[test]
fn destroyed_handles_go_stale() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let id = entity.id();
    assert!(entity.is_valid());
    assert!(world.get_entity(id).is_some());

    world.destroy_entity(id).unwrap();
    assert!(!entity.is_valid());
    assert!(world.get_entity(id).is_none());
    assert!(entity.mask().is_err());
    assert!(entity.create_component::<CA>().is_err());
    assert!(world.destroy_entity(id).is_err());

    // Ids are never reused, even though graph objects are pooled.
    let next = world.create_entity(!0);
    assert!(next.id() > id);
}

#[test]
fn component_refs_know_their_entity() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let a = entity.create_component::<CA>().unwrap();
    let b = entity.create_component::<CB>().unwrap();

    assert_eq!(a.entity().unwrap(), entity.id());
    assert_eq!(b.entity().unwrap(), entity.id());
    assert_eq!(entity.component_count().unwrap(), 2);
}

#[test]
fn create_destroy_fires_one_signal_pair() {
    let world = World::new();
    world.startup().unwrap();

    let created = Rc::new(RefCell::new(Vec::new()));
    let removed = Rc::new(RefCell::new(Vec::new()));
    let c = created.clone();
    world
        .on_component_created()
        .add(move |event| c.borrow_mut().push(event.entity));
    let r = removed.clone();
    world
        .on_component_removed()
        .add(move |event| r.borrow_mut().push(event.entity));

    let entity = world.create_entity(!0);
    let a = entity.create_component::<CA>().unwrap();
    assert!(entity.has_component::<CA>());

    entity.destroy_component(&a).unwrap();
    assert!(!entity.has_component::<CA>());
    assert_eq!(entity.component_count().unwrap(), 0);

    assert_eq!(*created.borrow(), vec![entity.id()]);
    assert_eq!(*removed.borrow(), vec![entity.id()]);
}

#[test]
fn multiple_components_of_one_type() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let first = entity.create_component::<CA>().unwrap();
    let second = entity.create_component::<CA>().unwrap();
    first.with_mut(|a| a.0 = 1).unwrap();
    second.with_mut(|a| a.0 = 2).unwrap();

    let all = entity.get_components::<CA>().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].with(|a| a.0).unwrap(), 1);
    assert_eq!(all[1].with(|a| a.0).unwrap(), 2);

    // The typed single getter returns the first by insertion order.
    let got = entity.get_component::<CA>().unwrap().unwrap();
    assert_eq!(got.with(|a| a.0).unwrap(), 1);

    assert!(entity.destroy_component_of::<CA>().unwrap());
    let rest = entity.get_components::<CA>().unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].with(|a| a.0).unwrap(), 2);
}

#[test]
fn foreign_component_is_rejected() {
    let world = World::new();
    world.startup().unwrap();

    let owner = world.create_entity(!0);
    let other = world.create_entity(!0);
    let a = owner.create_component::<CA>().unwrap();

    assert!(matches!(
        other.destroy_component(&a),
        Err(sprocket::DestroyError::ForeignComponent(_))
    ));
    assert!(a.is_live());
    assert!(owner.destroy_component(&a).is_ok());
    assert!(!a.is_live());
}

thread_local! {
    static DEINITS: RefCell<Vec<EntityId>> = RefCell::new(Vec::new());
}

#[derive(Default)]
struct Tracked;

impl Component for Tracked {
    fn deinit(&mut self, entity: EntityId) {
        DEINITS.with(|log| log.borrow_mut().push(entity));
    }
}

#[test]
fn entity_teardown_destroys_each_component() {
    DEINITS.with(|log| log.borrow_mut().clear());

    let world = World::new();
    world.startup().unwrap();

    let removed = Rc::new(RefCell::new(0));
    let lost = Rc::new(RefCell::new(0));
    let r = removed.clone();
    world.on_component_removed().add(move |_| *r.borrow_mut() += 1);
    let l = lost.clone();
    world
        .on_entity_lost_component()
        .add(move |_| *l.borrow_mut() += 1);

    let entity = world.create_entity(!0);
    entity.create_component::<Tracked>().unwrap();
    entity.create_component::<Tracked>().unwrap();
    let id = entity.id();

    world.destroy_entity(id).unwrap();

    // Both components went through the registry (deinit + removal signal each), and the
    // teardown emitted a single lost-component event.
    DEINITS.with(|log| assert_eq!(*log.borrow(), vec![id, id]));
    assert_eq!(*removed.borrow(), 2);
    assert_eq!(*lost.borrow(), 1);
}

#[test]
fn componentless_sweep_respects_preservation() {
    let world = World::new();
    world.startup().unwrap();

    let kept = world.create_entity(!0);
    let swept = world.create_entity(!0);
    world.set_preserved(kept.id(), true);

    world.begin_tick().unwrap();
    let a = kept.create_component::<CA>().unwrap();
    let b = swept.create_component::<CA>().unwrap();
    kept.destroy_component(&a).unwrap();
    swept.destroy_component(&b).unwrap();
    world.end_tick().unwrap();

    assert!(kept.is_valid());
    assert!(!swept.is_valid());
}
