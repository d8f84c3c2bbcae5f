use sprocket::{CollectFlags, Component, World};

#[derive(Default)]
struct Position(i32, i32);

impl Component for Position {}

#[derive(Default)]
struct Velocity(i32, i32);

impl Component for Velocity {}

#[test]
fn lazy_add_waits_for_change() {
    let world = World::new();
    world.startup().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::LAZY_ADD);

    let entity = world.create_entity(!0);
    entity.create_component::<Position>().unwrap();

    assert_eq!(collector.len(), 0);

    collector.change();
    assert_eq!(&*collector.collected(), &[entity.id()]);
    assert_eq!(&*collector.matching(), &[entity.id()]);
    assert!(collector.clashing().is_empty());
}

#[test]
fn lazy_remove_waits_for_change() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let position = entity.create_component::<Position>().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::LAZY_REMOVE);
    collector.change();
    assert_eq!(&*collector.collected(), &[entity.id()]);

    entity.destroy_component(&position).unwrap();

    // The removal is pending until the next change barrier.
    assert_eq!(&*collector.collected(), &[entity.id()]);

    collector.change();
    assert!(collector.collected().is_empty());
    assert_eq!(&*collector.clashing(), &[entity.id()]);
    assert!(collector.matching().is_empty());
}

#[test]
fn eager_collectors_track_immediately() {
    let world = World::new();
    world.startup().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::EAGER);

    let entity = world.create_entity(!0);
    let position = entity.create_component::<Position>().unwrap();
    assert_eq!(&*collector.collected(), &[entity.id()]);

    entity.destroy_component(&position).unwrap();
    assert!(collector.collected().is_empty());

    // The deltas are still published at the barrier; a same-generation add+remove cancels out.
    collector.change();
    assert!(collector.matching().is_empty());
    assert!(collector.clashing().is_empty());
}

#[test]
fn change_twice_is_idempotent() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    entity.create_component::<Position>().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::LAZY);

    collector.change();
    assert_eq!(&*collector.collected(), &[entity.id()]);
    assert_eq!(&*collector.matching(), &[entity.id()]);

    collector.change();
    assert_eq!(&*collector.collected(), &[entity.id()]);
    assert!(collector.matching().is_empty());
    assert!(collector.clashing().is_empty());
}

#[test]
fn collected_is_previous_plus_matching_minus_clashing() {
    let world = World::new();
    world.startup().unwrap();

    let keep = world.create_entity(!0);
    keep.create_component::<Position>().unwrap();
    let drop = world.create_entity(!0);
    let dropped_position = drop.create_component::<Position>().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::LAZY);
    collector.change();

    let previous: Vec<_> = collector.collected().to_vec();
    assert_eq!(previous.len(), 2);

    let add = world.create_entity(!0);
    add.create_component::<Position>().unwrap();
    drop.destroy_component(&dropped_position).unwrap();

    collector.change();

    let collected: Vec<_> = collector.collected().to_vec();
    let matching: Vec<_> = collector.matching().to_vec();
    let clashing: Vec<_> = collector.clashing().to_vec();

    assert_eq!(matching, vec![add.id()]);
    assert_eq!(clashing, vec![drop.id()]);
    assert!(matching.iter().all(|id| !clashing.contains(id)));

    let mut expected = previous;
    expected.extend(matching);
    expected.retain(|id| !clashing.contains(id));
    assert_eq!(collected, expected);
}

#[test]
fn seeding_produces_no_spurious_clashing() {
    let world = World::new();
    world.startup().unwrap();

    let unrelated = world.create_entity(!0);
    unrelated.create_component::<Velocity>().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::LAZY);
    collector.change();

    assert!(collector.collected().is_empty());
    assert!(collector.matching().is_empty());
    assert!(collector.clashing().is_empty());
}

#[test]
fn entity_destruction_leaves_collectors() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    entity.create_component::<Position>().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::EAGER);
    assert_eq!(collector.len(), 1);
    collector.change();

    world.destroy_entity(entity.id()).unwrap();
    assert_eq!(collector.len(), 0);

    collector.change();
    assert_eq!(&*collector.clashing(), &[entity.id()]);
}

#[test]
fn disposed_collectors_stop_updating() {
    let world = World::new();
    world.startup().unwrap();

    let matcher = world.matcher().of_all::<Position>().build();
    let collector = world.create_collector(matcher, CollectFlags::EAGER);

    collector.dispose();
    assert!(collector.is_disposed());

    let entity = world.create_entity(!0);
    entity.create_component::<Position>().unwrap();

    assert_eq!(collector.len(), 0);
    assert!(collector.collected().is_empty());
}
