use sprocket::{Component, World};

#[derive(Default, Clone, Debug, PartialEq)]
struct CA(i32);

impl Component for CA {}

#[derive(Default)]
struct CB(i32);

impl Component for CB {}

#[test]
fn typed_access_round_trip() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let a = entity.create_component::<CA>().unwrap();

    a.with_mut(|value| value.0 = 5).unwrap();
    assert_eq!(a.with(|value| value.0).unwrap(), 5);
    assert_eq!(a.cloned().unwrap(), CA(5));

    let old = a.replace(CA(9)).unwrap();
    assert_eq!(old, CA(5));
    assert_eq!(a.cloned().unwrap(), CA(9));
}

#[test]
fn raw_refs_narrow_back_to_their_type() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let a = entity.create_component::<CA>().unwrap();
    a.with_mut(|value| value.0 = 3).unwrap();

    let raw = a.raw();
    assert!(raw.is_live());
    assert_eq!(raw.entity().unwrap(), entity.id());
    assert_eq!(raw.tag(), a.tag());

    let again = raw.typed::<CA>().unwrap();
    assert_eq!(again.with(|value| value.0).unwrap(), 3);

    assert!(raw.typed::<CB>().is_err());
}

#[test]
fn cut_references_fail_every_access() {
    let world = World::new();
    world.startup().unwrap();

    let entity = world.create_entity(!0);
    let a = entity.create_component::<CA>().unwrap();
    let raw = a.raw();

    entity.destroy_component(&a).unwrap();

    assert!(!a.is_live());
    assert!(a.entity().is_err());
    assert!(a.with(|_| ()).is_err());
    assert!(a.with_mut(|_| ()).is_err());
    assert!(a.replace(CA(1)).is_err());
    assert!(!raw.is_live());
    assert!(raw.entity().is_err());

    // Destroying through a cut reference is a no-op.
    assert!(!world.destroy_component_raw(&raw));
}

#[test]
fn references_do_not_keep_the_world_alive() {
    let a;
    {
        let world = World::new();
        world.startup().unwrap();
        let entity = world.create_entity(!0);
        a = entity.create_component::<CA>().unwrap();
        assert!(a.is_live());
    }

    // The stores died with the world; the reference reports a cut instead of dangling.
    assert!(!a.is_live());
    assert!(a.with(|_| ()).is_err());
}
