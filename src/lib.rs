pub mod collector;
pub mod entity;
pub mod matcher;
pub mod reference;
pub mod registry;
pub mod signal;
pub mod store;
pub mod system;
pub mod world;

pub use collector::{CollectFlags, Collector, CollectorEngine};
pub use entity::{Entities, EntityDestroyed, EntityGraph};
pub use matcher::{Matcher, MatcherBuilder};
pub use reference::{RawRef, Ref, ReferenceCut};
pub use registry::{ComponentTag, Components, TagRegistry, TypeMismatch};
pub use signal::{HandlerId, Signal};
pub use store::{
    Component, Core, EntityId, EntityMask, ErasedStore, Store, StoreCell, NULL_ENTITY,
};
pub use system::{System, SystemRegistrationError, SystemRegistry};
pub use world::{
    ComponentEvent, DestroyError, Entity, EntityEvent, ForeignComponent, InvalidState, Manager,
    Phase, SystemEvent, World,
};
