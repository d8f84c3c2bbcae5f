use std::{
    cell::{Ref, RefCell},
    mem,
    ops::BitOr,
    rc::{Rc, Weak},
};

use hibitset::BitSet;
use rustc_hash::FxHashSet;

use crate::{entity::EntityGraph, matcher::Matcher, store::EntityId};

/// Flags controlling when collector membership changes land in `collected`.
///
/// With the default (eager) flags, membership updates are applied immediately; the lazy flags
/// defer adds and/or removes until the next `change` barrier.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct CollectFlags(u8);

impl CollectFlags {
    pub const EAGER: CollectFlags = CollectFlags(0);
    pub const LAZY_ADD: CollectFlags = CollectFlags(1);
    pub const LAZY_REMOVE: CollectFlags = CollectFlags(2);
    pub const LAZY: CollectFlags = CollectFlags(3);

    pub fn lazy_add(self) -> bool {
        self.0 & Self::LAZY_ADD.0 != 0
    }

    pub fn lazy_remove(self) -> bool {
        self.0 & Self::LAZY_REMOVE.0 != 0
    }
}

impl BitOr for CollectFlags {
    type Output = CollectFlags;

    fn bitor(self, rhs: CollectFlags) -> CollectFlags {
        CollectFlags(self.0 | rhs.0)
    }
}

fn insert(buf: &mut Vec<EntityId>, id: EntityId) {
    if !buf.contains(&id) {
        buf.push(id);
    }
}

fn remove(buf: &mut Vec<EntityId>, id: EntityId) -> bool {
    if let Some(at) = buf.iter().position(|&held| held == id) {
        buf.remove(at);
        true
    } else {
        false
    }
}

pub(crate) struct CollectorState {
    matcher: Matcher,
    flags: CollectFlags,
    collected: Vec<EntityId>,
    matching: Vec<EntityId>,
    clashing: Vec<EntityId>,
    pending_matching: Vec<EntityId>,
    pending_clashing: Vec<EntityId>,
    disposed: bool,
}

impl CollectorState {
    fn new(matcher: Matcher, flags: CollectFlags) -> Self {
        CollectorState {
            matcher,
            flags,
            collected: Vec::new(),
            matching: Vec::new(),
            clashing: Vec::new(),
            pending_matching: Vec::new(),
            pending_clashing: Vec::new(),
            disposed: false,
        }
    }

    /// Whether the entity currently counts as a member, taking the pending buffers into account
    /// for the lazy flags.
    fn is_member(&self, id: EntityId) -> bool {
        if self.flags.lazy_remove() && self.pending_clashing.contains(&id) {
            return false;
        }
        if self.collected.contains(&id) {
            return true;
        }
        self.flags.lazy_add() && self.pending_matching.contains(&id)
    }

    /// Apply one observed entity change.
    fn entity_changed(&mut self, graph: &EntityGraph, scratch: &mut BitSet) {
        if !self.matcher.prefilter(graph.mask()) {
            return;
        }
        let matched = !graph.wish_destroy() && self.matcher.matches(graph, scratch);
        let id = graph.id();
        let already = self.is_member(id);
        if matched == already {
            return;
        }

        if matched {
            if !self.flags.lazy_add() {
                insert(&mut self.collected, id);
            }
            // A pending removal is cancelled rather than producing a spurious add.
            if !remove(&mut self.pending_clashing, id) {
                insert(&mut self.pending_matching, id);
            }
        } else {
            if !self.flags.lazy_remove() {
                remove(&mut self.collected, id);
            }
            if !remove(&mut self.pending_matching, id) {
                insert(&mut self.pending_clashing, id);
            }
        }
    }

    /// Rotate generations: publish the pending buffers as `matching` / `clashing` and fold them
    /// into `collected` for the lazy flags.
    fn change(&mut self) {
        mem::swap(&mut self.matching, &mut self.pending_matching);
        mem::swap(&mut self.clashing, &mut self.pending_clashing);
        self.pending_matching.clear();
        self.pending_clashing.clear();

        if self.flags.lazy_remove() && !self.clashing.is_empty() {
            let clashing: FxHashSet<EntityId> = self.clashing.iter().copied().collect();
            self.collected.retain(|id| !clashing.contains(id));
        }
        if self.flags.lazy_add() {
            for &id in &self.matching {
                insert(&mut self.collected, id);
            }
        }
    }

    fn dispose(&mut self) {
        self.collected.clear();
        self.matching.clear();
        self.clashing.clear();
        self.pending_matching.clear();
        self.pending_clashing.clear();
        self.disposed = true;
    }
}

/// Maintains every collector incrementally from entity change events.
pub struct CollectorEngine {
    collectors: Vec<Rc<RefCell<CollectorState>>>,
    scratch: BitSet,
}

impl CollectorEngine {
    pub fn new() -> Self {
        CollectorEngine {
            collectors: Vec::new(),
            scratch: BitSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Register a collector, seeding it from the existing entities.
    ///
    /// Seeding runs the regular change transition for every entity, so an eager collector is
    /// populated immediately and the first `change` reports the seed as `matching`; entities
    /// that never matched produce no clashing entries.
    pub(crate) fn register<'a>(
        &mut self,
        matcher: Matcher,
        flags: CollectFlags,
        existing: impl Iterator<Item = &'a Rc<RefCell<EntityGraph>>>,
    ) -> Rc<RefCell<CollectorState>> {
        let state = Rc::new(RefCell::new(CollectorState::new(matcher, flags)));
        {
            let mut s = state.borrow_mut();
            for graph in existing {
                s.entity_changed(&graph.borrow(), &mut self.scratch);
            }
        }
        self.collectors.push(state.clone());
        state
    }

    fn unregister(&mut self, state: &Rc<RefCell<CollectorState>>) {
        self.collectors.retain(|held| !Rc::ptr_eq(held, state));
    }

    /// Re-evaluate every collector against an entity whose component set changed.
    pub fn entity_changed(&mut self, graph: &Rc<RefCell<EntityGraph>>) {
        // Snapshot so a handler creating or disposing collectors cannot invalidate the walk.
        let collectors = self.collectors.clone();
        let g = graph.borrow();
        for state in &collectors {
            state.borrow_mut().entity_changed(&g, &mut self.scratch);
        }
    }
}

impl Default for CollectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A pre-filtered entity set maintained by the collector engine for one matcher.
///
/// `collected` is the currently-visible membership; `matching` and `clashing` are the deltas
/// from the previous generation and stay stable until the next `change` call.
pub struct Collector {
    state: Rc<RefCell<CollectorState>>,
    engine: Weak<RefCell<CollectorEngine>>,
}

impl Collector {
    pub(crate) fn new(
        state: Rc<RefCell<CollectorState>>,
        engine: Weak<RefCell<CollectorEngine>>,
    ) -> Self {
        Collector { state, engine }
    }

    /// The currently-visible members in collection order.
    ///
    /// The borrow must be released before anything structurally mutates entities, or the
    /// engine's update will hit a borrow conflict; copy the slice out first when in doubt.
    pub fn collected(&self) -> Ref<[EntityId]> {
        Ref::map(self.state.borrow(), |s| s.collected.as_slice())
    }

    /// Entities that entered membership in the previous generation.
    pub fn matching(&self) -> Ref<[EntityId]> {
        Ref::map(self.state.borrow(), |s| s.matching.as_slice())
    }

    /// Entities that left membership in the previous generation.
    pub fn clashing(&self) -> Ref<[EntityId]> {
        Ref::map(self.state.borrow(), |s| s.clashing.as_slice())
    }

    pub fn len(&self) -> usize {
        self.state.borrow().collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().collected.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.state.borrow().collected.contains(&id)
    }

    pub fn flags(&self) -> CollectFlags {
        self.state.borrow().flags
    }

    /// Flip generations: publish pending membership changes and expose the new deltas.
    pub fn change(&self) {
        self.state.borrow_mut().change();
    }

    /// Clear all buffers and unregister from the engine.
    pub fn dispose(&self) {
        self.state.borrow_mut().dispose();
        if let Some(engine) = self.engine.upgrade() {
            engine.borrow_mut().unregister(&self.state);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }
}
