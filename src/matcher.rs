use std::{cell::RefCell, rc::Rc};

use hibitset::{BitSet, BitSetLike};

use crate::{
    entity::EntityGraph,
    registry::TagRegistry,
    store::{Component, EntityMask},
};

/// A pure predicate over an entity's mask and component type set.
///
/// `all` / `any` / `none` are disjoint sets of component tags; `mask` is a fast prefilter
/// (a matcher with a non-zero mask rejects any entity whose mask does not intersect it).
/// Matchers hold no entity list and keep no state between calls.
#[derive(Clone)]
pub struct Matcher {
    all: BitSet,
    any: BitSet,
    none: BitSet,
    mask: EntityMask,
    allow_empty: bool,
}

impl Matcher {
    pub fn mask(&self) -> EntityMask {
        self.mask
    }

    /// The mask prefilter on its own: false iff the matcher's mask is non-zero and disjoint from
    /// the entity's.
    pub fn prefilter(&self, entity_mask: EntityMask) -> bool {
        self.mask == 0 || self.mask & entity_mask != 0
    }

    /// Evaluate the predicate against an entity graph.
    ///
    /// `scratch` is the working tag set; it is cleared here, so callers can reuse one allocation
    /// across many evaluations.  An entity in its teardown window never matches.
    pub fn matches(&self, graph: &EntityGraph, scratch: &mut BitSet) -> bool {
        if !self.prefilter(graph.mask()) {
            return false;
        }
        if graph.wish_destroy() {
            return false;
        }
        if graph.components().is_empty() {
            return self.allow_empty && self.all.is_empty() && self.any.is_empty();
        }

        scratch.clear();
        let mut any_ok = false;
        for core in graph.components() {
            let tag = core.tag().index();
            if self.none.contains(tag) {
                return false;
            }
            if self.any.contains(tag) {
                any_ok = true;
            }
            scratch.add(tag);
        }

        if !(self.any.is_empty() || any_ok) {
            return false;
        }
        for tag in (&self.all).iter() {
            if !scratch.contains(tag) {
                return false;
            }
        }
        true
    }
}

/// Fluent builder for `Matcher`, handed out by the world so component tags resolve through the
/// shared tag registry.  The `of_*` accumulators are independent and may be chained in any
/// order.
pub struct MatcherBuilder {
    tags: Rc<RefCell<TagRegistry>>,
    all: BitSet,
    any: BitSet,
    none: BitSet,
    mask: EntityMask,
    allow_empty: bool,
}

impl MatcherBuilder {
    pub(crate) fn new(tags: Rc<RefCell<TagRegistry>>, mask: EntityMask) -> Self {
        MatcherBuilder {
            tags,
            all: BitSet::new(),
            any: BitSet::new(),
            none: BitSet::new(),
            mask,
            allow_empty: false,
        }
    }

    /// Require the entity to hold a component of type `C`.
    pub fn of_all<C: Component>(mut self) -> Self {
        let tag = self.tags.borrow_mut().tag_of::<C>();
        self.all.add(tag.index());
        self
    }

    /// Require the entity to hold at least one of the `of_any` types.
    pub fn of_any<C: Component>(mut self) -> Self {
        let tag = self.tags.borrow_mut().tag_of::<C>();
        self.any.add(tag.index());
        self
    }

    /// Reject any entity holding a component of type `C`.
    pub fn of_none<C: Component>(mut self) -> Self {
        let tag = self.tags.borrow_mut().tag_of::<C>();
        self.none.add(tag.index());
        self
    }

    /// Also match entities holding no components at all (only meaningful with empty `all` and
    /// `any` sets).
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    pub fn build(self) -> Matcher {
        Matcher {
            all: self.all,
            any: self.any,
            none: self.none,
            mask: self.mask,
            allow_empty: self.allow_empty,
        }
    }
}
