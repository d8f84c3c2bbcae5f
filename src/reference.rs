use std::{marker::PhantomData, rc::Rc};

use thiserror::Error;

use crate::{
    registry::{ComponentTag, TypeMismatch},
    store::{Component, Core, EntityId, StoreCell},
};

/// Raised on access through a reference whose slot has been freed or re-versioned.
#[derive(Debug, Error)]
#[error("component reference is no longer live")]
pub struct ReferenceCut;

/// A typeless reference to a stored component.
///
/// Carries the shared core and nothing else; the liveness check runs on every access.
#[derive(Clone)]
pub struct RawRef {
    core: Rc<Core>,
}

impl RawRef {
    pub(crate) fn new(core: Rc<Core>) -> RawRef {
        RawRef { core }
    }

    pub fn tag(&self) -> ComponentTag {
        self.core.tag()
    }

    pub fn is_live(&self) -> bool {
        self.core.is_live()
    }

    pub fn entity(&self) -> Result<EntityId, ReferenceCut> {
        self.core.entity().ok_or(ReferenceCut)
    }

    /// Narrow to a typed reference, verifying the owning store actually stores `C`.
    pub fn typed<C: Component>(&self) -> Result<Ref<C>, TypeMismatch> {
        match self.core.locator() {
            Some(store) if store.as_any().downcast_ref::<StoreCell<C>>().is_some() => {
                Ok(Ref::from_core(self.core.clone()))
            }
            _ => Err(TypeMismatch),
        }
    }

    pub(crate) fn core(&self) -> &Rc<Core> {
        &self.core
    }
}

/// A typed reference to a stored component.
///
/// Value access is closure-scoped so the underlying store borrow is released as soon as the
/// closure returns; holding it across a structural mutation of the same store is a borrow error.
pub struct Ref<C: Component> {
    core: Rc<Core>,
    marker: PhantomData<C>,
}

impl<C: Component> Clone for Ref<C> {
    fn clone(&self) -> Self {
        Ref::from_core(self.core.clone())
    }
}

impl<C: Component> Ref<C> {
    pub(crate) fn from_core(core: Rc<Core>) -> Ref<C> {
        Ref {
            core,
            marker: PhantomData,
        }
    }

    pub fn tag(&self) -> ComponentTag {
        self.core.tag()
    }

    pub fn is_live(&self) -> bool {
        self.core.is_live()
    }

    pub fn entity(&self) -> Result<EntityId, ReferenceCut> {
        self.core.entity().ok_or(ReferenceCut)
    }

    /// Run `f` with shared access to the component value.
    ///
    /// # Panics
    /// Panics if the owning store is already borrowed mutably.
    pub fn with<R>(&self, f: impl FnOnce(&C) -> R) -> Result<R, ReferenceCut> {
        let erased = self.core.locator().ok_or(ReferenceCut)?;
        let store = erased
            .as_any()
            .downcast_ref::<StoreCell<C>>()
            .ok_or(ReferenceCut)?;
        let inner = store.borrow();
        if !inner.is_live(self.core.offset(), self.core.version()) {
            return Err(ReferenceCut);
        }
        match inner.get(self.core.offset()) {
            Some(value) => Ok(f(value)),
            None => Err(ReferenceCut),
        }
    }

    /// Run `f` with exclusive access to the component value.
    ///
    /// # Panics
    /// Panics if the owning store is already borrowed.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ReferenceCut> {
        let erased = self.core.locator().ok_or(ReferenceCut)?;
        let store = erased
            .as_any()
            .downcast_ref::<StoreCell<C>>()
            .ok_or(ReferenceCut)?;
        let mut inner = store.borrow_mut();
        if !inner.is_live(self.core.offset(), self.core.version()) {
            return Err(ReferenceCut);
        }
        match inner.get_mut(self.core.offset()) {
            Some(value) => Ok(f(value)),
            None => Err(ReferenceCut),
        }
    }

    pub fn cloned(&self) -> Result<C, ReferenceCut>
    where
        C: Clone,
    {
        self.with(|value| value.clone())
    }

    /// Replace the component value, returning the previous one.
    pub fn replace(&self, value: C) -> Result<C, ReferenceCut> {
        self.with_mut(move |slot| std::mem::replace(slot, value))
    }

    pub fn raw(&self) -> RawRef {
        RawRef::new(self.core.clone())
    }

    pub(crate) fn core(&self) -> &Rc<Core> {
        &self.core
    }
}
