use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::world::World;

/// User code run once per tick, gated by a 64-bit tick group.
///
/// Systems are registered by type and instantiated through `Default`.  `on_tick` runs inside a
/// fault boundary: a panic is caught and reported without skipping the systems after it.
pub trait System: 'static {
    /// The tick-mask gate; the system runs when `tick_group & mask != 0`.
    fn tick_group(&self) -> u64 {
        !0
    }

    fn on_create(&mut self, _world: &World) {}
    fn on_tick(&mut self, _world: &World) {}
    fn on_destroy(&mut self, _world: &World) {}
}

/// Raised for conflicting registration intent, e.g. registering a system twice or unregistering
/// one that is queued for addition during the frozen window.
#[derive(Debug, Error)]
pub enum SystemRegistrationError {
    #[error("system {0} is already registered")]
    AlreadyRegistered(&'static str),
    #[error("system {0} is already queued for registration")]
    AlreadyQueued(&'static str),
    #[error("system {0} is queued for removal")]
    QueuedForRemoval(&'static str),
    #[error("system {0} is queued for registration and cannot be removed yet")]
    QueuedForAddition(&'static str),
    #[error("system {0} is not registered")]
    NotRegistered(&'static str),
}

pub(crate) struct SystemEntry {
    type_id: TypeId,
    name: &'static str,
    cell: Rc<RefCell<dyn System>>,
    any: Rc<dyn Any>,
}

struct PendingAdd {
    type_id: TypeId,
    build: Box<dyn FnOnce() -> SystemEntry>,
}

/// Ordered system list with deferred registration during execution.
///
/// Between ticks the registry is mutable and registrations apply immediately.  While frozen
/// (from `freeze` until `unfreeze`, spanning a tick), registrations queue in an add set and
/// removals in a del set; the add set is flushed by the next `freeze`, the del set by
/// `unfreeze`.  Lifecycle hooks are run by the world after the registry borrow is released, so
/// the registry only hands the affected system cells back.
pub struct SystemRegistry {
    systems: Vec<SystemEntry>,
    frozen: bool,
    pending_add: Vec<PendingAdd>,
    pending_del: Vec<TypeId>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        SystemRegistry {
            systems: Vec::new(),
            frozen: false,
            pending_add: Vec::new(),
            pending_del: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn contains<S: System>(&self) -> bool {
        let type_id = TypeId::of::<S>();
        self.systems.iter().any(|entry| entry.type_id == type_id)
    }

    fn make_entry<S: System + Default>() -> SystemEntry {
        let cell: Rc<RefCell<S>> = Rc::new(RefCell::new(S::default()));
        SystemEntry {
            type_id: TypeId::of::<S>(),
            name: type_name::<S>(),
            any: cell.clone(),
            cell,
        }
    }

    /// Register `S`, instantiating it through `Default`.
    ///
    /// Returns the new system's cell for the `on_create` call when the registry is mutable, or
    /// `None` when the registration was queued for the next tick boundary.
    pub(crate) fn register<S: System + Default>(
        &mut self,
    ) -> Result<Option<Rc<RefCell<dyn System>>>, SystemRegistrationError> {
        let type_id = TypeId::of::<S>();
        let name = type_name::<S>();
        if self.systems.iter().any(|entry| entry.type_id == type_id) {
            return Err(SystemRegistrationError::AlreadyRegistered(name));
        }
        if self.pending_add.iter().any(|p| p.type_id == type_id) {
            return Err(SystemRegistrationError::AlreadyQueued(name));
        }
        if self.pending_del.contains(&type_id) {
            return Err(SystemRegistrationError::QueuedForRemoval(name));
        }

        if self.frozen {
            self.pending_add.push(PendingAdd {
                type_id,
                build: Box::new(Self::make_entry::<S>),
            });
            Ok(None)
        } else {
            let entry = Self::make_entry::<S>();
            let cell = entry.cell.clone();
            self.systems.push(entry);
            Ok(Some(cell))
        }
    }

    /// Unregister `S`.
    ///
    /// Returns the removed system's cell for the `on_destroy` call when the registry is mutable,
    /// or `None` when the removal was queued for the tick boundary.
    pub(crate) fn unregister<S: System>(
        &mut self,
    ) -> Result<Option<Rc<RefCell<dyn System>>>, SystemRegistrationError> {
        let type_id = TypeId::of::<S>();
        let name = type_name::<S>();
        if self.pending_add.iter().any(|p| p.type_id == type_id) {
            return Err(SystemRegistrationError::QueuedForAddition(name));
        }
        let at = match self.systems.iter().position(|entry| entry.type_id == type_id) {
            Some(at) => at,
            None => return Err(SystemRegistrationError::NotRegistered(name)),
        };

        if self.frozen {
            if self.pending_del.contains(&type_id) {
                return Err(SystemRegistrationError::QueuedForRemoval(name));
            }
            self.pending_del.push(type_id);
            Ok(None)
        } else {
            let entry = self.systems.remove(at);
            Ok(Some(entry.cell))
        }
    }

    /// Find a registered system by type.
    pub fn find<S: System>(&self) -> Option<Rc<RefCell<S>>> {
        let type_id = TypeId::of::<S>();
        let entry = self.systems.iter().find(|entry| entry.type_id == type_id)?;
        entry.any.clone().downcast::<RefCell<S>>().ok()
    }

    /// Enter the frozen window and flush the queued additions, returning the new cells in
    /// registration order for their `on_create` calls.
    pub(crate) fn freeze(&mut self) -> Vec<Rc<RefCell<dyn System>>> {
        self.frozen = true;
        let mut created = Vec::new();
        for pending in self.pending_add.drain(..) {
            let entry = (pending.build)();
            created.push(entry.cell.clone());
            self.systems.push(entry);
        }
        created
    }

    /// Leave the frozen window and apply the queued removals, returning the removed cells for
    /// their `on_destroy` calls.
    pub(crate) fn unfreeze(&mut self) -> Vec<Rc<RefCell<dyn System>>> {
        let mut removed = Vec::new();
        for type_id in std::mem::take(&mut self.pending_del) {
            if let Some(at) = self.systems.iter().position(|entry| entry.type_id == type_id) {
                removed.push(self.systems.remove(at).cell);
            }
        }
        self.frozen = false;
        removed
    }

    /// Snapshot of the systems in registration order, for execution outside the registry
    /// borrow.
    pub(crate) fn snapshot(&self) -> Vec<(&'static str, Rc<RefCell<dyn System>>)> {
        self.systems
            .iter()
            .map(|entry| (entry.name, entry.cell.clone()))
            .collect()
    }

    /// Remove every system, returning the cells in registration order.  Used by world shutdown.
    pub(crate) fn drain(&mut self) -> Vec<Rc<RefCell<dyn System>>> {
        self.pending_add.clear();
        self.pending_del.clear();
        self.frozen = false;
        self.systems.drain(..).map(|entry| entry.cell).collect()
    }
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}
