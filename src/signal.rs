use std::{
    cell::{Cell, RefCell},
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};

/// Token returned from `Signal::add`, used to remove the handler again.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct HandlerId(u64);

struct Handler<A> {
    id: HandlerId,
    order: i32,
    f: Rc<dyn Fn(&A)>,
}

/// An ordered, synchronous signal.
///
/// Handlers run in ascending `order`, ties keeping registration order.  Emission iterates a
/// snapshot of the handler list, so a handler may add or remove handlers (or emit the same signal
/// again) without invalidating the iteration.
///
/// A panicking handler is caught and reported through `log`, and the remaining handlers still
/// run.
pub struct Signal<A> {
    name: &'static str,
    handlers: RefCell<Vec<Handler<A>>>,
    next_id: Cell<u64>,
}

impl<A> Signal<A> {
    pub fn new(name: &'static str) -> Self {
        Signal {
            name,
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add a handler with order 0.
    pub fn add(&self, f: impl Fn(&A) + 'static) -> HandlerId {
        self.add_with_order(0, f)
    }

    /// Add a handler with an explicit order.
    ///
    /// Lower orders run first; handlers with equal order run in the order they were added.
    pub fn add_with_order(&self, order: i32, f: impl Fn(&A) + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let mut handlers = self.handlers.borrow_mut();
        let at = handlers
            .iter()
            .position(|h| h.order > order)
            .unwrap_or(handlers.len());
        handlers.insert(
            at,
            Handler {
                id,
                order,
                f: Rc::new(f),
            },
        );
        id
    }

    /// Remove a previously added handler, returning whether it was present.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        if let Some(at) = handlers.iter().position(|h| h.id == id) {
            handlers.remove(at);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    /// Emit to every handler in order.
    pub fn emit(&self, arg: &A) {
        let snapshot: Vec<Rc<dyn Fn(&A)>> =
            self.handlers.borrow().iter().map(|h| h.f.clone()).collect();
        for f in snapshot {
            if catch_unwind(AssertUnwindSafe(|| f(arg))).is_err() {
                log::error!("handler for signal {:?} panicked, continuing", self.name);
            }
        }
    }
}
