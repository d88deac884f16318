//! Synchronous, in-process pub/sub keyed by event type.
//!
//! Each event is a marker type implementing [`Event`], which fixes its payload type, so
//! listeners never see a payload of the wrong shape. Everything is single-threaded: listeners
//! run on the caller's stack, in registration order.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use tracing::error;

pub trait Event: 'static {
    const NAME: &'static str;
    type Payload: 'static;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle returned by every `on*` registration. Calling it removes the registration.
///
/// Dropping it without calling leaves the listener in place.
#[must_use = "dropping an Unsubscribe keeps the listener registered"]
pub struct Unsubscribe {
    id: Option<ListenerId>,
    run: Option<Box<dyn FnOnce()>>,
}

impl Unsubscribe {
    pub fn new(run: impl FnOnce() + 'static) -> Self {
        Self {
            id: None,
            run: Some(Box::new(run)),
        }
    }

    pub fn noop() -> Self {
        Self { id: None, run: None }
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.id
    }

    pub fn call(mut self) {
        if let Some(run) = self.run.take() {
            run();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("pending", &self.run.is_some())
            .finish()
    }
}

type Listener<P> = Rc<dyn Fn(&P)>;

struct Entry {
    id: ListenerId,
    callback: Box<dyn Any>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    events: HashMap<TypeId, Vec<Entry>>,
}

/// Clone-cheap emitter; clones share listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Rc<RefCell<Registry>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<E: Event>(&self, callback: impl Fn(&E::Payload) + 'static) -> Unsubscribe {
        let listener: Listener<E::Payload> = Rc::new(callback);
        let id = {
            let mut registry = self.inner.borrow_mut();
            registry.next_id += 1;
            let id = ListenerId(registry.next_id);
            registry
                .events
                .entry(TypeId::of::<E>())
                .or_default()
                .push(Entry {
                    id,
                    callback: Box::new(listener),
                });
            id
        };
        let weak: Weak<RefCell<Registry>> = Rc::downgrade(&self.inner);
        Unsubscribe {
            id: Some(id),
            run: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove(&inner, TypeId::of::<E>(), Some(id));
                }
            })),
        }
    }

    /// Removes one listener, or every listener for `E` when `id` is `None`.
    pub fn off<E: Event>(&self, id: Option<ListenerId>) {
        remove(&self.inner, TypeId::of::<E>(), id);
    }

    pub fn emit<E: Event>(&self, payload: &E::Payload) {
        // Snapshot so listeners may subscribe or unsubscribe while we iterate.
        let listeners: Vec<Listener<E::Payload>> = {
            let registry = self.inner.borrow();
            let Some(entries) = registry.events.get(&TypeId::of::<E>()) else {
                return;
            };
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .callback
                        .downcast_ref::<Listener<E::Payload>>()
                        .cloned()
                })
                .collect()
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                error!(event = E::NAME, "event listener panicked");
            }
        }
    }

    pub fn listener_count<E: Event>(&self) -> usize {
        self.inner
            .borrow()
            .events
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn remove_all_listeners(&self) {
        self.inner.borrow_mut().events.clear();
    }
}

fn remove(inner: &RefCell<Registry>, event: TypeId, id: Option<ListenerId>) {
    let mut registry = inner.borrow_mut();
    match id {
        Some(id) => {
            if let Some(entries) = registry.events.get_mut(&event) {
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    registry.events.remove(&event);
                }
            }
        }
        None => {
            registry.events.remove(&event);
        }
    }
}
