use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

struct ScopeInner {
    parent: Option<Scope>,
    contexts: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<Scope>>,
    mounted: Cell<bool>,
}

/// A node in the component tree. Values provided on a scope are visible to every
/// descendant; cleanups registered on it run when it unmounts.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                parent,
                contexts: RefCell::new(HashMap::new()),
                cleanups: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                mounted: Cell::new(true),
            }),
        }
    }

    pub fn child(&self) -> Scope {
        let child = Self::with_parent(Some(self.clone()));
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    pub fn provide<T: 'static>(&self, value: Rc<T>) {
        self.inner
            .contexts
            .borrow_mut()
            .insert(TypeId::of::<T>(), value);
    }

    /// Nearest value of type `T` provided on this scope or an ancestor.
    pub fn context<T: 'static>(&self) -> Option<Rc<T>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            let found = scope.inner.contexts.borrow().get(&TypeId::of::<T>()).cloned();
            if let Some(value) = found {
                return value.downcast::<T>().ok();
            }
            current = scope.inner.parent.as_ref();
        }
        None
    }

    pub fn on_unmount(&self, cleanup: impl FnOnce() + 'static) {
        if !self.is_mounted() {
            cleanup();
            return;
        }
        self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// Unmounts children first, then runs this scope's cleanups in reverse registration
    /// order. Unmounting twice is a no-op.
    pub fn unmount(&self) {
        if !self.inner.mounted.replace(false) {
            return;
        }
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in children.iter().rev() {
            child.unmount();
        }
        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        trace!(count = cleanups.len(), "running scope cleanups");
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        self.inner.contexts.borrow_mut().clear();
    }
}
