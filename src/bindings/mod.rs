//! Component-tree bindings over [`ChatbotSdk`](crate::sdk::ChatbotSdk).
//!
//! Each binding is mounted into a [`Scope`], publishes what a view needs through a
//! `tokio::sync::watch` channel and releases every subscription it created when the scope
//! unmounts.

mod actions;
mod controls;
mod hook;
mod provider;
mod scope;
mod widget;

pub use actions::AiActions;
pub use controls::ChatbotControls;
pub use hook::ChatbotHook;
pub use provider::{ChatbotProvider, ProviderCallbacks, use_chatbot_context};
pub use scope::Scope;
pub use widget::{WidgetMount, WidgetProps, is_embedded_mode};

use crate::emitter::Unsubscribe;
use crate::error::SdkError;
use crate::sdk::ChatbotSdk;
use crate::types::WidgetState;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Error,
}

/// What lifecycle bindings expose to views.
#[derive(Clone)]
pub struct LifecycleSnapshot {
    pub sdk: Option<Rc<ChatbotSdk>>,
    pub initialized: bool,
    pub loading: bool,
    pub error: Option<SdkError>,
    pub state: WidgetState,
    pub phase: LoadPhase,
}

impl Default for LifecycleSnapshot {
    fn default() -> Self {
        Self {
            sdk: None,
            initialized: false,
            loading: false,
            error: None,
            state: WidgetState::default(),
            phase: LoadPhase::Idle,
        }
    }
}

impl std::fmt::Debug for LifecycleSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSnapshot")
            .field("has_sdk", &self.sdk.is_some())
            .field("initialized", &self.initialized)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .field("state", &self.state)
            .field("phase", &self.phase)
            .finish()
    }
}

type SharedUnsubscribe = Rc<RefCell<Option<Unsubscribe>>>;

/// Every unsubscribe a binding created. Each one runs at most once, whether the caller
/// invokes the returned handle or the binding releases everything on teardown.
#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: RefCell<Vec<SharedUnsubscribe>>,
}

impl Subscriptions {
    /// Keeps `unsubscribe` and returns a handle that runs the same registration's removal.
    pub fn track(&self, unsubscribe: Unsubscribe) -> Unsubscribe {
        let shared: SharedUnsubscribe = Rc::new(RefCell::new(Some(unsubscribe)));
        let mut entries = self.entries.borrow_mut();
        entries.retain(|entry| entry.borrow().is_some());
        entries.push(shared.clone());
        drop(entries);
        Unsubscribe::new(move || {
            let pending = shared.borrow_mut().take();
            if let Some(unsubscribe) = pending {
                unsubscribe.call();
            }
        })
    }

    /// Number of registrations still live.
    #[cfg(test)]
    pub fn live(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.borrow().is_some())
            .count()
    }

    pub fn release_all(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for entry in entries {
            let pending = entry.borrow_mut().take();
            if let Some(unsubscribe) = pending {
                unsubscribe.call();
            }
        }
    }
}
