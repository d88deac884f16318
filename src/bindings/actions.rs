use super::Scope;
use crate::actions::AiActionHandler;
use crate::sdk::{ChatbotSdk, SdkHolder};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::watch;
use tracing::debug;

/// Registers AI action handlers for one component and unregisters them on unmount.
///
/// Only names this binding registered are touched at unmount, and only while the SDK
/// still holds this binding's handler for them.
pub struct AiActions {
    sdk: Rc<ChatbotSdk>,
    owned: RefCell<Vec<(String, AiActionHandler)>>,
    names: watch::Sender<Vec<String>>,
}

impl AiActions {
    pub fn mount(scope: &Scope, holder: &SdkHolder) -> Rc<Self> {
        let sdk = holder.get_instance();
        let (names, _) = watch::channel(sdk.registered_ai_actions());
        let hook = Rc::new(Self {
            sdk,
            owned: RefCell::new(Vec::new()),
            names,
        });
        let weak = Rc::downgrade(&hook);
        scope.on_unmount(move || {
            if let Some(hook) = weak.upgrade() {
                hook.release();
            }
        });
        hook
    }

    pub fn register_action(&self, name: &str, handler: AiActionHandler) {
        {
            let mut owned = self.owned.borrow_mut();
            match owned.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = handler.clone(),
                None => owned.push((name.to_string(), handler.clone())),
            }
        }
        self.sdk.register_ai_action(name, handler);
        self.publish();
    }

    pub fn unregister_action(&self, name: &str) {
        self.owned.borrow_mut().retain(|(n, _)| n != name);
        self.sdk.unregister_ai_action(name);
        self.publish();
    }

    pub fn register_actions<S: AsRef<str>>(
        &self,
        actions: impl IntoIterator<Item = (S, AiActionHandler)>,
    ) {
        for (name, handler) in actions {
            self.register_action(name.as_ref(), handler);
        }
    }

    /// Names registered through this binding, in registration order.
    pub fn registered_actions(&self) -> Vec<String> {
        self.owned.borrow().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn subscribe_names(&self) -> watch::Receiver<Vec<String>> {
        self.names.subscribe()
    }

    fn publish(&self) {
        self.names.send_replace(self.registered_actions());
    }

    fn release(&self) {
        let owned = std::mem::take(&mut *self.owned.borrow_mut());
        for (name, handler) in owned {
            let still_ours = self
                .sdk
                .ai_action_handler(&name)
                .is_some_and(|current| Rc::ptr_eq(&current, &handler));
            if still_ours {
                self.sdk.unregister_ai_action(&name);
            } else {
                debug!(action = %name, "AI action re-registered elsewhere; leaving it");
            }
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::handler;
    use crate::bridge::RecordingBridge;
    use crate::env::{Environment, Page, ScriptedFetcher};

    fn setup() -> (SdkHolder, Rc<RecordingBridge>) {
        let page = Page::blank(ScriptedFetcher::new());
        let bridge = RecordingBridge::new();
        page.chatbot().attach(bridge.clone());
        (SdkHolder::new(Environment::browser(page)), bridge)
    }

    #[test]
    fn unmount_removes_only_own_actions() {
        let (holder, bridge) = setup();
        let sdk = holder.get_instance();
        sdk.register_ai_action("global", handler(|_, _| Ok(())));

        let scope = Scope::root();
        let hook = AiActions::mount(&scope, &holder);
        assert_eq!(*hook.subscribe_names().borrow(), vec!["global"]);
        hook.register_actions(vec![
            ("c", handler(|_, _| Ok(()))),
            ("a", handler(|_, _| Ok(()))),
            ("b", handler(|_, _| Ok(()))),
        ]);
        assert_eq!(hook.registered_actions(), vec!["c", "a", "b"]);
        assert_eq!(sdk.registered_ai_actions(), vec!["global", "c", "a", "b"]);

        scope.unmount();
        assert_eq!(sdk.registered_ai_actions(), vec!["global"]);
        for name in ["a", "b", "c"] {
            assert_eq!(bridge.listener_count(&format!("ai:action:{name}")), 0);
        }
        assert_eq!(bridge.listener_count("ai:action:global"), 1);
    }

    #[test]
    fn action_taken_over_by_another_site_survives_unmount() {
        let (holder, _bridge) = setup();
        let sdk = holder.get_instance();
        let scope = Scope::root();
        let hook = AiActions::mount(&scope, &holder);
        hook.register_action("shared", handler(|_, _| Ok(())));
        sdk.register_ai_action("shared", handler(|_, _| Ok(())));

        scope.unmount();
        assert_eq!(sdk.registered_ai_actions(), vec!["shared"]);
    }

    #[test]
    fn unregister_updates_mirror() {
        let (holder, _bridge) = setup();
        let hook = AiActions::mount(&Scope::root(), &holder);
        let mut rx = hook.subscribe_names();
        hook.register_action("x", handler(|_, _| Ok(())));
        assert_eq!(*rx.borrow_and_update(), vec!["x"]);
        hook.unregister_action("x");
        assert!(rx.borrow_and_update().is_empty());
        assert!(holder.get_instance().registered_ai_actions().is_empty());
    }
}
