use super::{Scope, Subscriptions};
use crate::emitter::Unsubscribe;
use crate::sdk::{ChatbotSdk, SdkHolder};
use crate::types::{
    ContactData, EscalationData, GameOptions, MessageData, SessionData, VisitorData, WidgetState,
};
use std::rc::Rc;
use tokio::sync::watch;

/// Imperative controls plus a live mirror of the widget state.
///
/// Every listener registered through the controls is released when the scope unmounts. A
/// handle the caller already invoked does not run twice.
pub struct ChatbotControls {
    sdk: Rc<ChatbotSdk>,
    state: watch::Sender<WidgetState>,
    subscriptions: Subscriptions,
}

impl ChatbotControls {
    pub fn mount(scope: &Scope, holder: &SdkHolder) -> Rc<Self> {
        let sdk = holder.get_instance();
        let (state, _) = watch::channel(sdk.state());
        let controls = Rc::new(Self {
            sdk,
            state,
            subscriptions: Subscriptions::default(),
        });

        let weak = Rc::downgrade(&controls);
        let unsubscribe = controls.sdk.on_state_change(move |next| {
            if let Some(controls) = weak.upgrade() {
                controls.state.send_replace(next.clone());
            }
        });
        let _ = controls.subscriptions.track(unsubscribe);

        let weak = Rc::downgrade(&controls);
        scope.on_unmount(move || {
            if let Some(controls) = weak.upgrade() {
                controls.subscriptions.release_all();
            }
        });
        controls
    }

    pub fn state(&self) -> WidgetState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WidgetState> {
        self.state.subscribe()
    }

    pub fn open(&self) {
        self.sdk.open();
    }

    pub fn close(&self) {
        self.sdk.close();
    }

    pub fn toggle(&self) {
        self.sdk.toggle();
    }

    pub fn show(&self) {
        self.sdk.show();
    }

    pub fn hide(&self) {
        self.sdk.hide();
    }

    pub fn send_message(&self, text: &str, auto_send: bool) {
        self.sdk.send_message(text, auto_send);
    }

    pub fn open_bottom_sheet(&self, url: &str) {
        self.sdk.open_bottom_sheet(url);
    }

    pub fn start_game(&self, game_id: &str, options: GameOptions) {
        self.sdk.start_game(game_id, options);
    }

    pub fn set_session_data(&self, data: &SessionData) {
        self.sdk.set_session_data(data);
    }

    pub fn set_visitor_data(&self, data: &VisitorData) {
        self.sdk.set_visitor_data(data);
    }

    pub fn set_contact_data(&self, data: &ContactData) {
        self.sdk.set_contact_data(data);
    }

    pub fn on_init(&self, callback: impl Fn() + 'static) -> Unsubscribe {
        self.subscriptions.track(self.sdk.on_init(callback))
    }

    pub fn on_message_received(&self, callback: impl Fn(&MessageData) + 'static) -> Unsubscribe {
        self.subscriptions
            .track(self.sdk.on_message_received(callback))
    }

    pub fn on_escalated_to_human(
        &self,
        callback: impl Fn(&EscalationData) + 'static,
    ) -> Unsubscribe {
        self.subscriptions
            .track(self.sdk.on_escalated_to_human(callback))
    }

    pub fn on_widget_popup(&self, callback: impl Fn(bool) + 'static) -> Unsubscribe {
        self.subscriptions.track(self.sdk.on_widget_popup(callback))
    }

    #[cfg(test)]
    pub(crate) fn live_subscriptions(&self) -> usize {
        self.subscriptions.live()
    }
}
