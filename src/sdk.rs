//! The chatbot SDK: one instance per [`SdkHolder`], owning configuration, widget lifecycle,
//! widget state and the AI action registry.

use crate::actions::{self, ActionRegistry, AiActionHandler, RegisteredAction};
use crate::bridge::{BridgeCallback, BridgeEvent};
use crate::config::SdkConfig;
use crate::emitter::{Event, EventEmitter, Unsubscribe};
use crate::env::{Environment, GLOBAL_WIDGET_ENDPOINT, GLOBAL_WIDGET_UID};
use crate::error::{Result, SdkError};
use crate::loader::{ensure_root_container, load_script, load_stylesheet, wait_for_condition};
use crate::types::{
    ContactData, DataKey, EscalationData, GameOptions, MessageData, SessionData, StatePatch,
    VisitorData, WidgetCommand, WidgetState, events,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Emitted with the full state after every mutation.
pub struct StateChange;

impl Event for StateChange {
    const NAME: &'static str = "stateChange";
    type Payload = WidgetState;
}

type InstanceSlot = RefCell<Option<Rc<ChatbotSdk>>>;

struct Inner {
    config: Option<SdkConfig>,
    initialized: bool,
    /// The last `init` stored a config but failed to load the widget; the next `init` retries.
    load_failed: bool,
    state: WidgetState,
    actions: ActionRegistry,
    /// Bumped by `destroy` so an in-flight `init` does not touch a torn-down instance.
    generation: u64,
}

pub struct ChatbotSdk {
    env: Environment,
    events: EventEmitter,
    inner: RefCell<Inner>,
    me: Weak<ChatbotSdk>,
    holder: Weak<InstanceSlot>,
}

impl std::fmt::Debug for ChatbotSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatbotSdk").finish_non_exhaustive()
    }
}

impl ChatbotSdk {
    fn new(env: Environment, holder: Weak<InstanceSlot>) -> Rc<Self> {
        if let Some(page) = env.page() {
            page.chatbot().install_stub();
        }
        Rc::new_cyclic(|me| Self {
            env,
            events: EventEmitter::new(),
            inner: RefCell::new(Inner {
                config: None,
                initialized: false,
                load_failed: false,
                state: WidgetState::default(),
                actions: ActionRegistry::default(),
                generation: 0,
            }),
            me: me.clone(),
            holder,
        })
    }

    /// Validates `config`, publishes the widget globals and, unless `auto_load` is off, loads
    /// the widget and waits for it to become ready.
    ///
    /// A second call on an instance that already accepted a configuration returns it
    /// unchanged, unless loading the widget failed; then the whole sequence runs again.
    pub async fn init(self: &Rc<Self>, config: SdkConfig) -> Result<Rc<Self>> {
        {
            let inner = self.inner.borrow();
            if inner.config.is_some() && !inner.load_failed {
                warn!(target: "yourgpt_sdk.core", "SDK already initialized");
                return Ok(self.clone());
            }
        }
        config.validate()?;

        if config.debug {
            info!(target: "yourgpt_sdk.core", ?config, "initializing SDK");
        } else {
            debug!(target: "yourgpt_sdk.core", widget_id = %config.widget_id, "initializing SDK");
        }
        let generation = {
            let mut inner = self.inner.borrow_mut();
            inner.config = Some(config.clone());
            inner.load_failed = false;
            inner.generation
        };
        self.setup_globals(&config);

        let loaded = if config.auto_load {
            Some(self.load_widget(&config).await)
        } else {
            None
        };

        if self.inner.borrow().generation != generation {
            warn!(target: "yourgpt_sdk.core", "SDK destroyed while initializing");
            return Ok(self.clone());
        }
        match loaded {
            Some(Err(err)) => {
                self.inner.borrow_mut().load_failed = true;
                return Err(err);
            }
            Some(Ok(())) => {
                self.update_state(StatePatch::loaded());
                if config.debug {
                    info!(target: "yourgpt_sdk.core", "widget loaded");
                }
            }
            None => {}
        }
        self.inner.borrow_mut().initialized = true;
        info!(target: "yourgpt_sdk.core", "SDK initialized");
        Ok(self.clone())
    }

    fn setup_globals(&self, config: &SdkConfig) {
        let Some(page) = self.env.page() else {
            return;
        };
        page.set_global(GLOBAL_WIDGET_UID, Value::String(config.widget_id.clone()));
        page.chatbot().install_stub();
        page.set_global(
            GLOBAL_WIDGET_ENDPOINT,
            Value::String(config.resolved_endpoint()),
        );
    }

    async fn load_widget(&self, config: &SdkConfig) -> Result<()> {
        let page = self.env.require_page("load widget")?;
        let outcome = async {
            ensure_root_container(page.document())?;
            load_stylesheet(&self.env, &config.stylesheet_url()).await?;
            load_script(&self.env, &config.script_url()).await?;
            wait_for_condition(
                || page.chatbot().is_ready(),
                READY_TIMEOUT,
                READY_POLL_INTERVAL,
            )
            .await
        }
        .await;
        outcome.map_err(|err| {
            error!(target: "yourgpt_sdk.core", %err, "failed to load widget");
            SdkError::WidgetLoadFailed(Box::new(err))
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> Option<SdkConfig> {
        self.inner.borrow().config.clone()
    }

    /// A copy of the current state.
    pub fn state(&self) -> WidgetState {
        self.inner.borrow().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.borrow().initialized
    }

    pub fn on_state_change(&self, callback: impl Fn(&WidgetState) + 'static) -> Unsubscribe {
        self.events.on::<StateChange>(callback)
    }

    pub fn state_listener_count(&self) -> usize {
        self.events.listener_count::<StateChange>()
    }

    fn update_state(&self, patch: StatePatch) {
        let snapshot = {
            let mut inner = self.inner.borrow_mut();
            patch.apply(&mut inner.state);
            inner.state.clone()
        };
        self.events.emit::<StateChange>(&snapshot);
    }

    fn execute_command(&self, command: WidgetCommand) {
        let Some(page) = self.env.page() else {
            debug!(command = command.name(), "no page; dropping widget command");
            return;
        };
        let slot = page.chatbot();
        if !slot.is_ready() {
            debug!(command = command.name(), "widget not ready, queueing command");
        }
        slot.execute(command.name(), command.args());
    }

    fn register_event_listener(&self, event: &str, callback: BridgeCallback) {
        let Some(page) = self.env.page() else {
            return;
        };
        let slot = page.chatbot();
        if !slot.is_ready() {
            debug!(%event, "widget not ready, queueing event listener");
        }
        slot.on(event, callback);
    }

    fn remove_event_listener(&self, event: &str, callback: Option<BridgeCallback>) {
        if let Some(page) = self.env.page() {
            page.chatbot().off(event, callback);
        }
    }

    fn set_widget_data<T: Serialize>(&self, key: DataKey, data: &T) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = key.as_str(), %err, "cannot serialize widget data");
                return;
            }
        };
        let Some(page) = self.env.page() else {
            return;
        };
        let slot = page.chatbot();
        if !slot.is_ready() {
            debug!(key = key.as_str(), "widget not ready, queueing data");
        }
        slot.set(key.as_str(), value);
    }

    pub fn open(&self) {
        self.execute_command(WidgetCommand::Open);
        self.update_state(StatePatch::open(true));
    }

    pub fn close(&self) {
        self.execute_command(WidgetCommand::Close);
        self.update_state(StatePatch::open(false));
    }

    pub fn toggle(&self) {
        if self.inner.borrow().state.is_open {
            self.close();
        } else {
            self.open();
        }
    }

    pub fn show(&self) {
        self.execute_command(WidgetCommand::Show);
        self.update_state(StatePatch::visible(true));
    }

    pub fn hide(&self) {
        self.execute_command(WidgetCommand::Hide);
        self.update_state(StatePatch::visible(false));
    }

    /// `auto_send: false` only fills the input box.
    pub fn send_message(&self, text: &str, auto_send: bool) {
        self.execute_command(WidgetCommand::SendMessage {
            text: text.to_string(),
            send: auto_send,
        });
    }

    pub fn open_bottom_sheet(&self, url: &str) {
        self.execute_command(WidgetCommand::OpenBottomSheet {
            url: url.to_string(),
        });
    }

    pub fn start_game(&self, game_id: &str, options: GameOptions) {
        self.execute_command(WidgetCommand::StartGame {
            id: game_id.to_string(),
            options,
        });
    }

    /// Hands the container to the widget's embedded renderer.
    pub fn embed(&self, container_id: &str) {
        self.execute_command(WidgetCommand::Embed {
            container_id: container_id.to_string(),
        });
    }

    pub fn unmount_embedded(&self, container_id: &str) {
        self.execute_command(WidgetCommand::Unmount {
            container_id: container_id.to_string(),
        });
    }

    pub fn set_session_data(&self, data: &SessionData) {
        self.set_widget_data(DataKey::Session, data);
    }

    pub fn set_visitor_data(&self, data: &VisitorData) {
        self.set_widget_data(DataKey::Visitor, data);
    }

    pub fn set_contact_data(&self, data: &ContactData) {
        self.set_widget_data(DataKey::Contact, data);
    }

    pub fn on_init(&self, callback: impl Fn() + 'static) -> Unsubscribe {
        let me = self.me.clone();
        let wrapped: BridgeCallback = Rc::new(move |_event: &BridgeEvent<'_>| {
            if let Some(sdk) = me.upgrade() {
                sdk.update_state(StatePatch::connected());
            }
            guarded(events::INIT, &callback);
        });
        self.subscribe(events::INIT, wrapped)
    }

    pub fn on_message_received(&self, callback: impl Fn(&MessageData) + 'static) -> Unsubscribe {
        let me = self.me.clone();
        let wrapped: BridgeCallback = Rc::new(move |event: &BridgeEvent<'_>| {
            let Some(message) = decode::<MessageData>(events::MESSAGE_RECEIVED, event.payload)
            else {
                return;
            };
            if let Some(sdk) = me.upgrade() {
                let count = sdk.inner.borrow().state.message_count + 1;
                sdk.update_state(StatePatch {
                    message_count: Some(count),
                    last_message_id: Some(message.id.clone()),
                    ..Default::default()
                });
            }
            guarded(events::MESSAGE_RECEIVED, || callback(&message));
        });
        self.subscribe(events::MESSAGE_RECEIVED, wrapped)
    }

    pub fn on_escalated_to_human(
        &self,
        callback: impl Fn(&EscalationData) + 'static,
    ) -> Unsubscribe {
        let wrapped: BridgeCallback = Rc::new(move |event: &BridgeEvent<'_>| {
            if let Some(data) = decode::<EscalationData>(events::ESCALATED_TO_HUMAN, event.payload)
            {
                guarded(events::ESCALATED_TO_HUMAN, || callback(&data));
            }
        });
        self.subscribe(events::ESCALATED_TO_HUMAN, wrapped)
    }

    pub fn on_widget_popup(&self, callback: impl Fn(bool) + 'static) -> Unsubscribe {
        let me = self.me.clone();
        let wrapped: BridgeCallback = Rc::new(move |event: &BridgeEvent<'_>| {
            let Some(is_open) = decode::<bool>(events::WIDGET_POPUP, event.payload) else {
                return;
            };
            if let Some(sdk) = me.upgrade() {
                sdk.update_state(StatePatch::open(is_open));
            }
            guarded(events::WIDGET_POPUP, || callback(is_open));
        });
        self.subscribe(events::WIDGET_POPUP, wrapped)
    }

    /// Subscribes `wrapped` and returns an unsubscribe bound to that exact callback.
    fn subscribe(&self, event: &'static str, wrapped: BridgeCallback) -> Unsubscribe {
        self.register_event_listener(event, wrapped.clone());
        let env = self.env.clone();
        Unsubscribe::new(move || {
            if let Some(page) = env.page() {
                page.chatbot().off(event, Some(wrapped));
            }
        })
    }

    pub fn register_ai_action(&self, name: &str, handler: AiActionHandler) {
        let listener = actions::bridge_listener(name, handler.clone());
        let replaced = self.inner.borrow_mut().actions.insert(
            name,
            RegisteredAction {
                handler,
                listener: listener.clone(),
            },
        );
        let event = events::ai_action(name);
        if let Some(previous) = replaced {
            debug!(action = %name, "replacing AI action handler");
            self.remove_event_listener(&event, Some(previous.listener));
        }
        self.register_event_listener(&event, listener);
        debug!(action = %name, "registered AI action");
    }

    /// Returns whether `name` was registered.
    pub fn unregister_ai_action(&self, name: &str) -> bool {
        let removed = self.inner.borrow_mut().actions.remove(name);
        match removed {
            Some(action) => {
                self.remove_event_listener(&events::ai_action(name), Some(action.listener));
                debug!(action = %name, "unregistered AI action");
                true
            }
            None => false,
        }
    }

    /// Registers each entry in iteration order. Not atomic.
    pub fn register_ai_actions<S: AsRef<str>>(
        &self,
        actions: impl IntoIterator<Item = (S, AiActionHandler)>,
    ) {
        for (name, handler) in actions {
            self.register_ai_action(name.as_ref(), handler);
        }
    }

    pub fn registered_ai_actions(&self) -> Vec<String> {
        self.inner.borrow().actions.names()
    }

    pub fn ai_action_handler(&self, name: &str) -> Option<AiActionHandler> {
        self.inner
            .borrow()
            .actions
            .get(name)
            .map(|action| action.handler.clone())
    }

    /// Tears the instance down and detaches it from its holder, so the next
    /// `get_instance` starts fresh.
    pub fn destroy(&self) {
        self.events.remove_all_listeners();
        let drained = {
            let mut inner = self.inner.borrow_mut();
            inner.initialized = false;
            inner.load_failed = false;
            inner.config = None;
            inner.state = WidgetState::default();
            inner.generation += 1;
            inner.actions.drain()
        };
        for (name, action) in drained {
            self.remove_event_listener(&events::ai_action(&name), Some(action.listener));
        }
        if let Some(slot) = self.holder.upgrade() {
            let mut slot = slot.borrow_mut();
            if slot
                .as_ref()
                .is_some_and(|current| std::ptr::eq(Rc::as_ptr(current), self))
            {
                *slot = None;
            }
        }
        debug!(target: "yourgpt_sdk.core", "SDK destroyed");
    }
}

fn decode<T: DeserializeOwned>(event: &str, payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%event, %err, "ignoring malformed widget event payload");
            None
        }
    }
}

fn guarded(event: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(%event, "widget event callback panicked");
    }
}

/// Explicit holder for the one SDK instance a page supports.
///
/// Several holders can coexist (one per page or test), but one holder never hands out two
/// live instances.
#[derive(Clone)]
pub struct SdkHolder {
    env: Environment,
    current: Rc<InstanceSlot>,
}

impl SdkHolder {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            current: Rc::new(RefCell::new(None)),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The live instance, created on first use. Creating one only installs the command
    /// queue stub; nothing is loaded until `init`.
    pub fn get_instance(&self) -> Rc<ChatbotSdk> {
        if let Some(sdk) = self.current.borrow().as_ref() {
            return sdk.clone();
        }
        let sdk = ChatbotSdk::new(self.env.clone(), Rc::downgrade(&self.current));
        *self.current.borrow_mut() = Some(sdk.clone());
        sdk
    }

    pub fn has_instance(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub async fn init(&self, config: SdkConfig) -> Result<Rc<ChatbotSdk>> {
        let sdk = self.get_instance();
        sdk.init(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::handler;
    use crate::bridge::RecordingBridge;
    use crate::env::{Page, ScriptedFetcher};
    use crate::error::ErrorCode;
    use serde_json::json;
    use std::cell::Cell;

    const WIDGET_ID: &str = "0b6f5c3e-2d4a-4e8f-9c1b-7a6d5e4f3c2b";

    fn page_with_widget() -> (SdkHolder, Rc<Page>, Rc<RecordingBridge>) {
        let fetcher = ScriptedFetcher::new();
        let bridge = RecordingBridge::new();
        fetcher.attach_on_script_load(bridge.clone());
        let page = Page::blank(fetcher);
        let holder = SdkHolder::new(Environment::browser(page.clone()));
        (holder, page, bridge)
    }

    #[tokio::test]
    async fn init_loads_widget_and_marks_loaded() {
        let (holder, page, _bridge) = page_with_widget();
        let sdk = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap();
        assert!(sdk.is_ready());
        assert!(sdk.state().is_loaded);
        assert_eq!(page.global(GLOBAL_WIDGET_UID), Some(json!(WIDGET_ID)));
        assert_eq!(page.global(GLOBAL_WIDGET_ENDPOINT), Some(json!("")));
        assert!(page.document().has_id(crate::loader::ROOT_CONTAINER_ID));
        assert!(page.document().has_element("script", "src", "/chatbot.js"));
        assert!(page.document().has_element("link", "href", "/chatbot.css"));
    }

    #[tokio::test]
    async fn config_errors_surface_unchanged() {
        let (holder, _page, _bridge) = page_with_widget();
        let err = holder.init(SdkConfig::new("")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingIdentifier);
        let err = holder.init(SdkConfig::new("not-a-uuid")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidIdentifierFormat);
        let err = holder
            .init(SdkConfig::new(WIDGET_ID).with_endpoint("not a url"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEndpoint);
        assert!(!holder.get_instance().is_ready());
    }

    #[tokio::test]
    async fn white_label_uses_default_endpoint() {
        let (holder, page, _bridge) = page_with_widget();
        holder
            .init(SdkConfig::new(WIDGET_ID).with_white_label(true))
            .await
            .unwrap();
        assert_eq!(
            page.global(GLOBAL_WIDGET_ENDPOINT),
            Some(json!("https://widget.d4ai.chat"))
        );
        assert!(page.document().has_element(
            "script",
            "src",
            "https://widget.d4ai.chat/chatbot.js"
        ));
    }

    #[tokio::test]
    async fn second_init_keeps_first_config() {
        let (holder, _page, _bridge) = page_with_widget();
        let first = holder
            .init(SdkConfig::new(WIDGET_ID).with_auto_load(false))
            .await
            .unwrap();
        let other = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
        let second = holder
            .init(SdkConfig::new(other).with_debug(true))
            .await
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(second.config().unwrap().widget_id, WIDGET_ID);
        // Not re-validated either.
        let third = holder.init(SdkConfig::new("")).await.unwrap();
        assert!(Rc::ptr_eq(&first, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_is_widget_load_failure() {
        let page = Page::blank(ScriptedFetcher::new());
        let holder = SdkHolder::new(Environment::browser(page));
        let err = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WidgetLoadFailed);
        assert_eq!(
            err,
            SdkError::WidgetLoadFailed(Box::new(SdkError::Timeout(10_000)))
        );
        let sdk = holder.get_instance();
        assert!(!sdk.is_ready());
        assert!(!sdk.state().is_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn init_after_load_failure_retries_the_load() {
        let page = Page::blank(ScriptedFetcher::new());
        let holder = SdkHolder::new(Environment::browser(page.clone()));
        let err = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WidgetLoadFailed);

        page.chatbot().attach(RecordingBridge::new());
        let sdk = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap();
        assert!(sdk.is_ready());
        assert!(sdk.state().is_loaded);

        // Once loaded, further calls are no-ops again.
        let again = holder.init(SdkConfig::new("")).await.unwrap();
        assert!(Rc::ptr_eq(&sdk, &again));
    }

    #[tokio::test]
    async fn script_error_is_widget_load_failure() {
        let fetcher = ScriptedFetcher::new();
        fetcher.fail("https://cdn.example.com/chatbot.js");
        let holder = SdkHolder::new(Environment::browser(Page::blank(fetcher)));
        let err = holder
            .init(SdkConfig::new(WIDGET_ID).with_endpoint("https://cdn.example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WidgetLoadFailed);
        assert!(!err.is_config_error());
    }

    #[tokio::test]
    async fn server_environment_rejects_auto_load() {
        let holder = SdkHolder::new(Environment::Server);
        let err = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInBrowser);

        let holder = SdkHolder::new(Environment::Server);
        let sdk = holder
            .init(SdkConfig::new(WIDGET_ID).with_auto_load(false))
            .await
            .unwrap();
        sdk.open();
        assert!(sdk.state().is_open);
    }

    #[test]
    fn commands_before_ready_are_queued_and_state_is_optimistic() {
        let (holder, page, bridge) = page_with_widget();
        let sdk = holder.get_instance();
        sdk.open();
        sdk.send_message("hello", true);
        sdk.set_visitor_data(&serde_json::Map::from_iter([(
            "plan".to_string(),
            json!("pro"),
        )]));
        assert!(sdk.state().is_open);
        assert_eq!(page.chatbot().pending().len(), 3);

        page.chatbot().attach(bridge.clone());
        sdk.hide();
        let calls = bridge.calls();
        let targets: Vec<_> = calls.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(
            targets,
            vec!["widget:open", "message:send", "visitor:data", "widget:hide"]
        );
        assert_eq!(calls[1].args, vec![json!({"text": "hello", "send": true})]);
    }

    #[test]
    fn toggle_flips_open_state() {
        let (holder, page, bridge) = page_with_widget();
        page.chatbot().attach(bridge.clone());
        let sdk = holder.get_instance();
        sdk.toggle();
        assert!(sdk.state().is_open);
        sdk.toggle();
        assert!(!sdk.state().is_open);
        assert_eq!(bridge.executed(), vec!["widget:open", "widget:close"]);
    }

    #[test]
    fn state_change_carries_full_snapshot_and_reads_are_copies() {
        let (holder, _page, _bridge) = page_with_widget();
        let sdk = holder.get_instance();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _unsub = sdk.on_state_change(move |state| sink.borrow_mut().push(state.clone()));
        sdk.hide();
        sdk.open();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(!seen[1].is_visible && seen[1].is_open);

        let mut copy = sdk.state();
        copy.is_open = false;
        copy.message_count = 99;
        assert!(sdk.state().is_open);
        assert_eq!(sdk.state().message_count, 0);
    }

    #[test]
    fn event_wrappers_update_state_before_callback() {
        let (holder, page, bridge) = page_with_widget();
        page.chatbot().attach(bridge.clone());
        let sdk = holder.get_instance();

        let observed = Rc::new(Cell::new(0u64));
        let probe = observed.clone();
        let weak = Rc::downgrade(&sdk);
        let _msg = sdk.on_message_received(move |message| {
            assert_eq!(message.content, "hi");
            let sdk = weak.upgrade().unwrap();
            probe.set(sdk.state().message_count);
        });
        let popups = Rc::new(Cell::new(None));
        let sink = popups.clone();
        let _popup = sdk.on_widget_popup(move |open| sink.set(Some(open)));
        let connected = Rc::new(Cell::new(false));
        let flag = connected.clone();
        let _init = sdk.on_init(move || flag.set(true));

        bridge.fire(
            events::MESSAGE_RECEIVED,
            json!({"id": "m1", "content": "hi", "timestamp": "2024-01-01T00:00:00Z", "sender": "bot"}),
        );
        bridge.fire(events::WIDGET_POPUP, json!(true));
        bridge.fire(events::INIT, Value::Null);

        assert_eq!(observed.get(), 1);
        assert_eq!(popups.get(), Some(true));
        assert!(connected.get());
        let state = sdk.state();
        assert!(state.is_open && state.is_connected);
        assert_eq!(state.last_message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn unsubscribe_uses_the_wrapped_callback() {
        let (holder, page, bridge) = page_with_widget();
        page.chatbot().attach(bridge.clone());
        let sdk = holder.get_instance();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let unsub = sdk.on_escalated_to_human(move |_| counter.set(counter.get() + 1));
        let _other = sdk.on_escalated_to_human(|_| {});
        assert_eq!(bridge.listener_count(events::ESCALATED_TO_HUMAN), 2);
        unsub.call();
        assert_eq!(bridge.listener_count(events::ESCALATED_TO_HUMAN), 1);
        bridge.fire(
            events::ESCALATED_TO_HUMAN,
            json!({"mode": "human", "modeKey": "live", "timestamp": "t"}),
        );
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn ai_action_registration_is_symmetric() {
        let (holder, page, bridge) = page_with_widget();
        page.chatbot().attach(bridge.clone());
        let sdk = holder.get_instance();
        let before = bridge.total_listeners();

        sdk.register_ai_action("lookup", handler(|_, helpers| {
            helpers.respond("done");
            Ok(())
        }));
        assert_eq!(sdk.registered_ai_actions(), vec!["lookup"]);
        assert_eq!(bridge.listener_count("ai:action:lookup"), 1);
        bridge.fire_action("lookup", json!({"action": []}));
        assert_eq!(bridge.responses(), vec!["done"]);

        assert!(sdk.unregister_ai_action("lookup"));
        assert!(!sdk.unregister_ai_action("lookup"));
        assert!(sdk.registered_ai_actions().is_empty());
        assert_eq!(bridge.total_listeners(), before);
    }

    #[test]
    fn re_registering_replaces_the_external_listener() {
        let (holder, page, bridge) = page_with_widget();
        page.chatbot().attach(bridge.clone());
        let sdk = holder.get_instance();
        sdk.register_ai_action("a", handler(|_, _| Ok(())));
        sdk.register_ai_action("a", handler(|_, _| Ok(())));
        assert_eq!(bridge.listener_count("ai:action:a"), 1);
        assert_eq!(sdk.registered_ai_actions(), vec!["a"]);
    }

    #[test]
    fn registry_symmetry_holds_before_ready_too() {
        let (holder, page, bridge) = page_with_widget();
        let sdk = holder.get_instance();
        sdk.register_ai_action("early", handler(|_, _| Ok(())));
        sdk.unregister_ai_action("early");
        page.chatbot().attach(bridge.clone());
        assert_eq!(bridge.listener_count("ai:action:early"), 0);
    }

    #[test]
    fn register_many_keeps_order_and_earlier_entries() {
        let (holder, _page, _bridge) = page_with_widget();
        let sdk = holder.get_instance();
        sdk.register_ai_actions(vec![
            ("one", handler(|_, _| Ok(()))),
            ("two", handler(|_, _| Ok(()))),
            ("three", handler(|_, _| Ok(()))),
        ]);
        assert_eq!(sdk.registered_ai_actions(), vec!["one", "two", "three"]);
        assert!(sdk.ai_action_handler("two").is_some());
    }

    #[tokio::test]
    async fn destroy_resets_and_detaches_from_holder() {
        let (holder, _page, bridge) = page_with_widget();
        let sdk = holder.init(SdkConfig::new(WIDGET_ID)).await.unwrap();
        let _unsub = sdk.on_state_change(|_| {});
        sdk.register_ai_action("x", handler(|_, _| Ok(())));
        sdk.open();
        sdk.destroy();

        assert!(!holder.has_instance());
        assert!(!sdk.is_ready());
        assert!(sdk.config().is_none());
        assert_eq!(sdk.state(), WidgetState::default());
        assert_eq!(sdk.state_listener_count(), 0);
        assert_eq!(bridge.listener_count("ai:action:x"), 0);

        let fresh = holder.get_instance();
        assert!(!Rc::ptr_eq(&fresh, &sdk));
        assert!(!fresh.is_ready());
        fresh
            .init(SdkConfig::new(WIDGET_ID).with_auto_load(false))
            .await
            .unwrap();
        assert!(fresh.is_ready());
    }
}
