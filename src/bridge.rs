//! The `$yourgptChatbot` global: a slot that queues commands until the external widget script
//! attaches, then replays them in order and forwards everything afterwards.

use crate::actions::{ActionHelpers, ConfirmOptions};
use crate::error::{Result, SdkError};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// What the external widget hands to a listener.
pub struct BridgeEvent<'a> {
    pub payload: &'a Value,
    /// Present only for `ai:action:*` events.
    pub helpers: Option<&'a dyn ActionHelpers>,
}

impl<'a> BridgeEvent<'a> {
    pub fn new(payload: &'a Value) -> Self {
        Self {
            payload,
            helpers: None,
        }
    }
}

pub type BridgeCallback = Rc<dyn Fn(&BridgeEvent<'_>)>;

/// Identity comparison used by `off`; only the exact registered `Rc` matches.
pub fn same_callback(a: &BridgeCallback, b: &BridgeCallback) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// The four-method contract the external widget script satisfies once loaded.
pub trait WidgetBridge {
    fn execute(&self, command: &str, args: Vec<Value>);
    fn on(&self, event: &str, callback: BridgeCallback);
    fn off(&self, event: &str, callback: Option<BridgeCallback>);
    fn set(&self, key: &str, value: Value);
}

pub enum QueuedCommand {
    Execute {
        command: String,
        args: Vec<Value>,
    },
    On {
        event: String,
        callback: BridgeCallback,
    },
    Off {
        event: String,
        callback: Option<BridgeCallback>,
    },
    Set {
        key: String,
        value: Value,
    },
}

impl QueuedCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            QueuedCommand::Execute { .. } => "execute",
            QueuedCommand::On { .. } => "on",
            QueuedCommand::Off { .. } => "off",
            QueuedCommand::Set { .. } => "set",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            QueuedCommand::Execute { command, .. } => command,
            QueuedCommand::On { event, .. } | QueuedCommand::Off { event, .. } => event,
            QueuedCommand::Set { key, .. } => key,
        }
    }

    /// Parses the `[verb, name, ...args]` tuples an inline bootstrap snippet pushes onto `q`.
    pub fn from_raw(entry: &Value) -> Result<Self> {
        let items = entry
            .as_array()
            .ok_or_else(|| SdkError::MalformedQueueEntry(format!("expected array, got {entry}")))?;
        let verb = items.first().and_then(Value::as_str);
        let target = items.get(1).and_then(Value::as_str);
        let (Some(verb), Some(target)) = (verb, target) else {
            return Err(SdkError::MalformedQueueEntry(entry.to_string()));
        };
        let target = target.to_string();
        match verb {
            "execute" => Ok(QueuedCommand::Execute {
                command: target,
                args: items[2..].to_vec(),
            }),
            "set" => Ok(QueuedCommand::Set {
                key: target,
                value: items.get(2).cloned().unwrap_or(Value::Null),
            }),
            "off" if items.len() == 2 => Ok(QueuedCommand::Off {
                event: target,
                callback: None,
            }),
            other => Err(SdkError::MalformedQueueEntry(format!(
                "verb {other:?} cannot be queued from raw JSON"
            ))),
        }
    }

    fn dispatch_to(self, bridge: &dyn WidgetBridge) {
        match self {
            QueuedCommand::Execute { command, args } => bridge.execute(&command, args),
            QueuedCommand::On { event, callback } => bridge.on(&event, callback),
            QueuedCommand::Off { event, callback } => bridge.off(&event, callback),
            QueuedCommand::Set { key, value } => bridge.set(&key, value),
        }
    }
}

impl fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.verb(), self.target())
    }
}

#[derive(Default)]
enum SlotState {
    #[default]
    Empty,
    Stub(VecDeque<QueuedCommand>),
    Ready(Rc<dyn WidgetBridge>),
}

/// Process-wide slot for the external widget object.
#[derive(Default)]
pub struct WidgetSlot {
    state: RefCell<SlotState>,
    draining: Cell<bool>,
}

impl WidgetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the queueing stub if nothing occupies the slot yet.
    pub fn install_stub(&self) {
        let mut state = self.state.borrow_mut();
        if matches!(*state, SlotState::Empty) {
            *state = SlotState::Stub(VecDeque::new());
        }
    }

    pub fn is_installed(&self) -> bool {
        !matches!(*self.state.borrow(), SlotState::Empty)
    }

    /// Ready once a real widget is attached and the backlog has been replayed.
    pub fn is_ready(&self) -> bool {
        !self.draining.get() && matches!(*self.state.borrow(), SlotState::Ready(_))
    }

    pub fn pending(&self) -> Vec<(&'static str, String)> {
        match &*self.state.borrow() {
            SlotState::Stub(queue) => queue
                .iter()
                .map(|cmd| (cmd.verb(), cmd.target().to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn dispatch(&self, command: QueuedCommand) {
        let bridge = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                SlotState::Ready(bridge) => bridge.clone(),
                SlotState::Stub(queue) => {
                    queue.push_back(command);
                    return;
                }
                SlotState::Empty => {
                    *state = SlotState::Stub(VecDeque::from([command]));
                    return;
                }
            }
        };
        command.dispatch_to(bridge.as_ref());
    }

    pub fn push_raw(&self, entry: &Value) -> Result<()> {
        let command = QueuedCommand::from_raw(entry)?;
        self.dispatch(command);
        Ok(())
    }

    /// Called when the widget script finishes self-initializing. Replays the backlog in
    /// insertion order; commands issued during the replay join the tail of the backlog.
    pub fn attach(&self, bridge: Rc<dyn WidgetBridge>) {
        if self.draining.replace(true) {
            warn!("widget attached while a previous attach is still replaying; ignoring");
            return;
        }
        let mut replayed = 0usize;
        loop {
            let next = match &mut *self.state.borrow_mut() {
                SlotState::Stub(queue) => queue.pop_front(),
                _ => None,
            };
            let Some(command) = next else { break };
            command.dispatch_to(bridge.as_ref());
            replayed += 1;
        }
        *self.state.borrow_mut() = SlotState::Ready(bridge);
        self.draining.set(false);
        debug!(replayed, "widget attached; command queue drained");
    }

    pub fn execute(&self, command: &str, args: Vec<Value>) {
        self.dispatch(QueuedCommand::Execute {
            command: command.to_string(),
            args,
        });
    }

    pub fn on(&self, event: &str, callback: BridgeCallback) {
        self.dispatch(QueuedCommand::On {
            event: event.to_string(),
            callback,
        });
    }

    pub fn off(&self, event: &str, callback: Option<BridgeCallback>) {
        self.dispatch(QueuedCommand::Off {
            event: event.to_string(),
            callback,
        });
    }

    pub fn set(&self, key: &str, value: Value) {
        self.dispatch(QueuedCommand::Set {
            key: key.to_string(),
            value,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeCall {
    pub verb: &'static str,
    pub target: String,
    pub args: Vec<Value>,
}

/// In-memory widget that records every call and lets callers fire events at listeners.
#[derive(Default)]
pub struct RecordingBridge {
    calls: RefCell<Vec<BridgeCall>>,
    listeners: RefCell<Vec<(String, BridgeCallback)>>,
    responses: RefCell<Vec<String>>,
    confirm_answer: Cell<bool>,
}

impl RecordingBridge {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_confirm_answer(self: Rc<Self>, answer: bool) -> Rc<Self> {
        self.confirm_answer.set(answer);
        self
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.calls.borrow().clone()
    }

    /// Targets of every `execute` call, in order.
    pub fn executed(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.verb == "execute")
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn responses(&self) -> Vec<String> {
        self.responses.borrow().clone()
    }

    pub fn fire(&self, event: &str, payload: Value) {
        for callback in self.matching(event) {
            callback(&BridgeEvent::new(&payload));
        }
    }

    pub fn fire_action(&self, name: &str, payload: Value) {
        let event = crate::types::events::ai_action(name);
        for callback in self.matching(&event) {
            callback(&BridgeEvent {
                payload: &payload,
                helpers: Some(self),
            });
        }
    }

    fn matching(&self, event: &str) -> Vec<BridgeCallback> {
        self.listeners
            .borrow()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    fn record(&self, verb: &'static str, target: &str, args: Vec<Value>) {
        self.calls.borrow_mut().push(BridgeCall {
            verb,
            target: target.to_string(),
            args,
        });
    }
}

impl WidgetBridge for RecordingBridge {
    fn execute(&self, command: &str, args: Vec<Value>) {
        self.record("execute", command, args);
    }

    fn on(&self, event: &str, callback: BridgeCallback) {
        self.record("on", event, vec![]);
        self.listeners
            .borrow_mut()
            .push((event.to_string(), callback));
    }

    fn off(&self, event: &str, callback: Option<BridgeCallback>) {
        self.record("off", event, vec![]);
        self.listeners.borrow_mut().retain(|(name, cb)| {
            name != event
                || callback
                    .as_ref()
                    .is_some_and(|target| !same_callback(cb, target))
        });
    }

    fn set(&self, key: &str, value: Value) {
        self.record("set", key, vec![value]);
    }
}

impl ActionHelpers for RecordingBridge {
    fn respond(&self, message: &str) {
        self.responses.borrow_mut().push(message.to_string());
    }

    fn confirm(&self, options: &ConfirmOptions) -> bool {
        debug!(title = %options.title, "confirm requested");
        self.confirm_answer.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_commands_replay_in_order_before_new_ones() {
        let slot = WidgetSlot::new();
        slot.install_stub();
        for i in 0..5 {
            slot.execute(&format!("cmd:{i}"), vec![]);
        }
        assert!(!slot.is_ready());
        assert_eq!(slot.pending().len(), 5);

        let bridge = RecordingBridge::new();
        slot.attach(bridge.clone());
        slot.execute("cmd:after", vec![]);

        assert!(slot.is_ready());
        assert_eq!(
            bridge.executed(),
            vec!["cmd:0", "cmd:1", "cmd:2", "cmd:3", "cmd:4", "cmd:after"]
        );
    }

    /// A widget that issues a new command from inside a replayed one.
    struct ReentrantBridge {
        slot: Rc<WidgetSlot>,
        log: RefCell<Vec<String>>,
    }

    impl WidgetBridge for ReentrantBridge {
        fn execute(&self, command: &str, _args: Vec<Value>) {
            self.log.borrow_mut().push(command.to_string());
            if command == "first" {
                self.slot.execute("issued-during-drain", vec![]);
            }
        }
        fn on(&self, _event: &str, _callback: BridgeCallback) {}
        fn off(&self, _event: &str, _callback: Option<BridgeCallback>) {}
        fn set(&self, _key: &str, _value: Value) {}
    }

    #[test]
    fn commands_issued_during_drain_cannot_jump_the_queue() {
        let slot = Rc::new(WidgetSlot::new());
        slot.execute("first", vec![]);
        slot.execute("second", vec![]);
        let bridge = Rc::new(ReentrantBridge {
            slot: slot.clone(),
            log: RefCell::new(vec![]),
        });
        slot.attach(bridge.clone());
        assert_eq!(
            *bridge.log.borrow(),
            vec!["first", "second", "issued-during-drain"]
        );
    }

    #[test]
    fn first_reference_installs_stub() {
        let slot = WidgetSlot::new();
        assert!(!slot.is_installed());
        slot.set("session:data", json!({"a": 1}));
        assert!(slot.is_installed());
        assert_eq!(slot.pending(), vec![("set", "session:data".to_string())]);
    }

    #[test]
    fn raw_snippet_entries_are_parsed() {
        let slot = WidgetSlot::new();
        slot.push_raw(&json!(["execute", "widget:open"])).unwrap();
        slot.push_raw(&json!(["set", "visitor:data", {"plan": "pro"}]))
            .unwrap();
        let err = slot.push_raw(&json!(["on", "init"])).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::MalformedQueueEntry);
        assert!(slot.push_raw(&json!({"verb": "execute"})).is_err());

        let bridge = RecordingBridge::new();
        slot.attach(bridge.clone());
        let calls = bridge.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args, vec![json!({"plan": "pro"})]);
    }

    #[test]
    fn off_matches_exact_callback_only() {
        let bridge = RecordingBridge::new();
        let registered: BridgeCallback = Rc::new(|_| {});
        let lookalike: BridgeCallback = Rc::new(|_| {});
        bridge.on("init", registered.clone());
        bridge.off("init", Some(lookalike));
        assert_eq!(bridge.listener_count("init"), 1);
        bridge.off("init", Some(registered));
        assert_eq!(bridge.listener_count("init"), 0);
    }
}
