use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Snapshot of the widget as the SDK believes it to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetState {
    pub is_open: bool,
    pub is_visible: bool,
    pub is_connected: bool,
    pub is_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    pub message_count: u64,
    pub connection_retries: u32,
}

impl Default for WidgetState {
    fn default() -> Self {
        Self {
            is_open: false,
            is_visible: true,
            is_connected: false,
            is_loaded: false,
            last_message_id: None,
            message_count: 0,
            connection_retries: 0,
        }
    }
}

/// Partial update merged into [`WidgetState`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub is_open: Option<bool>,
    pub is_visible: Option<bool>,
    pub is_connected: Option<bool>,
    pub is_loaded: Option<bool>,
    pub last_message_id: Option<String>,
    pub message_count: Option<u64>,
    pub connection_retries: Option<u32>,
}

impl StatePatch {
    pub fn open(is_open: bool) -> Self {
        Self {
            is_open: Some(is_open),
            ..Default::default()
        }
    }

    pub fn visible(is_visible: bool) -> Self {
        Self {
            is_visible: Some(is_visible),
            ..Default::default()
        }
    }

    pub fn loaded() -> Self {
        Self {
            is_loaded: Some(true),
            ..Default::default()
        }
    }

    pub fn connected() -> Self {
        Self {
            is_connected: Some(true),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, state: &mut WidgetState) {
        if let Some(v) = self.is_open {
            state.is_open = v;
        }
        if let Some(v) = self.is_visible {
            state.is_visible = v;
        }
        if let Some(v) = self.is_connected {
            state.is_connected = v;
        }
        if let Some(v) = self.is_loaded {
            state.is_loaded = v;
        }
        if let Some(v) = self.last_message_id {
            state.last_message_id = Some(v);
        }
        if let Some(v) = self.message_count {
            state.message_count = v;
        }
        if let Some(v) = self.connection_retries {
            state.connection_retries = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub id: String,
    pub content: String,
    pub timestamp: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationData {
    pub mode: String,
    pub mode_key: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_exit_confirmation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_capture: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_config: Option<Map<String, Value>>,
}

pub type SessionData = Map<String, Value>;
pub type VisitorData = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Commands dispatched to the external widget through `execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetCommand {
    Open,
    Close,
    Show,
    Hide,
    SendMessage { text: String, send: bool },
    OpenBottomSheet { url: String },
    StartGame { id: String, options: GameOptions },
    Embed { container_id: String },
    Unmount { container_id: String },
}

impl WidgetCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WidgetCommand::Open => "widget:open",
            WidgetCommand::Close => "widget:close",
            WidgetCommand::Show => "widget:show",
            WidgetCommand::Hide => "widget:hide",
            WidgetCommand::SendMessage { .. } => "message:send",
            WidgetCommand::OpenBottomSheet { .. } => "bottomSheet:open",
            WidgetCommand::StartGame { .. } => "game:start",
            WidgetCommand::Embed { .. } => "widget:embed",
            WidgetCommand::Unmount { .. } => "widget:unmount",
        }
    }

    pub fn args(&self) -> Vec<Value> {
        match self {
            WidgetCommand::Open | WidgetCommand::Close | WidgetCommand::Show | WidgetCommand::Hide => {
                vec![]
            }
            WidgetCommand::SendMessage { text, send } => vec![json!({ "text": text, "send": send })],
            WidgetCommand::OpenBottomSheet { url } => vec![json!({ "url": url })],
            WidgetCommand::StartGame { id, options } => {
                let mut payload = match serde_json::to_value(options) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                payload.insert("id".into(), Value::String(id.clone()));
                vec![Value::Object(payload)]
            }
            WidgetCommand::Embed { container_id } | WidgetCommand::Unmount { container_id } => {
                vec![json!({ "containerId": container_id })]
            }
        }
    }
}

/// Keys written through the external widget's `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKey {
    Session,
    Visitor,
    Contact,
}

impl DataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKey::Session => "session:data",
            DataKey::Visitor => "visitor:data",
            DataKey::Contact => "contact:data",
        }
    }
}

/// Event names the external widget emits.
pub mod events {
    pub const INIT: &str = "init";
    pub const MESSAGE_RECEIVED: &str = "message:received";
    pub const ESCALATED_TO_HUMAN: &str = "escalatedToHuman";
    pub const WIDGET_POPUP: &str = "widget:popup";
    pub const AI_ACTION_PREFIX: &str = "ai:action:";

    pub fn ai_action(name: &str) -> String {
        format!("{AI_ACTION_PREFIX}{name}")
    }
}
