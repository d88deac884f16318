use crate::bridge::{BridgeCallback, BridgeEvent};
use crate::error::{Result, SdkError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOptions {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_label: Option<String>,
}

/// Callbacks the external widget hands to an AI action handler.
pub trait ActionHelpers {
    fn respond(&self, message: &str);
    fn confirm(&self, options: &ConfirmOptions) -> bool;
}

struct DetachedHelpers;

impl ActionHelpers for DetachedHelpers {
    fn respond(&self, message: &str) {
        warn!(%message, "AI action responded without widget helpers");
    }

    fn confirm(&self, options: &ConfirmOptions) -> bool {
        warn!(title = %options.title, "AI action confirm without widget helpers; rejecting");
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as produced by the assistant.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub id: String,
    pub function: FunctionCall,
}

impl ActionInvocation {
    /// Decodes the argument string into the shape this action expects.
    pub fn arguments<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = if self.function.arguments.trim().is_empty() {
            "{}"
        } else {
            self.function.arguments.as_str()
        };
        serde_json::from_str(raw).map_err(|err| SdkError::MalformedActionArguments {
            action: self.function.name.clone(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiActionData {
    #[serde(default)]
    pub action: Vec<ActionInvocation>,
    #[serde(default)]
    pub session_data: Value,
    #[serde(default)]
    pub session_uid: i64,
    #[serde(default)]
    pub message_id: Value,
}

impl AiActionData {
    pub fn invocation(&self) -> Option<&ActionInvocation> {
        self.action.first()
    }
}

pub type AiActionHandler = Rc<dyn Fn(&AiActionData, &dyn ActionHelpers) -> anyhow::Result<()>>;

pub fn handler(
    f: impl Fn(&AiActionData, &dyn ActionHelpers) -> anyhow::Result<()> + 'static,
) -> AiActionHandler {
    Rc::new(f)
}

/// Wraps a handler that wants decoded arguments of type `T`.
///
/// A payload without an invocation, or with arguments that do not decode into `T`, fails
/// with `MalformedActionArguments` and the inner handler is not called.
pub fn typed_handler<T, F>(name: &str, f: F) -> AiActionHandler
where
    T: DeserializeOwned + 'static,
    F: Fn(T, &dyn ActionHelpers) -> anyhow::Result<()> + 'static,
{
    let name = name.to_string();
    Rc::new(move |data: &AiActionData, helpers: &dyn ActionHelpers| {
        let invocation = data
            .invocation()
            .ok_or_else(|| SdkError::MalformedActionArguments {
                action: name.clone(),
                reason: "payload carries no invocation".into(),
            })?;
        let args = invocation.arguments::<T>()?;
        f(args, helpers)
    })
}

/// Builds the listener subscribed under `ai:action:<name>`; handler failures are logged here
/// and never reach the widget or other listeners.
pub(crate) fn bridge_listener(name: &str, handler: AiActionHandler) -> BridgeCallback {
    let name = name.to_string();
    Rc::new(move |event: &BridgeEvent<'_>| {
        let data: AiActionData = match serde_json::from_value(event.payload.clone()) {
            Ok(data) => data,
            Err(err) => {
                warn!(action = %name, %err, "dropping malformed AI action payload");
                return;
            }
        };
        let helpers: &dyn ActionHelpers = match event.helpers {
            Some(helpers) => helpers,
            None => &DetachedHelpers,
        };
        match catch_unwind(AssertUnwindSafe(|| handler(&data, helpers))) {
            Ok(Ok(())) => debug!(action = %name, "AI action handled"),
            Ok(Err(err)) => error!(action = %name, ?err, "AI action handler failed"),
            Err(_) => error!(action = %name, "AI action handler panicked"),
        }
    })
}

pub(crate) struct RegisteredAction {
    pub handler: AiActionHandler,
    pub listener: BridgeCallback,
}

/// Name → handler map that keeps insertion order.
#[derive(Default)]
pub(crate) struct ActionRegistry {
    entries: Vec<(String, RegisteredAction)>,
}

impl ActionRegistry {
    /// Returns the entry this one replaced, if any.
    pub fn insert(&mut self, name: &str, action: RegisteredAction) -> Option<RegisteredAction> {
        if let Some((_, slot)) = self.entries.iter_mut().find(|(n, _)| n == name) {
            return Some(std::mem::replace(slot, action));
        }
        self.entries.push((name.to_string(), action));
        None
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredAction> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAction> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn drain(&mut self) -> Vec<(String, RegisteredAction)> {
        std::mem::take(&mut self.entries)
    }
}
