//! YourGPT chatbot SDK.
//!
//! Loads the hosted chat widget into a page, queues commands issued before the widget is
//! ready, adapts its untyped events into typed callbacks and exposes the whole lifecycle to
//! component trees through [`bindings`].

pub mod actions;
pub mod bindings;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod emitter;
pub mod env;
pub mod error;
pub mod loader;
pub mod sdk;
pub mod types;

pub use actions::{
    ActionHelpers, ActionInvocation, AiActionData, AiActionHandler, ConfirmOptions, handler,
    typed_handler,
};
pub use bridge::{RecordingBridge, WidgetBridge, WidgetSlot};
pub use config::{SdkConfig, validate_url, validate_widget_id};
pub use emitter::{Event, EventEmitter, Unsubscribe};
pub use env::{AssetFetcher, Document, Environment, Page, ScriptedFetcher};
pub use error::{ErrorCode, Result, SdkError};
pub use sdk::{ChatbotSdk, SdkHolder, StateChange};
pub use types::{
    ContactData, EscalationData, GameOptions, MessageData, Sender, SessionData, VisitorData,
    WidgetState,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
