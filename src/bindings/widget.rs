use super::{Scope, Subscriptions};
use crate::config::SdkConfig;
use crate::env::{Environment, GLOBAL_RENDER_MODE};
use crate::error::SdkError;
use crate::loader::{escape_html, generate_id};
use crate::sdk::{ChatbotSdk, SdkHolder};
use crate::types::{EscalationData, MessageData};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

/// True when the page asked for the widget to render inside a container rather than as a
/// floating overlay.
pub fn is_embedded_mode(env: &Environment) -> bool {
    env.page()
        .and_then(|page| page.global(GLOBAL_RENDER_MODE))
        .is_some_and(|mode| mode.as_str() == Some("embedded"))
}

#[derive(Clone)]
pub struct WidgetProps {
    pub config: SdkConfig,
    pub container_id: Option<String>,
    pub class_name: Option<String>,
    pub on_error: Option<Rc<dyn Fn(&SdkError)>>,
    pub on_init: Option<Rc<dyn Fn()>>,
    pub on_message_received: Option<Rc<dyn Fn(&MessageData)>>,
    pub on_escalated_to_human: Option<Rc<dyn Fn(&EscalationData)>>,
    pub on_widget_popup: Option<Rc<dyn Fn(bool)>>,
}

impl WidgetProps {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            container_id: None,
            class_name: None,
            on_error: None,
            on_init: None,
            on_message_received: None,
            on_escalated_to_human: None,
            on_widget_popup: None,
        }
    }
}

/// Declarative mount point for the widget.
pub struct WidgetMount {
    holder: SdkHolder,
    props: WidgetProps,
    container_id: String,
    started: Cell<bool>,
    mounted: Cell<bool>,
    /// Whether `start` appended the container; a host-provided element is left alone.
    rendered: Cell<bool>,
    embedded: RefCell<Option<Rc<ChatbotSdk>>>,
    error: RefCell<Option<SdkError>>,
    subscriptions: Subscriptions,
}

impl WidgetMount {
    pub fn mount(scope: &Scope, holder: SdkHolder, props: WidgetProps) -> Rc<Self> {
        let container_id = props
            .container_id
            .clone()
            .unwrap_or_else(|| format!("yourgpt-widget-{}", generate_id()));
        let widget = Rc::new(Self {
            holder,
            props,
            container_id,
            started: Cell::new(false),
            mounted: Cell::new(true),
            rendered: Cell::new(false),
            embedded: RefCell::new(None),
            error: RefCell::new(None),
            subscriptions: Subscriptions::default(),
        });
        let weak = Rc::downgrade(&widget);
        scope.on_unmount(move || {
            if let Some(widget) = weak.upgrade() {
                widget.cleanup();
            }
        });
        widget
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn error(&self) -> Option<SdkError> {
        self.error.borrow().clone()
    }

    /// Markup for the container, or nothing outside a browser. The container is only
    /// visible in embedded mode.
    pub fn render(&self) -> Option<String> {
        let env = self.holder.environment();
        if !env.is_browser() {
            return None;
        }
        let style = if is_embedded_mode(env) {
            "width: 100%; height: 100%;"
        } else {
            "display: none;"
        };
        let class = self
            .props
            .class_name
            .as_deref()
            .map(|class| format!(" class=\"{}\"", escape_html(class)))
            .unwrap_or_default();
        Some(format!(
            "<div id=\"{}\"{class} style=\"{style}\" data-yourgpt-widget=\"true\"></div>",
            escape_html(&self.container_id)
        ))
    }

    /// Effect half of the mount: places the container, initializes the SDK, wires the
    /// callbacks and, in embedded mode, hands the container to the widget.
    pub async fn start(self: &Rc<Self>) {
        if self.started.replace(true) {
            return;
        }
        let Some(page) = self.holder.environment().page().cloned() else {
            debug!("not in a browser; widget mount stays empty");
            return;
        };
        if !page.document().has_id(&self.container_id) {
            if let Some(markup) = self.render() {
                if let Err(err) = page.document().append_html("body", &markup) {
                    self.fail(err);
                    return;
                }
                self.rendered.set(true);
            }
        }

        let sdk = match self.holder.init(self.props.config.clone()).await {
            Ok(sdk) => sdk,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        if !self.mounted.get() {
            return;
        }
        self.wire_callbacks(&sdk);
        if is_embedded_mode(self.holder.environment()) {
            sdk.embed(&self.container_id);
            *self.embedded.borrow_mut() = Some(sdk);
        }
    }

    fn wire_callbacks(&self, sdk: &ChatbotSdk) {
        let props = &self.props;
        if let Some(cb) = props.on_init.clone() {
            let _ = self.subscriptions.track(sdk.on_init(move || cb()));
        }
        if let Some(cb) = props.on_message_received.clone() {
            let _ = self
                .subscriptions
                .track(sdk.on_message_received(move |message| cb(message)));
        }
        if let Some(cb) = props.on_escalated_to_human.clone() {
            let _ = self
                .subscriptions
                .track(sdk.on_escalated_to_human(move |data| cb(data)));
        }
        if let Some(cb) = props.on_widget_popup.clone() {
            let _ = self
                .subscriptions
                .track(sdk.on_widget_popup(move |open| cb(open)));
        }
    }

    fn fail(&self, err: SdkError) {
        warn!(%err, container = %self.container_id, "widget mount failed");
        *self.error.borrow_mut() = Some(err.clone());
        if let Some(on_error) = &self.props.on_error {
            on_error(&err);
        }
    }

    fn cleanup(&self) {
        self.mounted.set(false);
        self.subscriptions.release_all();
        let embedded = self.embedded.borrow_mut().take();
        if let Some(sdk) = embedded {
            sdk.unmount_embedded(&self.container_id);
        }
        if self.rendered.replace(false) {
            if let Some(page) = self.holder.environment().page() {
                page.document().remove_id(&self.container_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_subscriptions(&self) -> usize {
        self.subscriptions.live()
    }
}
