//! Host environment model. A [`Page`] stands in for the browser window: it owns the DOM
//! (a kuchiki tree), the global variables the widget script reads, the `$yourgptChatbot` slot
//! and the fetcher that decides whether an injected tag fires `load` or `error`.

use crate::bridge::{WidgetBridge, WidgetSlot};
use crate::error::{AssetKind, Result, SdkError};
use async_trait::async_trait;
use kuchiki::NodeRef;
use kuchiki::traits::*;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

pub const GLOBAL_WIDGET_UID: &str = "YOURGPT_WIDGET_UID";
pub const GLOBAL_WIDGET_ENDPOINT: &str = "$yourgptChatbot.WIDGET_ENDPOINT";
pub const GLOBAL_RENDER_MODE: &str = "YOURGPT_RENDER_MODE";

const BLANK_PAGE: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

pub struct Document {
    root: NodeRef,
}

impl Document {
    pub fn blank() -> Self {
        Self::parse(BLANK_PAGE)
    }

    pub fn parse(html: &str) -> Self {
        Self {
            root: kuchiki::parse_html().one(html),
        }
    }

    /// True when some `<tag>` carries `attr` with exactly `value`.
    pub fn has_element(&self, tag: &str, attr: &str, value: &str) -> bool {
        self.find(tag, attr, value).is_some()
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.find("*", "id", id).is_some()
    }

    pub fn count(&self, tag: &str, attr: &str, value: &str) -> usize {
        match self.root.select(tag) {
            Ok(nodes) => nodes
                .filter(|el| el.attributes.borrow().get(attr) == Some(value))
                .count(),
            Err(()) => 0,
        }
    }

    /// Attribute of the element with the given id.
    pub fn attribute(&self, id: &str, attr: &str) -> Option<String> {
        let node = self.find("*", "id", id)?;
        let element = node.as_element()?;
        element.attributes.borrow().get(attr).map(str::to_string)
    }

    /// Parses `html` and appends its nodes to the first element matching `parent`.
    pub fn append_html(&self, parent: &str, html: &str) -> Result<()> {
        let target = self
            .root
            .select_first(parent)
            .map_err(|()| SdkError::NotInBrowser("find a document parent element"))?;
        let wrapper_html = format!("<div id=\"__yourgpt_fragment_wrapper\">{html}</div>");
        let fragment_doc = kuchiki::parse_html().one(wrapper_html);
        if let Ok(wrapper) = fragment_doc.select_first("#__yourgpt_fragment_wrapper") {
            let children: Vec<_> = wrapper.as_node().children().collect();
            for child in children {
                target.as_node().append(child);
            }
        }
        Ok(())
    }

    pub fn remove_id(&self, id: &str) -> bool {
        match self.find("*", "id", id) {
            Some(node) => {
                node.detach();
                true
            }
            None => false,
        }
    }

    pub fn to_html(&self) -> String {
        self.root.to_string()
    }

    fn find(&self, tag: &str, attr: &str, value: &str) -> Option<NodeRef> {
        let mut nodes = self.root.select(tag).ok()?;
        nodes
            .find(|el| el.attributes.borrow().get(attr) == Some(value))
            .map(|el| el.as_node().clone())
    }
}

/// Produces the outcome of an injected `<script>`/`<link>` tag.
#[async_trait(?Send)]
pub trait AssetFetcher {
    async fn fetch(&self, page: &Page, kind: AssetKind, url: &str)
    -> std::result::Result<(), String>;
}

pub struct Page {
    document: Document,
    globals: RefCell<Map<String, Value>>,
    chatbot: WidgetSlot,
    fetcher: Rc<dyn AssetFetcher>,
}

impl Page {
    pub fn new(document: Document, fetcher: Rc<dyn AssetFetcher>) -> Rc<Self> {
        Rc::new(Self {
            document,
            globals: RefCell::new(Map::new()),
            chatbot: WidgetSlot::new(),
            fetcher,
        })
    }

    pub fn blank(fetcher: Rc<dyn AssetFetcher>) -> Rc<Self> {
        Self::new(Document::blank(), fetcher)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The `$yourgptChatbot` slot.
    pub fn chatbot(&self) -> &WidgetSlot {
        &self.chatbot
    }

    pub fn set_global(&self, key: &str, value: Value) {
        self.globals.borrow_mut().insert(key.to_string(), value);
    }

    pub fn global(&self, key: &str) -> Option<Value> {
        self.globals.borrow().get(key).cloned()
    }

    pub async fn fetch(&self, kind: AssetKind, url: &str) -> std::result::Result<(), String> {
        let fetcher = self.fetcher.clone();
        fetcher.fetch(self, kind, url).await
    }
}

/// Where the SDK runs. `Server` has no DOM; every DOM operation fails with `NotInBrowser`.
#[derive(Clone)]
pub enum Environment {
    Browser(Rc<Page>),
    Server,
}

impl Environment {
    pub fn browser(page: Rc<Page>) -> Self {
        Environment::Browser(page)
    }

    pub fn is_browser(&self) -> bool {
        matches!(self, Environment::Browser(_))
    }

    pub fn page(&self) -> Option<&Rc<Page>> {
        match self {
            Environment::Browser(page) => Some(page),
            Environment::Server => None,
        }
    }

    /// The page, or `NotInBrowser` naming the operation that needed it.
    pub fn require_page(&self, operation: &'static str) -> Result<&Rc<Page>> {
        self.page().ok_or(SdkError::NotInBrowser(operation))
    }
}

pub fn is_browser_environment(env: &Environment) -> bool {
    env.is_browser()
}

/// Fetcher with programmable outcomes. Loading the widget script attaches the configured
/// bridge to the page's `$yourgptChatbot` slot, the way the real script does when it runs.
#[derive(Default)]
pub struct ScriptedFetcher {
    failing: RefCell<HashSet<String>>,
    widget: RefCell<Option<Rc<dyn WidgetBridge>>>,
    fetched: RefCell<Vec<(AssetKind, String)>>,
    latency: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Rc<Self> {
        Rc::new(Self {
            latency,
            ..Default::default()
        })
    }

    pub fn fail(&self, url: &str) {
        self.failing.borrow_mut().insert(url.to_string());
    }

    pub fn attach_on_script_load(&self, widget: Rc<dyn WidgetBridge>) {
        *self.widget.borrow_mut() = Some(widget);
    }

    pub fn fetched(&self) -> Vec<(AssetKind, String)> {
        self.fetched.borrow().clone()
    }
}

#[async_trait(?Send)]
impl AssetFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        page: &Page,
        kind: AssetKind,
        url: &str,
    ) -> std::result::Result<(), String> {
        self.fetched.borrow_mut().push((kind.clone(), url.to_string()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.borrow().contains(url) {
            return Err(format!("{kind} request failed"));
        }
        if kind == AssetKind::Script {
            let widget = self.widget.borrow().clone();
            if let Some(widget) = widget {
                debug!(%url, "widget script executed; attaching bridge");
                page.chatbot().attach(widget);
            }
        }
        Ok(())
    }
}
