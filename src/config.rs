use crate::error::{Result, SdkError};
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Endpoint used by white-label deployments when no explicit endpoint is configured.
pub const WHITE_LABEL_ENDPOINT: &str = "https://widget.d4ai.chat";

static WIDGET_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("widget id pattern compiles")
});

/// SDK configuration, fixed once `init` accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    pub widget_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_auto_load")]
    pub auto_load: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, rename = "whitelabel", alias = "whiteLabel")]
    pub white_label: bool,
}

fn default_auto_load() -> bool {
    true
}

impl SdkConfig {
    pub fn new(widget_id: impl Into<String>) -> Self {
        Self {
            widget_id: widget_id.into(),
            endpoint: None,
            auto_load: true,
            debug: false,
            white_label: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_white_label(mut self, white_label: bool) -> Self {
        self.white_label = white_label;
        self
    }

    /// Checks the identifier and endpoint. Order matters: a missing identifier wins.
    pub fn validate(&self) -> Result<()> {
        if self.widget_id.is_empty() {
            return Err(SdkError::MissingIdentifier);
        }
        if !validate_widget_id(&self.widget_id) {
            return Err(SdkError::InvalidIdentifierFormat(self.widget_id.clone()));
        }
        if let Some(endpoint) = self.endpoint.as_deref()
            && !endpoint.is_empty()
            && !validate_url(endpoint)
        {
            return Err(SdkError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(())
    }

    /// Explicit endpoint, else the white-label default, else empty (host-relative assets).
    pub fn resolved_endpoint(&self) -> String {
        match self.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint.trim_end_matches('/').to_string(),
            _ if self.white_label => WHITE_LABEL_ENDPOINT.to_string(),
            _ => String::new(),
        }
    }

    pub fn stylesheet_url(&self) -> String {
        format!("{}/chatbot.css", self.resolved_endpoint())
    }

    pub fn script_url(&self) -> String {
        format!("{}/chatbot.js", self.resolved_endpoint())
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let widget_id =
            std::env::var("YOURGPT_WIDGET_ID").context("YOURGPT_WIDGET_ID must be set")?;
        let endpoint = std::env::var("YOURGPT_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty());
        let auto_load = std::env::var("YOURGPT_AUTO_LOAD")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let debug = std::env::var("YOURGPT_DEBUG")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let white_label = std::env::var("YOURGPT_WHITELABEL")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            widget_id,
            endpoint,
            auto_load,
            debug,
            white_label,
        })
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("parsing sdk config toml")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading sdk config {:?}", path))?;
        Self::from_toml_str(&raw)
    }
}

/// UUID v4 shape: `xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx`, any case.
pub fn validate_widget_id(widget_id: &str) -> bool {
    WIDGET_ID_RE.is_match(widget_id)
}

pub fn validate_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok()
}
