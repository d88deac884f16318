use crate::env::{Document, Environment};
use crate::error::{AssetKind, Result, SdkError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

pub const ROOT_CONTAINER_ID: &str = "yourgpt_root";

const ROOT_CONTAINER_STYLE: &str = "position: fixed; z-index: 2147483647; top: 0; left: 0; \
     width: 100%; height: 100%; pointer-events: none;";

/// Inserts the widget's `<script>` into `<head>` unless one with this exact `src` exists.
/// Returns whether a tag was inserted.
pub fn insert_script_tag(document: &Document, url: &str) -> Result<bool> {
    if document.has_element("script", "src", url) {
        return Ok(false);
    }
    document.append_html(
        "head",
        &format!(
            "<script src=\"{}\" type=\"module\" async></script>",
            escape_html(url)
        ),
    )?;
    Ok(true)
}

/// Stylesheet counterpart of [`insert_script_tag`], keyed on `href`.
pub fn insert_stylesheet_tag(document: &Document, url: &str) -> Result<bool> {
    if document.has_element("link", "href", url) {
        return Ok(false);
    }
    document.append_html(
        "head",
        &format!(
            "<link rel=\"stylesheet\" type=\"text/css\" href=\"{}\">",
            escape_html(url)
        ),
    )?;
    Ok(true)
}

/// Appends the fixed, full-viewport, click-through root container to `<body>` once.
pub fn ensure_root_container(document: &Document) -> Result<bool> {
    if document.has_id(ROOT_CONTAINER_ID) {
        return Ok(false);
    }
    document.append_html(
        "body",
        &format!("<div id=\"{ROOT_CONTAINER_ID}\" style=\"{ROOT_CONTAINER_STYLE}\"></div>"),
    )?;
    Ok(true)
}

pub async fn load_script(env: &Environment, url: &str) -> Result<()> {
    load_asset(env, AssetKind::Script, url).await
}

pub async fn load_stylesheet(env: &Environment, url: &str) -> Result<()> {
    load_asset(env, AssetKind::Stylesheet, url).await
}

async fn load_asset(env: &Environment, kind: AssetKind, url: &str) -> Result<()> {
    let page = match kind {
        AssetKind::Script => env.require_page("load script")?,
        AssetKind::Stylesheet => env.require_page("load CSS")?,
    };
    let inserted = match kind {
        AssetKind::Script => insert_script_tag(page.document(), url)?,
        AssetKind::Stylesheet => insert_stylesheet_tag(page.document(), url)?,
    };
    if !inserted {
        debug!(%kind, %url, "asset already present; skipping injection");
        return Ok(());
    }
    page.fetch(kind.clone(), url)
        .await
        .map_err(|reason| SdkError::AssetLoadFailed {
            kind,
            url: url.to_string(),
            reason,
        })
}

/// Polls `predicate` every `interval` until it holds or `timeout` elapses.
pub async fn wait_for_condition(
    predicate: impl Fn() -> bool,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let start = Instant::now();
    while !predicate() {
        if start.elapsed() > timeout {
            return Err(SdkError::Timeout(timeout.as_millis()));
        }
        sleep(interval).await;
    }
    Ok(())
}

/// Runs `operation` up to `max_retries + 1` times, sleeping `base_delay * 2^attempt` between
/// attempts, and returns the last error once attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_retries => return Err(err),
            Err(err) => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                let delay = base_delay.saturating_mul(factor);
                warn!(attempt = attempt + 1, %err, ?delay, "operation failed; retrying");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
