use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Machine-readable code attached to every [`SdkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[serde(rename = "MISSING_WIDGET_ID")]
    MissingIdentifier,
    #[serde(rename = "INVALID_WIDGET_ID")]
    InvalidIdentifierFormat,
    InvalidEndpoint,
    #[serde(rename = "NOT_BROWSER")]
    NotInBrowser,
    WidgetLoadFailed,
    AssetLoadFailed,
    Timeout,
    ContextMisuse,
    MalformedActionArguments,
    MalformedQueueEntry,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingIdentifier => "MISSING_WIDGET_ID",
            ErrorCode::InvalidIdentifierFormat => "INVALID_WIDGET_ID",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::NotInBrowser => "NOT_BROWSER",
            ErrorCode::WidgetLoadFailed => "WIDGET_LOAD_FAILED",
            ErrorCode::AssetLoadFailed => "ASSET_LOAD_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ContextMisuse => "CONTEXT_MISUSE",
            ErrorCode::MalformedActionArguments => "MALFORMED_ACTION_ARGUMENTS",
            ErrorCode::MalformedQueueEntry => "MALFORMED_QUEUE_ENTRY",
        }
    }

    /// Configuration and context errors must reach the caller untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::WidgetLoadFailed | ErrorCode::AssetLoadFailed | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Stylesheet,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Script => f.write_str("script"),
            AssetKind::Stylesheet => f.write_str("stylesheet"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    #[error("widget ID is required")]
    MissingIdentifier,
    #[error("invalid widget ID format: {0}")]
    InvalidIdentifierFormat(String),
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("cannot {0} in non-browser environment")]
    NotInBrowser(&'static str),
    #[error("failed to load widget: {0}")]
    WidgetLoadFailed(Box<SdkError>),
    #[error("failed to load {kind}: {url} ({reason})")]
    AssetLoadFailed {
        kind: AssetKind,
        url: String,
        reason: String,
    },
    #[error("timeout after {0}ms waiting for condition")]
    Timeout(u128),
    #[error("{0} must be used within a ChatbotProvider")]
    ContextMisuse(&'static str),
    #[error("malformed arguments for AI action {action}: {reason}")]
    MalformedActionArguments { action: String, reason: String },
    #[error("malformed command queue entry: {0}")]
    MalformedQueueEntry(String),
}

impl SdkError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SdkError::MissingIdentifier => ErrorCode::MissingIdentifier,
            SdkError::InvalidIdentifierFormat(_) => ErrorCode::InvalidIdentifierFormat,
            SdkError::InvalidEndpoint(_) => ErrorCode::InvalidEndpoint,
            SdkError::NotInBrowser(_) => ErrorCode::NotInBrowser,
            SdkError::WidgetLoadFailed(_) => ErrorCode::WidgetLoadFailed,
            SdkError::AssetLoadFailed { .. } => ErrorCode::AssetLoadFailed,
            SdkError::Timeout(_) => ErrorCode::Timeout,
            SdkError::ContextMisuse(_) => ErrorCode::ContextMisuse,
            SdkError::MalformedActionArguments { .. } => ErrorCode::MalformedActionArguments,
            SdkError::MalformedQueueEntry(_) => ErrorCode::MalformedQueueEntry,
        }
    }

    /// Whether this error came from configuration validation.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::MissingIdentifier
                | ErrorCode::InvalidIdentifierFormat
                | ErrorCode::InvalidEndpoint
        )
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;
