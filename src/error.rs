use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for an automation run.
///
/// Configuration and spreadsheet errors abort before any DOM mutation
/// happens. Errors raised while a row is being processed are caught at the
/// row boundary and handled according to the run profile's failure policy.
/// Nothing is ever retried automatically; recoverable failures are skipped.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("spreadsheet download failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("spreadsheet contained no usable rows")]
    EmptyResult,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("option \"{wanted}\" not found in dropdown `{select}`")]
    MissingOption { select: String, wanted: String },

    #[error("expected control is missing: {0}")]
    MissingControl(String),

    #[error(transparent)]
    WebDriver(#[from] thirtyfour::error::WebDriverError),
}

impl AutomationError {
    pub fn timeout(selector: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            selector: selector.into(),
            timeout,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
