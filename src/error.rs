use thiserror::Error;

/// Startup configuration failures.
///
/// Any of these aborts the process before a single stream worker is
/// started (exit code 1).
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("{key}: expected 6 comma-separated fields (label,account,minLon,minLat,maxLon,maxLat), got {found}")]
    BoundingBoxFields { key: String, found: usize },

    #[error("{key}: {reason}")]
    BoundingBoxRange { key: String, reason: String },

    #[error("{key} is not a supported bounding box slot (slots 1..={max})")]
    UnsupportedSlot { key: String, max: usize },

    #[error("no bounding boxes configured (set BOUNDING_BOX_1 .. BOUNDING_BOX_{0})")]
    NoBoundingBoxes(usize),

    #[error("account {account} ({key}) has no matching {missing}")]
    IncompleteAccount {
        key: String,
        account: String,
        missing: String,
    },
}

/// Credential lookup failures.
#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    #[error("unknown account '{0}': no OAuth token configured for it")]
    UnknownAccount(String),
}
