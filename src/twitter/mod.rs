//! Filtered-stream client
//!
//! This module provides:
//! - The `StreamConnector` seam the workers talk to
//! - The OAuth 1.0a request signer
//! - Newline-delimited JSON framing for the streaming body
//! - The HTTP filtered-stream connector
//!
//! Workers never see HTTP details; they only receive a stream of
//! decoded events or errors.

pub mod filter;
pub mod framing;
pub mod oauth;
pub mod source;
