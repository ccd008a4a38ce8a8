// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Core
//!
//! This module provides the error taxonomy for the messaging abstraction.
//! The `MessagingError` enum covers every failure class a caller can observe:
//! connection setup, channel derivation, topology declaration, subscription
//! setup, payload encoding/decoding, publishing, and delivery settlement.

use thiserror::Error;

/// Represents errors that can occur in the messaging core.
///
/// Connection errors are fatal to the owning process. Topology and subscribe
/// errors are fatal to one subscription only. Encode, decode and publish
/// errors are recoverable per-message failures that the caller decides how
/// to handle.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessagingError {
    /// Error loading or parsing the broker settings
    #[error("invalid broker configuration: {0}")]
    Config(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect to the broker: {0}")]
    Connection(String),

    /// Error deriving a channel from an established connection
    #[error("failure to create a channel: {0}")]
    Channel(String),

    /// Error declaring a queue/exchange or binding them
    #[error("topology rejected by the broker: {0}")]
    Topology(String),

    /// Error setting up a delivery stream for a subscription
    #[error("failure to start consuming: {0}")]
    Subscribe(String),

    /// Error serializing a payload
    #[error("failure to encode payload: {0}")]
    Encode(String),

    /// Error deserializing a payload
    #[error("failure to decode payload: {0}")]
    Decode(String),

    /// Error writing a message to an exchange
    #[error("failure to publish: {0}")]
    Publish(String),

    /// Error settling a delivery with the broker
    #[error("failure to settle delivery: {0}")]
    Ack(String),
}
