// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module owns the single broker connection a process holds for its
//! lifetime. Publishers and subscribers each derive their own lightweight
//! channel from it; channels are never shared between concurrent writers,
//! the connection may safely derive many of them concurrently.

use crate::{config::BrokerConfig, errors::MessagingError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use tracing::{debug, error};

/// Reply code sent on a graceful close.
const CLOSE_REPLY_CODE: u16 = 200;

/// Owns the process-wide connection to the broker.
///
/// Opened once at startup, closed once on shutdown. Every publisher and
/// subscriber gets its own channel via [`ConnectionManager::create_channel`].
pub struct ConnectionManager {
    connection: Connection,
}

impl ConnectionManager {
    /// Opens a connection to the broker described by `cfg`.
    ///
    /// Fails with [`MessagingError::Connection`] on an unreachable host,
    /// rejected credentials or protocol negotiation failure. Such a failure
    /// is fatal to the owning process and should abort startup.
    pub async fn connect(cfg: &BrokerConfig) -> Result<ConnectionManager, MessagingError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        match Connection::connect(&cfg.uri(), options).await {
            Ok(connection) => {
                debug!("amqp connected");
                Ok(ConnectionManager { connection })
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(MessagingError::Connection(err.to_string()))
            }
        }
    }

    /// Derives a fresh channel from the connection.
    ///
    /// Each channel must end up owned by exactly one publisher or one
    /// subscriber.
    pub async fn create_channel(&self) -> Result<Channel, MessagingError> {
        match self.connection.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(channel)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(MessagingError::Channel(err.to_string()))
            }
        }
    }

    /// Whether the underlying connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Closes the connection and releases all derived channels.
    ///
    /// Idempotent: closing an already-closed connection is a no-op. Delivery
    /// loops still running on this connection terminate when their streams
    /// end.
    pub async fn close(&self) -> Result<(), MessagingError> {
        if !self.connection.status().connected() {
            return Ok(());
        }

        match self.connection.close(CLOSE_REPLY_CODE, "shutdown").await {
            Ok(()) => {
                debug!("amqp connection closed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "error closing the connection");
                Err(MessagingError::Connection(err.to_string()))
            }
        }
    }
}
