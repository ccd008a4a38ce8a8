// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Topology Setup
//!
//! This module declares queues and exchanges and binds queues to routing
//! keys. A queue is one of two kinds: durable queues survive broker restart
//! and are shared by competing consumers, transient queues are exclusive to
//! the declaring connection and vanish when it goes away. Every queue
//! declaration carries a dead-letter-exchange argument so discarded messages
//! have somewhere to go.
//!
//! Exchange and queue names are passed in by the caller at declaration time;
//! nothing here hardcodes the game's topology.

use crate::{connection::ConnectionManager, errors::MessagingError};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Queue,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Lifecycle policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Survives broker restart, shared by multiple competing consumers.
    Durable,
    /// Exclusive to the declaring connection, auto-deleted when it closes.
    Transient,
}

/// Routing behavior of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Dot-segmented wildcard match (`*`, `#`).
    Topic,
    /// Delivered to every bound queue regardless of key.
    Fanout,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

/// A named exchange to declare idempotently.
///
/// Redeclaring an exchange with identical parameters is a no-op on the
/// broker; declaring all well-known exchanges at startup is therefore safe
/// for every process to do.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeKind,
}

impl ExchangeDefinition {
    pub fn new(name: &str, kind: ExchangeKind) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind,
        }
    }
}

/// Everything needed to declare a queue and bind it to an exchange.
///
/// The dead-letter exchange is explicit per binding. The broker requires it
/// to be set identically on every declaration of a given queue name;
/// conflicting redeclaration fails with a topology error.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub(crate) exchange: String,
    pub(crate) queue: String,
    pub(crate) routing_key: String,
    pub(crate) kind: QueueKind,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueBinding {
    pub fn new(exchange: &str, queue: &str, routing_key: &str, kind: QueueKind) -> QueueBinding {
        QueueBinding {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
            kind,
            dead_letter_exchange: None,
        }
    }

    /// Routes rejected and expired messages to the named fallback exchange.
    pub fn dead_letter(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }
}

/// Maps a queue kind to the broker declaration flags.
pub(crate) fn declare_options(kind: QueueKind) -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: kind == QueueKind::Durable,
        exclusive: kind == QueueKind::Transient,
        auto_delete: kind == QueueKind::Transient,
        nowait: false,
    }
}

/// Builds the queue arguments table, carrying the dead-letter exchange when
/// one is configured.
pub(crate) fn queue_arguments(dead_letter_exchange: Option<&str>) -> FieldTable {
    let mut args = BTreeMap::new();

    if let Some(dlx) = dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(dlx)),
        );
    }

    FieldTable::from(args)
}

/// Declares the queue described by `binding` and binds it to its exchange.
///
/// Derives a fresh channel from the connection; on success the caller owns
/// it. Any broker-side rejection (parameter mismatch on redeclaration,
/// absent exchange) yields [`MessagingError::Topology`] and the channel must
/// be discarded.
pub async fn declare_and_bind(
    conn: &ConnectionManager,
    binding: &QueueBinding,
) -> Result<(Channel, Queue), MessagingError> {
    let channel = conn.create_channel().await?;

    debug!("declaring queue: {}", binding.queue);

    let queue = match channel
        .queue_declare(
            &binding.queue,
            declare_options(binding.kind),
            queue_arguments(binding.dead_letter_exchange.as_deref()),
        )
        .await
    {
        Ok(queue) => Ok(queue),
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = binding.queue,
                "error to declare the queue"
            );
            Err(MessagingError::Topology(err.to_string()))
        }
    }?;

    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue, binding.exchange, binding.routing_key
    );

    match channel
        .queue_bind(
            &binding.queue,
            &binding.exchange,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Ok(()) => Ok((channel, queue)),
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(MessagingError::Topology(err.to_string()))
        }
    }
}

/// Declares a set of durable exchanges on a short-lived channel.
///
/// Meant for the well-known exchanges every process expects to exist.
pub async fn declare_exchanges(
    conn: &ConnectionManager,
    exchanges: &[ExchangeDefinition],
) -> Result<(), MessagingError> {
    let channel = conn.create_channel().await?;

    for def in exchanges {
        debug!("declaring exchange: {}", def.name);

        match channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(MessagingError::Topology(err.to_string()))
            }
        }?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_queues_are_shared_and_persistent() {
        let opts = declare_options(QueueKind::Durable);
        assert!(opts.durable);
        assert!(!opts.exclusive);
        assert!(!opts.auto_delete);
        assert!(!opts.passive);
    }

    #[test]
    fn transient_queues_are_exclusive_and_auto_deleted() {
        let opts = declare_options(QueueKind::Transient);
        assert!(!opts.durable);
        assert!(opts.exclusive);
        assert!(opts.auto_delete);
    }

    #[test]
    fn arguments_carry_dead_letter_exchange() {
        let args = queue_arguments(Some("game_dlx"));
        let value = args
            .inner()
            .get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE))
            .cloned();
        assert_eq!(
            value,
            Some(AMQPValue::LongString(LongString::from("game_dlx")))
        );
    }

    #[test]
    fn arguments_empty_without_dead_letter_exchange() {
        let args = queue_arguments(None);
        assert!(args.inner().is_empty());
    }

    #[test]
    fn binding_builder_sets_dead_letter() {
        let binding = QueueBinding::new("game_topic", "war", "war_recognitions.*", QueueKind::Durable)
            .dead_letter("game_dlx");
        assert_eq!(binding.dead_letter_exchange.as_deref(), Some("game_dlx"));
        assert_eq!(binding.queue_name(), "war");
    }
}
